use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use tracing_subscriber::EnvFilter;

use polyarc_sync::polyarc::{
    entry::{Entry, FileType, Timespec},
    filter::FilterCode,
    format::FormatCode,
    linkify::{LinkResolver, Resolved},
    matching::MatchBuilder,
    Error, Severity,
};
use polyarc_sync::{
    write::write_entry_with_data, DiskWriter, ExtractFlags, ReadBuilder, WriteBuilder,
};

#[derive(Parser)]
#[command(author, version, about = "multi-format archive tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the entries of an archive
    List {
        /// Archive file (stdin when absent)
        #[arg(short = 'f')]
        file: Option<PathBuf>,

        /// Show sizes, modes and times
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Extract an archive to a directory
    Extract {
        /// Archive file (stdin when absent)
        #[arg(short = 'f')]
        file: Option<PathBuf>,

        /// Change to this directory before extracting
        #[arg(short = 'C', default_value = ".")]
        directory: PathBuf,

        /// Exclude entries matching this glob (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Disable the path security checks
        #[arg(short = 'P', long)]
        insecure: bool,

        /// Password for encrypted zip entries
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Create an archive from files
    Create {
        /// Output archive file (stdout when absent)
        #[arg(short = 'f')]
        file: Option<PathBuf>,

        /// Container format
        #[arg(long, default_value = "pax")]
        format: String,

        /// gzip the output
        #[arg(short = 'z')]
        gzip: bool,

        /// bzip2 the output
        #[arg(short = 'j')]
        bzip2: bool,

        /// zstd the output
        #[arg(long)]
        zstd: bool,

        /// lz4 the output
        #[arg(long)]
        lz4: bool,

        /// Files and directories to add
        paths: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(soft_errors) if soft_errors == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("polyarc: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<u32, Error> {
    match cli.command {
        Commands::List { file, verbose } => list(file, verbose),
        Commands::Extract {
            file,
            directory,
            exclude,
            insecure,
            passphrase,
        } => extract(file, directory, exclude, insecure, passphrase),
        Commands::Create {
            file,
            format,
            gzip,
            bzip2,
            zstd,
            lz4,
            paths,
        } => create(file, format, gzip, bzip2, zstd, lz4, paths),
    }
}

fn bad_arg(e: impl ToString) -> Error {
    Error::IO(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

fn open_input<'a>(file: Option<PathBuf>) -> Result<Box<dyn Read + 'a>, Error> {
    Ok(match file {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    })
}

fn list(file: Option<PathBuf>, verbose: bool) -> Result<u32, Error> {
    let mut reader = ReadBuilder::new().open(open_input(file)?)?;
    while let Some(entry) = reader.next_header()? {
        if verbose {
            let size = entry.size.unwrap_or(0);
            let mtime = entry.mtime.unwrap_or(Timespec::from_secs(0));
            println!(
                "{:o}\t{}\t{}\t{}",
                entry.mode.unwrap_or(0),
                format_size(size, BINARY),
                mtime,
                entry.pathname()
            );
        } else {
            println!("{}", entry.pathname());
        }
        reader.read_data_skip()?;
    }
    Ok(0)
}

fn extract(
    file: Option<PathBuf>,
    directory: PathBuf,
    exclude: Vec<String>,
    insecure: bool,
    passphrase: Option<String>,
) -> Result<u32, Error> {
    let mut builder = ReadBuilder::new();
    if let Some(pass) = passphrase {
        builder = builder.passphrase(pass);
    }
    let mut reader = builder.open(open_input(file)?)?;

    let mut matcher = MatchBuilder::new();
    for pattern in &exclude {
        matcher = matcher.exclude(pattern).map_err(bad_arg)?;
    }
    let matcher = matcher.build().map_err(bad_arg)?;

    let flags = if insecure {
        ExtractFlags::PERM | ExtractFlags::TIME | ExtractFlags::SPARSE
    } else {
        ExtractFlags::default()
    };
    let mut disk = DiskWriter::with_flags(&directory, flags);

    let mut soft_errors = 0u32;
    while let Some(entry) = reader.next_header()? {
        if matcher.excluded(entry) {
            reader.read_data_skip()?;
            continue;
        }
        match disk.extract_entry(&mut reader) {
            Ok(()) => {}
            Err(e) if e.severity() < Severity::Fatal => {
                eprintln!("polyarc: {}: {e}", reader.entry().map(Entry::pathname).unwrap_or_default());
                soft_errors += 1;
            }
            Err(e) => return Err(e),
        }
    }
    disk.finish()?;
    soft_errors += disk.warnings().len() as u32;
    for w in disk.warnings() {
        eprintln!("polyarc: {w}");
    }
    Ok(soft_errors)
}

fn entry_from_path(path: &Path, meta: &fs::Metadata) -> Entry {
    let mut entry = Entry::new();
    entry.set_pathname(path.to_string_lossy());
    entry.filetype = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::Regular
    };
    entry.size = meta.is_file().then(|| meta.len());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        entry.mode = Some(meta.mode() & 0o7777);
        entry.uid = Some(meta.uid() as i64);
        entry.gid = Some(meta.gid() as i64);
        entry.mtime = Some(Timespec {
            secs: meta.mtime(),
            nanos: meta.mtime_nsec() as u32,
        });
        entry.nlink = Some(meta.nlink() as u32);
        entry.ino = Some(meta.ino());
        entry.dev = Some((meta.dev() >> 8, meta.dev() & 0xff));
    }

    entry
}

fn create(
    file: Option<PathBuf>,
    format: String,
    gzip: bool,
    bzip2: bool,
    zstd: bool,
    lz4: bool,
    paths: Vec<PathBuf>,
) -> Result<u32, Error> {
    let format = FormatCode::by_name(&format).ok_or_else(|| bad_arg(format!("unknown format {format}")))?;

    let mut builder = WriteBuilder::new().format(format);
    if gzip {
        builder = builder.add_filter(FilterCode::Gzip);
    }
    if bzip2 {
        builder = builder.add_filter(FilterCode::Bzip2);
    }
    if zstd {
        builder = builder.add_filter(FilterCode::Zstd);
    }
    if lz4 {
        builder = builder.add_filter(FilterCode::Lz4);
    }

    let sink: Box<dyn io::Write> = match file {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    let mut writer = builder.open(sink)?;
    let mut resolver = LinkResolver::new();

    let mut soft_errors = 0u32;
    for path in paths {
        if let Err(e) = add_path(&mut writer, &mut resolver, &path) {
            eprintln!("polyarc: {}: {e}", path.display());
            soft_errors += 1;
        }
    }
    for entry in resolver.flush() {
        write_entry_with_data(&mut writer, &entry, &[])?;
    }
    writer.close()?;
    Ok(soft_errors)
}

fn add_path(
    writer: &mut polyarc_sync::ArchiveWriter<'_>,
    resolver: &mut LinkResolver,
    path: &Path,
) -> Result<(), Error> {
    let meta = fs::symlink_metadata(path)?;
    let mut entry = entry_from_path(path, &meta);

    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        entry.symlink = Some(target.to_string_lossy().as_ref().into());
        write_entry_with_data(writer, &entry, &[])?;
        return Ok(());
    }

    if meta.is_dir() {
        write_entry_with_data(writer, &entry, &[])?;
        for child in fs::read_dir(path)? {
            add_path(writer, resolver, &child?.path())?;
        }
        return Ok(());
    }

    let data = fs::read(path)?;
    match resolver.apply(Box::new(entry)) {
        Resolved::Write(entry) => write_entry_with_data(writer, &entry, &data)?,
        Resolved::WriteLink(entry) => write_entry_with_data(writer, &entry, &[])?,
        Resolved::Deferred => {}
    }
    for ready in resolver.take_ready() {
        write_entry_with_data(writer, &ready, &[])?;
    }
    Ok(())
}
