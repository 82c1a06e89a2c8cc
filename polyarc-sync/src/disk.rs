//! Materializes entries on the local filesystem: secure path handling,
//! deferred directory fixups, forward-referenced links, sparse files, and
//! metadata restore.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use polyarc::{
    entry::{acl::AclSet, Entry, FileFlags, FileType, Timespec},
    error::FormatError,
    Error,
};
use tracing::{trace, warn};

use crate::read::ArchiveReader;

bitflags::bitflags! {
    /// What the extraction engine is allowed (and required) to restore,
    /// and which security rails are up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtractFlags: u32 {
        /// Restore uid/gid
        const OWNER                 = 1 << 0;
        /// Restore permission bits
        const PERM                  = 1 << 1;
        /// Restore timestamps
        const TIME                  = 1 << 2;
        /// Refuse to replace existing files
        const NO_OVERWRITE          = 1 << 3;
        /// Remove existing files before writing
        const UNLINK_FIRST          = 1 << 4;
        /// Restore ACLs
        const ACL                   = 1 << 5;
        /// Restore file flags
        const FFLAGS                = 1 << 6;
        /// Restore extended attributes
        const XATTR                 = 1 << 7;
        /// Refuse to extract through a symlinked intermediate directory
        const SECURE_SYMLINKS       = 1 << 8;
        /// Refuse `..` path components
        const SECURE_NODOTDOT       = 1 << 9;
        /// Refuse absolute paths
        const SECURE_NOABSOLUTEPATHS = 1 << 10;
        /// Seek past holes instead of writing zeros
        const SPARSE                = 1 << 11;
        /// Restore mac metadata (accepted, inert off-macOS)
        const MAC_METADATA          = 1 << 12;
    }
}

impl Default for ExtractFlags {
    fn default() -> Self {
        ExtractFlags::PERM
            | ExtractFlags::TIME
            | ExtractFlags::SPARSE
            | ExtractFlags::SECURE_SYMLINKS
            | ExtractFlags::SECURE_NODOTDOT
            | ExtractFlags::SECURE_NOABSOLUTEPATHS
    }
}

/// Applies an entry's ACL set to a path. The platform syscalls live
/// outside this crate; the default implementation only records that ACLs
/// were dropped.
pub trait AclApplier {
    /// Apply `acl` to `path`.
    fn apply(&mut self, path: &Path, acl: &AclSet, is_dir: bool) -> io::Result<()>;
}

struct LoggingAclApplier;

impl AclApplier for LoggingAclApplier {
    fn apply(&mut self, path: &Path, acl: &AclSet, _is_dir: bool) -> io::Result<()> {
        warn!(
            path = %path.display(),
            entries = acl.len(),
            "no platform ACL backend; ACL entries not restored"
        );
        Ok(())
    }
}

/// A deferred directory metadata restoration, applied deepest-first at
/// [DiskWriter::finish] so a read-only directory can't block its children.
struct Fixup {
    path: PathBuf,
    depth: usize,
    mode: Option<u32>,
    mtime: Option<Timespec>,
    atime: Option<Timespec>,
    fflags: Option<FileFlags>,
}

/// A hardlink whose target hadn't been written yet when the link entry
/// came by.
struct DeferredLink {
    target: PathBuf,
    link: PathBuf,
}

/// The write-to-disk engine. Feed it entries (usually straight from an
/// [ArchiveReader]), then call [Self::finish] to flush deferred work.
pub struct DiskWriter {
    dest: PathBuf,
    flags: ExtractFlags,
    fixups: Vec<Fixup>,
    deferred_links: Vec<DeferredLink>,
    warnings: Vec<String>,
    acl_applier: Box<dyn AclApplier>,
}

impl DiskWriter {
    /// An engine extracting under `dest` with the default (secure) flags.
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self::with_flags(dest, ExtractFlags::default())
    }

    /// An engine with explicit flags.
    pub fn with_flags(dest: impl Into<PathBuf>, flags: ExtractFlags) -> Self {
        Self {
            dest: dest.into(),
            flags,
            fixups: Vec::new(),
            deferred_links: Vec::new(),
            warnings: Vec::new(),
            acl_applier: Box::new(LoggingAclApplier),
        }
    }

    /// Replace the ACL backend.
    pub fn with_acl_applier(mut self, applier: Box<dyn AclApplier>) -> Self {
        self.acl_applier = applier;
        self
    }

    /// Per-entry warnings accumulated so far (unsupported node types,
    /// dropped metadata).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Resolve an entry's pathname under the destination, enforcing the
    /// security flags.
    fn resolve(&self, entry: &Entry) -> Result<PathBuf, Error> {
        let raw = entry.pathname();

        if raw.is_empty() {
            return Err(Error::InsecurePath("empty pathname".into()));
        }

        let path = Path::new(&raw);
        if path.is_absolute() {
            if self.flags.contains(ExtractFlags::SECURE_NOABSOLUTEPATHS) {
                return Err(Error::InsecurePath(raw));
            }
        }

        let mut resolved = self.dest.clone();
        for comp in path.components() {
            match comp {
                Component::Normal(c) => resolved.push(c),
                Component::ParentDir => {
                    if self.flags.contains(ExtractFlags::SECURE_NODOTDOT) {
                        return Err(Error::InsecurePath(raw));
                    }
                    resolved.pop();
                }
                Component::CurDir => {}
                // absolute paths (when allowed) are re-rooted under dest
                Component::RootDir | Component::Prefix(_) => {}
            }
        }

        if self.flags.contains(ExtractFlags::SECURE_SYMLINKS) {
            // a prior entry must not be able to redirect this one through
            // a symlinked directory
            let mut probe = self.dest.clone();
            if let Ok(rel) = resolved.strip_prefix(&self.dest) {
                let comps: Vec<_> = rel.components().collect();
                for comp in comps.iter().take(comps.len().saturating_sub(1)) {
                    probe.push(comp);
                    match fs::symlink_metadata(&probe) {
                        Ok(meta) if meta.file_type().is_symlink() => {
                            return Err(Error::InsecurePath(raw));
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(resolved)
    }

    fn ensure_parent(&mut self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                // intermediate directories appear with a working mode; an
                // explicit entry for them later still queues its own fixup
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn open_regular(&mut self, path: &Path) -> Result<File, Error> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.flags.contains(ExtractFlags::NO_OVERWRITE) {
                    return Err(Error::InsecurePath(format!(
                        "refusing to overwrite {}",
                        path.display()
                    )));
                }
                if self.flags.contains(ExtractFlags::UNLINK_FIRST) {
                    fs::remove_file(path)?;
                    return Ok(OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(path)?);
                }
                Ok(OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Extract the current entry of `reader`, streaming its data blocks.
    pub fn extract_entry(&mut self, reader: &mut ArchiveReader<'_>) -> Result<(), Error> {
        let entry = match reader.entry() {
            Some(e) => e.clone(),
            None => return Ok(()),
        };

        match entry.filetype {
            FileType::Regular if entry.hardlink.is_none() => {
                let path = self.resolve(&entry)?;
                self.ensure_parent(&path)?;
                let mut file = self.open_regular(&path)?;

                let mut received: u64 = 0;
                let mut position: u64 = 0;
                while let Some((chunk, offset)) = reader.read_data_block()? {
                    if offset != position {
                        if self.flags.contains(ExtractFlags::SPARSE) {
                            file.seek(SeekFrom::Start(offset))?;
                        } else {
                            write_zeros(&mut file, offset - position)?;
                        }
                        position = offset;
                    }
                    file.write_all(chunk)?;
                    position += chunk.len() as u64;
                    received += chunk.len() as u64;
                }

                // the apparent size includes any trailing hole
                if let Some(size) = reader.entry().and_then(|e| e.size) {
                    if position < size {
                        file.set_len(size)?;
                    }
                    let stored = if entry.sparse.is_dense() {
                        size
                    } else {
                        entry.sparse.stored_bytes()
                    };
                    if received != stored {
                        return Err(FormatError::WrongSize {
                            expected: stored,
                            actual: received,
                        }
                        .into());
                    }
                }
                drop(file);

                self.apply_metadata(&path, &entry, false)?;
            }
            FileType::Regular => {
                // hardlink to an earlier entry
                reader.read_data_skip()?;
                let link = entry.hardlink.as_ref().unwrap().to_string_lossy();
                let mut target_entry = Entry::new();
                target_entry.set_pathname(&link);
                let target = self.resolve(&target_entry)?;
                let path = self.resolve(&entry)?;
                self.ensure_parent(&path)?;
                if self.flags.contains(ExtractFlags::UNLINK_FIRST) && path.exists() {
                    fs::remove_file(&path)?;
                }
                if let Err(e) = fs::hard_link(&target, &path) {
                    if e.kind() == io::ErrorKind::NotFound {
                        // forward reference: the body carrier comes later
                        self.deferred_links.push(DeferredLink {
                            target,
                            link: path,
                        });
                    } else {
                        return Err(e.into());
                    }
                }
            }
            FileType::Directory => {
                reader.read_data_skip()?;
                let path = self.resolve(&entry)?;
                if !path.exists() {
                    fs::create_dir_all(&path)?;
                }
                // restrictive modes and times are deferred so children can
                // still be written
                self.fixups.push(Fixup {
                    depth: path.components().count(),
                    path,
                    mode: entry.mode,
                    mtime: entry.mtime,
                    atime: entry.atime,
                    fflags: entry.fflags,
                });
            }
            FileType::Symlink => {
                reader.read_data_skip()?;
                let path = self.resolve(&entry)?;
                self.ensure_parent(&path)?;
                let target = entry
                    .symlink
                    .as_ref()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                make_symlink(Path::new(&target), &path, &self.flags)?;
                self.apply_metadata(&path, &entry, true)?;
            }
            FileType::Fifo | FileType::CharDevice | FileType::BlockDevice | FileType::Socket => {
                reader.read_data_skip()?;
                let path = self.resolve(&entry)?;
                self.ensure_parent(&path)?;
                match make_special(&path, &entry) {
                    Ok(()) => self.apply_metadata(&path, &entry, false)?,
                    Err(e) => {
                        // usually lack of privilege; not fatal
                        self.warnings.push(format!(
                            "{}: could not create special file: {}",
                            entry.pathname(),
                            e
                        ));
                    }
                }
            }
            FileType::Unknown => {
                reader.read_data_skip()?;
                self.warnings
                    .push(format!("{}: unknown entry type skipped", entry.pathname()));
            }
        }
        Ok(())
    }

    /// Write a dense entry from an in-memory body (used by copy modes and
    /// tests).
    pub fn write_entry_dense(&mut self, entry: &Entry, data: &[u8]) -> Result<(), Error> {
        match entry.filetype {
            FileType::Regular if entry.hardlink.is_none() => {
                let path = self.resolve(entry)?;
                self.ensure_parent(&path)?;
                let mut file = self.open_regular(&path)?;
                file.write_all(data)?;
                drop(file);
                self.apply_metadata(&path, entry, false)?;
                Ok(())
            }
            _ => {
                let mut reader_less = entry.clone();
                reader_less.size = Some(0);
                // the non-regular paths don't need a data stream
                self.write_entry_headerless(&reader_less)
            }
        }
    }

    fn write_entry_headerless(&mut self, entry: &Entry) -> Result<(), Error> {
        match entry.filetype {
            FileType::Directory => {
                let path = self.resolve(entry)?;
                if !path.exists() {
                    fs::create_dir_all(&path)?;
                }
                self.fixups.push(Fixup {
                    depth: path.components().count(),
                    path,
                    mode: entry.mode,
                    mtime: entry.mtime,
                    atime: entry.atime,
                    fflags: entry.fflags,
                });
                Ok(())
            }
            FileType::Symlink => {
                let path = self.resolve(entry)?;
                self.ensure_parent(&path)?;
                let target = entry
                    .symlink
                    .as_ref()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                make_symlink(Path::new(&target), &path, &self.flags)?;
                self.apply_metadata(&path, entry, true)
            }
            _ => Ok(()),
        }
    }

    /// Restore metadata in the canonical order: owner, permissions, file
    /// flags, ACLs, xattrs, times.
    fn apply_metadata(&mut self, path: &Path, entry: &Entry, is_symlink: bool) -> Result<(), Error> {
        #[cfg(unix)]
        {
            if self.flags.contains(ExtractFlags::OWNER) {
                let uid = entry.uid.map(|u| u as u32);
                let gid = entry.gid.map(|g| g as u32);
                if uid.is_some() || gid.is_some() {
                    let res = if is_symlink {
                        std::os::unix::fs::lchown(path, uid, gid)
                    } else {
                        std::os::unix::fs::chown(path, uid, gid)
                    };
                    if let Err(e) = res {
                        self.warnings
                            .push(format!("{}: chown failed: {}", path.display(), e));
                    }
                }
            }

            if self.flags.contains(ExtractFlags::PERM) && !is_symlink {
                if let Some(mode) = entry.mode {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
                }
            }

            if self.flags.contains(ExtractFlags::FFLAGS) {
                if let Some(fflags) = entry.fflags {
                    if !fflags.is_empty() {
                        self.warnings.push(format!(
                            "{}: file flags ({}) not supported on this platform",
                            path.display(),
                            fflags.to_text()
                        ));
                    }
                }
            }

            if self.flags.contains(ExtractFlags::ACL) && !entry.acl.is_empty() {
                let is_dir = entry.filetype == FileType::Directory;
                self.acl_applier
                    .apply(path, &entry.acl, is_dir)
                    .map_err(Error::IO)?;
            }

            if self.flags.contains(ExtractFlags::XATTR) {
                for xattr in &entry.xattrs {
                    if let Err(e) = set_xattr(path, &xattr.name, &xattr.value) {
                        self.warnings.push(format!(
                            "{}: xattr {} not restored: {}",
                            path.display(),
                            xattr.name,
                            e
                        ));
                    }
                }
            }

            if self.flags.contains(ExtractFlags::TIME) {
                apply_times(path, entry.atime, entry.mtime, is_symlink)?;
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (path, entry, is_symlink);
        }

        Ok(())
    }

    /// Create forward-referenced links and run the fixup queue,
    /// deepest-first: times, then mode, then flags.
    pub fn finish(&mut self) -> Result<(), Error> {
        for link in std::mem::take(&mut self.deferred_links) {
            if let Err(e) = fs::hard_link(&link.target, &link.link) {
                self.warnings.push(format!(
                    "{}: deferred link to {} failed: {}",
                    link.link.display(),
                    link.target.display(),
                    e
                ));
            }
        }

        let mut fixups = std::mem::take(&mut self.fixups);
        fixups.sort_by(|a, b| b.depth.cmp(&a.depth));

        for fixup in fixups {
            trace!(path = %fixup.path.display(), "directory fixup");
            #[cfg(unix)]
            {
                if self.flags.contains(ExtractFlags::TIME) {
                    apply_times(&fixup.path, fixup.atime, fixup.mtime, false)?;
                }
                if self.flags.contains(ExtractFlags::PERM) {
                    if let Some(mode) = fixup.mode {
                        use std::os::unix::fs::PermissionsExt;
                        fs::set_permissions(&fixup.path, fs::Permissions::from_mode(mode))?;
                    }
                }
                if self.flags.contains(ExtractFlags::FFLAGS) {
                    if let Some(fflags) = fixup.fflags {
                        if !fflags.is_empty() {
                            self.warnings.push(format!(
                                "{}: file flags not supported on this platform",
                                fixup.path.display()
                            ));
                        }
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = fixup;
            }
        }
        Ok(())
    }
}

fn write_zeros(file: &mut File, mut n: u64) -> io::Result<()> {
    let zeros = [0u8; 4096];
    while n > 0 {
        let take = n.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..take])?;
        n -= take as u64;
    }
    Ok(())
}

fn make_symlink(target: &Path, path: &Path, flags: &ExtractFlags) -> Result<(), Error> {
    #[cfg(unix)]
    {
        match std::os::unix::fs::symlink(target, path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if flags.contains(ExtractFlags::NO_OVERWRITE) {
                    return Err(Error::InsecurePath(format!(
                        "refusing to overwrite {}",
                        path.display()
                    )));
                }
                fs::remove_file(path)?;
                std::os::unix::fs::symlink(target, path)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (target, path, flags);
        Err(Error::IO(io::Error::new(
            io::ErrorKind::Unsupported,
            "symlinks not supported on this platform",
        )))
    }
}

#[cfg(unix)]
fn make_special(path: &Path, entry: &Entry) -> io::Result<()> {
    use nix::sys::stat::{makedev, mknod, Mode, SFlag};

    let mode = Mode::from_bits_truncate(entry.mode.unwrap_or(0o644));
    match entry.filetype {
        FileType::Fifo => {
            nix::unistd::mkfifo(path, mode).map_err(io::Error::from)?;
        }
        FileType::CharDevice | FileType::BlockDevice => {
            let kind = if entry.filetype == FileType::CharDevice {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            let (major, minor) = entry.rdev.unwrap_or((0, 0));
            mknod(path, kind, mode, makedev(major, minor)).map_err(io::Error::from)?;
        }
        FileType::Socket => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sockets cannot be extracted",
            ));
        }
        _ => unreachable!(),
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_special(_path: &Path, _entry: &Entry) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "special files not supported on this platform",
    ))
}

#[cfg(unix)]
fn apply_times(
    path: &Path,
    atime: Option<Timespec>,
    mtime: Option<Timespec>,
    is_symlink: bool,
) -> Result<(), Error> {
    use filetime::FileTime;

    let to_ft = |t: Timespec| FileTime::from_unix_time(t.secs, t.nanos);
    let mtime_ft = mtime.map(to_ft);
    let atime_ft = atime.map(to_ft).or(mtime_ft);

    if let (Some(atime), Some(mtime)) = (atime_ft, mtime_ft) {
        if is_symlink {
            filetime::set_symlink_file_times(path, atime, mtime)?;
        } else {
            filetime::set_file_times(path, atime, mtime)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_xattr(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))?;

    #[cfg(target_os = "linux")]
    {
        let rc = unsafe {
            libc::lsetxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = (c_path, c_name, value);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "xattrs not supported on this platform",
        ))
    }
}
