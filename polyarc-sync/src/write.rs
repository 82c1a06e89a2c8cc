//! The write handle: entries and data in, archive bytes out, through the
//! configured format writer and a stack of compression filters.

use std::io::{self, Write};

use polyarc::{
    entry::{Entry, FileType},
    error::UnsupportedError,
    filter::FilterCode,
    format::FormatCode,
    parse::tar::BLOCK_SIZE,
    parse::zip::Method,
    write::{tar as tarw, zip as zipw},
    Error,
};
use tracing::trace;

/// Configures and opens an [ArchiveWriter].
pub struct WriteBuilder {
    format: FormatCode,
    filters: Vec<FilterCode>,
    zip_method: Method,
    pax_restricted: bool,
}

impl Default for WriteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuilder {
    /// Defaults: pax format, no compression filters, deflate for zip.
    pub fn new() -> Self {
        Self {
            format: FormatCode::Pax,
            filters: Vec::new(),
            zip_method: Method::Deflate,
            pax_restricted: true,
        }
    }

    /// The container format to produce.
    pub fn format(mut self, format: FormatCode) -> Self {
        self.format = format;
        self
    }

    /// Push a compression filter; the last one added is closest to the
    /// raw output.
    pub fn add_filter(mut self, filter: FilterCode) -> Self {
        self.filters.push(filter);
        self
    }

    /// Compression method for zip entry data.
    pub fn zip_method(mut self, method: Method) -> Self {
        self.zip_method = method;
        self
    }

    /// Set a `(module, key, value)` option; returns true when recognized.
    pub fn set_option(&mut self, module: &str, key: &str, value: &str) -> bool {
        match (module, key) {
            ("zip", "compression") => {
                self.zip_method = match value {
                    "store" => Method::Store,
                    "deflate" => Method::Deflate,
                    "bzip2" => Method::Bzip2,
                    "zstd" => Method::Zstd,
                    _ => return false,
                };
                true
            }
            ("pax", "restricted") => {
                self.pax_restricted = value != "0";
                true
            }
            _ => false,
        }
    }

    /// Open the writer over a sink.
    pub fn open<'a, W: Write + 'a>(self, sink: W) -> Result<ArchiveWriter<'a>, Error> {
        let mut chain: Sink<'a> = Sink::Raw(Box::new(sink));
        // filters were pushed client-side-out, so wrap in reverse
        for &code in self.filters.iter().rev() {
            chain = Sink::wrap(code, chain)?;
        }

        let driver = match self.format {
            FormatCode::Pax | FormatCode::Ustar | FormatCode::GnuTar => {
                FormatWriter::Tar(TarWriter {
                    remaining: 0,
                    pad: 0,
                    restricted: self.pax_restricted,
                })
            }
            FormatCode::Zip => FormatWriter::Zip(ZipWriter {
                method: self.zip_method,
                offset: 0,
                central: Vec::new(),
                current: None,
            }),
            FormatCode::Cpio => {
                return Err(Error::Unsupported(UnsupportedError::FormatNotSupported(
                    FormatCode::Cpio,
                )))
            }
        };

        Ok(ArchiveWriter {
            sink: Some(chain),
            driver,
            state: WriteState::Header,
        })
    }
}

/// The stacked write filters. Finishing tears the stack down from the
/// client side to the raw sink, flushing each codec's trailer.
enum Sink<'a> {
    Raw(Box<dyn Write + 'a>),
    Gzip(flate2::write::GzEncoder<Box<Sink<'a>>>),
    Bzip2(bzip2::write::BzEncoder<Box<Sink<'a>>>),
    Zstd(zstd::stream::write::Encoder<'static, Box<Sink<'a>>>),
    Lz4(lz4_flex::frame::FrameEncoder<Box<Sink<'a>>>),
}

impl<'a> Sink<'a> {
    fn wrap(code: FilterCode, inner: Sink<'a>) -> Result<Self, Error> {
        Ok(match code {
            FilterCode::None => inner,
            FilterCode::Gzip => Sink::Gzip(flate2::write::GzEncoder::new(
                Box::new(inner),
                flate2::Compression::default(),
            )),
            FilterCode::Bzip2 => Sink::Bzip2(bzip2::write::BzEncoder::new(
                Box::new(inner),
                bzip2::Compression::default(),
            )),
            FilterCode::Zstd => {
                Sink::Zstd(zstd::stream::write::Encoder::new(Box::new(inner), 3)?)
            }
            FilterCode::Lz4 => Sink::Lz4(lz4_flex::frame::FrameEncoder::new(Box::new(inner))),
            other => {
                return Err(Error::Unsupported(UnsupportedError::FilterNotSupported(
                    other,
                )))
            }
        })
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Raw(mut w) => w.flush(),
            Sink::Gzip(enc) => enc.finish()?.finish(),
            Sink::Bzip2(enc) => enc.finish()?.finish(),
            Sink::Zstd(enc) => enc.finish()?.finish(),
            Sink::Lz4(enc) => enc
                .finish()
                .map_err(io::Error::other)?
                .finish(),
        }
    }
}

impl Write for Sink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Raw(w) => w.write(buf),
            Sink::Gzip(w) => w.write(buf),
            Sink::Bzip2(w) => w.write(buf),
            Sink::Zstd(w) => w.write(buf),
            Sink::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Raw(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
            Sink::Bzip2(w) => w.flush(),
            Sink::Zstd(w) => w.flush(),
            Sink::Lz4(w) => w.flush(),
        }
    }
}

#[derive(PartialEq, Eq)]
enum WriteState {
    Header,
    Data,
    Closed,
}

enum FormatWriter {
    Tar(TarWriter),
    Zip(ZipWriter),
}

struct TarWriter {
    /// data bytes the current entry still owes
    remaining: u64,
    /// block padding after them
    pad: usize,
    /// restricted pax: only emit extended headers when something overflows
    restricted: bool,
}

/// Per-entry compressor for zip data.
enum ZipCompressor {
    Store,
    Deflate(flate2::write::DeflateEncoder<Vec<u8>>),
    Bzip2(bzip2::write::BzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
}

struct ZipEntryInProgress {
    central: zipw::CentralEntry,
    compressor: Option<ZipCompressor>,
    hasher: crc32fast::Hasher,
    uncompressed: u64,
    compressed: u64,
    /// sizes were written into the local header up front (stored entries
    /// with known sizes); no descriptor follows
    sizes_up_front: bool,
}

struct ZipWriter {
    method: Method,
    offset: u64,
    central: Vec<zipw::CentralEntry>,
    current: Option<ZipEntryInProgress>,
}

/// A streaming archive writer; see [WriteBuilder].
pub struct ArchiveWriter<'a> {
    sink: Option<Sink<'a>>,
    driver: FormatWriter,
    state: WriteState,
}

impl<'a> ArchiveWriter<'a> {
    /// Begin a new entry. Any unfinished previous entry is finished first
    /// (short data is zero-filled).
    pub fn write_header(&mut self, entry: &Entry) -> Result<(), Error> {
        self.begin_entry(entry, None)
    }

    /// Begin an entry whose data CRC and size are already known, letting a
    /// stored zip entry carry real sizes in its local header instead of a
    /// trailing descriptor.
    fn begin_entry(&mut self, entry: &Entry, known: Option<(u32, u64)>) -> Result<(), Error> {
        if self.state == WriteState::Closed {
            return Err(closed());
        }
        self.finish_entry()?;

        let sink = self.sink.as_mut().expect("sink present until close");
        match &mut self.driver {
            FormatWriter::Tar(tar) => {
                trace!(path = %entry.pathname(), "tar header");
                let mut records = tarw::pax_records_for(entry);
                if !tar.restricted && !records.iter().any(|(k, _)| k == "mtime") {
                    if let Some(mtime) = entry.mtime {
                        records.push(("mtime".into(), mtime.to_string().into_bytes()));
                    }
                }
                if !records.is_empty() {
                    let body = tarw::pax_body(&records);
                    let pseudo = tarw::pax_pseudo_header(entry, body.len());
                    sink.write_all(&pseudo)?;
                    sink.write_all(&body)?;
                    let pad = tarw::padding_for(body.len() as u64);
                    sink.write_all(&vec![0u8; pad])?;
                }

                sink.write_all(&tarw::ustar_header(entry))?;

                let stored = if entry.has_data() {
                    if entry.sparse.is_dense() {
                        entry.size_or_zero()
                    } else {
                        entry.sparse.stored_bytes()
                    }
                } else {
                    0
                };
                tar.remaining = stored;
                tar.pad = tarw::padding_for(stored);
            }
            FormatWriter::Zip(zip) => {
                let name = zipw::entry_name(entry);
                let utf8 = zipw::name_needs_utf8(&name);
                let (dos_time, dos_date) = zipw::dos_stamp(entry);
                let mut extra = zipw::timestamp_and_owner_extra(entry);
                if utf8 {
                    extra.extend_from_slice(&zipw::unicode_path_extra(&name));
                }

                let method = if entry.has_data() && entry.size_or_zero() > 0 {
                    zip.method
                } else {
                    Method::Store
                };

                // a stored entry with a known CRC and size doesn't need the
                // descriptor dance: both size fields are the data length
                let known = match (method, known, entry.size_or_zero()) {
                    (Method::Store, Some(k), _) => Some(k),
                    (Method::Store, None, 0) => Some((0, 0)),
                    _ => None,
                };
                let sizes_up_front = known.is_some();

                let mut flags = 0u16;
                if !sizes_up_front {
                    flags |= 1 << 3;
                }
                if utf8 {
                    flags |= 1 << 11;
                }

                let lfh = zipw::local_file_header(
                    &name,
                    method,
                    dos_time,
                    dos_date,
                    !sizes_up_front,
                    known.map(|(crc, size)| (crc, size, size)),
                    &extra,
                    utf8,
                );
                let header_offset = zip.offset;
                sink.write_all(&lfh)?;
                zip.offset += lfh.len() as u64;

                let compressor = match method {
                    Method::Store => ZipCompressor::Store,
                    Method::Deflate => ZipCompressor::Deflate(
                        flate2::write::DeflateEncoder::new(
                            Vec::new(),
                            flate2::Compression::default(),
                        ),
                    ),
                    Method::Bzip2 => ZipCompressor::Bzip2(bzip2::write::BzEncoder::new(
                        Vec::new(),
                        bzip2::Compression::default(),
                    )),
                    Method::Zstd => {
                        ZipCompressor::Zstd(zstd::stream::write::Encoder::new(Vec::new(), 3)?)
                    }
                    other => return Err(Error::method_not_supported(other)),
                };

                zip.current = Some(ZipEntryInProgress {
                    central: zipw::CentralEntry {
                        name,
                        flags,
                        method,
                        dos_time,
                        dos_date,
                        crc32: 0,
                        compressed_size: 0,
                        uncompressed_size: 0,
                        header_offset,
                        external_attrs: zipw::external_attrs(entry),
                        extra,
                    },
                    compressor: Some(compressor),
                    hasher: crc32fast::Hasher::new(),
                    uncompressed: 0,
                    compressed: 0,
                    sizes_up_front,
                });
            }
        }
        self.state = WriteState::Data;
        Ok(())
    }

    /// Append data to the current entry. Returns the number of bytes
    /// accepted (tar entries stop at their declared size).
    pub fn write_data(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.state != WriteState::Data {
            return Err(closed());
        }
        let sink = self.sink.as_mut().expect("sink present until close");
        match &mut self.driver {
            FormatWriter::Tar(tar) => {
                let n = (buf.len() as u64).min(tar.remaining) as usize;
                sink.write_all(&buf[..n])?;
                tar.remaining -= n as u64;
                Ok(n)
            }
            FormatWriter::Zip(zip) => {
                let cur = zip
                    .current
                    .as_mut()
                    .expect("write_header precedes write_data");
                cur.hasher.update(buf);
                cur.uncompressed += buf.len() as u64;

                match cur.compressor.as_mut().unwrap() {
                    ZipCompressor::Store => {
                        sink.write_all(buf)?;
                        cur.compressed += buf.len() as u64;
                        zip.offset += buf.len() as u64;
                    }
                    // compressed output accumulates in the encoder's Vec
                    // and is flushed when the entry finishes
                    ZipCompressor::Deflate(enc) => enc.write_all(buf)?,
                    ZipCompressor::Bzip2(enc) => enc.write_all(buf)?,
                    ZipCompressor::Zstd(enc) => enc.write_all(buf)?,
                }
                Ok(buf.len())
            }
        }
    }

    /// Close out the current entry: zero-fill short tar data, write block
    /// padding or the zip data descriptor.
    pub fn finish_entry(&mut self) -> Result<(), Error> {
        if self.state != WriteState::Data {
            return Ok(());
        }
        let sink = self.sink.as_mut().expect("sink present until close");
        match &mut self.driver {
            FormatWriter::Tar(tar) => {
                // the header promised this much data; make it true
                while tar.remaining > 0 {
                    let zeros = [0u8; 512];
                    let n = (tar.remaining).min(zeros.len() as u64) as usize;
                    sink.write_all(&zeros[..n])?;
                    tar.remaining -= n as u64;
                }
                sink.write_all(&vec![0u8; tar.pad])?;
                tar.pad = 0;
            }
            FormatWriter::Zip(zip) => {
                let mut cur = zip.current.take().expect("entry in progress");
                let tail = match cur.compressor.take().unwrap() {
                    ZipCompressor::Store => Vec::new(),
                    ZipCompressor::Deflate(enc) => enc.finish()?,
                    ZipCompressor::Bzip2(enc) => enc.finish()?,
                    ZipCompressor::Zstd(enc) => enc.finish()?,
                };
                sink.write_all(&tail)?;
                cur.compressed += tail.len() as u64;
                zip.offset += tail.len() as u64;

                cur.central.crc32 = cur.hasher.finalize();
                cur.central.compressed_size = cur.compressed;
                cur.central.uncompressed_size = cur.uncompressed;

                if !cur.sizes_up_front {
                    let zip64 = cur.compressed > u32::MAX as u64
                        || cur.uncompressed > u32::MAX as u64;
                    let descriptor = zipw::data_descriptor(
                        cur.central.crc32,
                        cur.compressed,
                        cur.uncompressed,
                        zip64,
                    );
                    sink.write_all(&descriptor)?;
                    zip.offset += descriptor.len() as u64;
                }

                zip.central.push(cur.central);
            }
        }
        self.state = WriteState::Header;
        Ok(())
    }

    /// Finish the archive: trailer records, then the filter stack.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == WriteState::Closed {
            return Ok(());
        }
        self.finish_entry()?;
        let sink = self.sink.as_mut().expect("sink present until close");

        match &mut self.driver {
            FormatWriter::Tar(_) => {
                sink.write_all(&tarw::end_of_archive())?;
            }
            FormatWriter::Zip(zip) => {
                let directory_offset = zip.offset;
                let mut directory_size = 0u64;
                for entry in &zip.central {
                    let bytes = zipw::central_header(entry);
                    sink.write_all(&bytes)?;
                    directory_size += bytes.len() as u64;
                }
                let eocd = zipw::end_of_central_directory(
                    zip.central.len() as u64,
                    directory_size,
                    directory_offset,
                );
                sink.write_all(&eocd)?;
            }
        }

        self.sink.take().expect("sink present").finish()?;
        self.state = WriteState::Closed;
        Ok(())
    }

    /// The tar block size this writer pads to.
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }
}

impl Drop for ArchiveWriter<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn closed() -> Error {
    Error::IO(io::Error::new(
        io::ErrorKind::Other,
        "write handle is not in the right state",
    ))
}

/// Write `entry` with an in-memory body: header, data, finish, in one
/// call. Since the whole body is at hand, stored zip entries get their CRC
/// and sizes in the local header rather than a descriptor.
pub fn write_entry_with_data(
    writer: &mut ArchiveWriter<'_>,
    entry: &Entry,
    data: &[u8],
) -> Result<(), Error> {
    let known = Some((crc32fast::hash(data), data.len() as u64));
    writer.begin_entry(entry, known)?;
    if entry.filetype == FileType::Regular {
        let mut rest = data;
        while !rest.is_empty() {
            let n = writer.write_data(rest)?;
            if n == 0 {
                break;
            }
            rest = &rest[n..];
        }
    }
    writer.finish_entry()
}
