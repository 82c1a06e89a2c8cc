use crate::{
    encoding::Encoding,
    entry::{Entry, EntryString, FileType, Timespec},
    error::Error,
};

use super::{
    DirectoryHeader, ExtraAesField, ExtraField, ExtraFieldSettings, HostSystem,
    LocalFileHeaderRecord, Method, MsdosMode, NtfsAttr, UnixMode, Version,
};

use tracing::trace;
use winnow::{Parser, Partial};

/// A fully-parsed zip archive: general information plus a list of entries,
/// obtained from the central directory by
/// [ArchiveFsm](crate::fsm::zip::ArchiveFsm).
pub struct ZipArchive {
    pub(crate) size: u64,
    pub(crate) encoding: Encoding,
    pub(crate) entries: Vec<ZipEntry>,
    pub(crate) comment: Option<String>,
}

impl ZipArchive {
    /// The size of the .zip file that was read, in bytes.
    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Iterate over all entries, in central directory order.
    pub fn entries(&self) -> impl Iterator<Item = &ZipEntry> {
        self.entries.iter()
    }

    /// Attempts to look up an entry by name. This is usually a bad idea,
    /// as names aren't necessarily normalized in zip archives.
    pub fn by_name<N: AsRef<str>>(&self, name: N) -> Option<&ZipEntry> {
        self.entries
            .iter()
            .find(|&x| x.entry.pathname() == name.as_ref())
    }

    /// The detected character encoding for text fields (names, comments)
    /// inside this zip archive.
    #[inline(always)]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The archive comment, if non-empty.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// A zip archive member: the portable [Entry] plus everything the zip
/// container needs to locate and decode its data.
#[derive(Debug)]
pub struct ZipEntry {
    /// Portable metadata (path, mode, times, ownership)
    pub entry: Entry,

    /// Effective compression method. For AES-encrypted entries this is the
    /// *real* method from the 0x9901 extra field, not 99.
    pub method: Method,

    /// General purpose bit flags from the header
    pub flags: u16,

    /// CRC-32 of the uncompressed data; may be zero until the data
    /// descriptor has been read
    pub crc32: u32,

    /// Size of the stored (compressed, possibly encrypted) data
    pub compressed_size: u64,

    /// Size of the data once decompressed
    pub uncompressed_size: u64,

    /// False while a length-at-end entry's descriptor is still ahead of us
    pub sizes_known: bool,

    /// Offset of the local file header from the start of the file
    pub header_offset: u64,

    /// Whether zip64 extensions apply to this entry
    pub is_zip64: bool,

    /// Version needed to extract
    pub reader_version: Version,

    /// AES descriptor when the entry is WinZip-AES encrypted
    pub aes: Option<ExtraAesField>,

    /// Entry comment, when stored in the central directory
    pub comment: Option<String>,

    /// Raw DOS time field; its high byte doubles as the ZipCrypto check
    /// byte for length-at-end entries
    pub(crate) dos_time: u16,
}

impl ZipEntry {
    /// Build from a central directory header (seekable read path).
    pub(crate) fn from_central(
        hdr: &DirectoryHeader,
        encoding: Encoding,
        is_zip64: bool,
        global_offset: u64,
        extra_fields: &[ExtraField],
    ) -> Result<Self, Error> {
        let name = encoding.decode(&hdr.name.0)?;

        let mut entry = Entry::new();
        entry.path = EntryString::from_bytes(hdr.name.0.clone(), encoding);

        // external attributes carry a unix mode on unix-ish hosts, DOS
        // attribute bits on FAT-ish hosts
        match hdr.creator_version.host_system {
            HostSystem::Unix | HostSystem::Osx => {
                let m = UnixMode(hdr.external_attrs >> 16);
                entry.filetype = m.filetype();
                entry.mode = Some(m.permissions());
            }
            HostSystem::WindowsNtfs | HostSystem::Vfat | HostSystem::MsDos => {
                let m = MsdosMode(hdr.external_attrs);
                entry.filetype = m.filetype();
                entry.mode = Some(m.permissions());
            }
            _ => {}
        }
        if name.ends_with('/') {
            // believe it or not, this is straight from the APPNOTE
            entry.filetype = FileType::Directory;
        }

        if let Some(dt) = hdr.modified.to_datetime() {
            entry.mtime = Some(Timespec::from_secs(dt.timestamp()));
        }

        let mut ze = Self {
            entry,
            method: Method::from(hdr.method),
            flags: hdr.flags,
            crc32: hdr.crc32,
            compressed_size: hdr.compressed_size as u64,
            uncompressed_size: hdr.uncompressed_size as u64,
            sizes_known: true,
            header_offset: hdr.header_offset as u64 + global_offset,
            is_zip64,
            reader_version: hdr.reader_version,
            aes: None,
            comment: None,
            dos_time: hdr.modified.time,
        };

        for ef in extra_fields {
            ze.apply_extra_field(ef, global_offset);
        }
        ze.entry.size = Some(ze.uncompressed_size);

        Ok(ze)
    }

    /// Build from a local file header (streaming read path). Sizes may be
    /// unknown when the length-at-end flag is set.
    pub(crate) fn from_local(hdr: &LocalFileHeaderRecord) -> Result<Self, Error> {
        let encoding = if hdr.flags & LocalFileHeaderRecord::FLAG_UTF8 != 0 {
            Encoding::Utf8
        } else {
            Encoding::Cp437
        };

        let mut entry = Entry::new();
        entry.path = EntryString::from_bytes(hdr.name.0.clone(), encoding);
        if entry.pathname().ends_with('/') {
            entry.filetype = FileType::Directory;
        }
        if let Some(dt) = hdr.modified.to_datetime() {
            entry.mtime = Some(Timespec::from_secs(dt.timestamp()));
        }
        entry.data_encrypted = hdr.is_encrypted();

        let length_at_end = hdr.has_data_descriptor();
        if !length_at_end {
            entry.size = Some(hdr.uncompressed_size as u64);
        }

        let mut ze = Self {
            entry,
            method: hdr.method,
            flags: hdr.flags,
            crc32: hdr.crc32,
            compressed_size: hdr.compressed_size as u64,
            uncompressed_size: hdr.uncompressed_size as u64,
            sizes_known: !length_at_end,
            header_offset: 0,
            is_zip64: false,
            reader_version: hdr.reader_version,
            aes: None,
            comment: None,
            dos_time: hdr.modified.time,
        };

        // the local extra field may still carry zip64 sizes, timestamps,
        // unix ids and the AES descriptor
        let settings = ExtraFieldSettings {
            needs_compressed_size: hdr.compressed_size == !0u32,
            needs_uncompressed_size: hdr.uncompressed_size == !0u32,
            needs_header_offset: false,
        };
        let mut slice = Partial::new(&hdr.extra.0[..]);
        while !slice.is_empty() {
            match ExtraField::mk_parser(settings).parse_next(&mut slice) {
                Ok(ef) => ze.apply_extra_field(&ef, 0),
                Err(e) => {
                    // a broken extra field in a local header is not fatal;
                    // the fixed fields stand on their own
                    trace!("local extra field error: {:#?}", e);
                    break;
                }
            }
        }
        if ze.sizes_known {
            ze.entry.size = Some(ze.uncompressed_size);
        }

        Ok(ze)
    }

    fn apply_extra_field(&mut self, ef: &ExtraField, global_offset: u64) {
        match ef {
            ExtraField::Zip64(z64) => {
                self.is_zip64 = true;
                if let Some(n) = z64.uncompressed_size {
                    self.uncompressed_size = n;
                }
                if let Some(n) = z64.compressed_size {
                    self.compressed_size = n;
                }
                if let Some(n) = z64.header_offset {
                    self.header_offset = n + global_offset;
                }
            }
            ExtraField::Timestamp(ts) => {
                if let Some(t) = ts.mtime {
                    self.entry.mtime = Some(Timespec::from_secs(t as i64));
                }
                if let Some(t) = ts.atime {
                    self.entry.atime = Some(Timespec::from_secs(t as i64));
                }
                if let Some(t) = ts.ctime {
                    self.entry.ctime = Some(Timespec::from_secs(t as i64));
                }
            }
            ExtraField::Ntfs(nf) => {
                for attr in &nf.attrs {
                    // note: other attributes are unsupported
                    if let NtfsAttr::Attr1(attr) = attr {
                        if let Some((s, ns)) = attr.mtime.to_unix() {
                            self.entry.mtime = Some(Timespec { secs: s, nanos: ns });
                        }
                        if let Some((s, ns)) = attr.atime.to_unix() {
                            self.entry.atime = Some(Timespec { secs: s, nanos: ns });
                        }
                        if let Some((s, ns)) = attr.ctime.to_unix() {
                            self.entry.birthtime = Some(Timespec { secs: s, nanos: ns });
                        }
                    }
                }
            }
            ExtraField::Unix(uf) => {
                self.entry.mtime = Some(Timespec::from_secs(uf.mtime as i64));
                self.entry.atime = Some(Timespec::from_secs(uf.atime as i64));
                if self.entry.uid.is_none() {
                    self.entry.uid = Some(uf.uid as i64);
                }
                if self.entry.gid.is_none() {
                    self.entry.gid = Some(uf.gid as i64);
                }
            }
            ExtraField::NewUnix(uf) => {
                self.entry.uid = Some(uf.uid as i64);
                self.entry.gid = Some(uf.gid as i64);
            }
            ExtraField::UnicodePath(up) => {
                // only trust the replacement if it hashes the name we have
                if up.name_crc32 == crc32fast::hash(self.entry.path.as_bytes()) {
                    self.entry.path = EntryString::from_bytes(up.utf8.clone(), Encoding::Utf8);
                }
            }
            ExtraField::UnicodeComment(_) => {}
            ExtraField::Aes(aes) => {
                self.entry.data_encrypted = true;
                self.method = aes.method;
                self.aes = Some(aes.clone());
            }
            ExtraField::Unknown { .. } => {}
        }
    }

    /// Whether the sizes/CRC trail the data in a descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & LocalFileHeaderRecord::FLAG_LENGTH_AT_END != 0
    }
}
