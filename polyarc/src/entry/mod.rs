//! The format-agnostic entry model.
//!
//! An [Entry] is what a format reader produces for each member of an archive
//! and what a format writer consumes: pathnames in possibly-multiple
//! encodings, POSIX metadata, ACLs, extended attributes, a sparse map, and
//! vendor attributes. Every field tracks whether it has been set, so writers
//! can distinguish "zero" from "absent".

use std::fmt;

use crate::encoding::Encoding;

pub mod acl;
pub mod sparse;

pub use acl::{AclEntry, AclPerms, AclSet, AclTag, AclType};
pub use sparse::{SparseExtent, SparseMap};

/// What kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    /// A plain file
    #[default]
    Regular,
    /// A directory
    Directory,
    /// A symbolic link
    Symlink,
    /// A character device
    CharDevice,
    /// A block device
    BlockDevice,
    /// A named pipe
    Fifo,
    /// A unix domain socket
    Socket,
    /// Something we don't have a name for
    Unknown,
}

/// Hint about what a symlink points at, for platforms (and formats) that
/// distinguish file links from directory links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkType {
    /// No hint available
    #[default]
    Undefined,
    /// Points at a file
    File,
    /// Points at a directory
    Directory,
}

/// A point in time with nanosecond precision.
///
/// Archive formats store anywhere from 2-second (zip MS-DOS stamps) to
/// nanosecond (pax fractional records) resolution, so we keep the full
/// precision and let writers truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timespec {
    /// Seconds since the unix epoch (may be negative)
    pub secs: i64,
    /// Nanosecond part, `0..1_000_000_000`
    pub nanos: u32,
}

impl Timespec {
    /// Whole seconds, no sub-second part.
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            write!(f, "{}", self.secs)
        } else {
            write!(f, "{}.{:09}", self.secs, self.nanos)
        }
    }
}

/// A text field as stored in an archive header: canonical raw bytes plus a
/// charset tag, with the UTF-8 rendering produced lazily.
///
/// Setting the raw bytes invalidates any previously decoded form; decoding
/// failure is surfaced but the original bytes are retained.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EntryString {
    raw: Vec<u8>,
    charset: Option<Encoding>,
}

impl EntryString {
    /// Build from raw bytes with an explicit charset tag.
    pub fn from_bytes(raw: impl Into<Vec<u8>>, charset: Encoding) -> Self {
        Self {
            raw: raw.into(),
            charset: Some(charset),
        }
    }

    /// Build from a rust string (tagged UTF-8).
    pub fn from_str(s: impl AsRef<str>) -> Self {
        Self {
            raw: s.as_ref().as_bytes().to_vec(),
            charset: Some(Encoding::Utf8),
        }
    }

    /// The canonical raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The charset the raw bytes are tagged with, if known.
    pub fn charset(&self) -> Option<Encoding> {
        self.charset
    }

    /// Replace the raw bytes, invalidating the decoded mirror.
    pub fn set_bytes(&mut self, raw: impl Into<Vec<u8>>, charset: Encoding) {
        self.raw = raw.into();
        self.charset = Some(charset);
    }

    /// Decode to UTF-8 using the tagged charset (UTF-8 when untagged).
    pub fn to_str(&self) -> Result<String, crate::encoding::DecodingError> {
        self.charset.unwrap_or(Encoding::Utf8).decode(&self.raw)
    }

    /// Lossy UTF-8 rendering, never fails.
    pub fn to_string_lossy(&self) -> String {
        match self.to_str() {
            Ok(s) => s,
            Err(_) => String::from_utf8_lossy(&self.raw).into_owned(),
        }
    }

    /// True when no bytes have been stored.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl fmt::Debug for EntryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl From<&str> for EntryString {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl From<String> for EntryString {
    fn from(s: String) -> Self {
        Self {
            raw: s.into_bytes(),
            charset: Some(Encoding::Utf8),
        }
    }
}

/// An extended attribute: name plus opaque value blob. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xattr {
    /// Attribute name, e.g. `user.mime_type`
    pub name: String,
    /// Attribute value
    pub value: Vec<u8>,
}

/// A vendor-namespaced pax attribute (`UPPERCASE.key=value`), preserved
/// verbatim across read/write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAttr {
    /// Full key including the vendor namespace, e.g. `LIBFOO.comment`
    pub key: String,
    /// Raw value bytes
    pub value: Vec<u8>,
}

bitflags::bitflags! {
    /// Portable file-flag bitmap (BSD `chflags` / Linux attr flavored).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        /// Do not dump the file
        const NODUMP      = 1 << 0;
        /// File may not be changed
        const IMMUTABLE   = 1 << 1;
        /// Writes may only append
        const APPEND      = 1 << 2;
        /// Directory is opaque in union mounts
        const OPAQUE      = 1 << 3;
        /// File may not be removed or renamed
        const NOUNLINK    = 1 << 4;
        /// Archived flag
        const ARCHIVED    = 1 << 5;
        /// System file (DOS/Windows)
        const SYSTEM      = 1 << 6;
        /// Hidden file (DOS/Windows)
        const HIDDEN      = 1 << 7;
    }
}

impl FileFlags {
    const NAMES: &'static [(FileFlags, &'static str)] = &[
        (FileFlags::NODUMP, "nodump"),
        (FileFlags::IMMUTABLE, "uchg"),
        (FileFlags::APPEND, "uappnd"),
        (FileFlags::OPAQUE, "opaque"),
        (FileFlags::NOUNLINK, "nouchg"),
        (FileFlags::ARCHIVED, "arch"),
        (FileFlags::SYSTEM, "system"),
        (FileFlags::HIDDEN, "hidden"),
    ];

    /// Render as the comma-separated textual form used by `SCHILY.fflags`.
    pub fn to_text(self) -> String {
        let mut out = String::new();
        for (flag, name) in Self::NAMES {
            if self.contains(*flag) {
                if !out.is_empty() {
                    out.push(',');
                }
                out.push_str(name);
            }
        }
        out
    }

    /// Parse the comma-separated textual form. Unknown names are ignored.
    pub fn from_text(text: &str) -> Self {
        let mut flags = FileFlags::empty();
        for word in text.split(',') {
            let word = word.trim();
            for (flag, name) in Self::NAMES {
                if word == *name {
                    flags |= *flag;
                }
            }
        }
        flags
    }
}

/// A single archive member: header metadata plus (elsewhere) its data stream.
///
/// All fields are optional unless a format requires them; absent fields are
/// `None` (or empty collections) so write-side consumers can apply
/// "clear if not set" semantics.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// Pathname, canonical raw bytes + charset
    pub path: EntryString,
    /// Symlink target, when [Entry::filetype] is [FileType::Symlink]
    pub symlink: Option<EntryString>,
    /// Hint about the symlink target kind
    pub symlink_type: SymlinkType,
    /// Hardlink target: this entry is another name for that path
    pub hardlink: Option<EntryString>,
    /// Textual owner name
    pub uname: Option<EntryString>,
    /// Textual group name
    pub gname: Option<EntryString>,
    /// Path the entry was read from on the source filesystem, if any
    pub sourcepath: Option<EntryString>,

    /// What kind of object this is
    pub filetype: FileType,
    /// Permission bits, masked to 07777 (includes setuid/setgid/sticky)
    pub mode: Option<u32>,
    /// Numeric owner
    pub uid: Option<i64>,
    /// Numeric group
    pub gid: Option<i64>,

    /// Logical size in bytes. Zip length-at-end entries leave this unset
    /// until the body has been fully read.
    pub size: Option<u64>,

    /// Last access time
    pub atime: Option<Timespec>,
    /// Last modification time
    pub mtime: Option<Timespec>,
    /// Last status change time
    pub ctime: Option<Timespec>,
    /// Creation time
    pub birthtime: Option<Timespec>,

    /// Link count
    pub nlink: Option<u32>,
    /// Inode number, used for hardlink detection
    pub ino: Option<u64>,
    /// Device containing the entry: (major, minor)
    pub dev: Option<(u64, u64)>,
    /// Device number for char/block device entries: (major, minor)
    pub rdev: Option<(u64, u64)>,

    /// Portable file flags
    pub fflags: Option<FileFlags>,
    /// File flags that only have a textual form we couldn't map
    pub fflags_text: Option<String>,

    /// Access control lists
    pub acl: AclSet,
    /// Extended attributes, in stored order
    pub xattrs: Vec<Xattr>,
    /// Sparse extents; empty map means the file is dense
    pub sparse: SparseMap,
    /// Vendor pax attributes, in stored order
    pub vendor: Vec<VendorAttr>,

    /// The entry's data is stored encrypted
    pub data_encrypted: bool,
    /// The entry's metadata is stored encrypted
    pub metadata_encrypted: bool,
}

impl Entry {
    /// A fresh, empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every field, keeping allocations where possible.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Pathname decoded to UTF-8 (lossily if need be).
    pub fn pathname(&self) -> String {
        self.path.to_string_lossy()
    }

    /// Set the pathname from a rust string.
    pub fn set_pathname(&mut self, path: impl AsRef<str>) {
        self.path = EntryString::from_str(path);
    }

    /// Logical size, or zero when unset.
    pub fn size_or_zero(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    /// True for types that carry a data stream in tar-family formats.
    pub fn has_data(&self) -> bool {
        matches!(self.filetype, FileType::Regular) && self.hardlink.is_none()
    }

    /// Returns a sanitized version of the entry's pathname, if it seems safe.
    ///
    /// If the name tries a path traversal (cf.
    /// <https://snyk.io/research/zip-slip-vulnerability>), returns `None`.
    /// Leading slashes are stripped on non-Windows hosts.
    pub fn sanitized_path(&self) -> Option<String> {
        let name = self.pathname();

        if name.split('/').any(|c| c == "..") {
            return None;
        }

        #[cfg(windows)]
        {
            if name.contains(":\\") || name.starts_with('\\') {
                return None;
            }
            Some(name)
        }

        #[cfg(not(windows))]
        {
            Some(name.trim_start_matches('/').to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_string_keeps_raw_bytes_on_bad_utf8() {
        let s = EntryString::from_bytes(vec![0x66, 0xff, 0x6f], Encoding::Utf8);
        assert!(s.to_str().is_err());
        assert_eq!(s.as_bytes(), &[0x66, 0xff, 0x6f]);
        assert_eq!(s.to_string_lossy(), "f\u{fffd}o");
    }

    #[test]
    fn sanitized_path_refuses_traversal() {
        let mut e = Entry::new();
        e.set_pathname("a/../../etc/passwd");
        assert!(e.sanitized_path().is_none());

        e.set_pathname("/abs/path");
        assert_eq!(e.sanitized_path().unwrap(), "abs/path");

        e.set_pathname("weird..name/is fine");
        assert_eq!(e.sanitized_path().unwrap(), "weird..name/is fine");
    }

    #[test]
    fn fflags_text_roundtrip() {
        let f = FileFlags::NODUMP | FileFlags::IMMUTABLE;
        assert_eq!(f.to_text(), "nodump,uchg");
        assert_eq!(FileFlags::from_text("nodump, uchg, bogus"), f);
    }
}
