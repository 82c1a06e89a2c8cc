//! Serialization of zip records: local file headers, data descriptors,
//! central directory headers, and the end-of-central-directory family.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{
    encoding::detect_utf8,
    entry::{Entry, FileType},
    parse::zip::{Method, MsdosTimestamp, UnixMode},
};

/// Version needed to extract: 2.0 for plain entries, 4.5 once zip64
/// structures appear.
const VERSION_NEEDED: u16 = 20;
const VERSION_NEEDED_ZIP64: u16 = 45;
/// Version made by: unix host, spec 3.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 30;

/// Everything the writer must remember about a written entry to emit its
/// central directory header at close.
#[derive(Debug)]
pub struct CentralEntry {
    /// File name bytes as written in the local header
    pub name: Vec<u8>,
    /// General purpose flags
    pub flags: u16,
    /// Compression method
    pub method: Method,
    /// DOS mod time/date
    pub dos_time: u16,
    /// DOS mod date
    pub dos_date: u16,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
    /// Offset of the local header from the start of output
    pub header_offset: u64,
    /// External attributes (unix mode in the high word)
    pub external_attrs: u32,
    /// The 0x5455/0x7875 extras replicated into the central directory
    pub extra: Vec<u8>,
}

/// Whether a name can be stored as-is (CP437-safe subset) or needs the
/// UTF-8 flag plus a unicode-path extra.
pub fn name_needs_utf8(name: &[u8]) -> bool {
    let (_, require) = detect_utf8(name);
    require
}

/// Filename bytes for an entry. Backslash separators are rewritten to
/// forward slashes on Windows hosts only; POSIX paths pass through.
pub fn entry_name(entry: &Entry) -> Vec<u8> {
    let mut name = entry.path.as_bytes().to_vec();
    #[cfg(windows)]
    {
        for b in &mut name {
            if *b == b'\\' {
                *b = b'/';
            }
        }
    }
    if entry.filetype == FileType::Directory && !name.ends_with(b"/") {
        name.push(b'/');
    }
    name
}

/// DOS time/date for an entry's mtime.
pub fn dos_stamp(entry: &Entry) -> (u16, u16) {
    let ts = MsdosTimestamp::from_unix(entry.mtime.map(|t| t.secs).unwrap_or(0));
    (ts.time, ts.date)
}

/// External attributes: unix mode (with file type bits) in the high word,
/// plus the DOS directory bit so FAT-minded readers agree.
pub fn external_attrs(entry: &Entry) -> u32 {
    let perms = entry.mode.unwrap_or(match entry.filetype {
        FileType::Directory => 0o755,
        _ => 0o644,
    });
    let unix = UnixMode::compose(entry.filetype, perms).0;
    let mut attrs = unix << 16;
    if entry.filetype == FileType::Directory {
        attrs |= 0x10;
    }
    attrs
}

/// The extended-timestamp (0x5455) and new-unix (0x7875) extras for an
/// entry, used in both the local and central headers.
pub fn timestamp_and_owner_extra(entry: &Entry) -> Vec<u8> {
    let mut extra = Vec::new();

    if let Some(mtime) = entry.mtime {
        let mut payload = Vec::with_capacity(9);
        let mut flags = 0b001u8;
        if entry.atime.is_some() {
            flags |= 0b010;
        }
        payload.push(flags);
        payload
            .write_u32::<LittleEndian>(mtime.secs.clamp(0, u32::MAX as i64) as u32)
            .unwrap();
        if let Some(atime) = entry.atime {
            payload
                .write_u32::<LittleEndian>(atime.secs.clamp(0, u32::MAX as i64) as u32)
                .unwrap();
        }
        extra.write_u16::<LittleEndian>(0x5455).unwrap();
        extra.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
        extra.extend_from_slice(&payload);
    }

    if entry.uid.is_some() || entry.gid.is_some() {
        let uid = entry.uid.unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
        let gid = entry.gid.unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
        let mut payload = Vec::with_capacity(11);
        payload.push(1); // version
        payload.push(4);
        payload.write_u32::<LittleEndian>(uid).unwrap();
        payload.push(4);
        payload.write_u32::<LittleEndian>(gid).unwrap();
        extra.write_u16::<LittleEndian>(0x7875).unwrap();
        extra.write_u16::<LittleEndian>(payload.len() as u16).unwrap();
        extra.extend_from_slice(&payload);
    }

    extra
}

/// The Info-ZIP unicode-path extra (0x7075), carrying the UTF-8 path and a
/// CRC-32 of the primary name field.
pub fn unicode_path_extra(name: &[u8]) -> Vec<u8> {
    let mut extra = Vec::new();
    extra.write_u16::<LittleEndian>(0x7075).unwrap();
    extra
        .write_u16::<LittleEndian>((1 + 4 + name.len()) as u16)
        .unwrap();
    extra.push(1); // version
    extra.write_u32::<LittleEndian>(crc32fast::hash(name)).unwrap();
    extra.extend_from_slice(name);
    extra
}

/// Serialize a local file header. With `length_at_end`, sizes and CRC are
/// zero and bit 3 is set; a [data_descriptor] must follow the body.
pub fn local_file_header(
    name: &[u8],
    method: Method,
    dos_time: u16,
    dos_date: u16,
    length_at_end: bool,
    sizes: Option<(u32, u64, u64)>,
    extra: &[u8],
    utf8: bool,
) -> Vec<u8> {
    let mut flags: u16 = 0;
    if length_at_end {
        flags |= 1 << 3;
    }
    if utf8 {
        flags |= 1 << 11;
    }

    let (crc32, compressed, uncompressed) = sizes.unwrap_or((0, 0, 0));
    let needs_zip64 = compressed > u32::MAX as u64 || uncompressed > u32::MAX as u64;

    let mut out = Vec::with_capacity(30 + name.len() + extra.len());
    out.extend_from_slice(b"PK\x03\x04");
    out.write_u16::<LittleEndian>(if needs_zip64 {
        VERSION_NEEDED_ZIP64
    } else {
        VERSION_NEEDED
    })
    .unwrap();
    out.write_u16::<LittleEndian>(flags).unwrap();
    out.write_u16::<LittleEndian>(method.into()).unwrap();
    out.write_u16::<LittleEndian>(dos_time).unwrap();
    out.write_u16::<LittleEndian>(dos_date).unwrap();
    out.write_u32::<LittleEndian>(crc32).unwrap();
    out.write_u32::<LittleEndian>(compressed.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u32::<LittleEndian>(uncompressed.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(extra.len() as u16).unwrap();
    out.extend_from_slice(name);
    out.extend_from_slice(extra);
    out
}

/// Serialize a data descriptor (with signature). 64-bit sizes when zip64.
pub fn data_descriptor(crc32: u32, compressed: u64, uncompressed: u64, zip64: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(24);
    out.extend_from_slice(b"PK\x07\x08");
    out.write_u32::<LittleEndian>(crc32).unwrap();
    if zip64 {
        out.write_u64::<LittleEndian>(compressed).unwrap();
        out.write_u64::<LittleEndian>(uncompressed).unwrap();
    } else {
        out.write_u32::<LittleEndian>(compressed as u32).unwrap();
        out.write_u32::<LittleEndian>(uncompressed as u32).unwrap();
    }
    out
}

/// Serialize one central directory file header.
pub fn central_header(e: &CentralEntry) -> Vec<u8> {
    let needs_zip64 = e.compressed_size > u32::MAX as u64
        || e.uncompressed_size > u32::MAX as u64
        || e.header_offset > u32::MAX as u64;

    // zip64 extra with the fields that overflowed, in fixed order
    let mut zip64_extra = Vec::new();
    if needs_zip64 {
        let mut payload = Vec::new();
        if e.uncompressed_size > u32::MAX as u64 {
            payload.write_u64::<LittleEndian>(e.uncompressed_size).unwrap();
        }
        if e.compressed_size > u32::MAX as u64 {
            payload.write_u64::<LittleEndian>(e.compressed_size).unwrap();
        }
        if e.header_offset > u32::MAX as u64 {
            payload.write_u64::<LittleEndian>(e.header_offset).unwrap();
        }
        zip64_extra.write_u16::<LittleEndian>(0x0001).unwrap();
        zip64_extra
            .write_u16::<LittleEndian>(payload.len() as u16)
            .unwrap();
        zip64_extra.extend_from_slice(&payload);
    }

    let mut out = Vec::with_capacity(46 + e.name.len() + e.extra.len() + zip64_extra.len());
    out.extend_from_slice(b"PK\x01\x02");
    out.write_u16::<LittleEndian>(VERSION_MADE_BY).unwrap();
    out.write_u16::<LittleEndian>(if needs_zip64 {
        VERSION_NEEDED_ZIP64
    } else {
        VERSION_NEEDED
    })
    .unwrap();
    out.write_u16::<LittleEndian>(e.flags).unwrap();
    out.write_u16::<LittleEndian>(e.method.into()).unwrap();
    out.write_u16::<LittleEndian>(e.dos_time).unwrap();
    out.write_u16::<LittleEndian>(e.dos_date).unwrap();
    out.write_u32::<LittleEndian>(e.crc32).unwrap();
    out.write_u32::<LittleEndian>(e.compressed_size.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u32::<LittleEndian>(e.uncompressed_size.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u16::<LittleEndian>(e.name.len() as u16).unwrap();
    out.write_u16::<LittleEndian>((e.extra.len() + zip64_extra.len()) as u16)
        .unwrap();
    out.write_u16::<LittleEndian>(0).unwrap(); // comment length
    out.write_u16::<LittleEndian>(0).unwrap(); // disk number start
    out.write_u16::<LittleEndian>(0).unwrap(); // internal attributes
    out.write_u32::<LittleEndian>(e.external_attrs).unwrap();
    out.write_u32::<LittleEndian>(e.header_offset.min(u32::MAX as u64) as u32)
        .unwrap();
    out.extend_from_slice(&e.name);
    out.extend_from_slice(&e.extra);
    out.extend_from_slice(&zip64_extra);
    out
}

/// Serialize the end-of-central-directory record, preceded by the zip64
/// record and locator when any count or size overflows the 16/32-bit
/// fields.
pub fn end_of_central_directory(
    entry_count: u64,
    directory_size: u64,
    directory_offset: u64,
) -> Vec<u8> {
    let needs_zip64 = entry_count > 0xFFFE
        || directory_size > u32::MAX as u64
        || directory_offset > u32::MAX as u64;

    let mut out = Vec::new();

    if needs_zip64 {
        let eocd64_offset = directory_offset + directory_size;

        // zip64 end of central directory record
        out.extend_from_slice(b"PK\x06\x06");
        out.write_u64::<LittleEndian>(44).unwrap(); // record size that follows
        out.write_u16::<LittleEndian>(VERSION_MADE_BY).unwrap();
        out.write_u16::<LittleEndian>(VERSION_NEEDED_ZIP64).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // this disk
        out.write_u32::<LittleEndian>(0).unwrap(); // directory disk
        out.write_u64::<LittleEndian>(entry_count).unwrap();
        out.write_u64::<LittleEndian>(entry_count).unwrap();
        out.write_u64::<LittleEndian>(directory_size).unwrap();
        out.write_u64::<LittleEndian>(directory_offset).unwrap();

        // zip64 end of central directory locator
        out.extend_from_slice(b"PK\x06\x07");
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(eocd64_offset).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();
    }

    out.extend_from_slice(b"PK\x05\x06");
    out.write_u16::<LittleEndian>(0).unwrap(); // this disk
    out.write_u16::<LittleEndian>(0).unwrap(); // directory disk
    out.write_u16::<LittleEndian>(entry_count.min(0xFFFF) as u16)
        .unwrap();
    out.write_u16::<LittleEndian>(entry_count.min(0xFFFF) as u16)
        .unwrap();
    out.write_u32::<LittleEndian>(directory_size.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u32::<LittleEndian>(directory_offset.min(u32::MAX as u64) as u32)
        .unwrap();
    out.write_u16::<LittleEndian>(0).unwrap(); // comment length
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use winnow::Partial;
    use winnow::Parser;

    use crate::parse::zip::{DataDescriptorRecord, LocalFileHeaderRecord};

    #[test]
    fn lfh_roundtrips_through_parser() {
        let extra = timestamp_and_owner_extra(&{
            let mut e = Entry::new();
            e.mtime = Some(crate::entry::Timespec::from_secs(1_344_609_212));
            e.uid = Some(1000);
            e
        });
        let bytes = local_file_header(
            b"hello.txt",
            Method::Deflate,
            0x1234,
            0x5678,
            true,
            None,
            &extra,
            false,
        );

        let mut input = Partial::new(&bytes[..]);
        let parsed = LocalFileHeaderRecord::parser.parse_next(&mut input).unwrap();
        assert_eq!(parsed.name.0, b"hello.txt");
        assert!(parsed.has_data_descriptor());
        assert_eq!(parsed.method, Method::Deflate);
        assert_eq!(parsed.compressed_size, 0);
    }

    #[test]
    fn descriptor_roundtrips_through_parser() {
        let bytes = data_descriptor(0x3610A686, 6, 6, false);
        let mut input = Partial::new(&bytes[..]);
        let parsed = DataDescriptorRecord::mk_parser(false)
            .parse_next(&mut input)
            .unwrap();
        assert_eq!(parsed.crc32, 0x3610A686);
        assert_eq!(parsed.uncompressed_size, 6);
    }

    #[test]
    fn stored_sizes_agree() {
        // stored method with known sizes: both size fields equal the data
        let bytes = local_file_header(
            b"f",
            Method::Store,
            0,
            0,
            false,
            Some((0xCAFEBABE, 6, 6)),
            &[],
            false,
        );
        let mut input = Partial::new(&bytes[..]);
        let parsed = LocalFileHeaderRecord::parser.parse_next(&mut input).unwrap();
        assert_eq!(parsed.compressed_size, parsed.uncompressed_size);
        assert_eq!(parsed.compressed_size, 6);
    }
}
