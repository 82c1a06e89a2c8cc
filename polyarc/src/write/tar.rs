//! Serialization of ustar header blocks and pax extended headers.
//!
//! The pax flavour: any value that doesn't fit the ustar fields (long or
//! non-ASCII names, large numbers, sub-second times, xattrs, ACLs, sparse
//! maps, vendor attributes) goes into an `x` pseudo-entry preceding the
//! real header, which then carries best-effort truncated values.

use crate::{
    entry::{acl::AclType, Entry, FileType},
    parse::pax,
    parse::tar::BLOCK_SIZE,
};

/// Largest value an 11-digit octal field can carry.
const OCTAL_11_MAX: u64 = 0o77_777_777_777;
/// Largest value a 7-digit octal field can carry.
const OCTAL_7_MAX: u64 = 0o7_777_777;

/// Write `value` as NUL-terminated octal ASCII into `field`, clamping to
/// the field's range (an accompanying pax record carries the real value
/// when clamping loses information).
fn octal_field(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let max = (1u64 << (3 * digits as u32)) - 1;
    let value = value.min(max);
    let s = format!("{:0width$o}", value, width = digits);
    field[..digits].copy_from_slice(s.as_bytes());
    field[digits] = 0;
}

fn text_field(field: &mut [u8], value: &[u8]) {
    let n = value.len().min(field.len());
    field[..n].copy_from_slice(&value[..n]);
    for b in &mut field[n..] {
        *b = 0;
    }
}

/// Fill in the checksum field: the unsigned sum of the block with the
/// checksum bytes treated as spaces, as six octal digits, NUL, space.
fn checksum_field(block: &mut [u8; BLOCK_SIZE]) {
    let mut sum: u64 = 0;
    for (i, &b) in block.iter().enumerate() {
        sum += if (148..156).contains(&i) { b' ' as u64 } else { b as u64 };
    }
    let s = format!("{:06o}\0 ", sum);
    block[148..156].copy_from_slice(s.as_bytes());
}

/// Split a long pathname into (prefix, name) so that name fits 100 bytes
/// and prefix fits 155, at a `/` boundary. `None` when no split works.
fn split_path(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.len() <= 100 {
        return Some((b"", path));
    }
    // find the rightmost '/' that leaves the tail under 100 bytes
    for (i, &b) in path.iter().enumerate().rev() {
        if b == b'/' && path.len() - i - 1 <= 100 && i <= 155 && i > 0 {
            return Some((&path[..i], &path[i + 1..]));
        }
    }
    None
}

fn typeflag_for(entry: &Entry) -> u8 {
    if entry.hardlink.is_some() {
        return b'1';
    }
    match entry.filetype {
        FileType::Regular | FileType::Unknown => b'0',
        FileType::Symlink => b'2',
        FileType::CharDevice => b'3',
        FileType::BlockDevice => b'4',
        FileType::Directory => b'5',
        FileType::Fifo | FileType::Socket => b'6',
    }
}

/// Build the 512-byte ustar header for an entry. Values that overflow the
/// fixed fields are clamped or truncated; call [pax_records_for] first and
/// emit the pseudo-entry when it returns records.
pub fn ustar_header(entry: &Entry) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];

    let path = entry.path.as_bytes();
    let path_owned;
    let path = if entry.filetype == FileType::Directory && !path.ends_with(b"/") {
        path_owned = [path, b"/"].concat();
        &path_owned[..]
    } else {
        path
    };

    match split_path(path) {
        Some((prefix, name)) => {
            text_field(&mut block[0..100], name);
            text_field(&mut block[345..500], prefix);
        }
        None => {
            // truncate; the pax record carries the real path
            text_field(&mut block[0..100], path);
        }
    }

    octal_field(&mut block[100..108], entry.mode.unwrap_or(0o644) as u64);
    octal_field(&mut block[108..116], entry.uid.unwrap_or(0).max(0) as u64);
    octal_field(&mut block[116..124], entry.gid.unwrap_or(0).max(0) as u64);

    let stored_size = if entry.sparse.is_dense() {
        entry.size_or_zero()
    } else {
        entry.sparse.stored_bytes()
    };
    octal_field(&mut block[124..136], stored_size);

    let mtime = entry.mtime.map(|t| t.secs).unwrap_or(0).max(0) as u64;
    octal_field(&mut block[136..148], mtime);

    block[156] = typeflag_for(entry);

    if let Some(link) = entry.hardlink.as_ref().or(entry.symlink.as_ref()) {
        text_field(&mut block[157..257], link.as_bytes());
    }

    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");

    if let Some(uname) = &entry.uname {
        text_field(&mut block[265..297], uname.as_bytes());
    }
    if let Some(gname) = &entry.gname {
        text_field(&mut block[297..329], gname.as_bytes());
    }

    if let Some((major, minor)) = entry.rdev {
        octal_field(&mut block[329..337], major);
        octal_field(&mut block[337..345], minor);
    } else if matches!(
        entry.filetype,
        FileType::CharDevice | FileType::BlockDevice
    ) {
        octal_field(&mut block[329..337], 0);
        octal_field(&mut block[337..345], 0);
    }

    checksum_field(&mut block);
    block
}

fn is_clean_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (0x20..0x7f).contains(&b))
}

fn time_record(t: crate::entry::Timespec) -> Vec<u8> {
    t.to_string().into_bytes()
}

/// Collect the pax records an entry needs, in a stable order. Empty means
/// the entry fits ustar and no pseudo-entry is required (the pax-restricted
/// default).
pub fn pax_records_for(entry: &Entry) -> Vec<(String, Vec<u8>)> {
    let mut records: Vec<(String, Vec<u8>)> = Vec::new();

    let path = entry.path.as_bytes();
    if split_path(path).is_none() || !is_clean_ascii(path) {
        records.push(("path".into(), path.to_vec()));
    }

    if let Some(link) = entry.hardlink.as_ref().or(entry.symlink.as_ref()) {
        let link = link.as_bytes();
        if link.len() > 100 || !is_clean_ascii(link) {
            records.push(("linkpath".into(), link.to_vec()));
        }
    }

    if let Some(uid) = entry.uid {
        if uid < 0 || uid as u64 > OCTAL_7_MAX {
            records.push(("uid".into(), uid.to_string().into_bytes()));
        }
    }
    if let Some(gid) = entry.gid {
        if gid < 0 || gid as u64 > OCTAL_7_MAX {
            records.push(("gid".into(), gid.to_string().into_bytes()));
        }
    }

    if let Some(size) = entry.size {
        if size > OCTAL_11_MAX {
            records.push(("size".into(), size.to_string().into_bytes()));
        }
    }

    if let Some(mtime) = entry.mtime {
        if mtime.nanos != 0 || mtime.secs < 0 || mtime.secs as u64 > OCTAL_11_MAX {
            records.push(("mtime".into(), time_record(mtime)));
        }
    }
    if let Some(atime) = entry.atime {
        records.push(("atime".into(), time_record(atime)));
    }
    if let Some(ctime) = entry.ctime {
        records.push(("ctime".into(), time_record(ctime)));
    }

    if let Some(uname) = &entry.uname {
        let b = uname.as_bytes();
        if b.len() > 32 || !is_clean_ascii(b) {
            records.push(("uname".into(), b.to_vec()));
        }
    }
    if let Some(gname) = &entry.gname {
        let b = gname.as_bytes();
        if b.len() > 32 || !is_clean_ascii(b) {
            records.push(("gname".into(), b.to_vec()));
        }
    }

    for xattr in &entry.xattrs {
        use base64::Engine;
        records.push((
            format!("LIBARCHIVE.xattr.{}", pax::url_encode(&xattr.name)),
            base64::engine::general_purpose::STANDARD
                .encode(&xattr.value)
                .into_bytes(),
        ));
        records.push((format!("SCHILY.xattr.{}", xattr.name), xattr.value.clone()));
    }

    if !entry.acl.is_empty() {
        let access = entry.acl.to_text_posix(AclType::Access);
        if !access.is_empty() {
            records.push(("SCHILY.acl.access".into(), access.into_bytes()));
        }
        let default = entry.acl.to_text_posix(AclType::Default);
        if !default.is_empty() {
            records.push(("SCHILY.acl.default".into(), default.into_bytes()));
        }
    }

    if let Some(fflags) = entry.fflags {
        if !fflags.is_empty() {
            records.push(("SCHILY.fflags".into(), fflags.to_text().into_bytes()));
        }
    }

    if !entry.sparse.is_dense() {
        // GNU 0.1 sparse: apparent size plus a comma-separated extent map,
        // all in the extended header; the body holds the extents
        // back-to-back
        records.push((
            "GNU.sparse.size".into(),
            entry.size_or_zero().to_string().into_bytes(),
        ));
        let map: Vec<String> = entry
            .sparse
            .iter()
            .flat_map(|e| [e.offset.to_string(), e.len.to_string()])
            .collect();
        records.push(("GNU.sparse.map".into(), map.join(",").into_bytes()));
    }

    for vendor in &entry.vendor {
        records.push((vendor.key.clone(), vendor.value.clone()));
    }

    records
}

/// Serialize pax records into the body of an `x` pseudo-entry, with the
/// strict self-inclusive length field.
pub fn pax_body(records: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in records {
        body.extend_from_slice(&pax::format_record(key, value));
    }
    body
}

/// Build the header block of the `x` pseudo-entry that precedes `entry`.
pub fn pax_pseudo_header(entry: &Entry, body_len: usize) -> [u8; BLOCK_SIZE] {
    let mut pseudo = Entry::new();
    // the pseudo-entry's name is advisory; old readers extract it as a file
    let name = entry.pathname();
    let base = name.rsplit('/').next().unwrap_or("pax");
    pseudo.set_pathname(format!("PaxHeaders.0/{base}"));
    pseudo.mode = Some(0o644);
    pseudo.size = Some(body_len as u64);
    pseudo.mtime = entry.mtime;

    let mut block = ustar_header(&pseudo);
    block[156] = b'x';
    checksum_field(&mut block);
    block
}

/// Pad a byte count to the next block boundary with zeros, returning how
/// many padding bytes are needed.
pub fn padding_for(len: u64) -> usize {
    (crate::parse::tar::padded_size(len) - len) as usize
}

/// The end-of-archive marker: two zero blocks.
pub fn end_of_archive() -> [u8; BLOCK_SIZE * 2] {
    [0u8; BLOCK_SIZE * 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Timespec;
    use crate::parse::tar::{self, TarHeader, TypeFlag};

    #[test]
    fn header_roundtrips_through_parser() {
        let mut entry = Entry::new();
        entry.set_pathname("dir/file.txt");
        entry.mode = Some(0o644);
        entry.uid = Some(1000);
        entry.gid = Some(1000);
        entry.size = Some(5);
        entry.mtime = Some(Timespec::from_secs(123));

        let block = ustar_header(&entry);
        tar::verify_checksum(&block).unwrap();
        let hdr = TarHeader::parse(&block).unwrap();
        assert_eq!(hdr.name, b"dir/file.txt");
        assert_eq!(hdr.mode, 0o644);
        assert_eq!(hdr.size, 5);
        assert_eq!(hdr.mtime, 123);
        assert_eq!(hdr.typeflag, TypeFlag::Regular);
    }

    #[test]
    fn short_entry_needs_no_pax() {
        let mut entry = Entry::new();
        entry.set_pathname("file");
        entry.mode = Some(0o644);
        entry.size = Some(5);
        entry.mtime = Some(Timespec::from_secs(123));
        assert!(pax_records_for(&entry).is_empty());
    }

    #[test]
    fn nanosecond_mtime_needs_pax() {
        let mut entry = Entry::new();
        entry.set_pathname("a");
        entry.mtime = Some(Timespec {
            secs: 1000,
            nanos: 123_456_789,
        });
        let records = pax_records_for(&entry);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "mtime");
        let body = pax_body(&records);
        assert_eq!(body, b"24 mtime=1000.123456789\n");
    }

    #[test]
    fn long_path_splits_or_goes_pax() {
        let long_component = "x".repeat(120);
        let mut entry = Entry::new();
        entry.set_pathname(format!("dir/{long_component}"));
        // no split point leaves the tail under 100 bytes
        assert!(pax_records_for(&entry)
            .iter()
            .any(|(k, _)| k == "path"));

        let mut entry = Entry::new();
        let path = format!("{}/tail", "p".repeat(120));
        entry.set_pathname(&path);
        // splits at the slash: prefix 120, name 4
        assert!(pax_records_for(&entry).is_empty());
        let block = ustar_header(&entry);
        let hdr = TarHeader::parse(&block).unwrap();
        assert_eq!(hdr.name, path.as_bytes());
    }

    #[test]
    fn directories_get_trailing_slash_and_type() {
        let mut entry = Entry::new();
        entry.set_pathname("some/dir");
        entry.filetype = FileType::Directory;
        let block = ustar_header(&entry);
        let hdr = TarHeader::parse(&block).unwrap();
        assert_eq!(hdr.typeflag, TypeFlag::Directory);
        assert_eq!(hdr.name, b"some/dir/");
    }
}
