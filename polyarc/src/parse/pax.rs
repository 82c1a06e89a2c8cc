//! Pax extended header records: `"<LEN> <key>=<value>\n"` sequences carried
//! in the body of `x`/`g` pseudo-entries.
//!
//! The length field counts the *entire* record, itself included. Writers in
//! the wild disagree on that, so the parser accepts both the strict form and
//! the lenient one (length excluding the length digits); we always write
//! strict.

use base64::Engine;

use crate::{
    encoding::Encoding,
    entry::{acl::AclType, Entry, EntryString, FileType, Timespec, VendorAttr, Xattr},
    error::FormatError,
};

/// One `key=value` record from a pax extended header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaxRecord {
    /// The key, always ASCII in practice
    pub key: Vec<u8>,
    /// The raw value bytes (UTF-8 unless `hdrcharset=BINARY` is in effect)
    pub value: Vec<u8>,
}

/// Parse all records in a pax header body.
pub fn parse_records(body: &[u8]) -> Result<Vec<PaxRecord>, FormatError> {
    let mut records = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        // trailing NUL padding after the last record is fine
        if rest[0] == 0 {
            break;
        }

        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(FormatError::PaxInvalidRecord)?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(FormatError::PaxInvalidRecord)?;

        // strict: len counts the whole record including itself; lenient
        // writers exclude the length digits and the separating space
        let record_end = if len <= rest.len() && len > space && rest[len - 1] == b'\n' {
            len
        } else {
            let lenient = len + space + 1;
            if lenient <= rest.len() && lenient > 0 && rest[lenient - 1] == b'\n' {
                lenient
            } else {
                return Err(FormatError::PaxInvalidRecord);
            }
        };

        let record = &rest[space + 1..record_end - 1];
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or(FormatError::PaxInvalidRecord)?;
        records.push(PaxRecord {
            key: record[..eq].to_vec(),
            value: record[eq + 1..].to_vec(),
        });

        rest = &rest[record_end..];
    }

    Ok(records)
}

/// Serialize one record in the strict form: the length field counts every
/// byte of the record, including the length digits and the final newline.
pub fn format_record(key: &str, value: &[u8]) -> Vec<u8> {
    // " key=value\n" without the length digits
    let tail_len = 1 + key.len() + 1 + value.len() + 1;

    // the length digits count themselves, so grow until stable
    let mut digits = 1;
    loop {
        let total = digits + tail_len;
        let needed = total.to_string().len();
        if needed == digits {
            break;
        }
        digits = needed;
    }

    let total = digits + tail_len;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(total.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out.push(b'\n');
    out
}

/// Decimal seconds with an optional fractional part, e.g. `1000.123456789`.
pub fn parse_pax_time(value: &[u8]) -> Option<Timespec> {
    let s = std::str::from_utf8(value).ok()?;
    let (secs_s, frac_s) = match s.split_once('.') {
        Some((a, b)) => (a, Some(b)),
        None => (s, None),
    };
    let secs: i64 = secs_s.parse().ok()?;
    let nanos = match frac_s {
        Some(frac) => {
            let digits: String = frac.chars().take(9).collect();
            let mut nanos: u32 = digits.parse().ok()?;
            for _ in digits.len()..9 {
                nanos *= 10;
            }
            nanos
        }
        None => 0,
    };
    Some(Timespec { secs, nanos })
}

/// GNU sparse information accumulated from pax records (formats 0.0, 0.1
/// and 1.0).
#[derive(Debug, Default, Clone)]
pub struct GnuPaxSparse {
    /// `GNU.sparse.major`, 1 for the 1.0 format
    pub major: Option<u32>,
    /// `GNU.sparse.minor`
    pub minor: Option<u32>,
    /// `GNU.sparse.name`: the real pathname (1.0 mangles the header name)
    pub name: Option<Vec<u8>>,
    /// `GNU.sparse.realsize` / `GNU.sparse.size`: apparent file size
    pub realsize: Option<u64>,
    /// Extents from 0.0 (`offset`/`numbytes` pairs) or 0.1 (`map`)
    pub extents: Vec<(u64, u64)>,
    /// Offset seen, waiting for its matching numbytes (0.0 format)
    pending_offset: Option<u64>,
}

impl GnuPaxSparse {
    /// True when a 1.0-format map block precedes the entry data.
    pub fn is_1_0(&self) -> bool {
        self.major == Some(1)
    }

    /// True when any sparse information was collected.
    pub fn is_present(&self) -> bool {
        self.major.is_some() || self.realsize.is_some() || !self.extents.is_empty()
    }
}

/// Side effects of applying pax records that the tar state machine needs
/// beyond the entry itself.
#[derive(Debug, Default)]
pub struct PaxOutcome {
    /// `hdrcharset` in effect after these records
    pub hdrcharset: Option<Encoding>,
    /// Collected GNU sparse state
    pub sparse: GnuPaxSparse,
    /// `size` override (also tracked on the entry; kept here because sparse
    /// handling needs to distinguish stored size from apparent size)
    pub size: Option<u64>,
}

/// Apply pax records to an entry, in order. Returns what the reader needs to
/// know beyond the entry fields.
pub fn apply_records(
    entry: &mut Entry,
    records: &[PaxRecord],
    outcome: &mut PaxOutcome,
) -> Result<(), FormatError> {
    for rec in records {
        apply_record(entry, rec, outcome)?;
    }
    Ok(())
}

fn apply_record(
    entry: &mut Entry,
    rec: &PaxRecord,
    outcome: &mut PaxOutcome,
) -> Result<(), FormatError> {
    let charset = outcome.hdrcharset.unwrap_or(Encoding::Utf8);
    let key = std::str::from_utf8(&rec.key).map_err(|_| FormatError::PaxInvalidRecord)?;
    let value = &rec.value[..];
    let text = || std::str::from_utf8(value).map_err(|_| FormatError::PaxInvalidRecord);

    match key {
        "path" => entry.path = EntryString::from_bytes(value.to_vec(), charset),
        "linkpath" => {
            let link = EntryString::from_bytes(value.to_vec(), charset);
            if entry.hardlink.is_some() {
                entry.hardlink = Some(link);
            } else {
                entry.symlink = Some(link);
                entry.filetype = FileType::Symlink;
            }
        }
        "size" => {
            let size: u64 = text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?;
            entry.size = Some(size);
            outcome.size = Some(size);
        }
        "uid" => entry.uid = Some(text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?),
        "gid" => entry.gid = Some(text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?),
        "uname" => entry.uname = Some(EntryString::from_bytes(value.to_vec(), charset)),
        "gname" => entry.gname = Some(EntryString::from_bytes(value.to_vec(), charset)),
        "atime" => entry.atime = parse_pax_time(value),
        "mtime" => entry.mtime = parse_pax_time(value),
        "ctime" => entry.ctime = parse_pax_time(value),
        "hdrcharset" => {
            outcome.hdrcharset = Some(match value {
                b"BINARY" => Encoding::Binary,
                _ => Encoding::Utf8,
            });
        }

        "SCHILY.ino" => entry.ino = Some(text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?),
        "SCHILY.nlink" => {
            entry.nlink = Some(text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?)
        }
        "SCHILY.dev" => {
            let dev: u64 = text()?.parse().map_err(|_| FormatError::PaxInvalidRecord)?;
            entry.dev = Some((dev >> 8, dev & 0xff));
        }
        "SCHILY.fflags" => {
            let t = text()?;
            entry.fflags = Some(crate::entry::FileFlags::from_text(t));
            entry.fflags_text = Some(t.to_string());
        }
        "SCHILY.acl.access" => {
            let t = text()?;
            entry
                .acl
                .parse_posix_text(t, AclType::Access)
                .map_err(|_| FormatError::PaxInvalidRecord)?;
        }
        "SCHILY.acl.default" => {
            let t = text()?;
            entry
                .acl
                .parse_posix_text(t, AclType::Default)
                .map_err(|_| FormatError::PaxInvalidRecord)?;
        }

        "GNU.sparse.major" => {
            outcome.sparse.major = Some(text()?.parse().map_err(|_| FormatError::SparseMapInvalid)?)
        }
        "GNU.sparse.minor" => {
            outcome.sparse.minor = Some(text()?.parse().map_err(|_| FormatError::SparseMapInvalid)?)
        }
        "GNU.sparse.name" => outcome.sparse.name = Some(value.to_vec()),
        "GNU.sparse.realsize" | "GNU.sparse.size" => {
            outcome.sparse.realsize =
                Some(text()?.parse().map_err(|_| FormatError::SparseMapInvalid)?)
        }
        "GNU.sparse.numblocks" => { /* informational; pairs follow */ }
        "GNU.sparse.offset" => {
            outcome.sparse.pending_offset =
                Some(text()?.parse().map_err(|_| FormatError::SparseMapInvalid)?)
        }
        "GNU.sparse.numbytes" => {
            let len: u64 = text()?.parse().map_err(|_| FormatError::SparseMapInvalid)?;
            let offset = outcome
                .sparse
                .pending_offset
                .take()
                .ok_or(FormatError::SparseMapInvalid)?;
            outcome.sparse.extents.push((offset, len));
        }
        "GNU.sparse.map" => {
            // 0.1 format: comma-separated offset,size pairs
            let t = text()?;
            let mut nums = t.split(',').map(|n| n.parse::<u64>());
            loop {
                let offset = match nums.next() {
                    Some(n) => n.map_err(|_| FormatError::SparseMapInvalid)?,
                    None => break,
                };
                let len = nums
                    .next()
                    .ok_or(FormatError::SparseMapInvalid)?
                    .map_err(|_| FormatError::SparseMapInvalid)?;
                outcome.sparse.extents.push((offset, len));
            }
        }

        _ => {
            if let Some(name) = key.strip_prefix("SCHILY.xattr.") {
                // raw value bytes, key as-is
                entry.xattrs.push(Xattr {
                    name: name.to_string(),
                    value: value.to_vec(),
                });
            } else if let Some(name) = key.strip_prefix("LIBARCHIVE.xattr.") {
                // url-encoded key, base64 value
                let name = url_decode(name);
                let value = base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .map_err(|_| FormatError::PaxInvalidRecord)?;
                entry.xattrs.push(Xattr { name, value });
            } else if key
                .chars()
                .next()
                .map(|c| c.is_ascii_uppercase())
                .unwrap_or(false)
            {
                // vendor-namespaced attribute, preserved verbatim
                entry.vendor.push(VendorAttr {
                    key: key.to_string(),
                    value: value.to_vec(),
                });
            }
            // unknown lowercase keys are ignored, per POSIX
        }
    }
    Ok(())
}

/// Percent-decode a LIBARCHIVE.xattr key.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a LIBARCHIVE.xattr key: everything outside the portable
/// character set becomes `%XX`.
pub fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'=' | b'%' | 0..=0x20 | 0x7f..=0xff => {
                out.push_str(&format!("%{:02X}", b));
            }
            _ => out.push(b as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_record_roundtrip() {
        let rec = format_record("mtime", b"1000.123456789");
        assert_eq!(rec, b"24 mtime=1000.123456789\n");

        // ten-digit seconds with nanosecond precision: the classic "30"
        let rec = format_record("mtime", b"1344609212.123456789");
        assert_eq!(rec, b"30 mtime=1344609212.123456789\n");

        let parsed = parse_records(&rec).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, b"mtime");
        assert_eq!(parsed[0].value, b"1000.123456789");
    }

    #[test]
    fn length_field_counts_itself() {
        // POSIX requires this of every written record
        for (key, value) in [
            ("path", &b"some/long/path"[..]),
            ("a", b""),
            ("x", &[0x41u8; 95][..]),  // total crosses 100
            ("y", &[0x41u8; 992][..]), // total crosses 1000
        ] {
            let rec = format_record(key, value);
            let space = rec.iter().position(|&b| b == b' ').unwrap();
            let len: usize = std::str::from_utf8(&rec[..space]).unwrap().parse().unwrap();
            assert_eq!(len, rec.len(), "key={key}");
        }
    }

    #[test]
    fn lenient_records_accepted() {
        // length excludes the "3 " prefix here: the payload "a=b\n" is 4
        let parsed = parse_records(b"4 a=b\n").unwrap();
        assert_eq!(parsed[0].key, b"a");
        assert_eq!(parsed[0].value, b"b");
    }

    #[test]
    fn pax_time_fraction() {
        let t = parse_pax_time(b"1000.123456789").unwrap();
        assert_eq!(t, Timespec { secs: 1000, nanos: 123_456_789 });
        let t = parse_pax_time(b"1000.5").unwrap();
        assert_eq!(t.nanos, 500_000_000);
        let t = parse_pax_time(b"-1").unwrap();
        assert_eq!(t.secs, -1);
    }

    #[test]
    fn sparse_pairs_accumulate() {
        let mut entry = Entry::new();
        let mut outcome = PaxOutcome::default();
        let records = vec![
            PaxRecord { key: b"GNU.sparse.offset".to_vec(), value: b"0".to_vec() },
            PaxRecord { key: b"GNU.sparse.numbytes".to_vec(), value: b"100".to_vec() },
            PaxRecord { key: b"GNU.sparse.offset".to_vec(), value: b"9900".to_vec() },
            PaxRecord { key: b"GNU.sparse.numbytes".to_vec(), value: b"100".to_vec() },
            PaxRecord { key: b"GNU.sparse.size".to_vec(), value: b"10000".to_vec() },
        ];
        apply_records(&mut entry, &records, &mut outcome).unwrap();
        assert_eq!(outcome.sparse.extents, vec![(0, 100), (9900, 100)]);
        assert_eq!(outcome.sparse.realsize, Some(10000));
    }

    #[test]
    fn url_coding_roundtrip() {
        let name = "user.weird name=with%chars";
        let enc = url_encode(name);
        assert!(!enc.contains(' '));
        assert!(!enc.contains('='));
        assert_eq!(url_decode(&enc), name);
    }

    #[test]
    fn vendor_attrs_preserved() {
        let mut entry = Entry::new();
        let mut outcome = PaxOutcome::default();
        let records = vec![PaxRecord {
            key: b"LIBFOO.comment".to_vec(),
            value: b"hello".to_vec(),
        }];
        apply_records(&mut entry, &records, &mut outcome).unwrap();
        assert_eq!(entry.vendor.len(), 1);
        assert_eq!(entry.vendor[0].key, "LIBFOO.comment");
    }
}
