//! The RPM envelope: a fixed 96-byte lead, then two header sections
//! (signature and main), then the payload. The filter that strips these is
//! in the sync crate; this module knows the byte layout and how to pull the
//! file index out of the main header's tag table.

use byteorder::{BigEndian, ByteOrder};

use crate::error::FormatError;

/// Magic at offset 0 of the lead.
pub const LEAD_MAGIC: [u8; 4] = [0xED, 0xAB, 0xEE, 0xDB];

/// Size of the lead.
pub const LEAD_SIZE: usize = 96;

/// Magic of a header section, including the reserved bytes.
pub const HEADER_MAGIC: [u8; 8] = [0x8E, 0xAD, 0xE8, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Size of a header section's fixed part.
pub const HEADER_FIXED_SIZE: usize = 16;

/// Validate the lead: magic, major 3 or 4, binary package type.
pub fn check_lead(lead: &[u8]) -> Result<(), FormatError> {
    if lead.len() < LEAD_SIZE || lead[..4] != LEAD_MAGIC {
        return Err(FormatError::RpmInvalid);
    }
    let major = lead[4];
    if major != 3 && major != 4 {
        return Err(FormatError::RpmInvalid);
    }
    Ok(())
}

/// The counts at the top of a header section.
#[derive(Debug, Clone, Copy)]
pub struct HeaderCounts {
    /// Number of 16-byte index entries
    pub index_count: u32,
    /// Size of the data region that follows the index
    pub data_bytes: u32,
}

impl HeaderCounts {
    /// Parse the 16 fixed bytes of a header section.
    pub fn parse(fixed: &[u8]) -> Result<Self, FormatError> {
        if fixed.len() < HEADER_FIXED_SIZE || fixed[..8] != HEADER_MAGIC {
            return Err(FormatError::RpmInvalid);
        }
        Ok(Self {
            index_count: BigEndian::read_u32(&fixed[8..12]),
            data_bytes: BigEndian::read_u32(&fixed[12..16]),
        })
    }

    /// Total size of the section after the fixed part.
    pub fn body_size(&self) -> usize {
        self.index_count as usize * 16 + self.data_bytes as usize
    }
}

/// Per-file metadata extracted from the main header.
#[derive(Debug, Clone, Default)]
pub struct RpmFileInfo {
    /// Full pathname
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// st_mode bits (type + permissions)
    pub mode: u32,
    /// Modification time
    pub mtime: i64,
    /// Owner name
    pub uname: Option<String>,
    /// Group name
    pub gname: Option<String>,
    /// Device the file lived on
    pub dev: u64,
    /// Inode; files sharing (dev, ino) are hardlinks of each other
    pub ino: u64,
}

/// The file index of an RPM package, published as a side channel for
/// downstream format readers.
#[derive(Debug, Clone, Default)]
pub struct RpmFileIndex {
    /// One record per packaged file, in header order
    pub files: Vec<RpmFileInfo>,
}

// tag numbers from the rpm header specification
const TAG_OLDFILENAMES: u32 = 1027;
const TAG_FILESIZES: u32 = 1028;
const TAG_FILEMODES: u32 = 1030;
const TAG_FILEMTIMES: u32 = 1034;
const TAG_FILEUSERNAME: u32 = 1039;
const TAG_FILEGROUPNAME: u32 = 1040;
const TAG_FILEDEVICES: u32 = 1095;
const TAG_FILEINODES: u32 = 1096;
const TAG_DIRNAMES: u32 = 1116;
const TAG_BASENAMES: u32 = 1117;
const TAG_DIRINDEXES: u32 = 1118;

#[derive(Debug)]
struct IndexEntry {
    tag: u32,
    typ: u32,
    offset: u32,
    count: u32,
}

fn read_string(data: &[u8], offset: usize) -> Option<String> {
    let rest = data.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

fn read_string_array(data: &[u8], mut offset: usize, count: u32) -> Vec<String> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match read_string(data, offset) {
            Some(s) => {
                offset += s.len() + 1;
                out.push(s);
            }
            None => break,
        }
    }
    out
}

fn read_u32_array(data: &[u8], offset: usize, count: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let start = offset + i * 4;
        match data.get(start..start + 4) {
            Some(b) => out.push(BigEndian::read_u32(b)),
            None => break,
        }
    }
    out
}

fn read_u16_array(data: &[u8], offset: usize, count: u32) -> Vec<u16> {
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let start = offset + i * 2;
        match data.get(start..start + 2) {
            Some(b) => out.push(BigEndian::read_u16(b)),
            None => break,
        }
    }
    out
}

impl RpmFileIndex {
    /// Extract the file index from a main header section body
    /// (index entries + data region, without the 16 fixed bytes).
    pub fn parse(counts: HeaderCounts, body: &[u8]) -> Result<Self, FormatError> {
        let index_size = counts.index_count as usize * 16;
        if body.len() < counts.body_size() {
            return Err(FormatError::RpmInvalid);
        }
        let data = &body[index_size..counts.body_size()];

        let mut entries = Vec::with_capacity(counts.index_count as usize);
        for i in 0..counts.index_count as usize {
            let e = &body[i * 16..i * 16 + 16];
            entries.push(IndexEntry {
                tag: BigEndian::read_u32(&e[0..4]),
                typ: BigEndian::read_u32(&e[4..8]),
                offset: BigEndian::read_u32(&e[8..12]),
                count: BigEndian::read_u32(&e[12..16]),
            });
        }

        let find = |tag: u32| entries.iter().find(|e| e.tag == tag);

        // pathnames: either the old flat list, or dirnames + basenames
        let paths: Vec<String> = if let Some(e) = find(TAG_OLDFILENAMES) {
            read_string_array(data, e.offset as usize, e.count)
        } else if let (Some(base), Some(diridx), Some(dirs)) =
            (find(TAG_BASENAMES), find(TAG_DIRINDEXES), find(TAG_DIRNAMES))
        {
            let basenames = read_string_array(data, base.offset as usize, base.count);
            let dirindexes = read_u32_array(data, diridx.offset as usize, diridx.count);
            let dirnames = read_string_array(data, dirs.offset as usize, dirs.count);
            basenames
                .iter()
                .zip(dirindexes.iter())
                .map(|(b, &d)| {
                    let dir = dirnames.get(d as usize).map(String::as_str).unwrap_or("");
                    format!("{dir}{b}")
                })
                .collect()
        } else {
            // headers without a file list are valid (meta packages)
            return Ok(Self::default());
        };

        let sizes = find(TAG_FILESIZES)
            .map(|e| read_u32_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let modes = find(TAG_FILEMODES)
            .filter(|e| e.typ == 3)
            .map(|e| read_u16_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let mtimes = find(TAG_FILEMTIMES)
            .map(|e| read_u32_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let unames = find(TAG_FILEUSERNAME)
            .map(|e| read_string_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let gnames = find(TAG_FILEGROUPNAME)
            .map(|e| read_string_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let devs = find(TAG_FILEDEVICES)
            .map(|e| read_u32_array(data, e.offset as usize, e.count))
            .unwrap_or_default();
        let inos = find(TAG_FILEINODES)
            .map(|e| read_u32_array(data, e.offset as usize, e.count))
            .unwrap_or_default();

        let files = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| RpmFileInfo {
                path,
                size: sizes.get(i).copied().unwrap_or(0) as u64,
                mode: modes.get(i).copied().unwrap_or(0) as u32,
                mtime: mtimes.get(i).copied().unwrap_or(0) as i64,
                uname: unames.get(i).cloned(),
                gname: gnames.get(i).cloned(),
                dev: devs.get(i).copied().unwrap_or(0) as u64,
                ino: inos.get(i).copied().unwrap_or(0) as u64,
            })
            .collect();

        Ok(Self { files })
    }

    /// Group files by (dev, ino): every group with more than one member is a
    /// hardlink set.
    pub fn hardlink_groups(&self) -> Vec<Vec<&RpmFileInfo>> {
        let mut groups: Vec<((u64, u64), Vec<&RpmFileInfo>)> = Vec::new();
        for f in &self.files {
            if f.ino == 0 {
                continue;
            }
            match groups.iter_mut().find(|(k, _)| *k == (f.dev, f.ino)) {
                Some((_, v)) => v.push(f),
                None => groups.push(((f.dev, f.ino), vec![f])),
            }
        }
        groups
            .into_iter()
            .filter(|(_, v)| v.len() > 1)
            .map(|(_, v)| v)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_index(body: &mut Vec<u8>, tag: u32, typ: u32, offset: u32, count: u32) {
        let mut e = [0u8; 16];
        BigEndian::write_u32(&mut e[0..4], tag);
        BigEndian::write_u32(&mut e[4..8], typ);
        BigEndian::write_u32(&mut e[8..12], offset);
        BigEndian::write_u32(&mut e[12..16], count);
        body.extend_from_slice(&e);
    }

    #[test]
    fn extracts_file_index() {
        // data region: two old-style filenames then two sizes
        let mut data = Vec::new();
        data.extend_from_slice(b"/bin/a\0/bin/b\0");
        let sizes_off = data.len() as u32;
        let mut buf = [0u8; 8];
        BigEndian::write_u32(&mut buf[0..4], 3);
        BigEndian::write_u32(&mut buf[4..8], 7);
        data.extend_from_slice(&buf);

        let mut body = Vec::new();
        push_index(&mut body, TAG_OLDFILENAMES, 8, 0, 2);
        push_index(&mut body, TAG_FILESIZES, 4, sizes_off, 2);
        body.extend_from_slice(&data);

        let counts = HeaderCounts {
            index_count: 2,
            data_bytes: data.len() as u32,
        };
        let index = RpmFileIndex::parse(counts, &body).unwrap();
        assert_eq!(index.files.len(), 2);
        assert_eq!(index.files[0].path, "/bin/a");
        assert_eq!(index.files[1].size, 7);
    }
}
