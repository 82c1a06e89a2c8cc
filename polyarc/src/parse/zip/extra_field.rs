use winnow::{
    binary::{le_u16, le_u32, le_u64, le_u8, length_take},
    combinator::opt,
    error::{ErrMode, ErrorKind, ParserError, StrContext},
    seq,
    stream::Stream,
    token::{tag, take},
    PResult, Parser, Partial,
};

/// Consume whatever is left of the (already length-delimited) payload.
fn rest_vec(i: &mut Partial<&'_ [u8]>) -> PResult<Vec<u8>> {
    let n = i.eof_offset();
    take(n).map(|s: &[u8]| s.to_vec()).parse_next(i)
}

use super::{Method, NtfsTimestamp};

/// 4.4.28 extra field: (Variable)
pub(crate) struct ExtraFieldRecord<'a> {
    pub(crate) tag: u16,
    pub(crate) payload: &'a [u8],
}

impl<'a> ExtraFieldRecord<'a> {
    pub(crate) fn parser(i: &mut Partial<&'a [u8]>) -> PResult<Self> {
        seq! {Self {
            tag: le_u16,
            payload: length_take(le_u16),
        }}
        .parse_next(i)
    }
}

/// Useful because zip64 extended information extra field has fixed order *but*
/// optional fields. From the appnote:
///
/// If one of the size or offset fields in the Local or Central directory record
/// is too small to hold the required data, a Zip64 extended information record
/// is created. The order of the fields in the zip64 extended information record
/// is fixed, but the fields MUST only appear if the corresponding Local or
/// Central directory record field is set to 0xFFFF or 0xFFFFFFFF.
#[derive(Debug, Clone, Copy)]
pub struct ExtraFieldSettings {
    /// the uncompressed size was 0xFFFF_FFFF in the original record
    pub needs_uncompressed_size: bool,

    /// the compressed size was 0xFFFF_FFFF in the original record
    pub needs_compressed_size: bool,

    /// the header offset was 0xFFFF_FFFF in the original record
    pub needs_header_offset: bool,
}

/// Information stored in the central directory header `extra` field
///
/// This typically contains timestamps, file sizes and offsets, file mode, uid/gid, etc.
#[derive(Debug, Clone)]
pub enum ExtraField {
    /// Zip64 extended information extra field
    Zip64(ExtraZip64Field),
    /// Extended timestamp
    Timestamp(ExtraTimestampField),
    /// UNIX & Info-Zip UNIX
    Unix(ExtraUnixField),
    /// New UNIX extra field
    NewUnix(ExtraNewUnixField),
    /// NTFS (Win9x/WinNT FileTimes)
    Ntfs(ExtraNtfsField),
    /// Info-ZIP Unicode path
    UnicodePath(ExtraUnicodeField),
    /// Info-ZIP Unicode comment
    UnicodeComment(ExtraUnicodeField),
    /// WinZip AES encryption descriptor
    Aes(ExtraAesField),
    /// Unknown extra field, with tag
    Unknown {
        /// tag of the extra field
        tag: u16,
    },
}

impl ExtraField {
    /// Make a parser for extra fields, given the settings for the zip64 extra
    /// field (which depend on whether the u32 values are 0xFFFF_FFFF or not)
    pub fn mk_parser(
        settings: ExtraFieldSettings,
    ) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            use ExtraField as EF;
            let rec = ExtraFieldRecord::parser.parse_next(i)?;
            let payload = &mut Partial::new(rec.payload);

            let variant = match rec.tag {
                ExtraZip64Field::TAG => opt(ExtraZip64Field::mk_parser(settings).map(EF::Zip64))
                    .context(StrContext::Label("zip64"))
                    .parse_next(payload)?,
                ExtraTimestampField::TAG => opt(ExtraTimestampField::parser.map(EF::Timestamp))
                    .context(StrContext::Label("timestamp"))
                    .parse_next(payload)?,
                ExtraNtfsField::TAG => {
                    opt(ExtraNtfsField::parser.map(EF::Ntfs)).parse_next(payload)?
                }
                ExtraUnixField::TAG | ExtraUnixField::TAG_INFOZIP => {
                    opt(ExtraUnixField::parser.map(EF::Unix)).parse_next(payload)?
                }
                ExtraNewUnixField::TAG => {
                    opt(ExtraNewUnixField::parser.map(EF::NewUnix)).parse_next(payload)?
                }
                ExtraUnicodeField::TAG_PATH => {
                    opt(ExtraUnicodeField::parser.map(EF::UnicodePath)).parse_next(payload)?
                }
                ExtraUnicodeField::TAG_COMMENT => {
                    opt(ExtraUnicodeField::parser.map(EF::UnicodeComment)).parse_next(payload)?
                }
                ExtraAesField::TAG => {
                    opt(ExtraAesField::parser.map(EF::Aes)).parse_next(payload)?
                }
                _ => None,
            }
            .unwrap_or(EF::Unknown { tag: rec.tag });

            Ok(variant)
        }
    }
}

/// 4.5.3 -Zip64 Extended Information Extra Field (0x0001)
#[derive(Debug, Clone, Default)]
pub struct ExtraZip64Field {
    /// 64-bit uncompressed size
    pub uncompressed_size: Option<u64>,

    /// 64-bit compressed size
    pub compressed_size: Option<u64>,

    /// 64-bit header offset
    pub header_offset: Option<u64>,
}

impl ExtraZip64Field {
    pub(crate) const TAG: u16 = 0x0001;

    pub(crate) fn mk_parser(
        settings: ExtraFieldSettings,
    ) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            let uncompressed_size = if settings.needs_uncompressed_size {
                Some(le_u64.parse_next(i)?)
            } else {
                None
            };
            let compressed_size = if settings.needs_compressed_size {
                Some(le_u64.parse_next(i)?)
            } else {
                None
            };
            let header_offset = if settings.needs_header_offset {
                Some(le_u64.parse_next(i)?)
            } else {
                None
            };
            // the disk start number may or may not be there, we don't use it
            let _ = opt(le_u32.complete_err()).parse_next(i)?;

            Ok(Self {
                uncompressed_size,
                compressed_size,
                header_offset,
            })
        }
    }
}

/// Extended timestamp extra field (0x5455): a flags byte telling which of
/// mtime/atime/ctime follow, each a u32 unix timestamp.
#[derive(Debug, Clone)]
pub struct ExtraTimestampField {
    /// modification time, if bit 0 of the flags was set
    pub mtime: Option<u32>,
    /// access time, if bit 1 of the flags was set
    pub atime: Option<u32>,
    /// creation time, if bit 2 of the flags was set
    pub ctime: Option<u32>,
}

impl ExtraTimestampField {
    pub(crate) const TAG: u16 = 0x5455;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let flags = le_u8.parse_next(i)?;
        // the central directory copy of this field often carries the flags
        // byte but only the mtime value; tolerate missing trailing values
        let mtime = if flags & 0b001 != 0 {
            opt(le_u32.complete_err()).parse_next(i)?
        } else {
            None
        };
        let atime = if flags & 0b010 != 0 {
            opt(le_u32.complete_err()).parse_next(i)?
        } else {
            None
        };
        let ctime = if flags & 0b100 != 0 {
            opt(le_u32.complete_err()).parse_next(i)?
        } else {
            None
        };
        Ok(Self {
            mtime,
            atime,
            ctime,
        })
    }
}

/// 4.5.7 -UNIX Extra Field (0x000d), also the old Info-ZIP UNIX field (0x5855)
#[derive(Debug, Clone)]
pub struct ExtraUnixField {
    /// file last access time
    pub atime: u32,
    /// file last modification time
    pub mtime: u32,
    /// file user id
    pub uid: u16,
    /// file group id
    pub gid: u16,
    /// variable length data field
    pub data: Vec<u8>,
}

impl ExtraUnixField {
    pub(crate) const TAG: u16 = 0x000d;
    pub(crate) const TAG_INFOZIP: u16 = 0x5855;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let atime = le_u32.parse_next(i)?;
        let mtime = le_u32.parse_next(i)?;
        // uid/gid are only present in the local header copy; the central
        // directory copy ends after mtime
        let uid = opt(le_u16.complete_err()).parse_next(i)?.unwrap_or(0);
        let gid = opt(le_u16.complete_err()).parse_next(i)?.unwrap_or(0);
        let data = rest_vec.parse_next(i)?;
        Ok(Self {
            atime,
            mtime,
            uid,
            gid,
            data,
        })
    }
}

/// Info-ZIP New Unix Extra Field:
/// ====================================
///
/// Currently stores Unix UIDs/GIDs up to 32 bits.
/// (Last Revision 20080509)
///
/// ```text
/// Value         Size        Description
/// -----         ----        -----------
/// 0x7875        Short       tag for this extra block type ("ux")
/// TSize         Short       total data size for this block
/// Version       1 byte      version of this extra field, currently 1
/// UIDSize       1 byte      Size of UID field
/// UID           Variable    UID for this entry
/// GIDSize       1 byte      Size of GID field
/// GID           Variable    GID for this entry
/// ```
#[derive(Debug, Clone)]
pub struct ExtraNewUnixField {
    /// file user id
    pub uid: u64,

    /// file group id
    pub gid: u64,
}

impl ExtraNewUnixField {
    pub(crate) const TAG: u16 = 0x7875;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag("\x01").parse_next(i)?;
        seq! {Self {
            uid: Self::parse_variable_length_integer,
            gid: Self::parse_variable_length_integer,
        }}
        .parse_next(i)
    }

    fn parse_variable_length_integer(i: &mut Partial<&'_ [u8]>) -> PResult<u64> {
        let slice = length_take(le_u8).parse_next(i)?;
        if let Some(u) = match slice.len() {
            1 => Some(le_u8.parse_peek(Partial::new(slice))?.1 as u64),
            2 => Some(le_u16.parse_peek(Partial::new(slice))?.1 as u64),
            4 => Some(le_u32.parse_peek(Partial::new(slice))?.1 as u64),
            8 => Some(le_u64.parse_peek(Partial::new(slice))?.1),
            _ => None,
        } {
            Ok(u)
        } else {
            Err(ErrMode::from_error_kind(i, ErrorKind::Alt))
        }
    }
}

/// Info-ZIP Unicode path (0x7075) / comment (0x6375) extra field:
/// a version byte, the CRC-32 of the header's primary field, and the UTF-8
/// replacement text. The replacement is only valid if the CRC matches the
/// primary field actually stored.
#[derive(Debug, Clone)]
pub struct ExtraUnicodeField {
    /// CRC-32 of the primary (possibly CP437) field this replaces
    pub name_crc32: u32,
    /// UTF-8 replacement text
    pub utf8: Vec<u8>,
}

impl ExtraUnicodeField {
    pub(crate) const TAG_PATH: u16 = 0x7075;
    pub(crate) const TAG_COMMENT: u16 = 0x6375;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag("\x01").parse_next(i)?;
        let name_crc32 = le_u32.parse_next(i)?;
        let utf8 = rest_vec.parse_next(i)?;
        Ok(Self { name_crc32, utf8 })
    }
}

/// WinZip AES extra field (0x9901): AE version, vendor id, key strength, and
/// the actual compression method hidden behind method 99.
#[derive(Debug, Clone)]
pub struct ExtraAesField {
    /// 1 for AE-1 (CRC present), 2 for AE-2 (CRC zeroed)
    pub version: u16,
    /// key strength: 1 = AES-128, 2 = AES-192, 3 = AES-256
    pub strength: u8,
    /// the real compression method of the entry data
    pub method: Method,
}

impl ExtraAesField {
    pub(crate) const TAG: u16 = 0x9901;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let version = le_u16.parse_next(i)?;
        // vendor id, always "AE"
        let _vendor = take(2_usize).parse_next(i)?;
        let strength = le_u8.parse_next(i)?;
        let method = Method::parser.parse_next(i)?;
        Ok(Self {
            version,
            strength,
            method,
        })
    }
}

/// 4.5.5 -NTFS Extra Field (0x000a):
#[derive(Debug, Clone)]
pub struct ExtraNtfsField {
    /// NTFS attributes
    pub attrs: Vec<NtfsAttr>,
}

impl ExtraNtfsField {
    pub(crate) const TAG: u16 = 0x000a;

    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = take(4_usize).parse_next(i)?; // reserved (unused)
        let mut attrs = Vec::new();
        while !i.is_empty() {
            attrs.push(NtfsAttr::parser.parse_next(i)?);
        }
        Ok(Self { attrs })
    }
}

/// NTFS attribute for zip entries (mostly timestamps)
#[derive(Debug, Clone)]
pub enum NtfsAttr {
    /// NTFS attribute 1, which contains modified/accessed/created timestamps
    Attr1(NtfsAttr1),

    /// Unknown NTFS attribute
    Unknown {
        /// tag of the attribute
        tag: u16,
    },
}

impl NtfsAttr {
    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let tag = le_u16.parse_next(i)?;
        let payload = length_take(le_u16).parse_next(i)?;

        match tag {
            0x0001 => NtfsAttr1::parser
                .parse_peek(Partial::new(payload))
                .map(|(_, attr)| NtfsAttr::Attr1(attr)),
            _ => Ok(NtfsAttr::Unknown { tag }),
        }
    }
}

/// NTFS attribute 1, which contains modified/accessed/created timestamps
#[derive(Debug, Clone)]
pub struct NtfsAttr1 {
    /// modified time
    pub mtime: NtfsTimestamp,

    /// accessed time
    pub atime: NtfsTimestamp,

    /// created time
    pub ctime: NtfsTimestamp,
}

impl NtfsAttr1 {
    fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        seq! {Self {
            mtime: NtfsTimestamp::parser,
            atime: NtfsTimestamp::parser,
            ctime: NtfsTimestamp::parser,
        }}
        .parse_next(i)
    }
}
