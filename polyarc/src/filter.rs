//! Compression/wrapper filters and their bidders.
//!
//! A bidder scores a peek at the head of the stream without consuming
//! anything; the score is roughly the number of bits of evidence matched,
//! so an 8-byte magic outbids a 2-byte one. The actual decoders live in the
//! sync crate; this module is the table both sides agree on.

use std::fmt;

/// Every stream filter this crate knows how to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterCode {
    /// Identity; every chain ends with one
    None,
    /// gzip (RFC 1952)
    Gzip,
    /// bzip2
    Bzip2,
    /// xz container
    Xz,
    /// raw .lzma
    Lzma,
    /// lz4 frame
    Lz4,
    /// zstandard frame
    Zstd,
    /// ancient unix compress (.Z), LZW 9-16 bits
    Compress,
    /// uuencoded or base64 text wrapper
    Uu,
    /// RPM package envelope
    Rpm,
    /// Apple pbzx chunked container
    Pbzx,
    /// Android Backup (`adb backup`) header + deflate
    AndroidBackup,
    /// lzop; recognized but not decodable by this crate
    Lzop,
}

impl FilterCode {
    /// The name reported for this filter.
    pub fn name(self) -> &'static str {
        match self {
            FilterCode::None => "none",
            FilterCode::Gzip => "gzip",
            FilterCode::Bzip2 => "bzip2",
            FilterCode::Xz => "xz",
            FilterCode::Lzma => "lzma",
            FilterCode::Lz4 => "lz4",
            FilterCode::Zstd => "zstd",
            FilterCode::Compress => "compress (.Z)",
            FilterCode::Uu => "uudecode",
            FilterCode::Rpm => "rpm",
            FilterCode::Pbzx => "pbzx",
            FilterCode::AndroidBackup => "ab",
            FilterCode::Lzop => "lzop",
        }
    }

    /// The numeric code for this filter, for callers that configure
    /// support numerically.
    pub fn code(self) -> u32 {
        match self {
            FilterCode::None => 0,
            FilterCode::Gzip => 1,
            FilterCode::Bzip2 => 2,
            FilterCode::Compress => 3,
            FilterCode::Lzma => 5,
            FilterCode::Xz => 6,
            FilterCode::Uu => 7,
            FilterCode::Rpm => 8,
            FilterCode::Lzop => 11,
            FilterCode::Lz4 => 13,
            FilterCode::Zstd => 14,
            FilterCode::Pbzx => 16,
            FilterCode::AndroidBackup => 17,
        }
    }

    /// The inverse of [Self::code].
    pub fn by_code(code: u32) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .chain([FilterCode::None])
            .find(|f| f.code() == code)
    }

    /// All codes that can take part in bidding, in registration order
    /// (which breaks ties).
    pub fn all() -> &'static [FilterCode] {
        &[
            FilterCode::Gzip,
            FilterCode::Bzip2,
            FilterCode::Xz,
            FilterCode::Lzma,
            FilterCode::Lz4,
            FilterCode::Zstd,
            FilterCode::Compress,
            FilterCode::Uu,
            FilterCode::Rpm,
            FilterCode::Pbzx,
            FilterCode::AndroidBackup,
            FilterCode::Lzop,
        ]
    }

    /// Parse a user-facing filter name (as accepted by option surfaces).
    pub fn by_name(name: &str) -> Option<Self> {
        Some(match name {
            "none" => FilterCode::None,
            "gzip" | "gz" => FilterCode::Gzip,
            "bzip2" | "bz2" => FilterCode::Bzip2,
            "xz" => FilterCode::Xz,
            "lzma" => FilterCode::Lzma,
            "lz4" => FilterCode::Lz4,
            "zstd" | "zst" => FilterCode::Zstd,
            "compress" | "Z" => FilterCode::Compress,
            "uu" | "uudecode" => FilterCode::Uu,
            "rpm" => FilterCode::Rpm,
            "pbzx" => FilterCode::Pbzx,
            "ab" => FilterCode::AndroidBackup,
            "lzop" => FilterCode::Lzop,
            _ => return None,
        })
    }

    /// Score the first bytes of the stream: 0 means "not mine", otherwise
    /// roughly the number of bits of magic matched.
    pub fn bid(self, peek: &[u8]) -> u32 {
        match self {
            FilterCode::None | FilterCode::Lzop => 0,
            FilterCode::Gzip => bid_gzip(peek),
            FilterCode::Bzip2 => bid_bzip2(peek),
            FilterCode::Xz => bid_magic(peek, &[0xFD, b'7', b'z', b'X', b'Z', 0x00]),
            FilterCode::Lzma => bid_lzma(peek),
            FilterCode::Lz4 => bid_magic(peek, &[0x04, 0x22, 0x4D, 0x18]),
            FilterCode::Zstd => bid_magic(peek, &[0x28, 0xB5, 0x2F, 0xFD]),
            FilterCode::Compress => bid_compress(peek),
            FilterCode::Uu => bid_uu(peek),
            FilterCode::Rpm => bid_rpm(peek),
            FilterCode::Pbzx => bid_pbzx(peek),
            FilterCode::AndroidBackup => bid_android_backup(peek),
        }
    }
}

impl fmt::Display for FilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn bid_magic(peek: &[u8], magic: &[u8]) -> u32 {
    if peek.len() >= magic.len() && &peek[..magic.len()] == magic {
        magic.len() as u32 * 8
    } else {
        0
    }
}

fn bid_gzip(peek: &[u8]) -> u32 {
    if peek.len() < 3 || peek[0] != 0x1F || peek[1] != 0x8B {
        return 0;
    }
    // method byte: deflate is the only one ever used
    if peek[2] != 8 {
        return 0;
    }
    24
}

fn bid_bzip2(peek: &[u8]) -> u32 {
    if peek.len() < 4 || &peek[..3] != b"BZh" {
        return 0;
    }
    // block-size digit 1-9
    if !(b'1'..=b'9').contains(&peek[3]) {
        return 0;
    }
    32
}

fn bid_lzma(peek: &[u8]) -> u32 {
    // .lzma has no magic: the first byte encodes lc/lp/pb and must be
    // < 225, and the next four (little-endian dictionary size) are a
    // power-of-two-ish value in practice. Check what we can; this is weak
    // evidence on purpose, so real magics outbid it.
    if peek.len() < 5 {
        return 0;
    }
    if peek[0] >= 225 {
        return 0;
    }
    // common properties byte is 0x5D (lc=3, lp=0, pb=2)
    if peek[0] != 0x5D {
        return 0;
    }
    let dict = u32::from_le_bytes([peek[1], peek[2], peek[3], peek[4]]);
    if dict == 0 || dict > (1 << 27) {
        return 0;
    }
    if !dict.is_power_of_two() {
        return 0;
    }
    18
}

fn bid_compress(peek: &[u8]) -> u32 {
    if peek.len() < 3 || peek[0] != 0x1F || peek[1] != 0x9D {
        return 0;
    }
    // low bits: max code width 9..16
    let bits = peek[2] & 0x1F;
    if !(9..=16).contains(&bits) {
        return 0;
    }
    21
}

fn bid_uu(peek: &[u8]) -> u32 {
    const UU: &[u8] = b"begin ";
    const B64: &[u8] = b"begin-base64 ";
    if peek.starts_with(B64) {
        return B64.len() as u32 * 8;
    }
    if peek.starts_with(UU) {
        // "begin NNN name": require an octal mode to avoid matching prose
        let rest = &peek[UU.len()..];
        let mode_ok = rest.len() >= 3 && rest[..3].iter().all(|b| (b'0'..=b'7').contains(b));
        if mode_ok {
            return UU.len() as u32 * 8;
        }
    }
    0
}

fn bid_rpm(peek: &[u8]) -> u32 {
    use crate::parse::rpm;
    if peek.len() < 6 || peek[..4] != rpm::LEAD_MAGIC {
        return 0;
    }
    // major 3 or 4, binary type
    if peek[4] != 3 && peek[4] != 4 {
        return 0;
    }
    40
}

fn bid_pbzx(peek: &[u8]) -> u32 {
    if peek.len() < 4 || &peek[..3] != b"pbz" {
        return 0;
    }
    // seen in the wild: pbzx, pbzz, pbze, pbz4
    if !matches!(peek[3], b'x' | b'z' | b'e' | b'4') {
        return 0;
    }
    30
}

fn bid_android_backup(peek: &[u8]) -> u32 {
    const MAGIC: &[u8] = b"ANDROID BACKUP\n";
    if !peek.starts_with(&MAGIC[..peek.len().min(MAGIC.len())]) {
        return 0;
    }
    if peek.len() < MAGIC.len() + 1 {
        return 0;
    }
    // version 1-5 single digit
    if !(b'1'..=b'5').contains(&peek[MAGIC.len()]) {
        return 0;
    }
    MAGIC.len() as u32 * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_bid_and_strangers_dont() {
        let cases: &[(&[u8], FilterCode)] = &[
            (&[0x1F, 0x8B, 0x08, 0x00], FilterCode::Gzip),
            (b"BZh9\x31\x41\x59\x26", FilterCode::Bzip2),
            (&[0xFD, b'7', b'z', b'X', b'Z', 0x00], FilterCode::Xz),
            (&[0x04, 0x22, 0x4D, 0x18], FilterCode::Lz4),
            (&[0x28, 0xB5, 0x2F, 0xFD], FilterCode::Zstd),
            (&[0x1F, 0x9D, 0x90], FilterCode::Compress),
            (b"begin 644 file.tar\n", FilterCode::Uu),
            (b"ANDROID BACKUP\n1\n1\nnone\n", FilterCode::AndroidBackup),
        ];
        for (peek, code) in cases {
            assert!(code.bid(peek) > 0, "{code} should bid on its magic");
            // nobody else should outbid the owner on its own magic
            for other in FilterCode::all() {
                if other != code {
                    assert!(
                        other.bid(peek) < code.bid(peek),
                        "{other} outbids {code} on {peek:x?}"
                    );
                }
            }
        }

        let noise = b"\x00\x01\x02hello world, definitely not compressed";
        for code in FilterCode::all() {
            assert_eq!(code.bid(noise), 0, "{code} bid on noise");
        }
    }
}
