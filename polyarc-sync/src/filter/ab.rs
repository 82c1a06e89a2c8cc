//! Android Backup (`adb backup`) streams: four ASCII header lines, then a
//! zlib-deflated tar stream (or a raw one for uncompressed backups).
//! Encrypted backups are recognized and refused.

use std::io::{self, Read};

use flate2::read::ZlibDecoder;

enum Body<R> {
    Plain(R),
    Deflate(Box<ZlibDecoder<R>>),
}

pub struct AbReader<R> {
    body: Body<R>,
}

impl<R: Read> AbReader<R> {
    /// Parses the header lines eagerly; the rest streams.
    pub(crate) fn new(mut inner: R) -> io::Result<Self> {
        let magic = read_ab_line(&mut inner)?;
        if magic != "ANDROID BACKUP" {
            return Err(bad("not an Android Backup stream"));
        }
        let version: u32 = read_ab_line(&mut inner)?
            .parse()
            .map_err(|_| bad("bad version line"))?;
        if !(1..=5).contains(&version) {
            return Err(bad("unsupported Android Backup version"));
        }
        let compressed = match read_ab_line(&mut inner)?.as_str() {
            "0" => false,
            "1" => true,
            _ => return Err(bad("bad compression line")),
        };
        let encryption = read_ab_line(&mut inner)?;
        if encryption != "none" {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "encrypted Android Backup is not supported",
            ));
        }

        Ok(Self {
            body: if compressed {
                Body::Deflate(Box::new(ZlibDecoder::new(inner)))
            } else {
                Body::Plain(inner)
            },
        })
    }
}

fn bad(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn read_ab_line<R: Read>(inner: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        if inner.read(&mut byte)? == 0 {
            return Err(bad("truncated Android Backup header"));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 128 {
            return Err(bad("oversized Android Backup header line"));
        }
    }
    String::from_utf8(line).map_err(|_| bad("non-ascii Android Backup header"))
}

impl<R: Read> Read for AbReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            Body::Plain(r) => r.read(buf),
            Body::Deflate(r) => r.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn compressed_backup_inflates() {
        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"inner tar bytes").unwrap();
        let deflated = enc.finish().unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(b"ANDROID BACKUP\n1\n1\nnone\n");
        stream.extend_from_slice(&deflated);

        let mut reader = AbReader::new(&stream[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"inner tar bytes");
    }

    #[test]
    fn encrypted_backup_is_refused() {
        let stream = b"ANDROID BACKUP\n1\n1\nAES-256\n";
        assert!(AbReader::new(&stream[..]).is_err());
    }
}
