//! Apple pbzx chunked container: a 4-byte magic and a big-endian block
//! size, then chunks of (uncompressed size, compressed size, payload) until
//! the stream ends. A chunk whose two sizes are equal is stored raw;
//! otherwise the payload is an independent xz stream, decoded here so the
//! downstream bidders see the assembled payload.

use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

pub struct PbzxReader<R> {
    inner: R,
    block_size: u64,
    pending: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> PbzxReader<R> {
    /// Consumes and validates the magic and block size.
    pub(crate) fn new(mut inner: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        inner.read_exact(&mut magic)?;
        if &magic[..3] != b"pbz" || !matches!(magic[3], b'x' | b'z' | b'e' | b'4') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "invalid pbzx signature",
            ));
        }
        let block_size = inner.read_u64::<BigEndian>()?;
        trace!(block_size, "pbzx container");
        Ok(Self {
            inner,
            block_size,
            pending: Vec::new(),
            pos: 0,
            eof: false,
        })
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;

        // a clean EOF between chunks ends the container
        let uncompressed = match self.inner.read_u64::<BigEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let compressed = self.inner.read_u64::<BigEndian>()?;

        if self.block_size != 0 && uncompressed > self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "pbzx uncompressed size too large",
            ));
        }

        let mut payload = vec![0u8; compressed as usize];
        self.inner.read_exact(&mut payload)?;

        if compressed == uncompressed {
            // stored chunk
            self.pending = payload;
        } else {
            let mut input = &payload[..];
            lzma_rs::xz_decompress(&mut input, &mut self.pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            if self.pending.len() as u64 != uncompressed {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "pbzx chunk size mismatch",
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for PbzxReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            if self.eof {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn mixed_raw_and_xz_chunks() {
        let mut xz_chunk = Vec::new();
        lzma_rs::xz_compress(&mut &b"compressed part"[..], &mut xz_chunk).unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(b"pbzx");
        stream.write_u64::<BigEndian>(1 << 24).unwrap();

        // raw chunk: sizes equal
        stream.write_u64::<BigEndian>(9).unwrap();
        stream.write_u64::<BigEndian>(9).unwrap();
        stream.extend_from_slice(b"raw part ");

        // xz chunk
        stream.write_u64::<BigEndian>(15).unwrap();
        stream.write_u64::<BigEndian>(xz_chunk.len() as u64).unwrap();
        stream.extend_from_slice(&xz_chunk);

        let mut reader = PbzxReader::new(&stream[..]).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"raw part compressed part");
    }
}
