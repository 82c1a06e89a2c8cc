//! Readers for the xz and raw .lzma containers on top of lzma-rs.
//!
//! lzma-rs decodes .lzma incrementally through its push-based
//! [lzma_rs::decompress::Stream]; xz only has a whole-stream function, so
//! [XzReader] decodes everything on first read. That trades memory for
//! simplicity; xz members are the whole archive, so there is no way to
//! stop early anyway.

use std::io::{self, BufReader, Read, Write};

use lzma_rs::decompress::{Options, Stream, UnpackedSize};
use tracing::trace;

/// Decodes an entire xz stream on first read, then serves from memory.
pub struct XzReader<R> {
    inner: Option<R>,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: Read> XzReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: Some(inner),
            decoded: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: Read> Read for XzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(inner) = self.inner.take() {
            let mut reader = BufReader::new(inner);
            lzma_rs::xz_decompress(&mut reader, &mut self.decoded)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            trace!(decoded = self.decoded.len(), "xz stream decoded");
        }
        let n = buf.len().min(self.decoded.len() - self.pos);
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

enum LzmaState {
    Writing(Box<Stream<Vec<u8>>>),
    Draining(Vec<u8>),
    Transition,
}

/// Incremental decoder for raw `.lzma` streams (the 13-byte header with
/// properties and unpacked size, then the compressed data).
pub struct LzmaReader<R> {
    inner: R,
    state: LzmaState,
    chunk: Vec<u8>,
}

impl<R: Read> LzmaReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        let options = Options {
            // the .lzma header carries the unpacked size (possibly the
            // "unknown" marker, in which case an end-of-stream marker ends
            // the data)
            unpacked_size: UnpackedSize::ReadFromHeader,
            allow_incomplete: false,
            memlimit: None,
        };
        Self {
            inner,
            state: LzmaState::Writing(Box::new(Stream::new_with_options(&options, Vec::new()))),
            chunk: vec![0u8; 64 * 1024],
        }
    }

    fn output_buf(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.state {
            LzmaState::Writing(stream) => stream.get_output_mut(),
            LzmaState::Draining(buf) => Some(buf),
            LzmaState::Transition => None,
        }
    }
}

impl<R: Read> Read for LzmaReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // serve whatever the stream has already produced
            if let Some(out) = self.output_buf() {
                if !out.is_empty() {
                    let n = buf.len().min(out.len());
                    buf[..n].copy_from_slice(&out[..n]);
                    out.rotate_left(n);
                    out.truncate(out.len() - n);
                    return Ok(n);
                }
            }

            match std::mem::replace(&mut self.state, LzmaState::Transition) {
                LzmaState::Writing(mut stream) => {
                    let n = self.inner.read(&mut self.chunk)?;
                    if n == 0 {
                        self.state = LzmaState::Draining(stream.finish()?);
                        continue;
                    }
                    match stream.write_all(&self.chunk[..n]) {
                        Ok(()) => {
                            self.state = LzmaState::Writing(stream);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WriteZero => {
                            // decompression finished with compressed bytes
                            // left over (no end-of-stream marker case)
                            self.state = LzmaState::Draining(stream.finish()?);
                        }
                        Err(e) => return Err(e),
                    }
                }
                LzmaState::Draining(out) => {
                    self.state = LzmaState::Draining(out);
                    // drained and empty: end of stream
                    return Ok(0);
                }
                LzmaState::Transition => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lzma_roundtrip() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut compressed = Vec::new();
        lzma_rs::lzma_compress(&mut &plain[..], &mut compressed).unwrap();

        let mut reader = LzmaReader::new(&compressed[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn xz_roundtrip() {
        let plain = b"hello xz".repeat(1000);
        let mut compressed = Vec::new();
        lzma_rs::xz_compress(&mut &plain[..], &mut compressed).unwrap();

        let mut reader = XzReader::new(&compressed[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }
}
