//! A lookahead wrapper over any reader: the byte-source contract both the
//! filter bidders and the format bidders rely on.

use std::io::{self, Read};

use oval::Buffer;

/// Wraps an [io::Read], buffering enough bytes that callers can peek ahead
/// without consuming.
///
/// `ahead(min)` returns at least `min` buffered bytes unless the stream
/// ends first; end of stream is an empty slice, never an error. Reading
/// through the [io::Read] impl drains the buffered bytes first.
pub struct PeekSource<R> {
    inner: R,
    buffer: Buffer,
    eof: bool,
}

impl<R: Read> PeekSource<R> {
    /// Default lookahead capacity: enough for a whole tar block plus some.
    const CAPACITY: usize = 64 * 1024;

    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Buffer::with_capacity(Self::CAPACITY),
            eof: false,
        }
    }

    /// Peek at least `min` bytes (capped by capacity). Returns the whole
    /// buffered window, which may be shorter than `min` at end of stream.
    pub fn ahead(&mut self, min: usize) -> io::Result<&[u8]> {
        let min = min.min(Self::CAPACITY);
        while !self.eof && self.buffer.available_data() < min {
            if self.buffer.available_space() == 0 {
                self.buffer.shift();
            }
            let n = self.inner.read(self.buffer.space())?;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buffer.fill(n);
        }
        Ok(self.buffer.data())
    }

    /// Advance past `n` previously peeked bytes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buffer.available_data());
        self.buffer.consume(n);
    }

    /// Discard `n` bytes, reading and dropping as needed. Returns how many
    /// were actually skipped (less than `n` only at end of stream).
    pub fn skip(&mut self, mut n: u64) -> io::Result<u64> {
        let mut skipped = 0u64;
        while n > 0 {
            let avail = self.buffer.available_data();
            if avail == 0 {
                let window = self.ahead(1)?;
                if window.is_empty() {
                    break;
                }
                continue;
            }
            let take = (avail as u64).min(n) as usize;
            self.buffer.consume(take);
            n -= take as u64;
            skipped += take as u64;
        }
        Ok(skipped)
    }

    /// The wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PeekSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = self.buffer.available_data();
        if avail > 0 {
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&self.buffer.data()[..n]);
            self.buffer.consume(n);
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let mut src = PeekSource::new(&b"hello world"[..]);
        assert_eq!(&src.ahead(5).unwrap()[..5], b"hello");
        assert_eq!(&src.ahead(5).unwrap()[..5], b"hello");

        let mut out = [0u8; 5];
        src.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn ahead_returns_short_at_eof() {
        let mut src = PeekSource::new(&b"abc"[..]);
        assert_eq!(src.ahead(10).unwrap(), b"abc");
        src.consume(3);
        assert_eq!(src.ahead(1).unwrap(), b"");
        // and stays that way
        assert_eq!(src.ahead(1).unwrap(), b"");
    }

    #[test]
    fn skip_crosses_buffer_boundaries() {
        let data = vec![7u8; 200_000];
        let mut src = PeekSource::new(&data[..]);
        assert_eq!(src.skip(150_000).unwrap(), 150_000);
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), 50_000);
    }
}
