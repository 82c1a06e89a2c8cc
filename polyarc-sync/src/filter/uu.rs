//! Strips uuencode / base64 text armor from a stream.
//!
//! `begin <mode> <name>` starts classic uuencoding: each line carries a
//! length character followed by 4-character groups encoding 3 bytes, with
//! backtick standing in for space. `begin-base64` switches to base64 lines
//! terminated by `====`. Everything before the begin line is skipped.

use std::io::{self, BufRead, BufReader, Read};

use base64::Engine;

enum Mode {
    /// before the begin line
    Scanning,
    Uu,
    Base64,
    Done,
}

pub struct UuReader<R> {
    inner: BufReader<R>,
    mode: Mode,
    pending: Vec<u8>,
    pos: usize,
}

impl<R: Read> UuReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            mode: Mode::Scanning,
            pending: Vec::new(),
            pos: 0,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn decode_uu_line(line: &str, out: &mut Vec<u8>) -> io::Result<()> {
        let bytes = line.as_bytes();
        let declared = (bytes[0].wrapping_sub(0x20) & 0x3F) as usize;
        if declared == 0 {
            return Ok(());
        }

        let mut decoded = Vec::with_capacity(declared + 3);
        let dec = |c: u8| (c.wrapping_sub(0x20)) & 0x3F;
        let mut chars = bytes[1..].iter().copied().filter(|&c| c != b'\r');
        loop {
            let quad: Vec<u8> = chars.by_ref().take(4).collect();
            if quad.is_empty() {
                break;
            }
            if quad.len() < 4 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "short uuencoded group",
                ));
            }
            let v = (dec(quad[0]) as u32) << 18
                | (dec(quad[1]) as u32) << 12
                | (dec(quad[2]) as u32) << 6
                | dec(quad[3]) as u32;
            decoded.push((v >> 16) as u8);
            decoded.push((v >> 8) as u8);
            decoded.push(v as u8);
            if decoded.len() >= declared + 3 {
                break;
            }
        }
        if decoded.len() < declared {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated uuencoded line",
            ));
        }
        decoded.truncate(declared);
        out.extend_from_slice(&decoded);
        Ok(())
    }

    fn refill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;

        loop {
            match self.mode {
                Mode::Done => return Ok(()),
                Mode::Scanning => {
                    let Some(line) = self.read_line()? else {
                        self.mode = Mode::Done;
                        return Ok(());
                    };
                    if line.starts_with("begin-base64 ") {
                        self.mode = Mode::Base64;
                    } else if line.starts_with("begin ") {
                        self.mode = Mode::Uu;
                    }
                }
                Mode::Uu => {
                    let Some(line) = self.read_line()? else {
                        self.mode = Mode::Done;
                        return Ok(());
                    };
                    if line == "end" {
                        self.mode = Mode::Done;
                        return Ok(());
                    }
                    if line.is_empty() {
                        continue;
                    }
                    // a lone backtick is the conventional zero-length line;
                    // decode_uu_line sees length zero and adds nothing
                    Self::decode_uu_line(&line, &mut self.pending)?;
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
                Mode::Base64 => {
                    let Some(line) = self.read_line()? else {
                        self.mode = Mode::Done;
                        return Ok(());
                    };
                    if line == "====" {
                        self.mode = Mode::Done;
                        return Ok(());
                    }
                    if line.is_empty() {
                        continue;
                    }
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(line.trim_end())
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.pending.extend_from_slice(&decoded);
                    if !self.pending.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

}

impl<R: Read> Read for UuReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            if matches!(self.mode, Mode::Done) {
                return Ok(0);
            }
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
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

    #[test]
    fn decodes_classic_uuencoding() {
        // "Cat" encodes to "#0V%T"
        let text = "begin 644 cat.txt\n#0V%T\n`\nend\n";
        let mut reader = UuReader::new(text.as_bytes());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Cat");
    }

    #[test]
    fn decodes_base64_framing() {
        let text = "begin-base64 644 f\naGVsbG8gd29ybGQ=\n====\n";
        let mut reader = UuReader::new(text.as_bytes());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn junk_before_begin_is_skipped() {
        let text = "From: someone\n\nbegin 600 x\n#0V%T\n`\nend\n";
        let mut reader = UuReader::new(text.as_bytes());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Cat");
    }
}
