//! Strips the RPM package envelope: the 96-byte lead, the signature
//! header, and the main header, after which the (usually compressed)
//! payload flows through unchanged.
//!
//! The main header is not just skipped: its file index (names, sizes,
//! modes, owners, inodes) is parsed and published on the read handle's
//! side channel so a downstream format reader can consult it.

use std::any::Any;
use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;

use polyarc::parse::rpm::{check_lead, HeaderCounts, RpmFileIndex, HEADER_FIXED_SIZE, LEAD_SIZE};
use tracing::trace;

/// Key under which the parsed [RpmFileIndex] is registered.
pub const RPM_SIDE_CHANNEL: &str = "rpm";

enum State {
    Lead {
        collected: Vec<u8>,
    },
    HeaderFixed {
        /// 0 = signature header, 1 = main header
        index: u8,
        collected: Vec<u8>,
    },
    HeaderBody {
        index: u8,
        counts: HeaderCounts,
        collected: Vec<u8>,
    },
    /// Zero bytes between sections; the first non-zero byte starts the
    /// next section.
    Padding {
        index: u8,
    },
    Archive {
        carry: Option<u8>,
    },
}

pub struct RpmFilter<R> {
    inner: R,
    state: State,
    index: Rc<RefCell<Option<RpmFileIndex>>>,
}

impl<R: Read> RpmFilter<R> {
    pub(crate) fn new(inner: R) -> (Self, Rc<dyn Any>) {
        let index: Rc<RefCell<Option<RpmFileIndex>>> = Rc::new(RefCell::new(None));
        let filter = Self {
            inner,
            state: State::Lead {
                collected: Vec::with_capacity(LEAD_SIZE),
            },
            index: index.clone(),
        };
        (filter, index)
    }

    fn fill_exact(inner: &mut R, collected: &mut Vec<u8>, target: usize) -> io::Result<bool> {
        while collected.len() < target {
            let mut chunk = [0u8; 4096];
            let want = (target - collected.len()).min(chunk.len());
            let n = inner.read(&mut chunk[..want])?;
            if n == 0 {
                return Ok(false);
            }
            collected.extend_from_slice(&chunk[..n]);
        }
        Ok(true)
    }

    fn advance(&mut self) -> io::Result<()> {
        loop {
            match &mut self.state {
                State::Lead { collected } => {
                    if !Self::fill_exact(&mut self.inner, collected, LEAD_SIZE)? {
                        return Err(truncated());
                    }
                    check_lead(collected)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    trace!("rpm lead accepted");
                    self.state = State::HeaderFixed {
                        index: 0,
                        collected: Vec::with_capacity(HEADER_FIXED_SIZE),
                    };
                }
                State::HeaderFixed { index, collected } => {
                    if !Self::fill_exact(&mut self.inner, collected, HEADER_FIXED_SIZE)? {
                        return Err(truncated());
                    }
                    let counts = HeaderCounts::parse(collected)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    trace!(
                        index = *index,
                        entries = counts.index_count,
                        data = counts.data_bytes,
                        "rpm header section"
                    );
                    self.state = State::HeaderBody {
                        index: *index,
                        counts,
                        collected: Vec::new(),
                    };
                }
                State::HeaderBody {
                    index,
                    counts,
                    collected,
                } => {
                    let body = counts.body_size();
                    if !Self::fill_exact(&mut self.inner, collected, body)? {
                        return Err(truncated());
                    }
                    if *index == 1 {
                        // the main header carries the file index
                        let parsed = RpmFileIndex::parse(*counts, collected)
                            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                        trace!(files = parsed.files.len(), "rpm file index parsed");
                        *self.index.borrow_mut() = Some(parsed);
                    }
                    self.state = State::Padding { index: *index };
                }
                State::Padding { index } => {
                    // skip zero bytes; the first non-zero byte belongs to
                    // the next section
                    let mut byte = [0u8; 1];
                    loop {
                        if self.inner.read(&mut byte)? == 0 {
                            return Err(truncated());
                        }
                        if byte[0] != 0 {
                            break;
                        }
                    }
                    if *index == 0 {
                        let mut collected = Vec::with_capacity(HEADER_FIXED_SIZE);
                        collected.push(byte[0]);
                        self.state = State::HeaderFixed {
                            index: 1,
                            collected,
                        };
                    } else {
                        self.state = State::Archive {
                            carry: Some(byte[0]),
                        };
                        return Ok(());
                    }
                }
                State::Archive { .. } => return Ok(()),
            }
        }
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated rpm envelope")
}

impl<R: Read> Read for RpmFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !matches!(self.state, State::Archive { .. }) {
            self.advance()?;
        }
        let State::Archive { carry } = &mut self.state else {
            unreachable!()
        };
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(b) = carry.take() {
            buf[0] = b;
            let n = self.inner.read(&mut buf[1..])?;
            return Ok(n + 1);
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    fn header_section(tags: &[(u32, u32, u32, u32)], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&polyarc::parse::rpm::HEADER_MAGIC);
        let mut buf = [0u8; 8];
        BigEndian::write_u32(&mut buf[0..4], tags.len() as u32);
        BigEndian::write_u32(&mut buf[4..8], data.len() as u32);
        out.extend_from_slice(&buf);
        for &(tag, typ, offset, count) in tags {
            let mut e = [0u8; 16];
            BigEndian::write_u32(&mut e[0..4], tag);
            BigEndian::write_u32(&mut e[4..8], typ);
            BigEndian::write_u32(&mut e[8..12], offset);
            BigEndian::write_u32(&mut e[12..16], count);
            out.extend_from_slice(&e);
        }
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn strips_envelope_and_publishes_index() {
        let mut rpm = Vec::new();

        // lead
        let mut lead = vec![0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(&[0xED, 0xAB, 0xEE, 0xDB]);
        lead[4] = 3;
        rpm.extend_from_slice(&lead);

        // signature header (no entries), padded with zeros
        rpm.extend_from_slice(&header_section(&[], &[]));
        rpm.extend_from_slice(&[0, 0, 0, 0]);

        // main header: one old-style filename
        let data = b"/bin/thing\0".to_vec();
        rpm.extend_from_slice(&header_section(&[(1027, 8, 0, 1)], &data));
        rpm.extend_from_slice(&[0, 0]);

        // payload
        rpm.extend_from_slice(b"PAYLOAD BYTES");

        let (mut filter, index) = RpmFilter::new(&rpm[..]);
        let mut out = Vec::new();
        filter.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"PAYLOAD BYTES");

        let index = index
            .downcast::<RefCell<Option<RpmFileIndex>>>()
            .ok()
            .unwrap();
        let index = index.borrow();
        let files = &index.as_ref().unwrap().files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "/bin/thing");
    }
}
