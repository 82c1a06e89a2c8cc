//! Drives the core zip entry machine, one entry after another, from the
//! filter chain (streaming mode: local headers only, no seeking).

use std::io::Read;

use oval::Buffer;
use polyarc::{
    entry::Entry,
    error::FormatError,
    fsm::{zip::EntryFsm, FsmResult},
    parse::zip::Method,
    Error,
};
use tracing::trace;

use crate::peek::PeekSource;

pub(crate) struct ZipDriver {
    fsm: Option<EntryFsm>,
    /// leftover input from the previous entry
    remain: Option<Buffer>,
    /// entry with resolved sizes, stashed at entry end
    finished: Option<Box<Entry>>,
    scratch: Vec<u8>,
    password: Option<Vec<u8>>,
    experimental: bool,
    eof_fed: bool,
    done: bool,
    /// logical offset within the current entry
    pos: u64,
}

impl ZipDriver {
    pub(crate) fn new(password: Option<Vec<u8>>, experimental: bool) -> Self {
        Self {
            fsm: None,
            remain: None,
            finished: None,
            scratch: vec![0u8; 64 * 1024],
            password,
            experimental,
            eof_fed: false,
            done: false,
            pos: 0,
        }
    }

    pub(crate) fn chunk(&self, len: usize) -> &[u8] {
        &self.scratch[..len]
    }

    pub(crate) fn take_finished(&mut self) -> Option<Box<Entry>> {
        self.finished.take()
    }

    fn feed(&mut self, head: &mut PeekSource<Box<dyn Read + '_>>) -> Result<(), Error> {
        let fsm = self.fsm.as_mut().expect("fsm present while feeding");
        if fsm.wants_read() {
            let space = fsm.space();
            let n = head.read(space)?;
            if n == 0 {
                self.eof_fed = true;
            }
            fsm.fill(n);
        }
        Ok(())
    }

    pub(crate) fn next_header(
        &mut self,
        head: &mut PeekSource<Box<dyn Read + '_>>,
    ) -> Result<Option<Box<Entry>>, Error> {
        if self.done {
            return Ok(None);
        }

        if self.fsm.is_none() {
            self.fsm = Some(EntryFsm::new(self.password.clone(), self.remain.take()));
        }

        loop {
            self.feed(head)?;
            let fsm = self.fsm.as_mut().unwrap();
            match fsm.process_till_header() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if self.eof_fed {
                        // nothing but EOF where a header should be
                        self.done = true;
                        self.fsm = None;
                        return Ok(None);
                    }
                }
                Err(Error::Format(FormatError::InvalidLocalHeader)) => {
                    // almost certainly the central directory: the entry
                    // stream is over
                    trace!("no more local headers; end of zip entries");
                    self.done = true;
                    self.fsm = None;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let fsm = self.fsm.as_ref().unwrap();
        let ze = fsm.entry().unwrap();

        // the method gate for formats recently added to zip
        if !self.experimental && matches!(ze.method, Method::Zstd | Method::Xz) {
            return Err(Error::method_not_supported(ze.method));
        }

        Ok(Some(Box::new(ze.entry.clone())))
    }

    pub(crate) fn read_block(
        &mut self,
        head: &mut PeekSource<Box<dyn Read + '_>>,
    ) -> Result<Option<(usize, u64)>, Error> {
        let mut offset = self.position();
        loop {
            if self.fsm.is_none() {
                return Ok(None);
            }
            self.feed(head)?;

            let fsm = self.fsm.take().unwrap();
            match fsm.process(&mut self.scratch)? {
                FsmResult::Continue((fsm, outcome)) => {
                    self.fsm = Some(fsm);
                    if outcome.bytes_written > 0 {
                        self.advance(outcome.bytes_written as u64);
                        return Ok(Some((outcome.bytes_written, offset)));
                    }
                    if outcome.bytes_read == 0 && self.eof_fed {
                        return Err(Error::IO(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "truncated zip entry",
                        )));
                    }
                    offset = self.position();
                }
                FsmResult::Done((remain, entry, verdict)) => {
                    self.remain = Some(remain);
                    self.position_reset();
                    self.finished = Some(Box::new(entry.entry.clone()));
                    match verdict {
                        None => return Ok(None),
                        Some(err) => return Err(err),
                    }
                }
            }
        }
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn advance(&mut self, n: u64) {
        self.pos += n;
    }

    fn position_reset(&mut self) {
        self.pos = 0;
    }
}
