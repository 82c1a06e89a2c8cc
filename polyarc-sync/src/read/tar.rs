//! Drives the core tar state machine from the filter chain.

use std::io::Read;

use polyarc::{
    entry::Entry,
    format::FormatCode,
    fsm::{TarFsm, TarOptions, TarStep},
    Error,
};

use crate::peek::PeekSource;

pub(crate) struct TarDriver {
    fsm: TarFsm,
    scratch: Vec<u8>,
    /// logical offset right after the last chunk handed out
    position: u64,
}

impl TarDriver {
    pub(crate) fn new(options: TarOptions) -> Self {
        Self {
            fsm: TarFsm::with_options(options),
            scratch: vec![0u8; 64 * 1024],
            position: 0,
        }
    }

    pub(crate) fn observed_format(&self) -> FormatCode {
        self.fsm.observed_format()
    }

    pub(crate) fn chunk(&self, len: usize) -> &[u8] {
        &self.scratch[..len]
    }

    pub(crate) fn logical_position(&self) -> Option<u64> {
        Some(self.position)
    }

    pub(crate) fn skip_data(&mut self) {
        self.fsm.skip_data();
    }

    fn feed(&mut self, head: &mut PeekSource<Box<dyn Read + '_>>) -> Result<(), Error> {
        if self.fsm.wants_read() {
            let space = self.fsm.space();
            let n = head.read(space)?;
            self.fsm.fill(n);
        }
        Ok(())
    }

    pub(crate) fn next_header(
        &mut self,
        head: &mut PeekSource<Box<dyn Read + '_>>,
    ) -> Result<Option<Box<Entry>>, Error> {
        loop {
            self.feed(head)?;
            let scratch = &mut self.scratch;
            match self.fsm.process(scratch)? {
                TarStep::Entry(entry) => {
                    self.position = 0;
                    return Ok(Some(entry));
                }
                TarStep::ArchiveEof => return Ok(None),
                // data between headers only happens when the caller
                // abandoned an entry; it has nowhere to go
                TarStep::Data { .. } | TarStep::EntryDone | TarStep::Continue => continue,
            }
        }
    }

    pub(crate) fn read_block(
        &mut self,
        head: &mut PeekSource<Box<dyn Read + '_>>,
    ) -> Result<Option<(usize, u64)>, Error> {
        loop {
            self.feed(head)?;
            let scratch = &mut self.scratch;
            match self.fsm.process(scratch)? {
                TarStep::Data { len, offset } => {
                    self.position = offset + len as u64;
                    return Ok(Some((len, offset)));
                }
                TarStep::EntryDone => return Ok(None),
                TarStep::ArchiveEof => return Ok(None),
                TarStep::Continue => continue,
                TarStep::Entry(_) => unreachable!("entry emitted while reading data"),
            }
        }
    }
}
