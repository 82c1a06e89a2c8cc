//! A resumable reader for the tar family: POSIX ustar, pax (extended
//! headers), and the GNU extensions (long names, old and 1.0 sparse maps).
//!
//! The caller feeds bytes via [TarFsm::space]/[TarFsm::fill] and pumps
//! [TarFsm::process], which yields [TarStep]s: parsed entries, data chunks
//! tagged with their logical offset (sparse files have holes), and
//! end-of-entry / end-of-archive markers.

use oval::Buffer;
use tracing::trace;

use crate::{
    encoding::Encoding,
    entry::{Entry, EntryString},
    error::{Error, FormatError},
    format::FormatCode,
    parse::{
        pax::{self, PaxOutcome, PaxRecord},
        tar::{self, TarHeader, TarMagic, TypeFlag, BLOCK_SIZE},
    },
};

/// Reader knobs, set through the handle's option surface.
#[derive(Debug, Clone)]
pub struct TarOptions {
    /// Charset of raw header bytes (`hdrcharset` option)
    pub hdrcharset: Encoding,
    /// Tolerate lone zero blocks in the middle of the archive
    pub ignore_zeros: bool,
    /// After end-of-archive, look for another archive in the stream
    pub read_concatenated: bool,
}

impl Default for TarOptions {
    fn default() -> Self {
        Self {
            hdrcharset: Encoding::Binary,
            ignore_zeros: false,
            read_concatenated: false,
        }
    }
}

/// What [TarFsm::process] produced.
#[derive(Debug)]
pub enum TarStep {
    /// More input (or a later call) is needed; nothing happened.
    Continue,

    /// A new entry header was parsed. Its data follows in [TarStep::Data]
    /// chunks.
    Entry(Box<Entry>),

    /// `len` bytes were written to the output buffer; they belong at logical
    /// `offset` in the entry's file (sparse files skip holes).
    Data {
        /// Bytes written to the caller's buffer
        len: usize,
        /// Logical file offset of those bytes
        offset: u64,
    },

    /// The current entry's data is exhausted.
    EntryDone,

    /// The archive ended (two consecutive zero blocks, or clean EOF).
    ArchiveEof,
}

/// Walks the stored bytes of an entry, mapping them to logical offsets
/// through the sparse extent list. Dense files get a single extent.
#[derive(Debug)]
struct SparseWalker {
    extents: Vec<(u64, u64)>,
    current: usize,
    pos_in_extent: u64,
}

impl SparseWalker {
    fn dense(size: u64) -> Self {
        Self {
            extents: vec![(0, size)],
            current: 0,
            pos_in_extent: 0,
        }
    }

    fn sparse(extents: Vec<(u64, u64)>) -> Self {
        Self {
            extents,
            current: 0,
            pos_in_extent: 0,
        }
    }

    fn stored_remaining(&self) -> u64 {
        let mut rem = 0;
        for (i, &(_, len)) in self.extents.iter().enumerate() {
            if i < self.current {
                continue;
            }
            rem += len;
            if i == self.current {
                rem -= self.pos_in_extent;
            }
        }
        rem
    }

    /// Logical offset of the next stored byte and how many remain in the
    /// current extent; `None` when exhausted.
    fn next_chunk(&self) -> Option<(u64, u64)> {
        let mut idx = self.current;
        let mut pos = self.pos_in_extent;
        while idx < self.extents.len() {
            let (offset, len) = self.extents[idx];
            if pos < len {
                return Some((offset + pos, len - pos));
            }
            idx += 1;
            pos = 0;
        }
        None
    }

    fn advance(&mut self, mut n: u64) {
        while n > 0 && self.current < self.extents.len() {
            let (_, len) = self.extents[self.current];
            let room = len - self.pos_in_extent;
            let step = n.min(room);
            self.pos_in_extent += step;
            n -= step;
            if self.pos_in_extent == len {
                self.current += 1;
                self.pos_in_extent = 0;
            }
        }
    }
}

#[derive(Default)]
enum State {
    /// Expecting a 512-byte header block.
    #[default]
    ReadHeader,

    /// Saw one zero block; the next block decides between EOF and error.
    ReadZeroCheck,

    /// Reading the body of an `x`/`g` pax pseudo-entry.
    ReadPaxBody {
        is_global: bool,
        remaining: u64,
        padding: u64,
        collected: Vec<u8>,
    },

    /// Reading the body of a GNU `L` (name) or `K` (link) pseudo-entry.
    ReadLongName {
        is_link: bool,
        remaining: u64,
        padding: u64,
        collected: Vec<u8>,
    },

    /// Reading sparse-extension blocks after an old-GNU `S` header.
    ReadSparseExt {
        header: Box<TarHeader>,
        extents: Vec<(u64, u64)>,
        realsize: u64,
    },

    /// Reading the ASCII map that precedes a GNU 1.0 sparse entry's data.
    ReadSparseMap {
        entry: Box<Entry>,
        realsize: u64,
        /// stored body (map + data + slack + padding) still ahead of us
        body_remaining: u64,
        collected: Vec<u8>,
    },

    /// Streaming entry data to the caller.
    ReadData {
        walker: SparseWalker,
        /// bytes to silently consume after the stored data (block padding
        /// and, for 1.0 sparse, trailing slack)
        trailing: u64,
    },

    /// Consuming bytes that don't surface; `emit_done` tells whether an
    /// entry's data just ended (true) or a pseudo-entry was skipped (false).
    Drain { trailing: u64, emit_done: bool },

    /// Two zero blocks seen (or upstream ended).
    Eof,
}

/// Resumable tar reader; see the module docs for the I/O loop.
pub struct TarFsm {
    state: State,
    buffer: Buffer,
    eof: bool,
    opts: TarOptions,

    /// records from `g` headers, in effect until overridden
    global: Vec<PaxRecord>,
    /// records from the most recent `x` header
    pending_pax: Vec<PaxRecord>,
    /// body of the most recent `L` pseudo-entry
    long_name: Option<Vec<u8>>,
    /// body of the most recent `K` pseudo-entry
    long_link: Option<Vec<u8>>,

    /// most specific dialect observed so far
    observed: FormatCode,
}

/// Keep hostile pax headers and long names from ballooning memory.
const MAX_META_SIZE: u64 = 8 * 1024 * 1024;

impl TarFsm {
    /// Create a state machine with default options.
    pub fn new() -> Self {
        Self::with_options(TarOptions::default())
    }

    /// Create a state machine with explicit options.
    pub fn with_options(opts: TarOptions) -> Self {
        Self {
            state: State::ReadHeader,
            buffer: Buffer::with_capacity(64 * 1024),
            eof: false,
            opts,
            global: Vec::new(),
            pending_pax: Vec::new(),
            long_name: None,
            long_link: None,
            observed: FormatCode::Ustar,
        }
    }

    /// The dialect actually seen on the stream so far (ustar, pax or gnutar).
    pub fn observed_format(&self) -> FormatCode {
        self.observed
    }

    /// Returns a mutable slice with all the available space to write to.
    ///
    /// After writing to this, call [Self::fill] with the number of bytes written.
    #[inline]
    pub fn space(&mut self) -> &mut [u8] {
        if self.buffer.available_space() == 0 {
            self.buffer.shift();
        }
        self.buffer.space()
    }

    /// After having written data to [Self::space], call this to indicate how
    /// many bytes were written. Zero indicates end of stream.
    #[inline]
    pub fn fill(&mut self, count: usize) -> usize {
        if count == 0 {
            self.eof = true;
        }
        self.buffer.fill(count)
    }

    /// True when the machine could use more input.
    pub fn wants_read(&self) -> bool {
        !self.eof && self.buffer.available_space() > 0
    }

    /// Ask the machine to discard the rest of the current entry's data
    /// instead of copying it out.
    pub fn skip_data(&mut self) {
        if let State::ReadData { walker, trailing } = &mut self.state {
            let skip = walker.stored_remaining() + *trailing;
            self.state = State::Drain {
                trailing: skip,
                emit_done: true,
            };
        }
    }

    /// Advance the machine, writing any entry data into `out`.
    pub fn process(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        match &mut self.state {
            State::ReadHeader => self.process_header(out),
            State::ReadZeroCheck => self.process_zero_check(out),
            State::ReadPaxBody { .. } => self.process_pax_body(out),
            State::ReadLongName { .. } => self.process_long_name(out),
            State::ReadSparseExt { .. } => self.process_sparse_ext(out),
            State::ReadSparseMap { .. } => self.process_sparse_map(out),
            State::ReadData { .. } => self.process_data(out),
            State::Drain { .. } => self.process_drain(out),
            State::Eof => Ok(TarStep::ArchiveEof),
        }
    }

    fn process_header(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let Some(block) = self.take_block()? else {
            if self.eof {
                // clean EOF without the closing zero blocks; tolerated
                self.state = State::Eof;
                return Ok(TarStep::ArchiveEof);
            }
            return Ok(TarStep::Continue);
        };

        if tar::is_zero_block(&block) {
            self.state = State::ReadZeroCheck;
            return self.process(out);
        }

        tar::verify_checksum(&block)?;
        let header = TarHeader::parse(&block)?;
        trace!(
            name = %String::from_utf8_lossy(&header.name),
            typeflag = ?header.typeflag,
            size = header.size,
            "parsed tar header"
        );

        if header.magic == TarMagic::Gnu {
            self.observed = FormatCode::GnuTar;
        }

        self.dispatch_header(header, out)
    }

    fn process_zero_check(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let Some(block) = self.take_block()? else {
            if self.eof {
                // single zero block then EOF; close enough
                self.state = State::Eof;
                return Ok(TarStep::ArchiveEof);
            }
            return Ok(TarStep::Continue);
        };

        if tar::is_zero_block(&block) {
            if self.opts.read_concatenated {
                // skip any further zero blocks and keep looking for another
                // archive in the same stream
                while self.buffer.available_data() >= BLOCK_SIZE
                    && tar::is_zero_block(&self.buffer.data()[..BLOCK_SIZE])
                {
                    self.buffer.consume(BLOCK_SIZE);
                }
                if self.eof && self.buffer.available_data() == 0 {
                    self.state = State::Eof;
                    return Ok(TarStep::ArchiveEof);
                }
                self.state = State::ReadHeader;
                return Ok(TarStep::Continue);
            }
            self.state = State::Eof;
            return Ok(TarStep::ArchiveEof);
        }

        // a lone zero block followed by a real header
        if self.opts.ignore_zeros {
            tar::verify_checksum(&block)?;
            let header = TarHeader::parse(&block)?;
            if header.magic == TarMagic::Gnu {
                self.observed = FormatCode::GnuTar;
            }
            self.state = State::ReadHeader;
            return self.dispatch_header(header, out);
        }
        Err(FormatError::TarLoneZeroBlock.into())
    }

    fn process_pax_body(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let State::ReadPaxBody {
            remaining,
            collected,
            ..
        } = &mut self.state
        else {
            unreachable!()
        };

        let data = self.buffer.data();
        let take = (data.len() as u64).min(*remaining) as usize;
        collected.extend_from_slice(&data[..take]);
        self.buffer.consume(take);
        *remaining -= take as u64;
        if *remaining > 0 {
            return self.continue_or_truncated();
        }

        let State::ReadPaxBody {
            is_global,
            padding,
            collected,
            ..
        } = std::mem::take(&mut self.state)
        else {
            unreachable!()
        };

        let records = pax::parse_records(&collected)?;
        trace!(count = records.len(), is_global, "parsed pax records");
        if is_global {
            self.global = records;
        } else {
            self.pending_pax = records;
        }
        self.observed = FormatCode::Pax;
        self.state = State::Drain {
            trailing: padding,
            emit_done: false,
        };
        self.process(out)
    }

    fn process_long_name(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let State::ReadLongName {
            remaining,
            collected,
            ..
        } = &mut self.state
        else {
            unreachable!()
        };

        let data = self.buffer.data();
        let take = (data.len() as u64).min(*remaining) as usize;
        collected.extend_from_slice(&data[..take]);
        self.buffer.consume(take);
        *remaining -= take as u64;
        if *remaining > 0 {
            return self.continue_or_truncated();
        }

        let State::ReadLongName {
            is_link,
            padding,
            mut collected,
            ..
        } = std::mem::take(&mut self.state)
        else {
            unreachable!()
        };

        if let Some(end) = collected.iter().position(|&b| b == 0) {
            collected.truncate(end);
        }
        if is_link {
            self.long_link = Some(collected);
        } else {
            self.long_name = Some(collected);
        }
        self.observed = FormatCode::GnuTar;
        self.state = State::Drain {
            trailing: padding,
            emit_done: false,
        };
        self.process(out)
    }

    fn process_sparse_ext(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let Some(block) = self.take_block()? else {
            return self.continue_or_truncated();
        };

        let State::ReadSparseExt {
            header,
            mut extents,
            realsize,
        } = std::mem::take(&mut self.state)
        else {
            unreachable!()
        };

        let more = TarHeader::parse_gnu_sparse_ext(&block, &mut extents)?;
        if more {
            self.state = State::ReadSparseExt {
                header,
                extents,
                realsize,
            };
            return self.process(out);
        }

        let mut entry = Box::new(self.build_entry(&header));
        entry.size = Some(realsize);
        for &(off, len) in &extents {
            entry.sparse.add(off, len);
        }
        let walker = SparseWalker::sparse(extents);
        self.enter_read_data(header.size, walker);
        Ok(TarStep::Entry(entry))
    }

    fn process_sparse_map(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let Some(block) = self.take_block()? else {
            return self.continue_or_truncated();
        };

        let State::ReadSparseMap {
            mut entry,
            realsize,
            mut body_remaining,
            mut collected,
        } = std::mem::take(&mut self.state)
        else {
            unreachable!()
        };

        collected.extend_from_slice(&block);
        body_remaining = body_remaining
            .checked_sub(BLOCK_SIZE as u64)
            .ok_or(FormatError::SparseMapInvalid)?;

        match parse_sparse_map_text(&collected) {
            None => {
                if collected.len() as u64 > MAX_META_SIZE {
                    return Err(FormatError::SparseMapInvalid.into());
                }
                self.state = State::ReadSparseMap {
                    entry,
                    realsize,
                    body_remaining,
                    collected,
                };
                self.process(out)
            }
            Some(extents) => {
                entry.size = Some(realsize);
                for &(off, len) in &extents {
                    entry.sparse.add(off, len);
                }
                let walker = SparseWalker::sparse(extents);
                let stored = walker.stored_remaining();
                // whatever is left of the body after the data blocks is
                // slack plus the outer block padding
                let trailing = body_remaining.saturating_sub(stored);
                self.state = State::ReadData { walker, trailing };
                Ok(TarStep::Entry(entry))
            }
        }
    }

    fn process_data(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let State::ReadData { walker, trailing } = &mut self.state else {
            unreachable!()
        };

        match walker.next_chunk() {
            None => {
                let trailing = *trailing;
                self.state = State::Drain {
                    trailing,
                    emit_done: true,
                };
                self.process(out)
            }
            Some((offset, extent_remaining)) => {
                let data = self.buffer.data();
                if data.is_empty() {
                    return self.continue_or_truncated();
                }
                let n = data
                    .len()
                    .min(out.len())
                    .min(extent_remaining.min(usize::MAX as u64) as usize);
                if n == 0 {
                    // caller's buffer is full
                    return Ok(TarStep::Continue);
                }
                out[..n].copy_from_slice(&data[..n]);
                self.buffer.consume(n);
                walker.advance(n as u64);
                Ok(TarStep::Data { len: n, offset })
            }
        }
    }

    fn process_drain(&mut self, out: &mut [u8]) -> Result<TarStep, Error> {
        let State::Drain {
            trailing,
            emit_done,
        } = &mut self.state
        else {
            unreachable!()
        };

        let data = self.buffer.data();
        let take = (data.len() as u64).min(*trailing) as usize;
        self.buffer.consume(take);
        *trailing -= take as u64;
        if *trailing > 0 {
            return self.continue_or_truncated();
        }

        let emit = *emit_done;
        self.state = State::ReadHeader;
        if emit {
            Ok(TarStep::EntryDone)
        } else {
            self.process(out)
        }
    }

    /// Pop a whole 512-byte block, or report truncation at stream end.
    fn take_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>, Error> {
        let data = self.buffer.data();
        if data.len() < BLOCK_SIZE {
            if self.eof && !data.is_empty() {
                return Err(Error::IO(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated tar block",
                )));
            }
            return Ok(None);
        }
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&data[..BLOCK_SIZE]);
        self.buffer.consume(BLOCK_SIZE);
        Ok(Some(block))
    }

    fn continue_or_truncated(&self) -> Result<TarStep, Error> {
        if self.eof && self.buffer.available_data() == 0 {
            return Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated tar stream",
            )));
        }
        Ok(TarStep::Continue)
    }

    fn dispatch_header(&mut self, header: TarHeader, out: &mut [u8]) -> Result<TarStep, Error> {
        let stored = header.stored_size();
        let padding = tar::padded_size(stored) - stored;

        match header.typeflag {
            TypeFlag::PaxNext | TypeFlag::PaxGlobal => {
                if header.size > MAX_META_SIZE {
                    return Err(FormatError::PaxInvalidRecord.into());
                }
                self.state = State::ReadPaxBody {
                    is_global: header.typeflag == TypeFlag::PaxGlobal,
                    remaining: header.size,
                    padding,
                    collected: Vec::with_capacity(header.size as usize),
                };
                self.process(out)
            }
            TypeFlag::GnuLongName | TypeFlag::GnuLongLink => {
                if header.size > MAX_META_SIZE {
                    return Err(FormatError::PaxInvalidRecord.into());
                }
                self.state = State::ReadLongName {
                    is_link: header.typeflag == TypeFlag::GnuLongLink,
                    remaining: header.size,
                    padding,
                    collected: Vec::with_capacity(header.size as usize),
                };
                self.process(out)
            }
            TypeFlag::GnuVolumeLabel => {
                // no file equivalent; skip any body
                self.state = State::Drain {
                    trailing: tar::padded_size(header.size),
                    emit_done: false,
                };
                self.process(out)
            }
            TypeFlag::GnuSparse => {
                let gnu = header
                    .gnu_sparse
                    .clone()
                    .ok_or(FormatError::SparseMapInvalid)?;
                if gnu.isextended {
                    self.state = State::ReadSparseExt {
                        realsize: gnu.realsize,
                        extents: gnu.extents,
                        header: Box::new(header),
                    };
                    return self.process(out);
                }
                let mut entry = Box::new(self.build_entry(&header));
                entry.size = Some(gnu.realsize);
                for &(off, len) in &gnu.extents {
                    entry.sparse.add(off, len);
                }
                let walker = SparseWalker::sparse(gnu.extents);
                self.enter_read_data(header.size, walker);
                Ok(TarStep::Entry(entry))
            }
            _ => {
                let mut entry = Box::new(self.build_entry(&header));

                // pax records may rewrite anything, including the size, and
                // may attach a sparse map
                let mut outcome = PaxOutcome::default();
                let global = std::mem::take(&mut self.global);
                pax::apply_records(&mut entry, &global, &mut outcome)?;
                self.global = global;
                let local = std::mem::take(&mut self.pending_pax);
                pax::apply_records(&mut entry, &local, &mut outcome)?;

                // links, directories and specials carry no body regardless
                // of what the size fields claim
                let stored = if header.stored_size() == 0 {
                    0
                } else {
                    outcome.size.unwrap_or(stored)
                };

                if outcome.sparse.is_1_0() {
                    if let Some(name) = outcome.sparse.name.clone() {
                        entry.path = EntryString::from_bytes(
                            name,
                            outcome.hdrcharset.unwrap_or(Encoding::Utf8),
                        );
                    }
                    let realsize = outcome
                        .sparse
                        .realsize
                        .ok_or(FormatError::SparseMapInvalid)?;
                    self.state = State::ReadSparseMap {
                        entry,
                        realsize,
                        body_remaining: tar::padded_size(stored),
                        collected: Vec::new(),
                    };
                    return self.process(out);
                }

                if outcome.sparse.is_present() {
                    // 0.0 / 0.1 pax sparse: extents came from the records
                    let realsize = outcome.sparse.realsize.unwrap_or(stored);
                    entry.size = Some(realsize);
                    let extents = outcome.sparse.extents.clone();
                    for &(off, len) in &extents {
                        entry.sparse.add(off, len);
                    }
                    let walker = SparseWalker::sparse(extents);
                    self.enter_read_data(stored, walker);
                    return Ok(TarStep::Entry(entry));
                }

                let walker = SparseWalker::dense(stored);
                self.enter_read_data(stored, walker);
                Ok(TarStep::Entry(entry))
            }
        }
    }

    /// Move to ReadData for a body of `stored` bytes (padded to a block
    /// boundary on disk); the walker decides which of those surface.
    fn enter_read_data(&mut self, stored: u64, walker: SparseWalker) {
        // a corrupt sparse map may claim more extent bytes than the body
        // holds; never let that underflow into a huge skip
        let trailing = tar::padded_size(stored).saturating_sub(walker.stored_remaining());
        self.state = State::ReadData { walker, trailing };
    }

    fn build_entry(&mut self, header: &TarHeader) -> Entry {
        let mut entry = header.to_entry(self.opts.hdrcharset);
        if let Some(name) = self.long_name.take() {
            entry.path = EntryString::from_bytes(name, self.opts.hdrcharset);
        }
        if let Some(link) = self.long_link.take() {
            let link = EntryString::from_bytes(link, self.opts.hdrcharset);
            if entry.hardlink.is_some() {
                entry.hardlink = Some(link);
            } else if entry.symlink.is_some() {
                entry.symlink = Some(link);
            }
        }
        entry
    }
}

impl Default for TarFsm {
    fn default() -> Self {
        Self::new()
    }
}

/// Try to parse a complete GNU 1.0 sparse map from the collected text:
/// a decimal entry count, then offset/size per entry, newline-separated.
/// Returns `None` when more blocks are needed.
fn parse_sparse_map_text(collected: &[u8]) -> Option<Vec<(u64, u64)>> {
    let mut lines = collected.split(|&b| b == b'\n');
    let count: usize = {
        let first = lines.next()?;
        std::str::from_utf8(first).ok()?.trim().parse().ok()?
    };
    let mut numbers = Vec::with_capacity(count * 2);
    for _ in 0..count * 2 {
        let line = lines.next()?;
        let n: u64 = std::str::from_utf8(line).ok()?.trim().parse().ok()?;
        numbers.push(n);
    }
    // make sure the final line was complete (terminated by a newline)
    lines.next()?;
    let mut extents = Vec::with_capacity(count);
    for pair in numbers.chunks_exact(2) {
        extents.push((pair[0], pair[1]));
    }
    Some(extents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_walker_maps_offsets() {
        let mut w = SparseWalker::sparse(vec![(0, 100), (9900, 100)]);
        assert_eq!(w.stored_remaining(), 200);
        assert_eq!(w.next_chunk(), Some((0, 100)));
        w.advance(100);
        assert_eq!(w.next_chunk(), Some((9900, 100)));
        w.advance(40);
        assert_eq!(w.next_chunk(), Some((9940, 60)));
        w.advance(60);
        assert_eq!(w.next_chunk(), None);
    }

    #[test]
    fn sparse_map_text_needs_all_numbers() {
        assert_eq!(parse_sparse_map_text(b"2\n0\n100\n"), None);
        assert_eq!(
            parse_sparse_map_text(b"2\n0\n100\n9900\n100\n"),
            Some(vec![(0, 100), (9900, 100)])
        );
    }

    fn feed(fsm: &mut TarFsm, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let space = fsm.space();
            let n = space.len().min(bytes.len());
            space[..n].copy_from_slice(&bytes[..n]);
            fsm.fill(n);
            bytes = &bytes[n..];
        }
    }

    #[test]
    fn empty_archive_is_immediate_eof() {
        let mut fsm = TarFsm::new();
        feed(&mut fsm, &[0u8; 1024]);
        fsm.fill(0);
        let mut out = [0u8; 512];
        match fsm.process(&mut out).unwrap() {
            TarStep::ArchiveEof => {}
            other => panic!("expected ArchiveEof, got {:?}", other),
        }
    }

    #[test]
    fn lone_zero_block_is_an_error() {
        let mut fsm = TarFsm::new();
        let mut bytes = vec![0u8; 512];
        // follow the zero block with a valid-looking nonzero block
        bytes.extend_from_slice(&[1u8; 512]);
        feed(&mut fsm, &bytes);
        let mut out = [0u8; 512];
        let err = fsm.process(&mut out).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::TarLoneZeroBlock)
        ));
    }
}
