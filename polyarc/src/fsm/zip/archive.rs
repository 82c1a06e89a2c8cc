use crate::{
    encoding::Encoding,
    error::{Error, FormatError},
    fsm::FsmResult,
    parse::zip::{
        EndOfCentralDirectory, EndOfCentralDirectory64Locator, EndOfCentralDirectory64Record,
        EndOfCentralDirectoryRecord, DirectoryHeader, Located, ZipArchive, ZipEntry,
    },
};

use oval::Buffer;
use tracing::trace;
use winnow::{
    error::ErrMode,
    stream::{AsBytes, Offset},
    Parser, Partial,
};

/// [ArchiveFsm] parses a valid zip archive into a [ZipArchive]. In
/// particular, this struct finds an end of central directory record, parses
/// the entire central directory, detects text encoding, and normalizes
/// metadata.
///
/// The loop is as follows:
///
///   * Call [Self::wants_read] to check if more data is needed.
///   * If it returns `Some(offset)`, read the file at that offset
///     into [Self::space] and then call [Self::fill] with
///     the number of bytes read.
///   * Call [Self::process] to process the data.
///   * If it returns [FsmResult::Continue], loop back to the first step.
pub struct ArchiveFsm {
    /// Size of the entire zip file
    size: u64,

    /// Current stage: finding the eocd, reading the eocd, reading the eocd64
    /// locator, reading the eocd64, or reading the central directory
    state: State,

    /// Buffer for reading data from the file
    buffer: CountingBuffer,
}

#[derive(Default)]
enum State {
    /// Finding and reading the end of central directory record
    ReadEocd {
        /// size of the haystack in which we're looking for the end of
        /// central directory record; this may be less than 65 KiB if the
        /// file is smaller than that.
        haystack_size: u64,
    },

    /// Reading the zip64 end of central directory locator.
    ReadEocd64Locator {
        eocdr: Located<EndOfCentralDirectoryRecord>,
    },

    /// Reading the zip64 end of central directory record.
    ReadEocd64 {
        eocdr64_offset: u64,
        eocdr: Located<EndOfCentralDirectoryRecord>,
    },

    /// Reading all headers from the central directory
    ReadCentralDirectory {
        eocd: EndOfCentralDirectory,
        directory_headers: Vec<DirectoryHeader>,
    },

    #[default]
    Transitioning,
}

impl ArchiveFsm {
    /// This should be > 65KiB, because the section at the end of the
    /// file that we check for end of central directory record is 65KiB.
    const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

    /// Create a new archive reader with a specified file size.
    pub fn new(size: u64) -> Self {
        let haystack_size: u64 = 65 * 1024;
        let haystack_size = if size < haystack_size {
            size
        } else {
            haystack_size
        };

        Self {
            size,
            buffer: CountingBuffer::with_capacity(Self::DEFAULT_BUFFER_SIZE),
            state: State::ReadEocd { haystack_size },
        }
    }

    /// If this returns `Some(offset)`, the caller should read data from
    /// `offset` into [Self::space] — without forgetting to call
    /// [Self::fill] with the number of bytes written.
    pub fn wants_read(&self) -> Option<u64> {
        use State as S;
        match self.state {
            S::ReadEocd { haystack_size } => {
                Some(self.buffer.read_offset(self.size - haystack_size))
            }
            S::ReadEocd64Locator { ref eocdr } => {
                let length = EndOfCentralDirectory64Locator::LENGTH as u64;
                Some(self.buffer.read_offset(eocdr.offset - length))
            }
            S::ReadEocd64 { eocdr64_offset, .. } => Some(self.buffer.read_offset(eocdr64_offset)),
            S::ReadCentralDirectory { ref eocd, .. } => {
                Some(self.buffer.read_offset(eocd.directory_offset()))
            }
            S::Transitioning => unreachable!(),
        }
    }

    /// Process buffered data.
    ///
    /// Errors returned from this function are caused by invalid zip
    /// archives, unsupported format quirks, or implementation bugs — never
    /// I/O errors.
    ///
    /// [FsmResult::Continue] gives back ownership of the state machine and
    /// indicates the I/O loop should continue, starting with
    /// [Self::wants_read]. [FsmResult::Done] consumes the machine and
    /// returns a fully-parsed [ZipArchive].
    pub fn process(mut self) -> Result<FsmResult<Self, ZipArchive>, Error> {
        use State as S;
        match self.state {
            S::ReadEocd { haystack_size } => {
                if self.buffer.read_bytes() < haystack_size {
                    // read the entire haystack before we can continue
                    return Ok(FsmResult::Continue(self));
                }

                match {
                    let haystack = &self.buffer.data()[..haystack_size as usize];
                    EndOfCentralDirectoryRecord::find_in_block(haystack)
                } {
                    None => Err(FormatError::DirectoryEndSignatureNotFound.into()),
                    Some(mut eocdr) => {
                        trace!(
                            ?eocdr,
                            size = self.size,
                            "ReadEocd | found end of central directory record"
                        );
                        self.buffer.reset();
                        eocdr.offset += self.size - haystack_size;

                        if eocdr.offset < EndOfCentralDirectory64Locator::LENGTH as u64 {
                            // no room for an EOCD64 locator, definitely not a zip64 file
                            transition!(self.state => (S::ReadEocd { .. }) {
                                S::ReadCentralDirectory {
                                    eocd: EndOfCentralDirectory::new(self.size, eocdr, None)?,
                                    directory_headers: vec![],
                                }
                            });
                            Ok(FsmResult::Continue(self))
                        } else {
                            trace!("ReadEocd | transition to ReadEocd64Locator");
                            self.buffer.reset();
                            transition!(self.state => (S::ReadEocd { .. }) {
                                S::ReadEocd64Locator { eocdr }
                            });
                            Ok(FsmResult::Continue(self))
                        }
                    }
                }
            }
            S::ReadEocd64Locator { .. } => {
                let input = Partial::new(self.buffer.data());
                match EndOfCentralDirectory64Locator::parser.parse_peek(input) {
                    Err(ErrMode::Incomplete(_)) => {
                        // need more data
                        Ok(FsmResult::Continue(self))
                    }
                    Err(ErrMode::Backtrack(_)) | Err(ErrMode::Cut(_)) => {
                        // we don't have a zip64 end of central directory locator - that's ok!
                        trace!("ReadEocd64Locator | no zip64 end of central directory locator");
                        self.buffer.reset();
                        transition!(self.state => (S::ReadEocd64Locator { eocdr }) {
                            S::ReadCentralDirectory {
                                eocd: EndOfCentralDirectory::new(self.size, eocdr, None)?,
                                directory_headers: vec![],
                            }
                        });
                        Ok(FsmResult::Continue(self))
                    }
                    Ok((_, locator)) => {
                        trace!(
                            ?locator,
                            "ReadEocd64Locator | found zip64 end of central directory locator"
                        );
                        self.buffer.reset();
                        transition!(self.state => (S::ReadEocd64Locator { eocdr }) {
                            S::ReadEocd64 {
                                eocdr64_offset: locator.directory_offset,
                                eocdr,
                            }
                        });
                        Ok(FsmResult::Continue(self))
                    }
                }
            }
            S::ReadEocd64 { .. } => {
                let input = Partial::new(self.buffer.data());
                match EndOfCentralDirectory64Record::parser.parse_peek(input) {
                    Err(ErrMode::Incomplete(_)) => {
                        // need more data
                        Ok(FsmResult::Continue(self))
                    }
                    Err(ErrMode::Backtrack(_)) | Err(ErrMode::Cut(_)) => {
                        // at this point, we really expected to have a zip64 end
                        // of central directory record, so, we want to propagate
                        // that error.
                        Err(FormatError::Directory64EndRecordInvalid.into())
                    }
                    Ok((_, eocdr64)) => {
                        self.buffer.reset();
                        transition!(self.state => (S::ReadEocd64 { eocdr, eocdr64_offset }) {
                            S::ReadCentralDirectory {
                                eocd: EndOfCentralDirectory::new(self.size, eocdr, Some(Located {
                                    offset: eocdr64_offset,
                                    inner: eocdr64
                                }))?,
                                directory_headers: vec![],
                            }
                        });
                        Ok(FsmResult::Continue(self))
                    }
                }
            }
            S::ReadCentralDirectory {
                ref eocd,
                ref mut directory_headers,
            } => {
                trace!(
                    "ReadCentralDirectory | process(), available: {}",
                    self.buffer.available_data()
                );
                let mut input = Partial::new(self.buffer.data());
                'read_headers: while !input.is_empty() {
                    match DirectoryHeader::parser.parse_next(&mut input) {
                        Ok(dh) => {
                            directory_headers.push(dh);
                        }
                        Err(ErrMode::Incomplete(_needed)) => {
                            // need more data to read the full header
                            break 'read_headers;
                        }
                        Err(ErrMode::Backtrack(_err)) | Err(ErrMode::Cut(_err)) => {
                            // this is the normal end condition when reading
                            // the central directory (due to 65536-entries
                            // non-zip64 files); check the count first.

                            // only compare 16 bits here
                            let expected_records = directory_headers.len() as u16;
                            let actual_records = eocd.directory_records() as u16;

                            if expected_records != actual_records {
                                return Err(FormatError::InvalidCentralRecord {
                                    expected: expected_records,
                                    actual: actual_records,
                                }
                                .into());
                            }

                            let encoding = detect_archive_encoding(directory_headers);

                            let is_zip64 = eocd.dir64.is_some();
                            let global_offset = eocd.global_offset as u64;
                            let entries: Result<Vec<ZipEntry>, Error> = directory_headers
                                .iter()
                                .map(|x| x.as_zip_entry(is_zip64, encoding, global_offset))
                                .collect();
                            let entries = entries?;

                            let mut comment: Option<String> = None;
                            if !eocd.comment().is_empty() {
                                comment = Some(encoding.decode(eocd.comment())?);
                            }

                            return Ok(FsmResult::Done(ZipArchive {
                                size: self.size,
                                comment,
                                entries,
                                encoding,
                            }));
                        }
                    }
                }
                let consumed = input.as_bytes().offset_from(&self.buffer.data());
                trace!(%consumed, "ReadCentralDirectory total consumed");
                self.buffer.consume(consumed);

                // need more data
                Ok(FsmResult::Continue(self))
            }
            S::Transitioning => unreachable!(),
        }
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
    /// many bytes were written.
    #[inline]
    pub fn fill(&mut self, count: usize) -> usize {
        self.buffer.fill(count)
    }
}

/// Detect the text encoding of the archive's names and comments: all-UTF-8
/// when every header says so, otherwise sniffed with chardetng, with a
/// CP437-vs-Shift-JIS tiebreak on suspicious byte ranges.
fn detect_archive_encoding(directory_headers: &[DirectoryHeader]) -> Encoding {
    let mut detector = chardetng::EncodingDetector::new();
    let mut all_utf8 = true;
    let mut had_suspicious_chars_for_cp437 = false;

    {
        let max_feed: usize = 4096;
        let mut total_fed: usize = 0;
        let mut feed = |slice: &[u8]| {
            detector.feed(slice, false);
            for b in slice {
                if (0xB0..=0xDF).contains(b) {
                    // those are, like, box drawing characters
                    had_suspicious_chars_for_cp437 = true;
                }
            }

            total_fed += slice.len();
            total_fed < max_feed
        };

        'recognize_encoding: for fh in directory_headers.iter().filter(|fh| fh.is_non_utf8()) {
            all_utf8 = false;
            if !feed(&fh.name.0) || !feed(&fh.comment.0) {
                break 'recognize_encoding;
            }
        }
    }

    if all_utf8 {
        return Encoding::Utf8;
    }

    let encoding = detector.guess(None, true);
    if encoding == encoding_rs::SHIFT_JIS {
        // chardetng sometimes detects Codepage 437 as Shift-JIS: if nothing
        // looked like actual multi-byte text, assume CP437.
        if had_suspicious_chars_for_cp437 {
            Encoding::ShiftJis
        } else {
            Encoding::Cp437
        }
    } else if encoding == encoding_rs::UTF_8 {
        Encoding::Utf8
    } else {
        Encoding::Cp437
    }
}

/// A wrapper around [oval::Buffer] that keeps track of how many bytes we've
/// read since initialization or the last reset.
struct CountingBuffer {
    buffer: Buffer,
    read_bytes: u64,
}

impl CountingBuffer {
    fn with_capacity(size: usize) -> Self {
        Self {
            buffer: Buffer::with_capacity(size),
            read_bytes: 0,
        }
    }

    /// resets the buffer along with the read bytes counter
    fn reset(&mut self) {
        self.read_bytes = 0;
        self.buffer.reset();
    }

    #[inline]
    fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    #[inline]
    fn available_data(&self) -> usize {
        self.buffer.available_data()
    }

    #[inline]
    fn available_space(&self) -> usize {
        self.buffer.available_space()
    }

    #[inline]
    fn space(&mut self) -> &mut [u8] {
        self.buffer.space()
    }

    #[inline]
    fn shift(&mut self) {
        self.buffer.shift()
    }

    #[inline]
    fn fill(&mut self, count: usize) -> usize {
        let n = self.buffer.fill(count);
        self.read_bytes += n as u64;
        n
    }

    #[inline]
    fn consume(&mut self, size: usize) {
        self.buffer.consume(size);
    }

    /// computes an absolute offset, given an offset relative
    /// to the current read position
    fn read_offset(&self, offset: u64) -> u64 {
        self.read_bytes + offset
    }
}
