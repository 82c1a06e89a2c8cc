//! The read handle: filter negotiation, format dispatch, and the
//! header/data call sequencing.

mod tar;
mod zip;

use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use polyarc::{
    encoding::Encoding,
    entry::Entry,
    error::FormatError,
    filter::FilterCode,
    format::FormatCode,
    fsm::TarOptions,
    parse::rpm::RpmFileIndex,
    Error, Severity,
};
use tracing::trace;

use crate::{
    filter::{self, RPM_SIDE_CHANNEL},
    peek::PeekSource,
};

/// Configures and opens an [ArchiveReader].
pub struct ReadBuilder {
    filters: Vec<FilterCode>,
    formats: Vec<FormatCode>,
    tar_options: TarOptions,
    zip_experimental: bool,
    password: Option<Vec<u8>>,
}

impl Default for ReadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadBuilder {
    /// A builder with every filter and format enabled.
    pub fn new() -> Self {
        Self {
            filters: FilterCode::all().to_vec(),
            formats: vec![
                FormatCode::Ustar,
                FormatCode::Pax,
                FormatCode::GnuTar,
                FormatCode::Zip,
                FormatCode::Cpio,
            ],
            tar_options: TarOptions::default(),
            zip_experimental: false,
            password: None,
        }
    }

    /// Start from an empty support set instead of everything.
    pub fn bare() -> Self {
        Self {
            filters: Vec::new(),
            formats: Vec::new(),
            tar_options: TarOptions::default(),
            zip_experimental: false,
            password: None,
        }
    }

    /// Add a filter to the bidding table.
    pub fn support_filter(mut self, code: FilterCode) -> Self {
        if !self.filters.contains(&code) {
            self.filters.push(code);
        }
        self
    }

    /// Add a format to the bidding table.
    pub fn support_format(mut self, code: FormatCode) -> Self {
        if !self.formats.contains(&code) {
            self.formats.push(code);
        }
        self
    }

    /// Add a format by its numeric code; unknown codes are ignored.
    pub fn support_format_by_code(self, code: u32) -> Self {
        match FormatCode::by_code(code) {
            Some(format) => self.support_format(format),
            None => self,
        }
    }

    /// Password for encrypted zip entries.
    pub fn passphrase(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set a `(module, key, value)` option. Returns `true` when the option
    /// was recognized; unknown options are reported, not fatal.
    pub fn set_option(&mut self, module: &str, key: &str, value: &str) -> bool {
        match (module, key) {
            ("" | "read" | "tar" | "pax" | "gnutar" | "zip", "hdrcharset") => {
                self.tar_options.hdrcharset = match value {
                    "BINARY" => Encoding::Binary,
                    "CP437" => Encoding::Cp437,
                    _ => Encoding::Utf8,
                };
                true
            }
            ("" | "read", "read_concatenated_archives") => {
                self.tar_options.read_concatenated = value != "0";
                true
            }
            ("" | "tar" | "gnutar", "ignore_zeros") => {
                self.tar_options.ignore_zeros = value != "0";
                true
            }
            ("tar", "compat-2x") => {
                // accepted for compatibility with old consumers; current
                // mtime handling already matches the modern behavior
                true
            }
            ("zip", "experimental") => {
                self.zip_experimental = value != "0";
                true
            }
            _ => false,
        }
    }

    /// Negotiate the filter chain over `source` and return the handle,
    /// ready for [ArchiveReader::next_header]. Format dispatch happens
    /// lazily on the first header read.
    pub fn open<'a, R: Read + 'a>(self, source: R) -> Result<ArchiveReader<'a>, Error> {
        let chain = filter::negotiate(Box::new(source), &self.filters)?;
        trace!(filters = ?chain.filters, "filter chain negotiated");

        let mut side: HashMap<&'static str, Rc<dyn Any>> = HashMap::new();
        for (key, record) in chain.side {
            side.insert(key, record);
        }

        Ok(ArchiveReader {
            head: chain.head,
            filters: chain.filters,
            formats: self.formats,
            driver: None,
            state: HandleState::Header,
            side,
            last_error: None,
            current: None,
            tar_options: self.tar_options,
            zip_experimental: self.zip_experimental,
            password: self.password,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Header,
    Data,
    Eof,
    Fatal,
}

enum Driver {
    Tar(tar::TarDriver),
    Zip(zip::ZipDriver),
}

/// A streaming archive reader: entries come out of [Self::next_header],
/// their bodies out of [Self::read_data_block].
pub struct ArchiveReader<'a> {
    head: PeekSource<Box<dyn Read + 'a>>,
    filters: Vec<FilterCode>,
    formats: Vec<FormatCode>,
    driver: Option<Driver>,
    state: HandleState,
    side: HashMap<&'static str, Rc<dyn Any>>,
    last_error: Option<String>,
    current: Option<Box<Entry>>,
    tar_options: TarOptions,
    zip_experimental: bool,
    password: Option<Vec<u8>>,
}

impl<'a> ArchiveReader<'a> {
    /// The filters that were detected on the stream, raw side first.
    pub fn filters(&self) -> &[FilterCode] {
        &self.filters
    }

    /// The observed compression name: the client-side end of the chain.
    pub fn compression_name(&self) -> &'static str {
        self.filters
            .last()
            .copied()
            .unwrap_or(FilterCode::None)
            .name()
    }

    /// The format that won the bid (refined as the stream reveals its
    /// dialect); `None` before the first header.
    pub fn format(&self) -> Option<FormatCode> {
        match &self.driver {
            Some(Driver::Tar(d)) => Some(d.observed_format()),
            Some(Driver::Zip(_)) => Some(FormatCode::Zip),
            None => None,
        }
    }

    /// The entry between the last `next_header` and the next one. Note
    /// that zip length-at-end entries gain their final size only after
    /// their data has been fully read.
    pub fn entry(&self) -> Option<&Entry> {
        self.current.as_deref()
    }

    /// The last error message surfaced by this handle.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Look up a side-channel record registered by a filter, such as the
    /// RPM file index.
    pub fn side_channel<T: 'static>(&self, key: &str) -> Option<Rc<T>> {
        self.side.get(key)?.clone().downcast::<T>().ok()
    }

    /// The RPM file index, when an RPM filter was on the chain and its
    /// main header has been reached.
    pub fn rpm_index(&self) -> Option<RpmFileIndex> {
        let cell = self.side_channel::<std::cell::RefCell<Option<RpmFileIndex>>>(RPM_SIDE_CHANNEL)?;
        let borrowed = cell.borrow();
        borrowed.clone()
    }

    fn fail(&mut self, err: Error) -> Error {
        self.last_error = Some(err.to_string());
        if err.severity() >= Severity::Fatal {
            self.state = HandleState::Fatal;
        }
        err
    }

    fn dispatch(&mut self) -> Result<(), Error> {
        let peek = self.head.ahead(polyarc::parse::tar::BLOCK_SIZE)?;

        let mut best: Option<(u32, FormatCode)> = None;
        for &code in &self.formats {
            let bid = code.bid(peek);
            if bid > 0 && best.map(|(b, _)| bid > b).unwrap_or(true) {
                best = Some((bid, code));
            }
        }

        let Some((bid, code)) = best else {
            return Err(FormatError::UnrecognizedFormat.into());
        };
        trace!(%code, bid, "format bidder won");

        self.driver = Some(match code {
            FormatCode::Ustar | FormatCode::Pax | FormatCode::GnuTar => {
                Driver::Tar(tar::TarDriver::new(self.tar_options.clone()))
            }
            FormatCode::Zip => Driver::Zip(zip::ZipDriver::new(
                self.password.clone(),
                self.zip_experimental,
            )),
            FormatCode::Cpio => {
                // cpio participates in bidding for honesty but has no
                // reader here
                return Err(FormatError::UnrecognizedFormat.into());
            }
        });
        Ok(())
    }

    /// Read until the next entry header. `None` means end of archive.
    pub fn next_header(&mut self) -> Result<Option<&Entry>, Error> {
        match self.state {
            HandleState::Fatal => {
                return Err(self.fail(Error::IO(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "handle is in a fatal state",
                ))))
            }
            HandleState::Eof => return Ok(None),
            HandleState::Data => {
                self.read_data_skip()?;
            }
            HandleState::Header => {}
        }

        if self.driver.is_none() {
            if let Err(e) = self.dispatch() {
                return Err(self.fail(e));
            }
        }

        let result = match (self.driver.as_mut().unwrap(), &mut self.head) {
            (Driver::Tar(d), head) => d.next_header(head),
            (Driver::Zip(d), head) => d.next_header(head),
        };

        match result {
            Ok(Some(entry)) => {
                self.current = Some(entry);
                self.state = HandleState::Data;
                Ok(self.current.as_deref())
            }
            Ok(None) => {
                self.current = None;
                self.state = HandleState::Eof;
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// The next chunk of the current entry's data, tagged with its logical
    /// file offset (sparse entries skip holes). `None` ends the entry.
    pub fn read_data_block(&mut self) -> Result<Option<(&[u8], u64)>, Error> {
        match self.state {
            HandleState::Fatal => {
                return Err(self.fail(Error::IO(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "handle is in a fatal state",
                ))))
            }
            HandleState::Eof | HandleState::Header => return Ok(None),
            HandleState::Data => {}
        }

        let result = match (self.driver.as_mut().unwrap(), &mut self.head) {
            (Driver::Tar(d), head) => d.read_block(head),
            (Driver::Zip(d), head) => d.read_block(head),
        };

        match result {
            Ok(Some((len, offset))) => {
                let chunk = match self.driver.as_ref().unwrap() {
                    Driver::Tar(d) => d.chunk(len),
                    Driver::Zip(d) => d.chunk(len),
                };
                Ok(Some((chunk, offset)))
            }
            Ok(None) => {
                self.finish_entry();
                Ok(None)
            }
            Err(e) => {
                // trailer mismatches leave the stream good; the entry is
                // over but the handle can continue
                if e.severity() < Severity::Fatal {
                    self.finish_entry();
                }
                Err(self.fail(e))
            }
        }
    }

    /// After a zip length-at-end entry finishes, fold its resolved sizes
    /// back into the visible entry.
    fn finish_entry(&mut self) {
        self.state = HandleState::Header;
        if let Some(Driver::Zip(d)) = self.driver.as_mut() {
            if let Some(finished) = d.take_finished() {
                self.current = Some(finished);
            }
        }
    }

    /// Sequential read of the current entry's data; holes in sparse
    /// entries are filled with zeros.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        // track the logical position through the driver's offsets
        let mut written = 0;
        while written < buf.len() {
            let logical = match self.driver.as_ref() {
                Some(Driver::Tar(d)) => d.logical_position(),
                _ => None,
            };
            match self.read_data_block()? {
                None => break,
                Some((chunk, offset)) => {
                    if let Some(pos) = logical {
                        // holes read back as zeros
                        let gap = offset.saturating_sub(pos).min((buf.len() - written) as u64);
                        for b in &mut buf[written..written + gap as usize] {
                            *b = 0;
                        }
                        written += gap as usize;
                    }
                    let n = chunk.len().min(buf.len() - written);
                    buf[written..written + n].copy_from_slice(&chunk[..n]);
                    written += n;
                    if n < chunk.len() {
                        // couldn't take the whole chunk; the remainder is
                        // lost, so callers mixing APIs should use
                        // read_data_block directly
                        break;
                    }
                }
            }
        }
        Ok(written)
    }

    /// Skip the rest of the current entry's data. A no-op between entries.
    pub fn read_data_skip(&mut self) -> Result<(), Error> {
        if self.state != HandleState::Data {
            return Ok(());
        }
        if let Some(Driver::Tar(d)) = self.driver.as_mut() {
            d.skip_data();
        }
        loop {
            match self.read_data_block() {
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(()),
                Err(e) if e.severity() < Severity::Fatal => {
                    // skipping doesn't care about checksum verdicts
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the handle, releasing the side channel.
    pub fn close(mut self) {
        self.side.clear();
    }
}
