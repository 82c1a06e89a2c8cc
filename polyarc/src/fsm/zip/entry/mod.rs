use std::cmp;

use oval::Buffer;
use tracing::trace;
use winnow::{
    error::ErrMode,
    stream::{AsBytes, Offset},
    Parser, Partial,
};

mod store_dec;

#[cfg(feature = "deflate")]
mod deflate_dec;

#[cfg(feature = "deflate64")]
mod deflate64_dec;

#[cfg(feature = "bzip2")]
mod bzip2_dec;

#[cfg(feature = "lzma")]
mod lzma_dec;

#[cfg(feature = "lzma")]
mod xz_dec;

#[cfg(feature = "zstd")]
mod zstd_dec;

use crate::{
    crypto::{
        winzip_aes::{AesDecryptor, AesStrength, AUTH_CODE_LEN},
        zipcrypto::{ZipCryptoKeys, HEADER_SIZE as ZIPCRYPTO_HEADER_SIZE},
    },
    error::{Error, FormatError},
    parse::zip::{DataDescriptorRecord, LocalFileHeaderRecord, Method, ZipEntry},
};

use super::super::FsmResult;

/// What one [EntryFsm::process] call yields: either the machine plus a
/// progress report, or (at entry end) the leftover buffer, the final entry
/// metadata, and the trailer verdict.
pub type EntryFsmResult = FsmResult<(EntryFsm, DecompressOutcome), (Buffer, Box<ZipEntry>, Option<Error>)>;

struct EntryReadMetrics {
    uncompressed_size: u64,
    crc32: u32,
    /// data went through the traditional stream cipher; a CRC mismatch then
    /// means "bad password or corrupt data"
    was_zipcrypto: bool,
    /// AE version when the entry was AES-encrypted (2 means no CRC stored)
    aes_version: Option<u16>,
    /// outcome of the HMAC trailer check, when there was one
    aes_ok: Option<bool>,
}

enum Decryptor {
    None,
    ZipCrypto(ZipCryptoKeys),
    Aes(Box<AesDecryptor>),
}

#[derive(Default)]
enum State {
    /// Parsing the local file header.
    #[default]
    ReadLocalHeader,

    /// Consuming the encryption prelude: 12 bytes for ZipCrypto, salt plus
    /// verification pair for AES.
    ReadEncryptionHeader {
        needed: usize,
    },

    /// Decrypting/decompressing the body.
    ReadData {
        /// Raw (still compressed, possibly encrypted) bytes consumed
        compressed_bytes: u64,

        /// Bytes the decompressor has produced
        uncompressed_bytes: u64,

        /// CRC32 of the decompressed data
        hasher: crc32fast::Hasher,

        /// The decompression method
        decompressor: AnyDecompressor,

        /// Per-entry cipher, when encrypted
        decryptor: Decryptor,

        /// Decrypted bytes not yet accepted by the decompressor
        plain: Vec<u8>,

        /// Consecutive speculative descriptor matches rejected (stored
        /// entries with length-at-end only)
        retries: u8,
    },

    /// Reading the 10-byte HMAC trailer of an AES entry.
    ReadAuthCode {
        decryptor: Box<AesDecryptor>,
        metrics: EntryReadMetrics,
    },

    /// Reading the data descriptor that follows length-at-end entries.
    ReadDataDescriptor {
        metrics: EntryReadMetrics,
    },

    /// Checking sizes and checksums against what the headers promised.
    Validate {
        metrics: EntryReadMetrics,
        descriptor: Option<DataDescriptorRecord>,
    },

    Transition,
}

/// A state machine that parses a single zip entry from its local file
/// header through its (possibly encrypted, possibly compressed) data and
/// trailing records.
///
/// Drive it like the other machines: `wants_read` / [Self::space] /
/// [Self::fill], then [Self::process] with an output buffer. When it
/// returns [FsmResult::Done], the leftover input buffer and the final
/// entry metadata (sizes resolved, for length-at-end entries) are handed
/// back for the next entry in the stream.
pub struct EntryFsm {
    state: State,
    entry: Option<ZipEntry>,
    buffer: Buffer,
    eof: bool,
    password: Option<Vec<u8>>,
}

impl EntryFsm {
    /// Create a new state machine for the next entry in the stream.
    ///
    /// `remain` carries buffered bytes left over from the previous entry;
    /// `password` is needed when entries are encrypted.
    pub fn new(password: Option<Vec<u8>>, remain: Option<Buffer>) -> Self {
        const BUF_CAPACITY: usize = 256 * 1024;

        Self {
            state: State::ReadLocalHeader,
            entry: None,
            buffer: match remain {
                Some(remain) => remain,
                None => Buffer::with_capacity(BUF_CAPACITY),
            },
            eof: false,
            password,
        }
    }

    /// The entry we are currently reading, available as soon as the local
    /// file header has been parsed.
    pub fn entry(&self) -> Option<&ZipEntry> {
        self.entry.as_ref()
    }

    /// If this returns true, the caller should read data into
    /// [Self::space] — without forgetting to call [Self::fill] with the
    /// number of bytes written.
    pub fn wants_read(&self) -> bool {
        match self.state {
            State::ReadLocalHeader
            | State::ReadEncryptionHeader { .. }
            | State::ReadAuthCode { .. }
            | State::ReadDataDescriptor { .. } => true,
            State::ReadData { .. } => self.buffer.available_space() > 0,
            State::Validate { .. } => false,
            State::Transition => unreachable!(),
        }
    }

    /// Attempt to parse the local file header, without producing any data.
    /// Returns `Some(entry)` once the header has been parsed.
    pub fn process_till_header(&mut self) -> Result<Option<&ZipEntry>, Error> {
        if matches!(self.state, State::ReadLocalHeader) {
            self.parse_local_header()?;
        }
        match self.state {
            State::ReadLocalHeader => Ok(None),
            _ => Ok(self.entry.as_ref()),
        }
    }

    /// Parse the header if enough bytes are buffered; on success, move to
    /// the next state. Stays in ReadLocalHeader on Incomplete.
    fn parse_local_header(&mut self) -> Result<(), Error> {
        let mut input = Partial::new(self.buffer.data());
        match LocalFileHeaderRecord::parser.parse_next(&mut input) {
            Ok(header) => {
                let consumed = input.as_bytes().offset_from(&self.buffer.data());
                trace!(local_file_header = ?header, consumed, "parsed local file header");
                self.buffer.consume(consumed);

                let entry = ZipEntry::from_local(&header)?;
                let next = if entry.entry.data_encrypted {
                    match &entry.aes {
                        Some(aes) => {
                            if !entry.sizes_known {
                                // we'd have no way to find the auth code
                                return Err(Error::UnknownSize);
                            }
                            let strength = AesStrength::from_code(aes.strength)?;
                            State::ReadEncryptionHeader {
                                needed: strength.salt_len() + 2,
                            }
                        }
                        None => State::ReadEncryptionHeader {
                            needed: ZIPCRYPTO_HEADER_SIZE,
                        },
                    }
                } else {
                    State::ReadData {
                        compressed_bytes: 0,
                        uncompressed_bytes: 0,
                        hasher: crc32fast::Hasher::new(),
                        decompressor: AnyDecompressor::new(&entry)?,
                        decryptor: Decryptor::None,
                        plain: Vec::new(),
                        retries: 0,
                    }
                };
                self.entry = Some(entry);
                self.state = next;
                Ok(())
            }
            Err(ErrMode::Incomplete(_)) => Ok(()),
            Err(_e) => Err(Error::Format(FormatError::InvalidLocalHeader)),
        }
    }

    /// Process the input and write the output to the given buffer.
    ///
    /// This function will return [FsmResult::Continue] if it needs more
    /// input to continue, or if it needs more space to write to. It returns
    /// [FsmResult::Done] when the entry (data, optional auth code, optional
    /// data descriptor) has been fully read, handing back the leftover
    /// input buffer, the final entry metadata, and the trailer verdict: a
    /// checksum/size/authentication mismatch is reported there rather than
    /// as a hard error, because the stream position is still good and the
    /// caller may carry on with the next entry.
    pub fn process(
        mut self,
        out: &mut [u8],
    ) -> Result<EntryFsmResult, Error> {
        use State as S;

        // stored entries with length-at-end have no self-terminating
        // structure: hunt for the data descriptor signature instead
        if matches!(self.state, S::ReadData { .. }) {
            let entry = self.entry.as_ref().unwrap();
            if matches!(entry.method, Method::Store) && !entry.sizes_known {
                return self.process_store_scan(out);
            }
        }

        match &mut self.state {
            S::ReadLocalHeader => {
                self.parse_local_header()?;
                match self.state {
                    S::ReadLocalHeader => Ok(FsmResult::Continue((self, Default::default()))),
                    _ => self.process(out),
                }
            }
            S::ReadEncryptionHeader { needed } => {
                let needed = *needed;
                if self.buffer.available_data() < needed {
                    if self.eof {
                        return Err(Error::IO(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "truncated encryption header",
                        )));
                    }
                    return Ok(FsmResult::Continue((self, Default::default())));
                }

                let entry = self.entry.as_ref().unwrap();
                let password = self.password.as_deref().ok_or(Error::Password)?;

                let decryptor = match &entry.aes {
                    Some(aes) => {
                        let strength = AesStrength::from_code(aes.strength)?;
                        let prelude = &self.buffer.data()[..needed];
                        let (salt, verification) = prelude.split_at(strength.salt_len());
                        let verification = [verification[0], verification[1]];
                        let dec =
                            AesDecryptor::new(strength, password, salt, verification)
                                .ok_or(Error::Password)?;
                        Decryptor::Aes(Box::new(dec))
                    }
                    None => {
                        let mut keys = ZipCryptoKeys::new(password);
                        let mut header = [0u8; ZIPCRYPTO_HEADER_SIZE];
                        header.copy_from_slice(&self.buffer.data()[..needed]);
                        // when sizes ride in the descriptor, the CRC isn't
                        // known yet: the check byte is the DOS time's high
                        // byte instead
                        let check = if entry.has_data_descriptor() {
                            (entry.dos_time >> 8) as u8
                        } else {
                            (entry.crc32 >> 24) as u8
                        };
                        if !keys.decrypt_header(&mut header, check) {
                            return Err(Error::Password);
                        }
                        Decryptor::ZipCrypto(keys)
                    }
                };
                self.buffer.consume(needed);

                let entry = self.entry.as_ref().unwrap();
                transition!(self.state => (S::ReadEncryptionHeader { .. }) {
                    S::ReadData {
                        compressed_bytes: 0,
                        uncompressed_bytes: 0,
                        hasher: crc32fast::Hasher::new(),
                        decompressor: AnyDecompressor::new(entry)?,
                        decryptor,
                        plain: Vec::new(),
                        retries: 0,
                    }
                });
                self.process(out)
            }
            S::ReadData {
                compressed_bytes,
                uncompressed_bytes,
                hasher,
                decompressor,
                decryptor,
                plain,
                ..
            } => {
                let entry = self.entry.as_ref().unwrap();
                let limit = ciphertext_limit(entry);

                let in_buf = self.buffer.data();
                // don't feed the decompressor bytes that belong to the auth
                // code or the next entry
                let in_buf_max_len = match limit {
                    Some(limit) => cmp::min(in_buf.len() as u64, limit - *compressed_bytes) as usize,
                    None => in_buf.len(),
                };
                let in_buf = &in_buf[..in_buf_max_len];

                let outcome = match decryptor {
                    Decryptor::None => {
                        let fed_after = *compressed_bytes + in_buf.len() as u64;
                        let has_more_input = match limit {
                            Some(l) => {
                                if fed_after == l {
                                    HasMoreInput::No
                                } else {
                                    HasMoreInput::Yes
                                }
                            }
                            None => {
                                if self.eof && in_buf.len() == self.buffer.available_data() {
                                    HasMoreInput::No
                                } else {
                                    HasMoreInput::Yes
                                }
                            }
                        };
                        let outcome = decompressor.decompress(in_buf, out, has_more_input)?;
                        self.buffer.consume(outcome.bytes_read);
                        *compressed_bytes += outcome.bytes_read as u64;
                        outcome
                    }
                    _ => {
                        // decrypt everything we took into the carry buffer
                        // (stream ciphers can't rewind), then feed from there
                        let take = in_buf.len();
                        if take > 0 {
                            let start = plain.len();
                            plain.extend_from_slice(in_buf);
                            match decryptor {
                                Decryptor::ZipCrypto(keys) => keys.decrypt(&mut plain[start..]),
                                Decryptor::Aes(aes) => aes.decrypt(&mut plain[start..]),
                                Decryptor::None => unreachable!(),
                            }
                            self.buffer.consume(take);
                            *compressed_bytes += take as u64;
                        }
                        let fed_all = match limit {
                            Some(l) => *compressed_bytes == l,
                            None => self.eof && self.buffer.available_data() == 0,
                        };
                        let has_more_input = if fed_all && plain.is_empty() {
                            HasMoreInput::No
                        } else {
                            HasMoreInput::Yes
                        };
                        let mut outcome = decompressor.decompress(plain, out, has_more_input)?;
                        plain.drain(..outcome.bytes_read);
                        // raw consumption was already accounted above
                        outcome.bytes_read = take;
                        outcome
                    }
                };

                trace!(
                    ?outcome,
                    compressed_bytes = *compressed_bytes,
                    uncompressed_bytes = *uncompressed_bytes,
                    eof = self.eof,
                    "decompressed"
                );

                let fed_all = match limit {
                    Some(l) => *compressed_bytes == l && plain.is_empty(),
                    None => {
                        decompressor.is_done()
                            || (self.eof && self.buffer.available_data() == 0 && plain.is_empty())
                    }
                };

                if outcome.bytes_written == 0 && fed_all {
                    // we're done; wrap up the trailing records
                    transition!(self.state => (S::ReadData { uncompressed_bytes, hasher, decryptor, .. }) {
                        let entry = self.entry.as_ref().unwrap();
                        let metrics = EntryReadMetrics {
                            uncompressed_size: uncompressed_bytes,
                            crc32: hasher.finalize(),
                            was_zipcrypto: matches!(decryptor, Decryptor::ZipCrypto(_)),
                            aes_version: entry.aes.as_ref().map(|a| a.version),
                            aes_ok: None,
                        };

                        match decryptor {
                            Decryptor::Aes(aes) => S::ReadAuthCode { decryptor: aes, metrics },
                            _ => {
                                if entry.has_data_descriptor() {
                                    S::ReadDataDescriptor { metrics }
                                } else {
                                    S::Validate { metrics, descriptor: None }
                                }
                            }
                        }
                    });
                    return self.process(out);
                }

                if outcome.bytes_written == 0
                    && outcome.bytes_read == 0
                    && self.eof
                    && self.buffer.available_data() == 0
                    && !fed_all
                {
                    return Err(Error::IO(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "zip entry data ends before its declared size",
                    )));
                }

                // write the decompressed data to the hasher
                hasher.update(&out[..outcome.bytes_written]);
                *uncompressed_bytes += outcome.bytes_written as u64;

                Ok(FsmResult::Continue((self, outcome)))
            }
            S::ReadAuthCode { .. } => {
                if self.buffer.available_data() < AUTH_CODE_LEN {
                    if self.eof {
                        return Err(Error::IO(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "truncated authentication trailer",
                        )));
                    }
                    return Ok(FsmResult::Continue((self, Default::default())));
                }
                let mut code = [0u8; AUTH_CODE_LEN];
                code.copy_from_slice(&self.buffer.data()[..AUTH_CODE_LEN]);
                self.buffer.consume(AUTH_CODE_LEN);

                transition!(self.state => (S::ReadAuthCode { decryptor, mut metrics }) {
                    metrics.aes_ok = Some(decryptor.verify(&code));
                    let entry = self.entry.as_ref().unwrap();
                    if entry.has_data_descriptor() {
                        S::ReadDataDescriptor { metrics }
                    } else {
                        S::Validate { metrics, descriptor: None }
                    }
                });
                self.process(out)
            }
            S::ReadDataDescriptor { .. } => {
                let entry = self.entry.as_ref().unwrap();
                let mut input = Partial::new(self.buffer.data());
                match DataDescriptorRecord::mk_parser(entry.is_zip64).parse_next(&mut input) {
                    Ok(descriptor) => {
                        self.buffer
                            .consume(input.as_bytes().offset_from(&self.buffer.data()));
                        trace!(?descriptor, "data descriptor");
                        transition!(self.state => (S::ReadDataDescriptor { metrics }) {
                            S::Validate { metrics, descriptor: Some(descriptor) }
                        });
                        self.process(out)
                    }
                    Err(ErrMode::Incomplete(_)) => {
                        if self.eof {
                            return Err(Error::Format(FormatError::InvalidDataDescriptor));
                        }
                        Ok(FsmResult::Continue((self, Default::default())))
                    }
                    Err(_e) => Err(Error::Format(FormatError::InvalidDataDescriptor)),
                }
            }
            S::Validate {
                metrics,
                descriptor,
            } => {
                let entry = self.entry.as_mut().unwrap();

                let expected_crc32 = if entry.crc32 != 0 {
                    entry.crc32
                } else if let Some(descriptor) = descriptor.as_ref() {
                    descriptor.crc32
                } else {
                    0
                };

                let expected_size = if entry.sizes_known {
                    Some(entry.uncompressed_size)
                } else {
                    descriptor.as_ref().map(|d| d.uncompressed_size)
                };

                let mut verdict: Option<Error> = None;

                if let Some(expected) = expected_size {
                    if expected != metrics.uncompressed_size {
                        verdict = Some(Error::Format(FormatError::WrongSize {
                            expected,
                            actual: metrics.uncompressed_size,
                        }));
                    }
                }

                if metrics.aes_ok == Some(false) {
                    verdict = Some(Error::Format(FormatError::WrongAuthCode));
                }

                // AE-2 zeroes the CRC on purpose; the HMAC already vouched
                // for the data
                let skip_crc = metrics.aes_version == Some(2);
                if verdict.is_none()
                    && !skip_crc
                    && expected_crc32 != 0
                    && expected_crc32 != metrics.crc32
                {
                    verdict = Some(if metrics.was_zipcrypto {
                        // no MAC: indistinguishable from corrupt data
                        Error::Password
                    } else {
                        Error::Format(FormatError::WrongChecksum {
                            expected: expected_crc32,
                            actual: metrics.crc32,
                        })
                    });
                }

                // resolve deferred sizes so the caller sees the real ones
                if let Some(d) = descriptor {
                    entry.crc32 = d.crc32;
                    entry.compressed_size = d.compressed_size;
                    entry.uncompressed_size = d.uncompressed_size;
                    entry.sizes_known = true;
                    entry.entry.size = Some(d.uncompressed_size);
                }

                let entry = Box::new(self.entry.take().unwrap());
                Ok(FsmResult::Done((self.buffer, entry, verdict)))
            }
            S::Transition => {
                unreachable!("the state machine should never be in the transition state")
            }
        }
    }

    /// A stored entry with length-at-end: the data has no structure of its
    /// own, so scan for the `PK\x07\x08` descriptor signature, confirming a
    /// candidate by its compressed-size field. A rejected candidate is fed
    /// back as data; more than three rejected candidates in one entry give
    /// up with a [FormatError::DescriptorRetriesExhausted], which carries
    /// [Severity::Retry](crate::Severity::Retry) so callers know the handle
    /// survived.
    fn process_store_scan(mut self, out: &mut [u8]) -> Result<EntryFsmResult, Error> {
        const SIG: &[u8] = b"PK\x07\x08";

        use State as S;
        let S::ReadData {
            compressed_bytes,
            uncompressed_bytes,
            hasher,
            retries,
            ..
        } = &mut self.state
        else {
            unreachable!()
        };

        let data = self.buffer.data();
        if data.is_empty() {
            if self.eof {
                return Err(Error::Format(FormatError::InvalidDataDescriptor));
            }
            return Ok(FsmResult::Continue((self, Default::default())));
        }

        if data.starts_with(SIG) {
            if data.len() < 16 {
                if self.eof {
                    return Err(Error::Format(FormatError::InvalidDataDescriptor));
                }
                return Ok(FsmResult::Continue((self, Default::default())));
            }
            let candidate_size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as u64;
            if candidate_size == *uncompressed_bytes {
                transition!(self.state => (S::ReadData { uncompressed_bytes, hasher, .. }) {
                    let metrics = EntryReadMetrics {
                        uncompressed_size: uncompressed_bytes,
                        crc32: hasher.finalize(),
                        was_zipcrypto: false,
                        aes_version: None,
                        aes_ok: None,
                    };
                    S::ReadDataDescriptor { metrics }
                });
                return self.process(out);
            }

            // a stray signature inside the data
            *retries += 1;
            if *retries > 3 {
                return Err(Error::Format(FormatError::DescriptorRetriesExhausted));
            }
            if out.is_empty() {
                return Ok(FsmResult::Continue((self, Default::default())));
            }
            out[0] = data[0];
            hasher.update(&out[..1]);
            *uncompressed_bytes += 1;
            *compressed_bytes += 1;
            self.buffer.consume(1);
            return Ok(FsmResult::Continue((
                self,
                DecompressOutcome {
                    bytes_read: 1,
                    bytes_written: 1,
                },
            )));
        }

        // everything before a possible signature start is data for sure
        let safe = match data.windows(SIG.len()).position(|w| w == SIG) {
            Some(pos) => pos,
            None => {
                // keep the last 3 bytes around in case a signature straddles
                // the chunk boundary
                if self.eof {
                    data.len()
                } else {
                    data.len().saturating_sub(SIG.len() - 1)
                }
            }
        };

        let n = cmp::min(safe, out.len());
        if n == 0 {
            return Ok(FsmResult::Continue((self, Default::default())));
        }
        out[..n].copy_from_slice(&data[..n]);
        hasher.update(&out[..n]);
        *uncompressed_bytes += n as u64;
        *compressed_bytes += n as u64;
        self.buffer.consume(n);
        Ok(FsmResult::Continue((
            self,
            DecompressOutcome {
                bytes_read: n,
                bytes_written: n,
            },
        )))
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
    ///
    /// If this is called with zero, it indicates eof
    #[inline]
    pub fn fill(&mut self, count: usize) -> usize {
        if count == 0 {
            self.eof = true;
        }
        self.buffer.fill(count)
    }
}

/// Stored bytes of the entry that are actual ciphertext/compressed data,
/// excluding the encryption prelude and the auth code. `None` when the
/// sizes ride in a data descriptor we haven't seen yet.
fn ciphertext_limit(entry: &ZipEntry) -> Option<u64> {
    if !entry.sizes_known {
        return None;
    }
    let mut limit = entry.compressed_size;
    if entry.entry.data_encrypted {
        match &entry.aes {
            Some(aes) => {
                if let Ok(strength) = AesStrength::from_code(aes.strength) {
                    limit = limit
                        .saturating_sub(strength.salt_len() as u64 + 2 + AUTH_CODE_LEN as u64);
                }
            }
            None => {
                limit = limit.saturating_sub(ZIPCRYPTO_HEADER_SIZE as u64);
            }
        }
    }
    Some(limit)
}

enum AnyDecompressor {
    Store(store_dec::StoreDec),
    #[cfg(feature = "deflate")]
    Deflate(Box<deflate_dec::DeflateDec>),
    #[cfg(feature = "deflate64")]
    Deflate64(Box<deflate64_dec::Deflate64Dec>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2_dec::Bzip2Dec),
    #[cfg(feature = "lzma")]
    Lzma(Box<lzma_dec::LzmaDec>),
    #[cfg(feature = "lzma")]
    Xz(Box<xz_dec::XzDec>),
    #[cfg(feature = "zstd")]
    Zstd(zstd_dec::ZstdDec),
}

/// How many bytes were consumed and produced by one decompression call.
#[derive(Default, Debug)]
pub struct DecompressOutcome {
    /// Number of bytes read from input
    pub bytes_read: usize,

    /// Number of bytes written to output
    pub bytes_written: usize,
}

pub(crate) enum HasMoreInput {
    Yes,
    No,
}

trait Decompressor {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error>;

    /// True once the codec has seen its own end-of-stream marker and
    /// drained all pending output. Only self-terminating codecs ever
    /// return true.
    fn is_done(&self) -> bool {
        false
    }
}

impl AnyDecompressor {
    fn new(entry: &ZipEntry) -> Result<Self, Error> {
        let method = entry.method;

        // codecs that cannot signal their own end need up-front sizes
        if !entry.sizes_known && matches!(method, Method::Zstd | Method::Xz) {
            return Err(Error::UnknownSize);
        }

        let dec = match method {
            Method::Store => Self::Store(Default::default()),

            #[cfg(feature = "deflate")]
            Method::Deflate => Self::Deflate(Default::default()),
            #[cfg(not(feature = "deflate"))]
            Method::Deflate => return Err(Error::method_not_enabled(method)),

            #[cfg(feature = "deflate64")]
            Method::Deflate64 => Self::Deflate64(Default::default()),
            #[cfg(not(feature = "deflate64"))]
            Method::Deflate64 => return Err(Error::method_not_enabled(method)),

            #[cfg(feature = "bzip2")]
            Method::Bzip2 => Self::Bzip2(Default::default()),
            #[cfg(not(feature = "bzip2"))]
            Method::Bzip2 => return Err(Error::method_not_enabled(method)),

            #[cfg(feature = "lzma")]
            Method::Lzma => Self::Lzma(Box::new(lzma_dec::LzmaDec::new(
                if entry.sizes_known {
                    Some(entry.uncompressed_size)
                } else {
                    None
                },
            ))),
            #[cfg(not(feature = "lzma"))]
            Method::Lzma => return Err(Error::method_not_enabled(method)),

            #[cfg(feature = "lzma")]
            Method::Xz => Self::Xz(Default::default()),
            #[cfg(not(feature = "lzma"))]
            Method::Xz => return Err(Error::method_not_enabled(method)),

            #[cfg(feature = "zstd")]
            Method::Zstd => Self::Zstd(zstd_dec::ZstdDec::new()?),
            #[cfg(not(feature = "zstd"))]
            Method::Zstd => return Err(Error::method_not_enabled(method)),

            _ => return Err(Error::method_not_supported(method)),
        };
        Ok(dec)
    }
}

impl Decompressor for AnyDecompressor {
    #[inline]
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        // forward to the appropriate decompressor
        match self {
            Self::Store(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate")]
            Self::Deflate(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "deflate64")]
            Self::Deflate64(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "lzma")]
            Self::Lzma(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "lzma")]
            Self::Xz(dec) => dec.decompress(in_buf, out, has_more_input),
            #[cfg(feature = "zstd")]
            Self::Zstd(dec) => dec.decompress(in_buf, out, has_more_input),
        }
    }

    #[inline]
    fn is_done(&self) -> bool {
        match self {
            Self::Store(dec) => dec.is_done(),
            #[cfg(feature = "deflate")]
            Self::Deflate(dec) => dec.is_done(),
            #[cfg(feature = "deflate64")]
            Self::Deflate64(dec) => dec.is_done(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(dec) => dec.is_done(),
            #[cfg(feature = "lzma")]
            Self::Lzma(dec) => dec.is_done(),
            #[cfg(feature = "lzma")]
            Self::Xz(dec) => dec.is_done(),
            #[cfg(feature = "zstd")]
            Self::Zstd(dec) => dec.is_done(),
        }
    }
}
