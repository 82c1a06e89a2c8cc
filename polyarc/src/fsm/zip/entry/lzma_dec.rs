use std::cmp;
use std::io::Write;

use lzma_rs::decompress::{Options, Stream, UnpackedSize};
use tracing::trace;
use winnow::{Parser, Partial};

use crate::{error::Error, parse::zip::{LzmaProperties, Method}};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

#[derive(Default)]
enum State {
    /// Accumulating the 4-byte version/properties-size prefix that zip
    /// puts in front of the raw LZMA stream (appnote 5.8.8).
    ReadPrefix {
        collected: Vec<u8>,
    },

    /// Feeding the lzma-rs push stream (writes into an internal Vec).
    Writing(Box<Stream<Vec<u8>>>),

    /// The stream has been finished, we're draining its output buffer.
    Draining(Vec<u8>),

    #[default]
    Transition,
}

pub(crate) struct LzmaDec {
    state: State,
    uncompressed_size: Option<u64>,
}

impl LzmaDec {
    pub fn new(uncompressed_size: Option<u64>) -> Self {
        Self {
            state: State::ReadPrefix {
                collected: Vec::with_capacity(4),
            },
            uncompressed_size,
        }
    }

    fn mk_stream(&self) -> Stream<Vec<u8>> {
        let options = Options {
            unpacked_size: UnpackedSize::UseProvided(self.uncompressed_size),
            allow_incomplete: false,
            memlimit: None,
        };
        Stream::new_with_options(&options, Vec::new())
    }

    #[inline(always)]
    fn internal_buf_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.state {
            State::ReadPrefix { .. } => None,
            State::Writing(stream) => stream.get_output_mut(),
            State::Draining(buf) => Some(buf),
            State::Transition => unreachable!(),
        }
    }

    fn copy_to_out(&mut self, mut out: &mut [u8], outcome: &mut DecompressOutcome) {
        let Some(internal_buf) = self.internal_buf_mut() else {
            return;
        };

        while !out.is_empty() && !internal_buf.is_empty() {
            let to_copy = cmp::min(out.len(), internal_buf.len());
            out[..to_copy].copy_from_slice(&internal_buf[..to_copy]);
            out = &mut out[to_copy..];

            // rotate the internal buffer
            internal_buf.rotate_left(to_copy);
            internal_buf.truncate(internal_buf.len() - to_copy);

            outcome.bytes_written += to_copy;
        }
    }
}

fn dec_err(e: impl std::fmt::Display) -> Error {
    Error::Decompression {
        method: Method::Lzma,
        msg: e.to_string(),
    }
}

impl Decompressor for LzmaDec {
    fn decompress(
        &mut self,
        mut in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome: DecompressOutcome = Default::default();

        if let State::ReadPrefix { collected } = &mut self.state {
            let need = 4 - collected.len();
            let take = cmp::min(need, in_buf.len());
            collected.extend_from_slice(&in_buf[..take]);
            in_buf = &in_buf[take..];
            outcome.bytes_read += take;
            if collected.len() < 4 {
                return Ok(outcome);
            }
            // major, minor, properties size; lzma-rs reads the properties
            // themselves from the stream
            let props = LzmaProperties::parser
                .parse_next(&mut Partial::new(&collected[..]))
                .map_err(|_| dec_err("bad LZMA properties header"))?;
            props.error_if_unsupported()?;
            trace!(major = props.major, minor = props.minor, "lzma prefix");
            self.state = State::Writing(Box::new(self.mk_stream()));
        }

        self.copy_to_out(out, &mut outcome);
        if outcome.bytes_written > 0 {
            return Ok(outcome);
        }

        match &mut self.state {
            State::Writing(stream) => {
                let n = match stream.write(in_buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::WriteZero => {
                        // from the lzma-rs docs: a WriteZero error may occur
                        // if decompression is finished but there are
                        // remaining compressed bytes to write; finish up.
                        match std::mem::take(&mut self.state) {
                            State::Writing(stream) => {
                                self.state = State::Draining(stream.finish().map_err(dec_err)?);
                            }
                            _ => unreachable!(),
                        }
                        self.copy_to_out(out, &mut outcome);
                        return Ok(outcome);
                    }
                    Err(e) => return Err(dec_err(e)),
                };
                outcome.bytes_read += n;

                if matches!(has_more_input, HasMoreInput::No) {
                    match std::mem::take(&mut self.state) {
                        State::Writing(stream) => {
                            self.state = State::Draining(stream.finish().map_err(dec_err)?);
                        }
                        _ => unreachable!(),
                    }
                }
            }
            State::Draining(_) => {
                // nothing more to decode, the drain below empties us
            }
            State::ReadPrefix { .. } | State::Transition => unreachable!(),
        }

        self.copy_to_out(out, &mut outcome);
        Ok(outcome)
    }

    fn is_done(&self) -> bool {
        match &self.state {
            State::Draining(buf) => buf.is_empty(),
            _ => false,
        }
    }
}
