use std::{cmp, io::Write};

use crate::{error::Error, parse::zip::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

use tracing::trace;
use zstd::stream::write::Decoder;

#[derive(Default)]
enum State {
    Writing(Box<Decoder<'static, Vec<u8>>>),
    Draining(Vec<u8>),

    #[default]
    Transition,
}

pub(crate) struct ZstdDec {
    state: State,
}

impl ZstdDec {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            state: State::Writing(Box::new(Decoder::new(vec![]).map_err(dec_err)?)),
        })
    }
}

impl Decompressor for ZstdDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome: DecompressOutcome = Default::default();

        self.copy_to_out(out, &mut outcome);
        if outcome.bytes_written > 0 {
            trace!(
                "ZstdDec: still draining internal buffer, just copied {} bytes",
                outcome.bytes_written
            );
            return Ok(outcome);
        }

        match &mut self.state {
            State::Writing(stream) => {
                let n = stream.write(in_buf).map_err(dec_err)?;
                outcome.bytes_read = n;

                // if we haven't written all the input, and we haven't gotten
                // any output, then we need to keep going
                if n != 0 && n < in_buf.len() && self.internal_buf_mut().is_empty() {
                    return self.decompress(&in_buf[n..], out, has_more_input).map(
                        |mut next| {
                            next.bytes_read += outcome.bytes_read;
                            next
                        },
                    );
                }

                match has_more_input {
                    HasMoreInput::Yes => {
                        // keep going
                    }
                    HasMoreInput::No => {
                        match std::mem::take(&mut self.state) {
                            State::Writing(mut stream) => {
                                stream.flush().map_err(dec_err)?;
                                self.state = State::Draining(stream.into_inner());
                            }
                            _ => unreachable!(),
                        }
                    }
                }
            }
            State::Draining(_) => {
                // keep going
            }
            State::Transition => unreachable!(),
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

fn dec_err(e: impl std::fmt::Display) -> Error {
    Error::Decompression {
        method: Method::Zstd,
        msg: e.to_string(),
    }
}

impl ZstdDec {
    #[inline(always)]
    fn internal_buf_mut(&mut self) -> &mut Vec<u8> {
        match &mut self.state {
            State::Writing(stream) => stream.get_mut(),
            State::Draining(buf) => buf,
            State::Transition => unreachable!(),
        }
    }

    fn copy_to_out(&mut self, mut out: &mut [u8], outcome: &mut DecompressOutcome) {
        let internal_buf = self.internal_buf_mut();

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
