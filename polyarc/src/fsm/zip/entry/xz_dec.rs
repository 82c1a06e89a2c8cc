use std::cmp;

use crate::{error::Error, parse::zip::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

/// XZ entries: lzma-rs only offers whole-stream xz decoding, so the
/// compressed bytes are gathered first and decoded in one go when the input
/// is complete. Fine for zip entries, which come with a known compressed
/// size.
#[derive(Default)]
enum State {
    #[default]
    Gathering,
    Draining(Vec<u8>),
}

#[derive(Default)]
pub(crate) struct XzDec {
    state: State,
    compressed: Vec<u8>,
}

impl Decompressor for XzDec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let mut outcome: DecompressOutcome = Default::default();

        if let State::Gathering = self.state {
            self.compressed.extend_from_slice(in_buf);
            outcome.bytes_read = in_buf.len();

            if matches!(has_more_input, HasMoreInput::Yes) {
                return Ok(outcome);
            }

            let mut decoded = Vec::new();
            let mut input = &self.compressed[..];
            lzma_rs::xz_decompress(&mut input, &mut decoded).map_err(|e| {
                Error::Decompression {
                    method: Method::Xz,
                    msg: e.to_string(),
                }
            })?;
            self.compressed = Vec::new();
            self.state = State::Draining(decoded);
        }

        if let State::Draining(buf) = &mut self.state {
            let to_copy = cmp::min(out.len(), buf.len());
            out[..to_copy].copy_from_slice(&buf[..to_copy]);
            buf.rotate_left(to_copy);
            buf.truncate(buf.len() - to_copy);
            outcome.bytes_written = to_copy;
        }

        Ok(outcome)
    }

    fn is_done(&self) -> bool {
        match &self.state {
            State::Gathering => false,
            State::Draining(buf) => buf.is_empty(),
        }
    }
}
