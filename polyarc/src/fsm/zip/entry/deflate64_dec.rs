use deflate64::InflaterManaged;

use crate::{error::Error, parse::zip::Method};

use super::{DecompressOutcome, Decompressor, HasMoreInput};

pub(crate) struct Deflate64Dec {
    inflater: InflaterManaged,
}

impl Default for Deflate64Dec {
    fn default() -> Self {
        Self {
            inflater: InflaterManaged::new(),
        }
    }
}

impl Decompressor for Deflate64Dec {
    fn decompress(
        &mut self,
        in_buf: &[u8],
        out: &mut [u8],
        _has_more_input: HasMoreInput,
    ) -> Result<DecompressOutcome, Error> {
        let res = self.inflater.inflate(in_buf, out);
        if res.data_error {
            return Err(Error::Decompression {
                method: Method::Deflate64,
                msg: "data error".into(),
            });
        }

        Ok(DecompressOutcome {
            bytes_read: res.bytes_consumed,
            bytes_written: res.bytes_written,
        })
    }

    fn is_done(&self) -> bool {
        self.inflater.finished() && self.inflater.available_output() == 0
    }
}
