//! The negotiated read-filter chain.
//!
//! Starting from the raw byte source, every registered bidder scores a peek
//! at the current head of the chain; the best bidder's decoder is pushed on
//! top and bidding repeats on the decoded stream, until nobody bids. This
//! is how `file.tar.gz.uu` peels down to a tar stream without being told.

use std::any::Any;
use std::io::Read;
use std::rc::Rc;

use polyarc::{
    error::UnsupportedError,
    filter::FilterCode,
    Error,
};
use tracing::trace;

use crate::peek::PeekSource;

mod ab;
mod compress;
mod lzma;
mod pbzx;
mod rpm;
mod uu;

pub use rpm::RPM_SIDE_CHANNEL;

/// A typed record published by a filter for downstream consumers
/// (the RPM filter's file index, for instance).
pub type SideRecord = (&'static str, Rc<dyn Any>);

/// The outcome of filter negotiation: a peekable head producing defiltered
/// bytes, the stack of filters applied (raw side first), and any
/// side-channel records the filters registered.
pub struct NegotiatedChain<'a> {
    /// Client-side end of the chain
    pub head: PeekSource<Box<dyn Read + 'a>>,
    /// Applied filters, outermost (raw side) first; never empty
    pub filters: Vec<FilterCode>,
    /// Handle-scoped records registered by filters
    pub side: Vec<SideRecord>,
}

/// Chains longer than this are hostile or broken input.
const MAX_CHAIN_DEPTH: usize = 8;

/// How many bytes bidders get to look at.
const PEEK_WINDOW: usize = 64;

/// Run the bidding loop over `raw` with the given candidates.
pub fn negotiate<'a>(
    raw: Box<dyn Read + 'a>,
    enabled: &[FilterCode],
) -> Result<NegotiatedChain<'a>, Error> {
    let mut filters = Vec::new();
    let mut side = Vec::new();
    let mut head = PeekSource::new(raw);

    while filters.len() < MAX_CHAIN_DEPTH {
        let peek = head.ahead(PEEK_WINDOW)?;

        let mut best: Option<(u32, FilterCode)> = None;
        for &code in enabled {
            let bid = code.bid(peek);
            // ties break toward the earlier registration
            if bid > 0 && best.map(|(b, _)| bid > b).unwrap_or(true) {
                best = Some((bid, code));
            }
        }

        let Some((bid, code)) = best else { break };
        trace!(%code, bid, "filter bidder won");

        let inner: Box<dyn Read + 'a> = Box::new(head);
        head = PeekSource::new(instantiate(code, inner, &mut side)?);
        filters.push(code);
    }

    if filters.is_empty() {
        filters.push(FilterCode::None);
    }

    Ok(NegotiatedChain {
        head,
        filters,
        side,
    })
}

fn instantiate<'a>(
    code: FilterCode,
    inner: Box<dyn Read + 'a>,
    side: &mut Vec<SideRecord>,
) -> Result<Box<dyn Read + 'a>, Error> {
    Ok(match code {
        FilterCode::Gzip => Box::new(flate2::read::MultiGzDecoder::new(inner)),
        FilterCode::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(inner)),
        FilterCode::Zstd => Box::new(zstd::stream::read::Decoder::new(inner)?),
        FilterCode::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(inner)),
        FilterCode::Xz => Box::new(lzma::XzReader::new(inner)),
        FilterCode::Lzma => Box::new(lzma::LzmaReader::new(inner)),
        FilterCode::Compress => Box::new(compress::LzwReader::new(inner)?),
        FilterCode::Uu => Box::new(uu::UuReader::new(inner)),
        FilterCode::Pbzx => Box::new(pbzx::PbzxReader::new(inner)?),
        FilterCode::AndroidBackup => Box::new(ab::AbReader::new(inner)?),
        FilterCode::Rpm => {
            let (filter, index) = rpm::RpmFilter::new(inner);
            side.push((rpm::RPM_SIDE_CHANNEL, index));
            Box::new(filter)
        }
        FilterCode::Lzop => {
            return Err(Error::Unsupported(UnsupportedError::FilterNotSupported(
                FilterCode::Lzop,
            )))
        }
        FilterCode::None => inner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn gzip_is_detected_and_stripped() {
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"plain payload").unwrap();
        let gz = enc.finish().unwrap();

        let chain = negotiate(Box::new(&gz[..]), FilterCode::all()).unwrap();
        assert_eq!(chain.filters, vec![FilterCode::Gzip]);

        let mut out = Vec::new();
        let mut head = chain.head;
        head.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"plain payload");
    }

    #[test]
    fn plain_stream_gets_the_identity_filter() {
        let chain = negotiate(Box::new(&b"not compressed at all"[..]), FilterCode::all()).unwrap();
        assert_eq!(chain.filters, vec![FilterCode::None]);
    }

    #[test]
    fn nested_filters_unwrap_in_order() {
        // uuencoded gzip: the uu bidder wins first, then gzip bids on the
        // decoded bytes
        let mut enc =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"nested").unwrap();
        let gz = enc.finish().unwrap();

        let mut text = Vec::new();
        text.extend_from_slice(b"begin 644 file\n");
        for chunk in gz.chunks(45) {
            text.push(b' ' + chunk.len() as u8);
            let mut chunk = chunk.to_vec();
            while chunk.len() % 3 != 0 {
                chunk.push(0);
            }
            for triple in chunk.chunks(3) {
                let v = (triple[0] as u32) << 16 | (triple[1] as u32) << 8 | triple[2] as u32;
                for shift in [18, 12, 6, 0] {
                    let c = ((v >> shift) & 0x3F) as u8;
                    text.push(if c == 0 { b'`' } else { b' ' + c });
                }
            }
            text.push(b'\n');
        }
        text.extend_from_slice(b"`\nend\n");

        let chain = negotiate(Box::new(&text[..]), FilterCode::all()).unwrap();
        assert_eq!(chain.filters, vec![FilterCode::Uu, FilterCode::Gzip]);

        let mut out = Vec::new();
        let mut head = chain.head;
        head.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"nested");
    }
}
