#![warn(missing_docs)]

//! polyarc is a [sans-io](https://sans-io.readthedocs.io/how-to-sans-io.html)
//! engine for streaming archive formats.
//!
//! An archive is modelled as a stack of compression filters (gzip, bzip2, xz,
//! zstd, ...) wrapped around a container format (ustar/pax tar, zip). Both
//! layers are negotiated by *bidding*: every candidate scores the first bytes
//! of the stream and the highest bid wins. This crate contains the types for
//! archive entries, winnow parsers for the on-disk records, and resumable
//! state machines that turn byte buffers into entry streams (and back).
//!
//! It is low-level; most users want the [polyarc-sync](https://crates.io/crates/polyarc-sync)
//! wrapper, which drives these state machines from `std::io` traits and adds
//! the write-to-disk engine.

pub mod encoding;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod fsm;
pub mod linkify;
pub mod matching;
pub mod parse;
pub mod write;

pub(crate) mod crypto;

pub use entry::Entry;
pub use error::{Error, Severity};
