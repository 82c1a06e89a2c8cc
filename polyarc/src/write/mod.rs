//! Record serializers for the write pipeline.
//!
//! These build the raw on-disk records (tar header blocks and pax
//! pseudo-entries, zip local/central/end records) from entries; the sync
//! crate sequences them over an `io::Write` sink and runs the data through
//! the configured codecs.

pub mod tar;
pub mod zip;
