//! State machines for the zip container.
//!
//! [ArchiveFsm] locates and parses the central directory of a seekable
//! input; [EntryFsm] reads one entry from its local file header through
//! decryption, decompression and trailer validation. Streaming readers use
//! [EntryFsm] alone, chaining one per entry.

mod archive;
pub use archive::ArchiveFsm;

mod entry;
pub use entry::{DecompressOutcome, EntryFsm, EntryFsmResult};
