#![warn(missing_docs)]

//! Synchronous archive reading, writing and extraction over std I/O
//! traits, built on top of [polyarc].
//!
//! The read side stacks negotiated decompression filters over any
//! [std::io::Read], dispatches the defiltered stream to the winning
//! container format, and exposes the classic loop:
//!
//! ```no_run
//! # fn main() -> Result<(), polyarc::Error> {
//! use polyarc_sync::ReadBuilder;
//!
//! let file = std::fs::File::open("archive.tar.gz").map_err(polyarc::Error::IO)?;
//! let mut reader = ReadBuilder::new().open(file)?;
//! while let Some(entry) = reader.next_header()? {
//!     println!("{}", entry.pathname());
//!     while let Some((chunk, offset)) = reader.read_data_block()? {
//!         let _ = (chunk, offset);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The write side is the mirror image ([WriteBuilder]), and [DiskWriter]
//! materializes entries on the local filesystem with the usual security
//! rails (no `..`, no absolute paths, no symlink traversal).

pub mod disk;
pub mod filter;
mod peek;
pub mod read;
pub mod seekable;
pub mod write;

pub use disk::{DiskWriter, ExtractFlags};
pub use peek::PeekSource;
pub use read::{ArchiveReader, ReadBuilder};
pub use seekable::ReadZip;
pub use write::{ArchiveWriter, WriteBuilder};

// re-export the core crate
pub use polyarc;
