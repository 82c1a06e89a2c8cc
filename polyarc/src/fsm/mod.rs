//! Resumable state machines for reading archives.
//!
//! Parsers are just part of the puzzle: sequencing them over a byte stream
//! that arrives in arbitrary chunks is the other half. Each machine here
//! follows the same I/O loop: copy bytes into [space](TarFsm::space), call
//! `fill` with the count (zero meaning end of stream), then call `process`
//! until it asks for more.

macro_rules! transition {
    ($state: expr => ($pattern: pat) $body: expr) => {
        $state = if let $pattern = std::mem::take(&mut $state) {
            $body
        } else {
            unreachable!()
        };
    };
}

mod tar;
pub use tar::{TarFsm, TarOptions, TarStep};

pub mod zip;

/// Indicates whether or not a state machine has completed its work
pub enum FsmResult<M, R> {
    /// The I/O loop needs to continue, the state machine is given back.
    Continue(M),

    /// The state machine is done, and the result is returned.
    Done(R),
}
