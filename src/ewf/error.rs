//! Typed errors for the chunk group subsystem.
//!
//! Every other reader in this crate (`raw`, `vmdk`, `aff4`) reports failure
//! as a `String` because there is only one failure shape worth reporting:
//! "this doesn't look like a valid file". The chunk group core is different
//! — callers branch on *which* thing went wrong (retry tainted? bail?) so
//! its failures get a real enum instead.

use thiserror::Error;

/// Fatal, operation-level failures raised by `chunk_group::{fill_v1, fill_v2,
/// reconcile_v1, emit}` and by `ChunkIndex`'s accessors.
///
/// Per-entry doubt (corruption, tainting) is never represented here — it is
/// folded into a surviving descriptor's `RangeFlags` instead. See
/// `chunk_group` module docs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkGroupError {
    /// A byte-codec read ran past the end of the supplied buffer.
    #[error("truncated table entry data: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// An index into `ChunkIndex` (via `get`/`set`) has no backing element.
    #[error("chunk index {index} out of range (index holds {len} elements)")]
    NotFound { index: usize, len: usize },

    /// A value that must fit a narrower range does not.
    #[error("{what} value {value} is out of range")]
    OutOfRange { what: &'static str, value: i128 },

    /// A 64-bit accumulation overflowed.
    #[error("{what} overflowed 64-bit range")]
    Overflow { what: &'static str },

    /// A caller-supplied argument is structurally invalid (e.g. negative
    /// base offset, zero entries).
    #[error("invalid argument: {what}")]
    InvalidArgument { what: &'static str },
}

pub type Result<T> = std::result::Result<T, ChunkGroupError>;
