use thiserror::Error;

// Errors this crate raises itself. I/O and decode errors from the
// underlying streams pass through as-is via anyhow; use
// `err.downcast_ref::<Error>()` to tell these apart from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    // Keys written to a table must be non-decreasing; anything else would
    // produce an unsorted string table.
    #[error("key order violation")]
    OrderViolation,

    #[error("unknown/unsupported index policy")]
    UnsupportedIndexPolicy,

    // A backward seek or index rewind was requested on a stream that does
    // not support seeking.
    #[error("seeks not supported")]
    NotSeekable,

    // The stream ended in the middle of a length-prefixed frame.
    #[error("truncated record frame")]
    TruncatedFrame,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}
