//! Unified error type for the toolkit.
//!
//! Wire-format violations, store problems, and per-block recovery
//! failures all funnel into one enum so that callers see a consistent
//! API. Per-block kinds (missing, truncated, format mismatch) are
//! recoverable by policy: the model collects them and keeps going.

use thiserror::Error;

/// Main error type for AUP3 salvage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite layer error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Wire format violation in the binary-XML document
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Project was written by a newer editor than we understand
    #[error("unsupported project version {major}.{minor}.{patch}")]
    UnsupportedVersion { major: u8, minor: u8, patch: u8 },

    /// The store reports structural corruption
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// A referenced sample block has no row in the store
    #[error("missing sample block {0}")]
    MissingBlock(i64),

    /// A sample block row is shorter than the project tree requires
    #[error("truncated sample block {0}")]
    TruncatedBlock(i64),

    /// A sample block row disagrees with its sequence's sample format
    #[error("format mismatch for block {block}: sequence {expected}, store {found}")]
    FormatMismatch { block: i64, expected: i32, found: i32 },

    /// A tag or attribute name is not present in the dictionary
    #[error("name '{0}' not found in the serialization dictionary")]
    UnknownName(String),

    /// The recovery subprocess failed or produced unusable output
    #[error("recovery failed: {0}")]
    Recovery(String),

    /// Unsupported sample format name
    #[error("unsupported sample format '{0}'")]
    UnsupportedSampleFormat(String),
}

/// Result type for AUP3 salvage operations.
pub type Result<T> = std::result::Result<T, Error>;
