//! Shared plumbing used by every layer: the chunked byte buffer and the
//! unified error type.

pub mod buffer;
pub mod error;

pub use buffer::{ChunkedBuffer, Scalar, CHUNK_SIZE};
pub use error::{Error, Result};
