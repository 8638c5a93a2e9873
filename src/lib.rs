//! aup3-salvage - recovery and extraction toolkit for AUP3 projects
//!
//! An AUP3 file is a SQLite database holding a binary-XML-encoded
//! project tree plus a table of raw sample-block payloads. When the
//! editor refuses to open such a file, this library can inspect it,
//! selectively rewrite it, or salvage its audio. The original file is
//! never modified: every write targets a sibling copy.
//!
//! # Features
//!
//! - **Binary-XML codec**: byte-faithful parser and serializer for the
//!   editor's dictionary-compressed document format
//! - **Project model**: tracks, clips, sequences and sample blocks
//!   reconstructed from the document tree, with write-through mutation
//! - **Block validation**: find references to missing or mismatched
//!   sample blocks and convert them to silence
//! - **Extraction**: clips, individual sample blocks, or the whole
//!   store as mono/stereo WAV; the document itself as indented XML
//! - **Database recovery**: replay of the SQLite shell's `.recover`
//!   output, rescuing `lost_and_found` rows back into `sampleblocks`
//!
//! # Example - validating and repairing a project
//!
//! ```no_run
//! use aup3_salvage::db::ProjectDatabase;
//! use aup3_salvage::project::Project;
//!
//! # fn main() -> aup3_salvage::Result<()> {
//! let mut db = ProjectDatabase::open("damaged.aup3".as_ref())?;
//! let mut project = Project::load(&db)?;
//!
//! // Report missing blocks without touching anything.
//! let missing = project.validate_blocks(&db);
//! println!("{} blocks are unusable", missing.len());
//!
//! // Replace them with silence and write the fixed document to a
//! // sibling copy of the database.
//! project.fixup_missing_blocks(&mut db)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example - extracting audio
//!
//! ```no_run
//! use aup3_salvage::db::ProjectDatabase;
//! use aup3_salvage::project::Project;
//!
//! # fn main() -> aup3_salvage::Result<()> {
//! let db = ProjectDatabase::open("session.aup3".as_ref())?;
//! let project = Project::load(&db)?;
//!
//! // One mono WAV per clip, under `session_data/clips/`.
//! project.extract_clips(&db)?;
//! # Ok(())
//! # }
//! ```

/// Binary-XML codec: parser, serializer, and XML textualization
pub mod codec;

/// Shared plumbing: chunked byte buffer and the unified error type
pub mod common;

/// AUP3 store facade and database recovery
pub mod db;

/// Document tree, string pools, and the domain model
pub mod project;

/// Sample formats and WAV assembly
pub mod wav;

pub use common::{Error, Result};
