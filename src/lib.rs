//! # Termstore
//!
//! Term-vector storage for a segment-based full-text search index.
//!
//! ## Features
//!
//! - Per-document term vectors with positions, offsets and payloads
//! - Front-coded, variable-length encoded segment files
//! - Random access to any document's vectors through independent cursors
//! - Segment merging by raw byte copy or decode and re-encode
//! - Pluggable storage backends (file with mmap, in-memory)

pub mod codec;
pub mod error;
pub mod index;
pub mod storage;
pub mod util;

// Re-exports for the public API
pub use codec::term_vectors::{
    DocumentTermVectors, MergeConfig, MergeState, TermVectorFields, TermVectorsFormat,
    TermVectorsReader, TermVectorsWriter,
};
pub use error::{Result, TermStoreError};
pub use index::{FieldInfo, FieldInfos, FieldInfosBuilder, FieldVectorOptions, LiveDocs};
pub use storage::{Storage, StorageConfig, StorageFactory};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
