//! Term-vector store.
//!
//! Term vectors keep, per document and per field, the terms that occurred
//! together with their frequencies and optionally positions, character
//! offsets and payloads. They are stored beside the inverted index so a
//! single document's terms can be fetched without walking postings.
//!
//! # File format
//!
//! A segment with term vectors has exactly three files; a segment without
//! any has none.
//!
//! ```text
//! <segment>.tvx  index      header, then per document:
//!                           [u64: .tvd pointer][u64: .tvf pointer]
//! <segment>.tvd  documents  header, then per document:
//!                           [vint: field count]
//!                           [vint: field number] * count   (ascending)
//!                           [vlong: .tvf delta] * (count - 1)
//! <segment>.tvf  fields     header, then per field:
//!                           [vint: term count][u8: flags]
//!                           per term: [vint: prefix][vint: suffix]
//!                                     [suffix bytes][vint: freq]
//!                                     [occurrence data]
//! ```
//!
//! Terms of a field are sorted bytewise and front-coded against the previous
//! term of the same field. Occurrence data depends on the field flags:
//! position deltas (shifted left one bit with a "payload length changed"
//! flag when payloads are stored, followed by the new length), then the
//! concatenated payload bytes of the term, then per occurrence the start
//! offset as a delta from the previous end offset and the offset length.
//!
//! Because the `.tvd` record of a document carries the byte lengths of its
//! field ranges, a run of documents occupies one contiguous byte range in
//! both `.tvd` and `.tvf`. Merging segments that number their fields
//! identically copies those ranges without decoding them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TermStoreError};
use crate::index::field_info::FieldInfos;
use crate::index::segment::segment_file_name;
use crate::storage::Storage;

pub mod document;
pub mod fields;
pub mod merge;
pub mod reader;
pub mod writer;

pub use document::{DocumentTermVectors, FieldTermVectors, Occurrence};
pub use fields::{
    NO_MORE_DOCS, SeekStatus, TermVectorDocsEnum, TermVectorFields, TermVectorPositionsEnum,
    TermVectorTerms, TermVectorTermsEnum, compare_terms,
};
pub use merge::{CheckAbort, MergeAbortHandle, MergeConfig, MergeSource, MergeState};
pub use reader::TermVectorsReader;
pub use writer::TermVectorsWriter;

/// Extension of the index file.
pub const VECTORS_INDEX_EXTENSION: &str = "tvx";

/// Extension of the documents file.
pub const VECTORS_DOCUMENTS_EXTENSION: &str = "tvd";

/// Extension of the fields file.
pub const VECTORS_FIELDS_EXTENSION: &str = "tvf";

pub const CODEC_NAME_INDEX: &str = "Lucene40TermVectorsIndex";
pub const CODEC_NAME_DOCS: &str = "Lucene40TermVectorsDocs";
pub const CODEC_NAME_FIELDS: &str = "Lucene40TermVectorsFields";

/// Files written before payloads could be stored.
pub const VERSION_NO_PAYLOADS: u32 = 0;
pub const VERSION_PAYLOADS: u32 = 1;
pub const VERSION_START: u32 = VERSION_NO_PAYLOADS;
pub const VERSION_CURRENT: u32 = VERSION_PAYLOADS;

pub const STORE_POSITIONS_WITH_TERMVECTOR: u8 = 0x1;
pub const STORE_OFFSET_WITH_TERMVECTOR: u8 = 0x2;
pub const STORE_PAYLOAD_WITH_TERMVECTOR: u8 = 0x4;

/// Bytes per document in the index file.
pub const INDEX_ENTRY_SIZE: u64 = 16;

/// Default cap on documents bulk-copied per batch during a merge.
pub const MAX_RAW_MERGE_DOCS: usize = 4192;

/// Names of a segment's three term-vector files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorFiles {
    pub index: String,
    pub documents: String,
    pub fields: String,
}

impl VectorFiles {
    pub fn new(segment: &str, segment_suffix: &str) -> Self {
        VectorFiles {
            index: segment_file_name(segment, segment_suffix, VECTORS_INDEX_EXTENSION),
            documents: segment_file_name(segment, segment_suffix, VECTORS_DOCUMENTS_EXTENSION),
            fields: segment_file_name(segment, segment_suffix, VECTORS_FIELDS_EXTENSION),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [
            self.index.as_str(),
            self.documents.as_str(),
            self.fields.as_str(),
        ]
        .into_iter()
    }
}

/// Entry point for reading and writing a segment's term vectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TermVectorsFormat {
    /// Suffix inserted into file names, for segments holding several
    /// generations of the same files.
    pub segment_suffix: String,
}

impl TermVectorsFormat {
    pub fn new() -> Self {
        TermVectorsFormat::default()
    }

    pub fn with_suffix<S: Into<String>>(segment_suffix: S) -> Self {
        TermVectorsFormat {
            segment_suffix: segment_suffix.into(),
        }
    }

    pub fn files(&self, segment: &str) -> VectorFiles {
        VectorFiles::new(segment, &self.segment_suffix)
    }

    /// Create the three files of a new segment.
    pub fn vectors_writer(
        &self,
        storage: Arc<dyn Storage>,
        segment: &str,
    ) -> Result<TermVectorsWriter> {
        TermVectorsWriter::new(storage, segment, &self.segment_suffix)
    }

    /// Open a segment's term vectors.
    ///
    /// Returns `None` when the segment has no term-vector files at all, and a
    /// corruption error when only some of them exist.
    pub fn vectors_reader(
        &self,
        storage: &dyn Storage,
        segment: &str,
        field_infos: Arc<FieldInfos>,
    ) -> Result<Option<TermVectorsReader>> {
        let files = self.files(segment);
        let present = files.iter().filter(|name| storage.file_exists(name)).count();
        match present {
            0 => Ok(None),
            3 => TermVectorsReader::open(storage, segment, &self.segment_suffix, field_infos)
                .map(Some),
            _ => Err(TermStoreError::corruption(format!(
                "segment {segment} has {present} of 3 term vector files"
            ))),
        }
    }
}
