//! Per-segment field descriptors.
//!
//! Every field that reaches a segment gets a small integer number. Codecs
//! store numbers rather than names, so two segments can only exchange raw
//! bytes when they agree on the name-to-number mapping
//! (see [`FieldInfos::is_congruent_with`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TermStoreError};
use crate::index::segment::segment_file_name;
use crate::storage::Storage;

/// Extension of the JSON field-infos file.
pub const FIELD_INFOS_EXTENSION: &str = "fnm";

/// What a field stores in its term vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldVectorOptions {
    /// Whether term vectors are stored at all.
    pub store_term_vectors: bool,
    /// Store token positions.
    pub store_positions: bool,
    /// Store token character offsets.
    pub store_offsets: bool,
    /// Store token payloads (requires positions).
    pub store_payloads: bool,
}

impl FieldVectorOptions {
    /// No term vectors.
    pub fn none() -> Self {
        FieldVectorOptions::default()
    }

    /// Terms and frequencies only.
    pub fn terms_only() -> Self {
        FieldVectorOptions {
            store_term_vectors: true,
            ..Default::default()
        }
    }

    pub fn with_positions() -> Self {
        FieldVectorOptions {
            store_term_vectors: true,
            store_positions: true,
            ..Default::default()
        }
    }

    pub fn with_offsets() -> Self {
        FieldVectorOptions {
            store_term_vectors: true,
            store_offsets: true,
            ..Default::default()
        }
    }

    pub fn with_positions_offsets() -> Self {
        FieldVectorOptions {
            store_term_vectors: true,
            store_positions: true,
            store_offsets: true,
            store_payloads: false,
        }
    }

    /// Positions, offsets and payloads.
    pub fn with_payloads() -> Self {
        FieldVectorOptions {
            store_term_vectors: true,
            store_positions: true,
            store_offsets: true,
            store_payloads: true,
        }
    }

    /// Whether any per-occurrence data is stored.
    pub fn has_occurrence_data(&self) -> bool {
        self.store_positions || self.store_offsets
    }

    /// The options enabled both here and in `allowed`. Payloads still
    /// require positions.
    pub fn restrict_to(&self, allowed: &FieldVectorOptions) -> Self {
        let store_term_vectors = self.store_term_vectors && allowed.store_term_vectors;
        let store_positions =
            store_term_vectors && self.store_positions && allowed.store_positions;
        FieldVectorOptions {
            store_term_vectors,
            store_positions,
            store_offsets: store_term_vectors && self.store_offsets && allowed.store_offsets,
            store_payloads: store_positions && self.store_payloads && allowed.store_payloads,
        }
    }
}

/// Descriptor of one field within a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,

    /// Segment-local field number.
    pub number: u32,

    /// Whether the field is indexed.
    pub indexed: bool,

    /// Whether the raw value is stored.
    pub stored: bool,

    /// Whether the value is run through an analyzer.
    pub tokenized: bool,

    /// Term-vector options.
    pub vector_options: FieldVectorOptions,
}

impl FieldInfo {
    pub fn has_vectors(&self) -> bool {
        self.vector_options.store_term_vectors
    }
}

/// The set of fields of one segment.
#[derive(Debug, Clone, Default)]
pub struct FieldInfos {
    by_number: BTreeMap<u32, Arc<FieldInfo>>,
    by_name: AHashMap<String, u32>,
}

impl PartialEq for FieldInfos {
    fn eq(&self, other: &Self) -> bool {
        self.by_number == other.by_number
    }
}

impl Eq for FieldInfos {}

impl FieldInfos {
    /// Build from explicit descriptors. Names and numbers must be unique.
    pub fn new(infos: Vec<FieldInfo>) -> Result<Self> {
        let mut field_infos = FieldInfos::default();
        for info in infos {
            if field_infos.by_name.contains_key(&info.name) {
                return Err(TermStoreError::invalid_argument(format!(
                    "duplicate field name {}",
                    info.name
                )));
            }
            if field_infos.by_number.contains_key(&info.number) {
                return Err(TermStoreError::invalid_argument(format!(
                    "duplicate field number {} (field {})",
                    info.number, info.name
                )));
            }
            field_infos.by_name.insert(info.name.clone(), info.number);
            field_infos.by_number.insert(info.number, Arc::new(info));
        }
        Ok(field_infos)
    }

    pub fn field_info(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name
            .get(name)
            .and_then(|number| self.by_number.get(number))
            .map(|info| info.as_ref())
    }

    pub fn field_info_by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(&number).map(|info| info.as_ref())
    }

    /// Fields in ascending number order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.values().map(|info| info.as_ref())
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// Whether any field stores term vectors.
    pub fn has_vectors(&self) -> bool {
        self.iter().any(FieldInfo::has_vectors)
    }

    /// Whether every field of `self` has the same number under the same name
    /// in `other`.
    ///
    /// Raw term-vector bytes written against `self` decode identically
    /// against `other` exactly when this holds.
    pub fn is_congruent_with(&self, other: &FieldInfos) -> bool {
        self.iter().all(|info| {
            other
                .field_info_by_number(info.number)
                .is_some_and(|o| o.name == info.name)
        })
    }

    /// Persist as `<segment>.fnm` (JSON).
    pub fn write(&self, storage: &dyn Storage, segment: &str) -> Result<()> {
        let name = segment_file_name(segment, "", FIELD_INFOS_EXTENSION);
        let infos: Vec<&FieldInfo> = self.iter().collect();
        let mut output = storage.create_output(&name)?;
        serde_json::to_writer(&mut output, &infos)?;
        output.close()
    }

    /// Load `<segment>.fnm`.
    pub fn read(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let name = segment_file_name(segment, "", FIELD_INFOS_EXTENSION);
        let input = storage.open_input(&name)?;
        let infos: Vec<FieldInfo> = serde_json::from_reader(input)?;
        FieldInfos::new(infos)
    }
}

/// Assigns field numbers as fields are first seen.
#[derive(Debug, Default)]
pub struct FieldInfosBuilder {
    infos: Vec<FieldInfo>,
    by_name: AHashMap<String, usize>,
}

impl FieldInfosBuilder {
    pub fn new() -> Self {
        FieldInfosBuilder::default()
    }

    /// Start from an existing segment's numbering, so that segments written
    /// with this builder stay congruent with it.
    pub fn from_field_infos(field_infos: &FieldInfos) -> Self {
        let mut builder = FieldInfosBuilder::new();
        for info in field_infos.iter() {
            builder.by_name.insert(info.name.clone(), builder.infos.len());
            builder.infos.push(info.clone());
        }
        builder
    }

    /// Add an indexed, tokenized field, or widen the vector options of a
    /// known one. Returns the field number.
    pub fn add(&mut self, name: &str, vector_options: FieldVectorOptions) -> u32 {
        if let Some(&idx) = self.by_name.get(name) {
            let existing = &mut self.infos[idx].vector_options;
            existing.store_term_vectors |= vector_options.store_term_vectors;
            existing.store_positions |= vector_options.store_positions;
            existing.store_offsets |= vector_options.store_offsets;
            existing.store_payloads |= vector_options.store_payloads;
            return self.infos[idx].number;
        }

        let number = self.infos.iter().map(|info| info.number + 1).max().unwrap_or(0);
        self.by_name.insert(name.to_string(), self.infos.len());
        self.infos.push(FieldInfo {
            name: name.to_string(),
            number,
            indexed: true,
            stored: false,
            tokenized: true,
            vector_options,
        });
        number
    }

    pub fn finish(self) -> FieldInfos {
        let mut field_infos = FieldInfos::default();
        for info in self.infos {
            field_infos.by_name.insert(info.name.clone(), info.number);
            field_infos.by_number.insert(info.number, Arc::new(info));
        }
        field_infos
    }
}
