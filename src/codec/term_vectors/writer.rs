//! Term-vector writer.
//!
//! The writer is driven by a strict call sequence, one document at a time:
//!
//! ```text
//! start_document(num_fields)
//!     start_field(info, num_terms, positions, offsets, payloads)
//!         start_term(term, freq)
//!             add_position(..) * freq      (when positions or offsets are stored)
//!         finish_term()
//!         ... more terms, in ascending byte order
//!     finish_field()
//!     ... more fields, in ascending field number order
//! finish_document()
//! ... more documents
//! finish(num_docs)
//! close()
//! ```
//!
//! Every call checks that it is legal in the current state. A violation is
//! reported as [`TermStoreError::InvalidState`] and leaves the writer where
//! it was, so nothing inconsistent reaches disk.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::codec::codec_util::{header_length, write_header};
use crate::codec::term_vectors::document::DocumentTermVectors;
use crate::codec::term_vectors::fields::TermVectorFields;
use crate::codec::term_vectors::reader::TermVectorsReader;
use crate::codec::term_vectors::{
    CODEC_NAME_DOCS, CODEC_NAME_FIELDS, CODEC_NAME_INDEX, INDEX_ENTRY_SIZE,
    STORE_OFFSET_WITH_TERMVECTOR, STORE_PAYLOAD_WITH_TERMVECTOR, STORE_POSITIONS_WITH_TERMVECTOR,
    VERSION_CURRENT, VectorFiles,
};
use crate::error::{Result, TermStoreError};
use crate::index::field_info::{FieldInfo, FieldInfos, FieldVectorOptions};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};

type VectorOutput = StructWriter<Box<dyn StorageOutput>>;

/// The three outputs, always held together.
#[derive(Debug)]
struct VectorOutputs {
    tvx: VectorOutput,
    tvd: VectorOutput,
    tvf: VectorOutput,
}

impl VectorOutputs {
    fn create(storage: &dyn Storage, files: &VectorFiles) -> Result<Self> {
        let mut tvx = StructWriter::new(storage.create_output(&files.index)?);
        write_header(&mut tvx, CODEC_NAME_INDEX, VERSION_CURRENT)?;
        let mut tvd = StructWriter::new(storage.create_output(&files.documents)?);
        write_header(&mut tvd, CODEC_NAME_DOCS, VERSION_CURRENT)?;
        let mut tvf = StructWriter::new(storage.create_output(&files.fields)?);
        write_header(&mut tvf, CODEC_NAME_FIELDS, VERSION_CURRENT)?;
        Ok(VectorOutputs { tvx, tvd, tvf })
    }

    fn sync(&mut self) -> Result<()> {
        self.tvx.flush_and_sync()?;
        self.tvd.flush_and_sync()?;
        self.tvf.flush_and_sync()
    }

    /// Close all three, reporting the first failure.
    fn close(&mut self) -> Result<()> {
        let results = [self.tvx.close(), self.tvd.close(), self.tvf.close()];
        results.into_iter().collect()
    }
}

fn open_outputs(outputs: &mut Option<VectorOutputs>) -> Result<&mut VectorOutputs> {
    outputs
        .as_mut()
        .ok_or_else(|| TermStoreError::invalid_state("term vectors writer is closed"))
}

/// Where the writer is in the document → field → term protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    InDocument,
    InField,
    InTerm,
}

/// Length of the common prefix of two byte strings.
fn bytes_difference(left: &[u8], right: &[u8]) -> usize {
    left.iter()
        .zip(right)
        .take_while(|(a, b)| a == b)
        .count()
}

/// Streaming encoder for one segment's term vectors.
pub struct TermVectorsWriter {
    storage: Arc<dyn Storage>,
    files: VectorFiles,
    outputs: Option<VectorOutputs>,
    state: WriterState,

    /// Documents started so far.
    num_docs: u32,

    // Current document.
    num_vector_fields: u32,
    field_count: u32,
    fps: Vec<u64>,
    last_field_number: Option<u32>,

    // Current field.
    positions: bool,
    offsets: bool,
    payloads: bool,
    num_terms: u32,
    term_count: u32,
    last_term: Vec<u8>,
    last_payload_length: Option<u32>,

    // Current term.
    freq: u32,
    occurrence_count: u32,
    last_position: u32,
    last_offset: u32,
    offset_start_buffer: Vec<u32>,
    offset_end_buffer: Vec<u32>,
    payload_data: Vec<u8>,
}

impl std::fmt::Debug for TermVectorsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermVectorsWriter")
            .field("files", &self.files)
            .field("open", &self.outputs.is_some())
            .field("state", &self.state)
            .field("num_docs", &self.num_docs)
            .finish()
    }
}

impl TermVectorsWriter {
    /// Create the three files and write their headers.
    ///
    /// On failure whatever was already created is deleted again.
    pub fn new(storage: Arc<dyn Storage>, segment: &str, segment_suffix: &str) -> Result<Self> {
        let files = VectorFiles::new(segment, segment_suffix);
        let mut writer = TermVectorsWriter {
            storage,
            files,
            outputs: None,
            state: WriterState::Idle,
            num_docs: 0,
            num_vector_fields: 0,
            field_count: 0,
            fps: Vec::new(),
            last_field_number: None,
            positions: false,
            offsets: false,
            payloads: false,
            num_terms: 0,
            term_count: 0,
            last_term: Vec::new(),
            last_payload_length: None,
            freq: 0,
            occurrence_count: 0,
            last_position: 0,
            last_offset: 0,
            offset_start_buffer: Vec::new(),
            offset_end_buffer: Vec::new(),
            payload_data: Vec::new(),
        };

        match VectorOutputs::create(writer.storage.as_ref(), &writer.files) {
            Ok(outputs) => {
                writer.outputs = Some(outputs);
                debug!("opened term vectors writer for {}", writer.files.index);
                Ok(writer)
            }
            Err(e) => {
                writer.abort();
                Err(e)
            }
        }
    }

    fn expect_state(&self, expected: WriterState, call: &str) -> Result<()> {
        if self.state != expected {
            return Err(TermStoreError::invalid_state(format!(
                "{call} called in state {:?}, expected {expected:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Number of documents started on this writer, raw copies included.
    pub fn num_docs_written(&self) -> u32 {
        self.num_docs
    }

    /// Begin a document that will carry `num_vector_fields` fields.
    pub fn start_document(&mut self, num_vector_fields: u32) -> Result<()> {
        self.expect_state(WriterState::Idle, "start_document")?;
        let out = open_outputs(&mut self.outputs)?;

        let tvd_fp = out.tvd.file_pointer();
        let tvf_fp = out.tvf.file_pointer();
        out.tvx.write_u64(tvd_fp)?;
        out.tvx.write_u64(tvf_fp)?;
        out.tvd.write_vint(num_vector_fields)?;

        self.num_vector_fields = num_vector_fields;
        self.field_count = 0;
        self.last_field_number = None;
        self.fps.clear();
        self.fps.reserve(num_vector_fields as usize);
        self.num_docs += 1;
        self.state = WriterState::InDocument;
        Ok(())
    }

    /// Begin a field of the current document.
    ///
    /// Field numbers must increase strictly within a document.
    pub fn start_field(
        &mut self,
        info: &FieldInfo,
        num_terms: u32,
        positions: bool,
        offsets: bool,
        payloads: bool,
    ) -> Result<()> {
        self.expect_state(WriterState::InDocument, "start_field")?;
        if self.field_count >= self.num_vector_fields {
            return Err(TermStoreError::invalid_state(format!(
                "document declared {} fields but field {} is one too many",
                self.num_vector_fields, info.name
            )));
        }
        if self
            .last_field_number
            .is_some_and(|last| info.number <= last)
        {
            return Err(TermStoreError::invalid_state(format!(
                "field {} (number {}) must come after field number {:?}",
                info.name, info.number, self.last_field_number
            )));
        }
        if payloads && !positions {
            return Err(TermStoreError::invalid_state(format!(
                "field {} stores payloads without positions",
                info.name
            )));
        }

        let out = open_outputs(&mut self.outputs)?;
        let fp = out.tvf.file_pointer();

        let mut bits = 0u8;
        if positions {
            bits |= STORE_POSITIONS_WITH_TERMVECTOR;
        }
        if offsets {
            bits |= STORE_OFFSET_WITH_TERMVECTOR;
        }
        if payloads {
            bits |= STORE_PAYLOAD_WITH_TERMVECTOR;
        }
        out.tvd.write_vint(info.number)?;
        out.tvf.write_vint(num_terms)?;
        out.tvf.write_u8(bits)?;

        self.fps.push(fp);
        self.field_count += 1;

        // The last field knows where every field of the document starts.
        if self.field_count == self.num_vector_fields {
            for pair in self.fps.windows(2) {
                out.tvd.write_vlong(pair[1] - pair[0])?;
            }
        }

        self.last_field_number = Some(info.number);
        self.positions = positions;
        self.offsets = offsets;
        self.payloads = payloads;
        self.num_terms = num_terms;
        self.term_count = 0;
        self.last_term.clear();
        // Forces the first payload of the field to write its length.
        self.last_payload_length = None;
        self.state = WriterState::InField;
        Ok(())
    }

    /// Begin a term of the current field.
    ///
    /// Terms must be strictly ascending in unsigned byte order.
    pub fn start_term(&mut self, term: &[u8], freq: u32) -> Result<()> {
        self.expect_state(WriterState::InField, "start_term")?;
        if self.term_count >= self.num_terms {
            return Err(TermStoreError::invalid_state(format!(
                "field declared {} terms but got one more",
                self.num_terms
            )));
        }
        if self.term_count > 0 && term <= self.last_term.as_slice() {
            return Err(TermStoreError::invalid_state(
                "terms must be added in strictly ascending byte order",
            ));
        }
        if freq == 0 {
            return Err(TermStoreError::invalid_state("term frequency must be positive"));
        }
        let suffix_len = u32::try_from(term.len()).map_err(|_| {
            TermStoreError::invalid_argument(format!("term of {} bytes is too long", term.len()))
        })?;

        let prefix = bytes_difference(&self.last_term, term);
        let suffix = suffix_len - prefix as u32;

        let out = open_outputs(&mut self.outputs)?;
        out.tvf.write_vint(prefix as u32)?;
        out.tvf.write_vint(suffix)?;
        out.tvf.write_all(&term[prefix..])?;
        out.tvf.write_vint(freq)?;

        self.last_term.clear();
        self.last_term.extend_from_slice(term);
        self.term_count += 1;
        self.freq = freq;
        self.occurrence_count = 0;
        self.last_position = 0;
        self.last_offset = 0;
        self.offset_start_buffer.clear();
        self.offset_end_buffer.clear();
        self.payload_data.clear();
        self.state = WriterState::InTerm;
        Ok(())
    }

    /// Record one occurrence of the current term.
    ///
    /// Only the parts the field stores are written; the rest are ignored.
    pub fn add_position(
        &mut self,
        position: u32,
        start_offset: u32,
        end_offset: u32,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        self.expect_state(WriterState::InTerm, "add_position")?;
        if self.occurrence_count >= self.freq {
            return Err(TermStoreError::invalid_state(format!(
                "term has freq {} but add_position was called once more",
                self.freq
            )));
        }
        if self.positions && position < self.last_position {
            return Err(TermStoreError::invalid_state(format!(
                "position {position} goes backwards from {}",
                self.last_position
            )));
        }
        if self.offsets && end_offset < start_offset {
            return Err(TermStoreError::invalid_state(format!(
                "end offset {end_offset} precedes start offset {start_offset}"
            )));
        }

        let out = open_outputs(&mut self.outputs)?;
        if self.positions {
            let delta = position - self.last_position;
            if delta > u32::MAX >> 1 {
                return Err(TermStoreError::invalid_argument(format!(
                    "position delta {delta} is too large"
                )));
            }

            if self.payloads {
                let payload = payload.unwrap_or_default();
                let payload_length = u32::try_from(payload.len()).map_err(|_| {
                    TermStoreError::invalid_argument("payload is too long")
                })?;
                if self.last_payload_length != Some(payload_length) {
                    out.tvf.write_vint((delta << 1) | 1)?;
                    out.tvf.write_vint(payload_length)?;
                    self.last_payload_length = Some(payload_length);
                } else {
                    out.tvf.write_vint(delta << 1)?;
                }
                self.payload_data.extend_from_slice(payload);
            } else {
                out.tvf.write_vint(delta)?;
            }
            self.last_position = position;

            // Offsets follow the payload bytes; buffer until finish_term.
            if self.offsets {
                self.offset_start_buffer.push(start_offset);
                self.offset_end_buffer.push(end_offset);
            }
        } else if self.offsets {
            out.tvf
                .write_vint(start_offset.wrapping_sub(self.last_offset))?;
            out.tvf.write_vint(end_offset - start_offset)?;
            self.last_offset = end_offset;
        }

        self.occurrence_count += 1;
        Ok(())
    }

    /// End the current term, flushing buffered payloads and offsets.
    pub fn finish_term(&mut self) -> Result<()> {
        self.expect_state(WriterState::InTerm, "finish_term")?;
        if (self.positions || self.offsets) && self.occurrence_count != self.freq {
            return Err(TermStoreError::invalid_state(format!(
                "term has freq {} but {} occurrences were added",
                self.freq, self.occurrence_count
            )));
        }

        let out = open_outputs(&mut self.outputs)?;
        if self.payloads {
            out.tvf.write_all(&self.payload_data)?;
        }
        if self.positions && self.offsets {
            for (&start, &end) in self
                .offset_start_buffer
                .iter()
                .zip(&self.offset_end_buffer)
            {
                out.tvf.write_vint(start.wrapping_sub(self.last_offset))?;
                out.tvf.write_vint(end - start)?;
                self.last_offset = end;
            }
        }

        self.state = WriterState::InField;
        Ok(())
    }

    /// End the current field; every declared term must have been written.
    pub fn finish_field(&mut self) -> Result<()> {
        self.expect_state(WriterState::InField, "finish_field")?;
        if self.term_count != self.num_terms {
            return Err(TermStoreError::invalid_state(format!(
                "field declared {} terms but {} were written",
                self.num_terms, self.term_count
            )));
        }
        self.state = WriterState::InDocument;
        Ok(())
    }

    /// End the current document; every declared field must have been written.
    pub fn finish_document(&mut self) -> Result<()> {
        self.expect_state(WriterState::InDocument, "finish_document")?;
        if self.field_count != self.num_vector_fields {
            return Err(TermStoreError::invalid_state(format!(
                "document declared {} fields but {} were written",
                self.num_vector_fields, self.field_count
            )));
        }
        self.state = WriterState::Idle;
        Ok(())
    }

    /// Append pre-encoded documents copied from `reader`.
    ///
    /// The reader's documents and fields cursors must sit at the start of
    /// the first document, as [`TermVectorsReader::raw_docs`] leaves them.
    pub(crate) fn add_raw_documents(
        &mut self,
        reader: &mut TermVectorsReader,
        tvd_lengths: &[u64],
        tvf_lengths: &[u64],
    ) -> Result<()> {
        self.expect_state(WriterState::Idle, "add_raw_documents")?;
        let out = open_outputs(&mut self.outputs)?;

        let tvd_start = out.tvd.file_pointer();
        let tvf_start = out.tvf.file_pointer();
        let mut tvd_position = tvd_start;
        let mut tvf_position = tvf_start;
        for (&tvd_length, &tvf_length) in tvd_lengths.iter().zip(tvf_lengths) {
            out.tvx.write_u64(tvd_position)?;
            tvd_position += tvd_length;
            out.tvx.write_u64(tvf_position)?;
            tvf_position += tvf_length;
        }

        let (tvd_in, tvf_in) = reader.raw_streams();
        out.tvd.copy_bytes(tvd_in, tvd_position - tvd_start)?;
        out.tvf.copy_bytes(tvf_in, tvf_position - tvf_start)?;
        debug_assert_eq!(out.tvd.file_pointer(), tvd_position);
        debug_assert_eq!(out.tvf.file_pointer(), tvf_position);

        self.num_docs += tvd_lengths.len() as u32;
        Ok(())
    }

    /// Re-encode one decoded document, or write an empty one for `None`.
    ///
    /// Field numbers are taken from `field_infos` by name, and fields are
    /// written in ascending order of those numbers. A field keeps only the
    /// parts its target descriptor stores; fields without term vectors in
    /// the target are dropped.
    pub fn add_all_doc_vectors(
        &mut self,
        vectors: Option<&TermVectorFields>,
        field_infos: &FieldInfos,
    ) -> Result<()> {
        let Some(vectors) = vectors else {
            self.start_document(0)?;
            return self.finish_document();
        };

        let mut fields = Vec::with_capacity(vectors.size());
        for name in vectors.iter() {
            let info = field_infos.field_info(name).ok_or_else(|| {
                TermStoreError::invalid_argument(format!(
                    "field {name} is unknown to the target segment"
                ))
            })?;
            if !info.has_vectors() {
                continue;
            }
            if let Some(terms) = vectors.terms(name)? {
                let stored = FieldVectorOptions {
                    store_term_vectors: true,
                    store_positions: terms.has_positions(),
                    store_offsets: terms.has_offsets(),
                    store_payloads: terms.has_payloads(),
                };
                fields.push((info, stored.restrict_to(&info.vector_options), terms));
            }
        }
        fields.sort_by_key(|(info, _, _)| info.number);

        self.start_document(fields.len() as u32)?;
        for (info, options, terms) in &fields {
            self.start_field(
                info,
                terms.size(),
                options.store_positions,
                options.store_offsets,
                options.store_payloads,
            )?;

            let mut terms_enum = terms.iterator()?;
            while terms_enum.next()?.is_some() {
                let freq = terms_enum.total_term_freq();
                self.start_term(terms_enum.term(), freq)?;
                let postings = if options.has_occurrence_data() {
                    terms_enum.docs_and_positions(None)
                } else {
                    None
                };
                if let Some(mut postings) = postings {
                    postings.next_doc();
                    for _ in 0..freq {
                        let position = postings.next_position()?.unwrap_or(0);
                        self.add_position(
                            position,
                            postings.start_offset().unwrap_or(0),
                            postings.end_offset().unwrap_or(0),
                            postings.payload(),
                        )?;
                    }
                }
                self.finish_term()?;
            }
            self.finish_field()?;
        }
        self.finish_document()
    }

    /// Encode a document buffered in memory.
    ///
    /// What gets stored for a field is what both the document and the
    /// field's descriptor in `field_infos` ask for. Fields whose descriptor
    /// does not store term vectors are skipped.
    pub fn add_document(
        &mut self,
        document: &DocumentTermVectors,
        field_infos: &FieldInfos,
    ) -> Result<()> {
        let mut fields = Vec::with_capacity(document.num_fields());
        for (name, field) in document.fields() {
            let info = field_infos.field_info(name).ok_or_else(|| {
                TermStoreError::invalid_argument(format!("field {name} has no field number"))
            })?;
            let options = field.options.restrict_to(&info.vector_options);
            if options.store_term_vectors {
                fields.push((info, options, field));
            }
        }
        fields.sort_by_key(|(info, _, _)| info.number);

        self.start_document(fields.len() as u32)?;
        for (info, options, field) in fields {
            self.start_field(
                info,
                field.num_terms(),
                options.store_positions,
                options.store_offsets,
                options.store_payloads,
            )?;
            for (term, occurrences) in field.terms() {
                self.start_term(term, occurrences.len() as u32)?;
                if options.has_occurrence_data() {
                    for occurrence in occurrences {
                        self.add_position(
                            occurrence.position,
                            occurrence.start_offset,
                            occurrence.end_offset,
                            occurrence.payload.as_deref(),
                        )?;
                    }
                }
                self.finish_term()?;
            }
            self.finish_field()?;
        }
        self.finish_document()
    }

    /// Verify the index file holds exactly `num_docs` entries, then sync
    /// all three files.
    ///
    /// A mismatch means documents were lost or duplicated on the way to
    /// disk; the segment must not be committed.
    pub fn finish(&mut self, num_docs: u32) -> Result<()> {
        self.expect_state(WriterState::Idle, "finish")?;
        let out = open_outputs(&mut self.outputs)?;

        let expected = header_length(CODEC_NAME_INDEX) + num_docs as u64 * INDEX_ENTRY_SIZE;
        let actual = out.tvx.file_pointer();
        if expected != actual {
            error!(
                "tvx size mismatch for {}: {num_docs} docs need {expected} bytes but file has {actual}",
                self.files.index
            );
            return Err(TermStoreError::corruption(format!(
                "tvx size mismatch: mergedDocs is {num_docs} but tvx size is {actual} file={}; \
                 now aborting this merge to prevent index corruption",
                self.files.index
            )));
        }
        out.sync()
    }

    /// Close the outputs. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut outputs) = self.outputs.take() {
            debug!(
                "closing term vectors writer for {} after {} docs",
                self.files.index, self.num_docs
            );
            outputs.close()?;
        }
        Ok(())
    }

    /// Close and delete everything written so far. Never fails.
    pub fn abort(&mut self) {
        if let Err(e) = self.close() {
            warn!("ignoring close failure while aborting {}: {e}", self.files.index);
        }
        for name in self.files.iter() {
            match self.storage.delete_file(name) {
                Ok(()) | Err(TermStoreError::NotFound(_)) => {}
                Err(e) => warn!("failed to delete {name} while aborting: {e}"),
            }
        }
        self.state = WriterState::Idle;
        debug!("aborted term vectors writer for {}", self.files.index);
    }
}
