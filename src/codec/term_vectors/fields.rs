//! Per-document view over stored term vectors.
//!
//! A document's vectors behave like a tiny inverted index with exactly one
//! document (doc 0): fields, then terms in byte order, then an optional
//! postings enumerator carrying the term's occurrences.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::codec::term_vectors::{
    STORE_OFFSET_WITH_TERMVECTOR, STORE_PAYLOAD_WITH_TERMVECTOR, STORE_POSITIONS_WITH_TERMVECTOR,
    VERSION_PAYLOADS,
};
use crate::error::{Result, TermStoreError};
use crate::index::field_info::FieldInfos;
use crate::index::live_docs::LiveDocs;
use crate::storage::StorageInput;
use crate::storage::structured::StructReader;

type VectorInput = StructReader<Box<dyn StorageInput>>;

/// Returned by doc enumerators once they are exhausted.
pub const NO_MORE_DOCS: u32 = u32::MAX;

const KNOWN_FLAGS: u8 =
    STORE_POSITIONS_WITH_TERMVECTOR | STORE_OFFSET_WITH_TERMVECTOR | STORE_PAYLOAD_WITH_TERMVECTOR;

/// Order of terms within a field: unsigned bytewise.
pub fn compare_terms(left: &[u8], right: &[u8]) -> Ordering {
    left.cmp(right)
}

/// Outcome of [`TermVectorTermsEnum::seek_ceil`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// Positioned on the target term.
    Found,
    /// Positioned on the smallest term greater than the target.
    NotFound,
    /// Every term is smaller than the target.
    End,
}

/// The fields of one document that carry term vectors.
#[derive(Debug)]
pub struct TermVectorFields {
    tvf: VectorInput,
    version: u32,
    field_infos: Arc<FieldInfos>,
    field_numbers: Vec<u32>,
    field_fps: Vec<u64>,
}

impl TermVectorFields {
    pub(crate) fn new(
        tvf: VectorInput,
        version: u32,
        field_infos: Arc<FieldInfos>,
        field_numbers: Vec<u32>,
        field_fps: Vec<u64>,
    ) -> Result<Self> {
        debug_assert_eq!(field_numbers.len(), field_fps.len());
        if let Some(unknown) = field_numbers
            .iter()
            .find(|&&number| field_infos.field_info_by_number(number).is_none())
        {
            return Err(TermStoreError::corruption(format!(
                "term vectors reference unknown field number {unknown}"
            )));
        }
        Ok(TermVectorFields {
            tvf,
            version,
            field_infos,
            field_numbers,
            field_fps,
        })
    }

    /// Number of fields with vectors in this document.
    pub fn size(&self) -> usize {
        self.field_numbers.len()
    }

    /// Field names in stored (ascending number) order. Each call starts over.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.field_numbers.iter().filter_map(|&number| {
            self.field_infos
                .field_info_by_number(number)
                .map(|info| info.name.as_str())
        })
    }

    /// Terms of `field`, or `None` if the document has no vectors for it.
    pub fn terms(&self, field: &str) -> Result<Option<TermVectorTerms>> {
        let Some(info) = self.field_infos.field_info(field) else {
            return Ok(None);
        };
        match self.field_numbers.binary_search(&info.number) {
            Ok(idx) => {
                TermVectorTerms::open(self.tvf.try_clone()?, self.field_fps[idx], self.version)
                    .map(Some)
            }
            Err(_) => Ok(None),
        }
    }
}

/// The terms of one field of one document.
#[derive(Debug)]
pub struct TermVectorTerms {
    tvf: VectorInput,
    terms_fp: u64,
    num_terms: u32,
    store_positions: bool,
    store_offsets: bool,
    store_payloads: bool,
}

impl TermVectorTerms {
    /// Read the field header at `field_fp`.
    fn open(mut tvf: VectorInput, field_fp: u64, version: u32) -> Result<Self> {
        tvf.seek(field_fp)?;
        let num_terms = tvf.read_vint()?;
        let bits = tvf.read_u8()?;

        if bits & !KNOWN_FLAGS != 0 {
            return Err(TermStoreError::corruption(format!(
                "unknown term vector flags {bits:#x} at {field_fp}"
            )));
        }
        let store_positions = bits & STORE_POSITIONS_WITH_TERMVECTOR != 0;
        let store_offsets = bits & STORE_OFFSET_WITH_TERMVECTOR != 0;
        let store_payloads = bits & STORE_PAYLOAD_WITH_TERMVECTOR != 0;
        if store_payloads && version < VERSION_PAYLOADS {
            return Err(TermStoreError::corruption(format!(
                "payloads stored in a version {version} file"
            )));
        }
        if store_payloads && !store_positions {
            return Err(TermStoreError::corruption(
                "payloads stored without positions",
            ));
        }

        let terms_fp = tvf.file_pointer()?;
        // Every term takes at least three bytes.
        if num_terms as u64 > tvf.size().saturating_sub(terms_fp) {
            return Err(TermStoreError::corruption(format!(
                "field at {field_fp} claims {num_terms} terms past the end of the file"
            )));
        }

        Ok(TermVectorTerms {
            tvf,
            terms_fp,
            num_terms,
            store_positions,
            store_offsets,
            store_payloads,
        })
    }

    /// Number of unique terms.
    pub fn size(&self) -> u32 {
        self.num_terms
    }

    pub fn has_positions(&self) -> bool {
        self.store_positions
    }

    pub fn has_offsets(&self) -> bool {
        self.store_offsets
    }

    pub fn has_payloads(&self) -> bool {
        self.store_payloads
    }

    pub fn doc_count(&self) -> u32 {
        1
    }

    pub fn sum_doc_freq(&self) -> u64 {
        self.num_terms as u64
    }

    /// Not recorded by this format.
    pub fn sum_total_term_freq(&self) -> Option<u64> {
        None
    }

    /// A fresh enumerator positioned before the first term.
    pub fn iterator(&self) -> Result<TermVectorTermsEnum> {
        let mut tvf = self.tvf.try_clone()?;
        tvf.seek(self.terms_fp)?;
        Ok(TermVectorTermsEnum {
            tvf,
            terms_fp: self.terms_fp,
            num_terms: self.num_terms,
            next_term: 0,
            term: Vec::new(),
            freq: 0,
            store_positions: self.store_positions,
            store_offsets: self.store_offsets,
            store_payloads: self.store_payloads,
            last_payload_length: None,
            positions: Vec::new(),
            start_offsets: Vec::new(),
            end_offsets: Vec::new(),
            payload_bounds: Vec::new(),
            payload_data: Vec::new(),
        })
    }
}

/// Walks the terms of one field in byte order.
///
/// Advancing decodes the term's occurrences into buffers that are reused
/// from term to term.
#[derive(Debug)]
pub struct TermVectorTermsEnum {
    tvf: VectorInput,
    terms_fp: u64,
    num_terms: u32,
    next_term: u32,
    term: Vec<u8>,
    freq: u32,
    store_positions: bool,
    store_offsets: bool,
    store_payloads: bool,
    // Carried across the terms of the field.
    last_payload_length: Option<u32>,
    positions: Vec<u32>,
    start_offsets: Vec<u32>,
    end_offsets: Vec<u32>,
    /// `freq + 1` boundaries into `payload_data`.
    payload_bounds: Vec<usize>,
    payload_data: Vec<u8>,
}

impl TermVectorTermsEnum {
    /// Advance to the next term. Returns `None` after the last one.
    pub fn next(&mut self) -> Result<Option<&[u8]>> {
        if self.next_term >= self.num_terms {
            return Ok(None);
        }

        let prefix = self.tvf.read_vint()? as usize;
        let suffix = self.tvf.read_vint()? as u64;
        if prefix > self.term.len() {
            return Err(TermStoreError::corruption(format!(
                "term prefix {prefix} is longer than the previous term ({} bytes)",
                self.term.len()
            )));
        }
        self.check_remaining(suffix, "term suffix")?;
        self.term.truncate(prefix);
        self.term.resize(prefix + suffix as usize, 0);
        self.tvf.read_exact(&mut self.term[prefix..])?;

        self.freq = self.tvf.read_vint()?;
        if self.freq == 0 {
            return Err(TermStoreError::corruption("term with zero frequency"));
        }

        self.positions.clear();
        self.start_offsets.clear();
        self.end_offsets.clear();
        self.payload_bounds.clear();
        self.payload_data.clear();

        if self.store_positions || self.store_offsets {
            self.check_remaining(self.freq as u64, "occurrences")?;
        }
        if self.store_positions {
            self.read_positions()?;
        }
        if self.store_offsets {
            let mut last_offset = 0u32;
            for _ in 0..self.freq {
                let start = last_offset.wrapping_add(self.tvf.read_vint()?);
                let end = start
                    .checked_add(self.tvf.read_vint()?)
                    .ok_or_else(|| TermStoreError::corruption("end offset overflows"))?;
                self.start_offsets.push(start);
                self.end_offsets.push(end);
                last_offset = end;
            }
        }

        self.next_term += 1;
        Ok(Some(&self.term))
    }

    fn read_positions(&mut self) -> Result<()> {
        let mut position = 0u32;
        let mut total_payload = 0usize;
        if self.store_payloads {
            self.payload_bounds.push(0);
        }
        for _ in 0..self.freq {
            let code = self.tvf.read_vint()?;
            let delta = if self.store_payloads {
                if code & 1 != 0 {
                    self.last_payload_length = Some(self.tvf.read_vint()?);
                }
                let length = self.last_payload_length.ok_or_else(|| {
                    TermStoreError::corruption("payload length used before it was written")
                })?;
                total_payload += length as usize;
                self.payload_bounds.push(total_payload);
                code >> 1
            } else {
                code
            };
            position = position
                .checked_add(delta)
                .ok_or_else(|| TermStoreError::corruption("position overflows"))?;
            self.positions.push(position);
        }
        if self.store_payloads {
            self.check_remaining(total_payload as u64, "payload bytes")?;
            self.payload_data.resize(total_payload, 0);
            self.tvf.read_exact(&mut self.payload_data)?;
        }
        Ok(())
    }

    fn check_remaining(&mut self, needed: u64, what: &str) -> Result<()> {
        let position = self.tvf.file_pointer()?;
        if needed > self.tvf.size().saturating_sub(position) {
            return Err(TermStoreError::corruption(format!(
                "{what} ({needed}) run past the end of the fields file at {position}"
            )));
        }
        Ok(())
    }

    /// The current term. Empty before the first call to [`next`](Self::next).
    pub fn term(&self) -> &[u8] {
        &self.term
    }

    pub fn doc_freq(&self) -> u32 {
        1
    }

    /// Occurrences of the current term in this document.
    pub fn total_term_freq(&self) -> u32 {
        self.freq
    }

    /// Rewind to before the first term.
    pub fn reset(&mut self) -> Result<()> {
        self.tvf.seek(self.terms_fp)?;
        self.next_term = 0;
        self.term.clear();
        self.freq = 0;
        self.last_payload_length = None;
        Ok(())
    }

    /// Position on the smallest term `>= target`.
    ///
    /// Scans forward from the current term, starting over when the target
    /// sorts before it.
    pub fn seek_ceil(&mut self, target: &[u8]) -> Result<SeekStatus> {
        if self.next_term != 0 {
            match compare_terms(target, &self.term) {
                Ordering::Less => self.reset()?,
                Ordering::Equal => return Ok(SeekStatus::Found),
                Ordering::Greater => {}
            }
        }
        while self.next()?.is_some() {
            match compare_terms(target, &self.term) {
                Ordering::Less => return Ok(SeekStatus::NotFound),
                Ordering::Equal => return Ok(SeekStatus::Found),
                Ordering::Greater => {}
            }
        }
        Ok(SeekStatus::End)
    }

    pub fn seek_exact(&mut self, target: &[u8]) -> Result<bool> {
        Ok(self.seek_ceil(target)? == SeekStatus::Found)
    }

    /// Postings without occurrence data.
    pub fn docs(&self, live_docs: Option<&LiveDocs>) -> TermVectorDocsEnum {
        TermVectorDocsEnum::new(self.freq, live_docs)
    }

    /// Postings with occurrence data, or `None` when the field stores
    /// neither positions nor offsets.
    pub fn docs_and_positions(
        &self,
        live_docs: Option<&LiveDocs>,
    ) -> Option<TermVectorPositionsEnum<'_>> {
        if !self.store_positions && !self.store_offsets {
            return None;
        }
        Some(TermVectorPositionsEnum {
            docs: TermVectorDocsEnum::new(self.freq, live_docs),
            positions: &self.positions,
            start_offsets: &self.start_offsets,
            end_offsets: &self.end_offsets,
            payload_bounds: &self.payload_bounds,
            payload_data: &self.payload_data,
            next_pos: 0,
        })
    }
}

/// Single-document postings.
#[derive(Debug, Clone)]
pub struct TermVectorDocsEnum {
    freq: u32,
    live: bool,
    did_next: bool,
    doc: Option<u32>,
}

impl TermVectorDocsEnum {
    fn new(freq: u32, live_docs: Option<&LiveDocs>) -> Self {
        TermVectorDocsEnum {
            freq,
            live: live_docs.is_none_or(|live| live.is_live(0)),
            did_next: false,
            doc: None,
        }
    }

    pub fn next_doc(&mut self) -> u32 {
        let doc = if !self.did_next && self.live {
            self.did_next = true;
            0
        } else {
            NO_MORE_DOCS
        };
        self.doc = Some(doc);
        doc
    }

    pub fn advance(&mut self, target: u32) -> u32 {
        if !self.did_next && target == 0 {
            self.next_doc()
        } else {
            self.doc = Some(NO_MORE_DOCS);
            NO_MORE_DOCS
        }
    }

    /// `None` before the first call to `next_doc` or `advance`.
    pub fn doc_id(&self) -> Option<u32> {
        self.doc
    }

    pub fn freq(&self) -> u32 {
        self.freq
    }
}

/// Single-document postings with occurrence data.
#[derive(Debug, Clone)]
pub struct TermVectorPositionsEnum<'a> {
    docs: TermVectorDocsEnum,
    positions: &'a [u32],
    start_offsets: &'a [u32],
    end_offsets: &'a [u32],
    payload_bounds: &'a [usize],
    payload_data: &'a [u8],
    next_pos: usize,
}

impl TermVectorPositionsEnum<'_> {
    pub fn next_doc(&mut self) -> u32 {
        self.next_pos = 0;
        self.docs.next_doc()
    }

    pub fn advance(&mut self, target: u32) -> u32 {
        self.next_pos = 0;
        self.docs.advance(target)
    }

    pub fn doc_id(&self) -> Option<u32> {
        self.docs.doc_id()
    }

    pub fn freq(&self) -> u32 {
        self.docs.freq()
    }

    /// Step to the next occurrence.
    ///
    /// Returns its position, or `None` when only offsets are stored. Calling
    /// this more than `freq` times is an error.
    pub fn next_position(&mut self) -> Result<Option<u32>> {
        if self.next_pos >= self.docs.freq() as usize {
            return Err(TermStoreError::invalid_state(format!(
                "next_position called more than freq ({}) times",
                self.docs.freq()
            )));
        }
        self.next_pos += 1;
        Ok(self.positions.get(self.next_pos - 1).copied())
    }

    fn current(&self) -> Option<usize> {
        self.next_pos.checked_sub(1)
    }

    pub fn start_offset(&self) -> Option<u32> {
        self.current()
            .and_then(|idx| self.start_offsets.get(idx))
            .copied()
    }

    pub fn end_offset(&self) -> Option<u32> {
        self.current()
            .and_then(|idx| self.end_offsets.get(idx))
            .copied()
    }

    /// Payload of the current occurrence; `None` if absent or empty.
    pub fn payload(&self) -> Option<&[u8]> {
        let idx = self.current()?;
        let start = *self.payload_bounds.get(idx)?;
        let end = *self.payload_bounds.get(idx + 1)?;
        (end > start).then(|| &self.payload_data[start..end])
    }
}
