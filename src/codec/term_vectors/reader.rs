//! Term-vector reader.

use std::sync::Arc;

use log::debug;

use crate::codec::codec_util::{check_header, header_length};
use crate::codec::term_vectors::fields::TermVectorFields;
use crate::codec::term_vectors::{
    CODEC_NAME_DOCS, CODEC_NAME_FIELDS, CODEC_NAME_INDEX, INDEX_ENTRY_SIZE, VERSION_CURRENT,
    VERSION_START, VectorFiles,
};
use crate::error::{Result, TermStoreError};
use crate::index::field_info::FieldInfos;
use crate::storage::structured::StructReader;
use crate::storage::{Storage, StorageInput};

type VectorInput = StructReader<Box<dyn StorageInput>>;

fn open_checked(storage: &dyn Storage, name: &str, codec: &str) -> Result<(VectorInput, u32)> {
    let mut input = StructReader::new(storage.open_input(name)?)?;
    let version = check_header(&mut input, codec, VERSION_START, VERSION_CURRENT)?;
    Ok((input, version))
}

/// Random access to the term vectors of one segment.
///
/// A reader owns one cursor per file and is not meant to be shared. Callers
/// that read concurrently each take their own [`try_clone`](Self::try_clone).
#[derive(Debug)]
pub struct TermVectorsReader {
    field_infos: Arc<FieldInfos>,
    tvx: VectorInput,
    tvd: VectorInput,
    tvf: VectorInput,
    num_total_docs: u32,
    version: u32,
    segment: String,
}

impl TermVectorsReader {
    /// Open and validate a segment's three files.
    ///
    /// Inputs opened before a failure are released when they go out of scope.
    pub fn open(
        storage: &dyn Storage,
        segment: &str,
        segment_suffix: &str,
        field_infos: Arc<FieldInfos>,
    ) -> Result<Self> {
        let files = VectorFiles::new(segment, segment_suffix);

        let (tvx, tvx_version) = open_checked(storage, &files.index, CODEC_NAME_INDEX)?;
        let (tvd, tvd_version) = open_checked(storage, &files.documents, CODEC_NAME_DOCS)?;
        let (tvf, tvf_version) = open_checked(storage, &files.fields, CODEC_NAME_FIELDS)?;

        if tvx_version != tvd_version {
            return Err(TermStoreError::corruption(format!(
                "version mismatch: {} is version {tvx_version} but {} is version {tvd_version}",
                files.index, files.documents
            )));
        }
        if tvx_version != tvf_version {
            return Err(TermStoreError::corruption(format!(
                "version mismatch: {} is version {tvx_version} but {} is version {tvf_version}",
                files.index, files.fields
            )));
        }

        let entries_len = tvx.size().saturating_sub(header_length(CODEC_NAME_INDEX));
        if entries_len % INDEX_ENTRY_SIZE != 0 {
            return Err(TermStoreError::corruption(format!(
                "{} has {entries_len} bytes of entries, not a multiple of {INDEX_ENTRY_SIZE}",
                files.index
            )));
        }
        let num_total_docs = u32::try_from(entries_len / INDEX_ENTRY_SIZE).map_err(|_| {
            TermStoreError::corruption(format!("{} holds too many documents", files.index))
        })?;

        debug!(
            "opened term vectors for segment {segment}: {num_total_docs} docs, version {tvx_version}"
        );
        Ok(TermVectorsReader {
            field_infos,
            tvx,
            tvd,
            tvf,
            num_total_docs,
            version: tvx_version,
            segment: segment.to_string(),
        })
    }

    /// A reader over the same files with its own cursors.
    pub fn try_clone(&self) -> Result<TermVectorsReader> {
        Ok(TermVectorsReader {
            field_infos: Arc::clone(&self.field_infos),
            tvx: self.tvx.try_clone()?,
            tvd: self.tvd.try_clone()?,
            tvf: self.tvf.try_clone()?,
            num_total_docs: self.num_total_docs,
            version: self.version,
            segment: self.segment.clone(),
        })
    }

    /// Number of documents in the segment, with or without vectors.
    pub fn num_docs(&self) -> u32 {
        self.num_total_docs
    }

    /// Format version shared by the three files.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    fn seek_index(&mut self, doc_id: u32) -> Result<()> {
        self.tvx
            .seek(header_length(CODEC_NAME_INDEX) + doc_id as u64 * INDEX_ENTRY_SIZE)
    }

    /// The vectors of `doc_id`, or `None` if it has none.
    pub fn get(&mut self, doc_id: u32) -> Result<Option<TermVectorFields>> {
        if doc_id >= self.num_total_docs {
            return Err(TermStoreError::invalid_argument(format!(
                "doc {doc_id} is out of bounds for segment {} with {} docs",
                self.segment, self.num_total_docs
            )));
        }

        self.seek_index(doc_id)?;
        let tvd_fp = self.tvx.read_u64()?;
        let tvf_fp = self.tvx.read_u64()?;
        if tvd_fp >= self.tvd.size() {
            return Err(TermStoreError::corruption(format!(
                "doc {doc_id} points past the end of the documents file ({tvd_fp})"
            )));
        }
        self.tvd.seek(tvd_fp)?;

        let field_count = self.tvd.read_vint()?;
        if field_count == 0 {
            return Ok(None);
        }
        if field_count as u64 > self.tvd.size() - tvd_fp {
            return Err(TermStoreError::corruption(format!(
                "doc {doc_id} claims {field_count} fields"
            )));
        }

        let mut field_numbers = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let number = self.tvd.read_vint()?;
            if field_numbers.last().is_some_and(|&last| number <= last) {
                return Err(TermStoreError::corruption(format!(
                    "doc {doc_id} field numbers are not ascending: {number} after {field_numbers:?}"
                )));
            }
            field_numbers.push(number);
        }

        let tvf_size = self.tvf.size();
        let mut field_fps = Vec::with_capacity(field_count as usize);
        let mut fp = tvf_fp;
        field_fps.push(fp);
        for _ in 1..field_count {
            let delta = self.tvd.read_vlong()?;
            fp = fp.checked_add(delta).ok_or_else(|| {
                TermStoreError::corruption(format!("doc {doc_id} field pointer overflows"))
            })?;
            field_fps.push(fp);
        }
        if fp >= tvf_size {
            return Err(TermStoreError::corruption(format!(
                "doc {doc_id} field pointer {fp} is past the end of the fields file ({tvf_size})"
            )));
        }

        TermVectorFields::new(
            self.tvf.try_clone()?,
            self.version,
            Arc::clone(&self.field_infos),
            field_numbers,
            field_fps,
        )
        .map(Some)
    }

    /// Byte lengths of `num_docs` consecutive documents starting at
    /// `start_doc`, in the documents and fields files.
    ///
    /// Leaves both cursors at the start of `start_doc`'s data, ready for a
    /// verbatim copy.
    pub fn raw_docs(
        &mut self,
        tvd_lengths: &mut [u64],
        tvf_lengths: &mut [u64],
        start_doc: u32,
        num_docs: usize,
    ) -> Result<()> {
        if start_doc as u64 + num_docs as u64 > self.num_total_docs as u64 {
            return Err(TermStoreError::invalid_argument(format!(
                "docs {start_doc}..{} are out of bounds for {} docs",
                start_doc as u64 + num_docs as u64,
                self.num_total_docs
            )));
        }
        if tvd_lengths.len() < num_docs || tvf_lengths.len() < num_docs {
            return Err(TermStoreError::invalid_argument(format!(
                "length buffers hold fewer than {num_docs} entries"
            )));
        }
        if num_docs == 0 {
            return Ok(());
        }

        self.seek_index(start_doc)?;
        let mut last_tvd = self.tvx.read_u64()?;
        let mut last_tvf = self.tvx.read_u64()?;
        self.tvd.seek(last_tvd)?;
        self.tvf.seek(last_tvf)?;

        for i in 0..num_docs {
            let next_doc = start_doc as u64 + i as u64 + 1;
            let (tvd_fp, tvf_fp) = if next_doc < self.num_total_docs as u64 {
                (self.tvx.read_u64()?, self.tvx.read_u64()?)
            } else {
                (self.tvd.size(), self.tvf.size())
            };
            if tvd_fp < last_tvd || tvf_fp < last_tvf {
                return Err(TermStoreError::corruption(format!(
                    "index pointers of doc {next_doc} go backwards"
                )));
            }
            tvd_lengths[i] = tvd_fp - last_tvd;
            tvf_lengths[i] = tvf_fp - last_tvf;
            last_tvd = tvd_fp;
            last_tvf = tvf_fp;
        }
        Ok(())
    }

    /// Cursors for copying bytes out after [`raw_docs`](Self::raw_docs).
    pub(crate) fn raw_streams(&mut self) -> (&mut VectorInput, &mut VectorInput) {
        (&mut self.tvd, &mut self.tvf)
    }

    pub fn close(&mut self) -> Result<()> {
        let results = [self.tvx.close(), self.tvd.close(), self.tvf.close()];
        results.into_iter().collect()
    }
}
