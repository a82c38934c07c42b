//! Merging the term vectors of several segments into one.
//!
//! For each source segment the merge picks one of three paths:
//!
//! 1. Same field numbering, no deletions: copy the stored bytes of whole
//!    batches of documents without decoding them.
//! 2. Same field numbering, with deletions: copy each maximal run of live
//!    documents the same way.
//! 3. Different field numbering (or bulk copy disabled): decode every live
//!    document and encode it again against the merged numbering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::codec::term_vectors::reader::TermVectorsReader;
use crate::codec::term_vectors::writer::TermVectorsWriter;
use crate::codec::term_vectors::MAX_RAW_MERGE_DOCS;
use crate::error::{Result, TermStoreError};
use crate::index::field_info::FieldInfos;
use crate::index::live_docs::LiveDocs;

/// Abort-check units charged per merged document.
const WORK_PER_DOC: f64 = 300.0;

/// Merge tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Most documents copied in one raw batch.
    pub max_raw_merge_docs: usize,

    /// Allow raw byte copies between congruent segments. When disabled every
    /// document is decoded and re-encoded.
    pub allow_bulk_copy: bool,

    /// Work units between two checks of the abort flag.
    pub check_abort_interval: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            max_raw_merge_docs: MAX_RAW_MERGE_DOCS,
            allow_bulk_copy: true,
            check_abort_interval: 10_000,
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_raw_merge_docs == 0 {
            return Err(TermStoreError::invalid_argument(
                "max_raw_merge_docs must be positive",
            ));
        }
        if self.check_abort_interval == 0 {
            return Err(TermStoreError::invalid_argument(
                "check_abort_interval must be positive",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing keys take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MergeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Requests cancellation of a running merge from another thread.
#[derive(Debug, Clone, Default)]
pub struct MergeAbortHandle(Arc<AtomicBool>);

impl MergeAbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Cooperative cancellation for long merges.
///
/// The merge reports work as it goes; once enough has accumulated the abort
/// flag is consulted and, if set, the merge stops with
/// [`TermStoreError::MergeAborted`].
#[derive(Debug)]
pub struct CheckAbort {
    handle: MergeAbortHandle,
    work_count: f64,
    interval: f64,
}

impl CheckAbort {
    pub fn new(interval: u64) -> Self {
        CheckAbort {
            handle: MergeAbortHandle::default(),
            work_count: 0.0,
            interval: interval as f64,
        }
    }

    /// A handle that aborts this merge.
    pub fn handle(&self) -> MergeAbortHandle {
        self.handle.clone()
    }

    pub fn work(&mut self, units: f64) -> Result<()> {
        self.work_count += units;
        if self.work_count >= self.interval {
            if self.handle.is_aborted() {
                return Err(TermStoreError::MergeAborted(
                    "term vectors merge was aborted".to_string(),
                ));
            }
            self.work_count = 0.0;
        }
        Ok(())
    }
}

/// One segment being merged.
#[derive(Debug)]
pub struct MergeSource {
    pub max_doc: u32,
    /// `None` when the segment has no term vectors.
    pub reader: Option<TermVectorsReader>,
    pub live_docs: Option<LiveDocs>,
    /// Whether the segment numbers its fields the way the merged segment
    /// does, which makes its stored bytes valid there unchanged.
    pub field_numbering_congruent: bool,
}

impl MergeSource {
    fn has_deletions(&self) -> bool {
        self.live_docs.as_ref().is_some_and(LiveDocs::has_deletions)
    }

    fn is_live(&self, doc_id: u32) -> bool {
        self.live_docs
            .as_ref()
            .is_none_or(|live| live.is_live(doc_id))
    }
}

/// Everything a merge needs: the merged field numbering and the sources in
/// the order their documents appear in the merged segment.
#[derive(Debug)]
pub struct MergeState {
    pub field_infos: Arc<FieldInfos>,
    pub sources: Vec<MergeSource>,
    pub check_abort: CheckAbort,
}

impl MergeState {
    pub fn new(field_infos: Arc<FieldInfos>, config: &MergeConfig) -> Self {
        MergeState {
            field_infos,
            sources: Vec::new(),
            check_abort: CheckAbort::new(config.check_abort_interval),
        }
    }

    /// Append a source segment.
    pub fn add_source(
        &mut self,
        max_doc: u32,
        reader: Option<TermVectorsReader>,
        live_docs: Option<LiveDocs>,
    ) -> Result<()> {
        if let Some(live) = &live_docs {
            if live.max_doc() != max_doc {
                return Err(TermStoreError::invalid_argument(format!(
                    "live docs cover {} docs but the segment has {max_doc}",
                    live.max_doc()
                )));
            }
        }
        if let Some(reader) = &reader {
            if reader.num_docs() != max_doc {
                return Err(TermStoreError::invalid_argument(format!(
                    "term vectors hold {} docs but the segment has {max_doc}",
                    reader.num_docs()
                )));
            }
        }

        let field_numbering_congruent = reader
            .as_ref()
            .is_some_and(|r| r.field_infos().is_congruent_with(&self.field_infos));
        self.sources.push(MergeSource {
            max_doc,
            reader,
            live_docs,
            field_numbering_congruent,
        });
        Ok(())
    }

    pub fn abort_handle(&self) -> MergeAbortHandle {
        self.check_abort.handle()
    }
}

/// Scratch buffers for raw batches.
struct RawLengths {
    tvd: Vec<u64>,
    tvf: Vec<u64>,
}

impl TermVectorsWriter {
    /// Append every live document of every source, then verify the result
    /// with [`finish`](Self::finish). Returns the number of merged documents.
    ///
    /// On error the caller should [`abort`](Self::abort) this writer.
    pub fn merge(&mut self, state: &mut MergeState, config: &MergeConfig) -> Result<u32> {
        config.validate()?;
        let MergeState {
            field_infos,
            sources,
            check_abort,
        } = state;

        let mut lengths = RawLengths {
            tvd: vec![0; config.max_raw_merge_docs],
            tvf: vec![0; config.max_raw_merge_docs],
        };
        let mut doc_count = 0u32;
        let mut raw_copied = 0u32;

        for (idx, source) in sources.iter_mut().enumerate() {
            let bulk = config.allow_bulk_copy && source.field_numbering_congruent;
            let has_deletions = source.has_deletions();
            debug!(
                "merging term vectors of source {idx}: {} docs, {}, {}",
                source.max_doc,
                if bulk { "raw copy" } else { "re-encode" },
                if has_deletions { "with deletions" } else { "no deletions" },
            );

            let merged = match source.reader.as_mut() {
                Some(reader) if bulk && has_deletions => self.copy_live_runs(
                    reader,
                    source.live_docs.as_ref(),
                    source.max_doc,
                    &mut lengths,
                    check_abort,
                )?,
                Some(reader) if bulk => {
                    self.copy_batches(reader, source.max_doc, &mut lengths, check_abort)?
                }
                _ => self.reencode(source, field_infos, check_abort)?,
            };
            if bulk {
                raw_copied += merged;
            }
            doc_count += merged;
        }

        self.finish(doc_count)?;
        info!(
            "merged term vectors of {} segments: {doc_count} docs ({raw_copied} copied raw)",
            sources.len()
        );
        Ok(doc_count)
    }

    fn copy_batch(
        &mut self,
        reader: &mut TermVectorsReader,
        start: u32,
        num_docs: usize,
        lengths: &mut RawLengths,
    ) -> Result<()> {
        reader.raw_docs(&mut lengths.tvd, &mut lengths.tvf, start, num_docs)?;
        self.add_raw_documents(reader, &lengths.tvd[..num_docs], &lengths.tvf[..num_docs])
    }

    fn copy_batches(
        &mut self,
        reader: &mut TermVectorsReader,
        max_doc: u32,
        lengths: &mut RawLengths,
        check_abort: &mut CheckAbort,
    ) -> Result<u32> {
        let mut doc = 0u32;
        while doc < max_doc {
            let len = lengths.tvd.len().min((max_doc - doc) as usize);
            self.copy_batch(reader, doc, len, lengths)?;
            doc += len as u32;
            check_abort.work(WORK_PER_DOC * len as f64)?;
        }
        Ok(max_doc)
    }

    fn copy_live_runs(
        &mut self,
        reader: &mut TermVectorsReader,
        live_docs: Option<&LiveDocs>,
        max_doc: u32,
        lengths: &mut RawLengths,
        check_abort: &mut CheckAbort,
    ) -> Result<u32> {
        let is_live = |doc: u32| live_docs.is_none_or(|live| live.is_live(doc));
        let max_run = lengths.tvd.len();
        let mut total = 0u32;
        let mut doc = 0u32;

        while doc < max_doc {
            if !is_live(doc) {
                doc += 1;
                continue;
            }

            // Extend the run while documents stay live. A deleted document
            // ends it and is stepped over.
            let start = doc;
            let mut run = 0usize;
            loop {
                doc += 1;
                run += 1;
                if doc >= max_doc {
                    break;
                }
                if !is_live(doc) {
                    doc += 1;
                    break;
                }
                if run >= max_run {
                    break;
                }
            }

            self.copy_batch(reader, start, run, lengths)?;
            total += run as u32;
            check_abort.work(WORK_PER_DOC * run as f64)?;
        }
        Ok(total)
    }

    fn reencode(
        &mut self,
        source: &mut MergeSource,
        field_infos: &FieldInfos,
        check_abort: &mut CheckAbort,
    ) -> Result<u32> {
        let mut total = 0u32;
        for doc in 0..source.max_doc {
            if !source.is_live(doc) {
                continue;
            }
            let vectors = match source.reader.as_mut() {
                Some(reader) => reader.get(doc)?,
                None => None,
            };
            self.add_all_doc_vectors(vectors.as_ref(), field_infos)?;
            total += 1;
            check_abort.work(WORK_PER_DOC)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::term_vectors::TermVectorsFormat;
    use crate::index::field_info::{FieldInfosBuilder, FieldVectorOptions};
    use crate::storage::Storage;
    use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

    fn infos() -> Arc<FieldInfos> {
        let mut builder = FieldInfosBuilder::new();
        builder.add("body", FieldVectorOptions::with_positions());
        Arc::new(builder.finish())
    }

    fn write_segment(storage: &Arc<MemoryStorage>, segment: &str, infos: &FieldInfos, docs: u32) {
        let body = infos.field_info("body").unwrap();
        let mut writer = TermVectorsFormat::new()
            .vectors_writer(storage.clone(), segment)
            .unwrap();
        for doc in 0..docs {
            writer.start_document(1).unwrap();
            writer.start_field(body, 1, true, false, false).unwrap();
            writer.start_term(format!("t{doc}").as_bytes(), 1).unwrap();
            writer.add_position(doc, 0, 0, None).unwrap();
            writer.finish_term().unwrap();
            writer.finish_field().unwrap();
            writer.finish_document().unwrap();
        }
        writer.finish(docs).unwrap();
        writer.close().unwrap();
    }

    fn reader(storage: &MemoryStorage, segment: &str, infos: &Arc<FieldInfos>) -> TermVectorsReader {
        TermVectorsReader::open(storage, segment, "", Arc::clone(infos)).unwrap()
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = MergeConfig::default();
        assert_eq!(config.max_raw_merge_docs, 4192);
        assert!(config.allow_bulk_copy);

        let config = MergeConfig::from_json(r#"{"max_raw_merge_docs": 2}"#).unwrap();
        assert_eq!(config.max_raw_merge_docs, 2);
        assert_eq!(config.check_abort_interval, 10_000);
        assert!(MergeConfig::from_json(r#"{"max_raw_merge_docs": 0}"#).is_err());
    }

    #[test]
    fn test_check_abort() {
        let mut check = CheckAbort::new(1000);
        let handle = check.handle();
        check.work(600.0).unwrap();
        handle.abort();
        // not yet past the interval
        check.work(300.0).unwrap();
        assert!(matches!(
            check.work(300.0),
            Err(TermStoreError::MergeAborted(_))
        ));
    }

    #[test]
    fn test_batches_respect_max_raw_merge_docs() {
        let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let infos = infos();
        write_segment(&storage, "_0", &infos, 7);

        let config = MergeConfig {
            max_raw_merge_docs: 3,
            ..MergeConfig::default()
        };
        let mut state = MergeState::new(Arc::clone(&infos), &config);
        state
            .add_source(7, Some(reader(&storage, "_0", &infos)), None)
            .unwrap();
        assert!(state.sources[0].field_numbering_congruent);

        let mut writer = TermVectorsFormat::new()
            .vectors_writer(storage.clone(), "_1")
            .unwrap();
        assert_eq!(writer.merge(&mut state, &config).unwrap(), 7);
        writer.close().unwrap();

        for ext in ["tvx", "tvd", "tvf"] {
            assert_eq!(
                storage.read_all(&format!("_0.{ext}")).unwrap(),
                storage.read_all(&format!("_1.{ext}")).unwrap()
            );
        }
    }

    #[test]
    fn test_live_runs_skip_deleted() {
        let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let infos = infos();
        write_segment(&storage, "_0", &infos, 6);

        let mut live = LiveDocs::new_all_live(6);
        live.delete(0).unwrap();
        live.delete(3).unwrap();
        live.delete(5).unwrap();

        let config = MergeConfig::default();
        let mut state = MergeState::new(Arc::clone(&infos), &config);
        state
            .add_source(6, Some(reader(&storage, "_0", &infos)), Some(live))
            .unwrap();

        let mut writer = TermVectorsFormat::new()
            .vectors_writer(storage.clone(), "_1")
            .unwrap();
        assert_eq!(writer.merge(&mut state, &config).unwrap(), 3);
        writer.close().unwrap();

        let mut merged = reader(&storage, "_1", &infos);
        let mut terms = Vec::new();
        for doc in 0..merged.num_docs() {
            let fields = merged.get(doc).unwrap().unwrap();
            let mut te = fields.terms("body").unwrap().unwrap().iterator().unwrap();
            terms.push(te.next().unwrap().unwrap().to_vec());
        }
        assert_eq!(terms, vec![b"t1".to_vec(), b"t2".to_vec(), b"t4".to_vec()]);
    }

    #[test]
    fn test_source_without_vectors_yields_empty_docs() {
        let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let infos = infos();
        let config = MergeConfig::default();
        let mut state = MergeState::new(Arc::clone(&infos), &config);
        state.add_source(2, None, None).unwrap();
        assert!(!state.sources[0].field_numbering_congruent);

        let mut writer = TermVectorsFormat::new()
            .vectors_writer(storage.clone(), "_1")
            .unwrap();
        assert_eq!(writer.merge(&mut state, &config).unwrap(), 2);
        writer.close().unwrap();

        let mut merged = reader(&storage, "_1", &infos);
        assert_eq!(merged.num_docs(), 2);
        assert!(merged.get(0).unwrap().is_none());
    }

    #[test]
    fn test_add_source_rejects_mismatched_counts() {
        let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
        let infos = infos();
        write_segment(&storage, "_0", &infos, 2);
        let mut state = MergeState::new(Arc::clone(&infos), &MergeConfig::default());

        assert!(
            state
                .add_source(3, Some(reader(&storage, "_0", &infos)), None)
                .is_err()
        );
        assert!(
            state
                .add_source(2, None, Some(LiveDocs::new_all_live(5)))
                .is_err()
        );
        assert!(storage.file_exists("_0.tvx"));
    }
}
