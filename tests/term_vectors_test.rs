use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use termstore::codec::codec_util::header_length;
use termstore::codec::term_vectors::{
    CODEC_NAME_DOCS, CODEC_NAME_FIELDS, CODEC_NAME_INDEX, DocumentTermVectors, MergeConfig,
    MergeState, TermVectorsFormat, TermVectorsReader,
};
use termstore::index::{FieldInfos, FieldInfosBuilder, FieldVectorOptions, LiveDocs};
use termstore::storage::file::FileStorageConfig;
use termstore::storage::{Storage, StorageConfig, StorageFactory};
use termstore::TermStoreError;

fn file_storage(dir: &tempfile::TempDir) -> Arc<dyn Storage> {
    let storage_config = StorageConfig::File(FileStorageConfig::new(dir.path()));
    StorageFactory::create(storage_config).unwrap()
}

fn body_infos(options: FieldVectorOptions) -> Arc<FieldInfos> {
    let mut builder = FieldInfosBuilder::new();
    builder.add("body", options);
    Arc::new(builder.finish())
}

fn write_documents(
    storage: &Arc<dyn Storage>,
    segment: &str,
    infos: &FieldInfos,
    docs: &[DocumentTermVectors],
) {
    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(storage), segment)
        .unwrap();
    for doc in docs {
        writer.add_document(doc, infos).unwrap();
    }
    writer.finish(docs.len() as u32).unwrap();
    writer.close().unwrap();
}

fn open_reader(
    storage: &Arc<dyn Storage>,
    segment: &str,
    infos: &Arc<FieldInfos>,
) -> TermVectorsReader {
    TermVectorsFormat::new()
        .vectors_reader(&**storage, segment, Arc::clone(infos))
        .unwrap()
        .unwrap()
}

fn read_document(reader: &mut TermVectorsReader, doc: u32) -> DocumentTermVectors {
    match reader.get(doc).unwrap() {
        Some(fields) => DocumentTermVectors::from_fields(&fields).unwrap(),
        None => DocumentTermVectors::new(),
    }
}

/// One document per number, with a single distinctive term.
fn numbered_docs(range: std::ops::Range<u32>) -> Vec<DocumentTermVectors> {
    let options = FieldVectorOptions::with_positions_offsets();
    range
        .map(|n| {
            let mut doc = DocumentTermVectors::new();
            let term = format!("doc{n:03}");
            doc.add_token("body", options, term.as_bytes(), n, n * 10, n * 10 + 6, None);
            doc.add_token("body", options, b"common", n + 1, 0, 6, None);
            doc
        })
        .collect()
}

#[test]
fn test_terms_only_field() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::terms_only());

    let options = FieldVectorOptions::terms_only();
    let mut doc = DocumentTermVectors::new();
    doc.add_token("body", options, b"banana", 0, 0, 0, None);
    doc.add_token("body", options, b"apple", 1, 0, 0, None);
    doc.add_token("body", options, b"apple", 2, 0, 0, None);
    write_documents(&storage, "_0", &infos, &[doc]);

    let mut reader = open_reader(&storage, "_0", &infos);
    let fields = reader.get(0).unwrap().unwrap();
    assert_eq!(fields.size(), 1);
    let terms = fields.terms("body").unwrap().unwrap();
    assert_eq!(terms.size(), 2);
    assert!(!terms.has_positions() && !terms.has_offsets() && !terms.has_payloads());

    let mut te = terms.iterator().unwrap();
    assert_eq!(te.next().unwrap(), Some(&b"apple"[..]));
    assert_eq!(te.total_term_freq(), 2);
    assert_eq!(te.next().unwrap(), Some(&b"banana"[..]));
    assert_eq!(te.total_term_freq(), 1);
    assert_eq!(te.next().unwrap(), None);
}

#[test]
fn test_positions_and_offsets() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    let body = infos.field_info("body").unwrap();

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_0")
        .unwrap();
    writer.start_document(1).unwrap();
    writer.start_field(body, 1, true, true, false).unwrap();
    writer.start_term(b"cat", 2).unwrap();
    writer.add_position(0, 0, 3, None).unwrap();
    writer.add_position(5, 20, 23, None).unwrap();
    writer.finish_term().unwrap();
    writer.finish_field().unwrap();
    writer.finish_document().unwrap();
    writer.finish(1).unwrap();
    writer.close().unwrap();

    let mut reader = open_reader(&storage, "_0", &infos);
    let fields = reader.get(0).unwrap().unwrap();
    let terms = fields.terms("body").unwrap().unwrap();
    let mut te = terms.iterator().unwrap();
    assert_eq!(te.next().unwrap(), Some(&b"cat"[..]));

    let mut postings = te.docs_and_positions(None).unwrap();
    assert_eq!(postings.next_doc(), 0);
    assert_eq!(postings.freq(), 2);
    assert_eq!(postings.next_position().unwrap(), Some(0));
    assert_eq!((postings.start_offset(), postings.end_offset()), (Some(0), Some(3)));
    assert_eq!(postings.next_position().unwrap(), Some(5));
    assert_eq!((postings.start_offset(), postings.end_offset()), (Some(20), Some(23)));
}

#[test]
fn test_merge_two_segments_concatenates_bytes() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    write_documents(&storage, "_0", &infos, &numbered_docs(0..5));
    write_documents(&storage, "_1", &infos, &numbered_docs(5..10));

    let config = MergeConfig::default();
    let mut state = MergeState::new(Arc::clone(&infos), &config);
    for segment in ["_0", "_1"] {
        state
            .add_source(5, Some(open_reader(&storage, segment, &infos)), None)
            .unwrap();
    }

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_2")
        .unwrap();
    assert_eq!(writer.merge(&mut state, &config).unwrap(), 10);
    writer.close().unwrap();

    assert_eq!(
        storage.file_size("_2.tvx").unwrap(),
        header_length(CODEC_NAME_INDEX) + 10 * 16
    );
    for (ext, codec) in [("tvd", CODEC_NAME_DOCS), ("tvf", CODEC_NAME_FIELDS)] {
        let body = |segment: &str| {
            storage.file_size(&format!("{segment}.{ext}")).unwrap() - header_length(codec)
        };
        assert_eq!(body("_2"), body("_0") + body("_1"));
    }

    let expected = numbered_docs(0..10);
    let mut merged = open_reader(&storage, "_2", &infos);
    for (doc, expected) in expected.iter().enumerate() {
        assert_eq!(&read_document(&mut merged, doc as u32), expected);
    }
}

#[test]
fn test_bulk_merge_is_byte_identical() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    write_documents(&storage, "_0", &infos, &numbered_docs(0..50));

    let config = MergeConfig {
        max_raw_merge_docs: 16,
        ..MergeConfig::default()
    };
    let mut state = MergeState::new(Arc::clone(&infos), &config);
    state
        .add_source(50, Some(open_reader(&storage, "_0", &infos)), None)
        .unwrap();

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_1")
        .unwrap();
    writer.merge(&mut state, &config).unwrap();
    writer.close().unwrap();

    let read_all = |name: &str| {
        let mut input = storage.open_input(name).unwrap();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut input, &mut bytes).unwrap();
        bytes
    };
    for ext in ["tvx", "tvd", "tvf"] {
        assert_eq!(read_all(&format!("_0.{ext}")), read_all(&format!("_1.{ext}")));
    }
}

#[test]
fn test_merge_drops_deleted_documents() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    let docs = numbered_docs(0..20);
    write_documents(&storage, "_0", &infos, &docs);

    let deleted = [0u32, 1, 7, 8, 9, 19];
    let mut live = LiveDocs::new_all_live(20);
    for &doc in &deleted {
        live.delete(doc).unwrap();
    }

    let config = MergeConfig {
        max_raw_merge_docs: 4,
        ..MergeConfig::default()
    };
    let mut state = MergeState::new(Arc::clone(&infos), &config);
    state
        .add_source(20, Some(open_reader(&storage, "_0", &infos)), Some(live))
        .unwrap();

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_1")
        .unwrap();
    assert_eq!(
        writer.merge(&mut state, &config).unwrap(),
        20 - deleted.len() as u32
    );
    writer.close().unwrap();

    let survivors: Vec<&DocumentTermVectors> = docs
        .iter()
        .enumerate()
        .filter(|(doc, _)| !deleted.contains(&(*doc as u32)))
        .map(|(_, doc)| doc)
        .collect();
    let mut merged = open_reader(&storage, "_1", &infos);
    assert_eq!(merged.num_docs() as usize, survivors.len());
    for (doc, expected) in survivors.into_iter().enumerate() {
        assert_eq!(&read_document(&mut merged, doc as u32), expected);
    }
}

#[test]
fn test_reencode_merge_remaps_field_numbers() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);

    let mut source_builder = FieldInfosBuilder::new();
    source_builder.add("title", FieldVectorOptions::terms_only());
    source_builder.add("body", FieldVectorOptions::with_payloads());
    let source_infos = Arc::new(source_builder.finish());

    let mut target_builder = FieldInfosBuilder::new();
    target_builder.add("body", FieldVectorOptions::with_payloads());
    target_builder.add("title", FieldVectorOptions::terms_only());
    let target_infos = Arc::new(target_builder.finish());

    let mut docs = Vec::new();
    for n in 0..4u32 {
        let mut doc = DocumentTermVectors::new();
        doc.add_token("title", FieldVectorOptions::terms_only(), b"report", 0, 0, 0, None);
        let payload = n.to_be_bytes();
        doc.add_token(
            "body",
            FieldVectorOptions::with_payloads(),
            format!("word{n}").as_bytes(),
            n,
            n,
            n + 4,
            Some(&payload[..]),
        );
        docs.push(doc);
    }
    write_documents(&storage, "_0", &source_infos, &docs);

    let config = MergeConfig::default();
    let mut state = MergeState::new(Arc::clone(&target_infos), &config);
    state
        .add_source(4, Some(open_reader(&storage, "_0", &source_infos)), None)
        .unwrap();
    assert!(!state.sources[0].field_numbering_congruent);

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_1")
        .unwrap();
    assert_eq!(writer.merge(&mut state, &config).unwrap(), 4);
    writer.close().unwrap();

    let mut merged = open_reader(&storage, "_1", &target_infos);
    for (doc, expected) in docs.iter().enumerate() {
        let fields = merged.get(doc as u32).unwrap().unwrap();
        // stored in target numbering order
        assert_eq!(fields.iter().collect::<Vec<_>>(), vec!["body", "title"]);
        assert_eq!(&DocumentTermVectors::from_fields(&fields).unwrap(), expected);
    }
}

#[test]
fn test_concurrent_clones() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    let docs = numbered_docs(0..40);
    write_documents(&storage, "_0", &infos, &docs);

    let reader = open_reader(&storage, "_0", &infos);
    std::thread::scope(|s| {
        for thread in 0..4u32 {
            let mut reader = reader.try_clone().unwrap();
            let docs = &docs;
            s.spawn(move || {
                for round in 0..10u32 {
                    let doc = (thread * 7 + round * 13) % 40;
                    assert_eq!(&read_document(&mut reader, doc), &docs[doc as usize]);
                }
            });
        }
    });
}

#[test]
fn test_wrong_document_count_is_corruption() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_0")
        .unwrap();
    for doc in numbered_docs(0..3) {
        writer.add_document(&doc, &infos).unwrap();
    }
    let err = writer.finish(2).unwrap_err();
    assert!(err.is_corruption());

    writer.abort();
    for name in TermVectorsFormat::new().files("_0").iter() {
        assert!(!storage.file_exists(name));
    }
}

#[test]
fn test_cooperative_merge_abort() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let infos = body_infos(FieldVectorOptions::with_positions_offsets());
    write_documents(&storage, "_0", &infos, &numbered_docs(0..10));

    let config = MergeConfig {
        allow_bulk_copy: false,
        check_abort_interval: 600,
        ..MergeConfig::default()
    };
    let mut state = MergeState::new(Arc::clone(&infos), &config);
    state
        .add_source(10, Some(open_reader(&storage, "_0", &infos)), None)
        .unwrap();
    state.abort_handle().abort();

    let mut writer = TermVectorsFormat::new()
        .vectors_writer(Arc::clone(&storage), "_1")
        .unwrap();
    let err = writer.merge(&mut state, &config).unwrap_err();
    assert!(matches!(err, TermStoreError::MergeAborted(_)));

    writer.abort();
    assert!(!storage.file_exists("_1.tvx"));
    assert!(storage.file_exists("_0.tvx"));
}

#[test]
fn test_random_round_trip() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir);
    let mut rng = StdRng::seed_from_u64(0x7e57);

    let field_options = [
        ("f0", FieldVectorOptions::terms_only()),
        ("f1", FieldVectorOptions::with_positions()),
        ("f2", FieldVectorOptions::with_offsets()),
        ("f3", FieldVectorOptions::with_positions_offsets()),
        ("f4", FieldVectorOptions::with_payloads()),
    ];
    let mut builder = FieldInfosBuilder::new();
    for (name, options) in field_options {
        builder.add(name, options);
    }
    let infos = Arc::new(builder.finish());

    let mut docs = Vec::new();
    for _ in 0..60 {
        let mut doc = DocumentTermVectors::new();
        for (name, options) in field_options {
            if rng.random_bool(0.3) {
                continue;
            }
            let mut position = 0u32;
            let mut offset = 0u32;
            for _ in 0..rng.random_range(1..30) {
                let len = rng.random_range(1..6);
                let term: Vec<u8> = (0..len).map(|_| rng.random_range(b'a'..=b'e')).collect();
                let payload: Vec<u8> = (0..rng.random_range(0..4)).map(|_| rng.random()).collect();
                position += rng.random_range(0..3);
                let start = offset + rng.random_range(0..4);
                let end = start + len as u32;
                offset = end;
                let payload = Some(payload.as_slice());
                doc.add_token(name, options, &term, position, start, end, payload);
            }
        }
        docs.push(doc);
    }
    write_documents(&storage, "_0", &infos, &docs);

    let mut reader = open_reader(&storage, "_0", &infos);
    assert_eq!(reader.num_docs(), 60);
    for (doc, expected) in docs.iter().enumerate() {
        assert_eq!(&read_document(&mut reader, doc as u32), expected);
    }
}
