//! In-memory term vectors of a single document.
//!
//! [`DocumentTermVectors`] collects analyzed tokens per field and hands them
//! to [`TermVectorsWriter::add_document`](super::TermVectorsWriter::add_document)
//! in the order the writer requires. It can also be rebuilt from stored
//! vectors, which makes comparing what was written with what was read a
//! plain equality check.

use std::collections::BTreeMap;

use crate::codec::term_vectors::fields::TermVectorFields;
use crate::error::Result;
use crate::index::field_info::FieldVectorOptions;

/// One occurrence of a term.
///
/// Parts the field does not store are zero (offsets, position) or `None`
/// (payload).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occurrence {
    pub position: u32,
    pub start_offset: u32,
    pub end_offset: u32,
    pub payload: Option<Vec<u8>>,
}

/// Terms of one field, sorted bytewise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTermVectors {
    pub options: FieldVectorOptions,
    terms: BTreeMap<Vec<u8>, Vec<Occurrence>>,
}

impl FieldTermVectors {
    pub fn new(options: FieldVectorOptions) -> Self {
        FieldTermVectors {
            options,
            terms: BTreeMap::new(),
        }
    }

    pub fn num_terms(&self) -> u32 {
        self.terms.len() as u32
    }

    pub fn terms(&self) -> impl Iterator<Item = (&[u8], &[Occurrence])> {
        self.terms
            .iter()
            .map(|(term, occurrences)| (term.as_slice(), occurrences.as_slice()))
    }

    pub fn occurrences(&self, term: &[u8]) -> Option<&[Occurrence]> {
        self.terms.get(term).map(Vec::as_slice)
    }

    /// Add an occurrence, keeping the term's occurrences ordered by position.
    fn push(&mut self, term: &[u8], occurrence: Occurrence) {
        let occurrences = self.terms.entry(term.to_vec()).or_default();
        let at = occurrences.partition_point(|o| o.position <= occurrence.position);
        occurrences.insert(at, occurrence);
    }
}

/// Term vectors of one document, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTermVectors {
    fields: BTreeMap<String, FieldTermVectors>,
}

impl DocumentTermVectors {
    pub fn new() -> Self {
        DocumentTermVectors::default()
    }

    /// Record one token of `field`.
    ///
    /// The options given with the first token of a field apply to the whole
    /// field. Data those options do not store is dropped, and an empty
    /// payload counts as no payload.
    #[allow(clippy::too_many_arguments)]
    pub fn add_token(
        &mut self,
        field: &str,
        options: FieldVectorOptions,
        term: &[u8],
        position: u32,
        start_offset: u32,
        end_offset: u32,
        payload: Option<&[u8]>,
    ) {
        let entry = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| FieldTermVectors::new(options));
        let options = entry.options;

        let occurrence = Occurrence {
            position: if options.store_positions { position } else { 0 },
            start_offset: if options.store_offsets { start_offset } else { 0 },
            end_offset: if options.store_offsets { end_offset } else { 0 },
            payload: payload
                .filter(|p| options.store_positions && options.store_payloads && !p.is_empty())
                .map(<[u8]>::to_vec),
        };
        entry.push(term, occurrence);
    }

    pub fn field(&self, name: &str) -> Option<&FieldTermVectors> {
        self.fields.get(name)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldTermVectors)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode everything stored for one document.
    pub fn from_fields(vectors: &TermVectorFields) -> Result<Self> {
        let mut document = DocumentTermVectors::new();
        for name in vectors.iter() {
            let Some(terms) = vectors.terms(name)? else {
                continue;
            };
            let mut field = FieldTermVectors::new(FieldVectorOptions {
                store_term_vectors: true,
                store_positions: terms.has_positions(),
                store_offsets: terms.has_offsets(),
                store_payloads: terms.has_payloads(),
            });

            let mut terms_enum = terms.iterator()?;
            while let Some(term) = terms_enum.next()? {
                let term = term.to_vec();
                let freq = terms_enum.total_term_freq();
                let mut occurrences = Vec::with_capacity(freq as usize);
                match terms_enum.docs_and_positions(None) {
                    Some(mut postings) => {
                        postings.next_doc();
                        for _ in 0..freq {
                            let position = postings.next_position()?.unwrap_or(0);
                            occurrences.push(Occurrence {
                                position,
                                start_offset: postings.start_offset().unwrap_or(0),
                                end_offset: postings.end_offset().unwrap_or(0),
                                payload: postings.payload().map(<[u8]>::to_vec),
                            });
                        }
                    }
                    None => occurrences.resize(freq as usize, Occurrence::default()),
                }
                field.terms.insert(term, occurrences);
            }
            document.fields.insert(name.to_string(), field);
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_token_normalizes_unstored_data() {
        let mut doc = DocumentTermVectors::new();
        let terms_only = FieldVectorOptions::terms_only();
        let with_payloads = FieldVectorOptions::with_payloads();
        doc.add_token("title", terms_only, b"rust", 3, 10, 14, Some(&b"p"[..]));
        doc.add_token("body", with_payloads, b"rust", 7, 1, 5, Some(&b""[..]));

        let title = doc.field("title").unwrap();
        assert_eq!(title.occurrences(b"rust").unwrap(), &[Occurrence::default()]);

        let body = doc.field("body").unwrap();
        let occurrence = &body.occurrences(b"rust").unwrap()[0];
        assert_eq!(occurrence.position, 7);
        assert_eq!((occurrence.start_offset, occurrence.end_offset), (1, 5));
        assert_eq!(occurrence.payload, None);
    }

    #[test]
    fn test_terms_sorted_and_occurrences_ordered() {
        let options = FieldVectorOptions::with_positions();
        let mut doc = DocumentTermVectors::new();
        doc.add_token("body", options, b"zebra", 0, 0, 0, None);
        doc.add_token("body", options, b"apple", 5, 0, 0, None);
        doc.add_token("body", options, b"apple", 2, 0, 0, None);

        let body = doc.field("body").unwrap();
        let terms: Vec<&[u8]> = body.terms().map(|(term, _)| term).collect();
        assert_eq!(terms, vec![&b"apple"[..], &b"zebra"[..]]);
        let positions: Vec<u32> = body
            .occurrences(b"apple")
            .unwrap()
            .iter()
            .map(|o| o.position)
            .collect();
        assert_eq!(positions, vec![2, 5]);
        assert_eq!(doc.num_fields(), 1);
        assert!(!doc.is_empty());
    }
}
