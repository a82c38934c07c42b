//! Liveness bitmaps.
//!
//! A segment's documents are never rewritten in place; deleting one clears
//! its bit here and the merge that next rewrites the segment drops it.

use bit_vec::BitVec;

use crate::error::{Result, TermStoreError};

/// One bit per document of a segment, set while the document is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDocs {
    bits: BitVec,
    num_deleted: u32,
}

impl LiveDocs {
    /// All `max_doc` documents live.
    pub fn new_all_live(max_doc: u32) -> Self {
        LiveDocs {
            bits: BitVec::from_elem(max_doc as usize, true),
            num_deleted: 0,
        }
    }

    /// Mark a document deleted. Returns `false` if it already was.
    pub fn delete(&mut self, doc_id: u32) -> Result<bool> {
        let idx = doc_id as usize;
        match self.bits.get(idx) {
            None => Err(TermStoreError::invalid_argument(format!(
                "document {doc_id} is out of range [0, {})",
                self.bits.len()
            ))),
            Some(false) => Ok(false),
            Some(true) => {
                self.bits.set(idx, false);
                self.num_deleted += 1;
                Ok(true)
            }
        }
    }

    /// Whether `doc_id` is live. Out-of-range documents are not.
    pub fn is_live(&self, doc_id: u32) -> bool {
        self.bits.get(doc_id as usize).unwrap_or(false)
    }

    pub fn max_doc(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn num_live(&self) -> u32 {
        self.max_doc() - self.num_deleted
    }

    pub fn num_deleted(&self) -> u32 {
        self.num_deleted
    }

    pub fn has_deletions(&self) -> bool {
        self.num_deleted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_documents() {
        let mut live = LiveDocs::new_all_live(5);
        assert!(!live.has_deletions());
        assert!(live.delete(1).unwrap());
        assert!(!live.delete(1).unwrap());
        assert!(live.delete(4).unwrap());

        assert!(live.is_live(0));
        assert!(!live.is_live(1));
        assert!(!live.is_live(4));
        assert!(!live.is_live(5));
        assert_eq!(live.num_live(), 3);
        assert_eq!(live.num_deleted(), 2);
        assert!(live.has_deletions());
    }

    #[test]
    fn test_delete_out_of_range() {
        let mut live = LiveDocs::new_all_live(2);
        assert!(live.delete(2).is_err());
    }
}
