//! On-disk codecs.
//!
//! - `codec_util`: file headers shared by every codec file
//! - `term_vectors`: the per-document term-vector store

pub mod codec_util;
pub mod term_vectors;
