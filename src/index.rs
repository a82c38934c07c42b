//! Segment-level index metadata shared by the codecs.
//!
//! - `field_info`: field names, numbers and term-vector options
//! - `live_docs`: per-segment liveness bitmaps
//! - `segment`: segment file naming

pub mod field_info;
pub mod live_docs;
pub mod segment;

pub use field_info::{FieldInfo, FieldInfos, FieldInfosBuilder, FieldVectorOptions};
pub use live_docs::LiveDocs;
