//! Segment file naming.

/// Name of a segment file: `<segment>.<ext>`, or `<segment>_<suffix>.<ext>`
/// when a suffix is given.
pub fn segment_file_name(segment: &str, suffix: &str, ext: &str) -> String {
    if suffix.is_empty() {
        format!("{segment}.{ext}")
    } else {
        format!("{segment}_{suffix}.{ext}")
    }
}
