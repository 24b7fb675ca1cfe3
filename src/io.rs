//! Small filesystem helpers shared by the distfile cache and the packager.

use std::time::{SystemTime, UNIX_EPOCH};

/// Unique-enough temporary file name: `{prefix}-{nanos}`.
///
/// Callers place it next to the final path so the closing rename stays on
/// one filesystem.
pub(crate) fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}-{n}")
}
