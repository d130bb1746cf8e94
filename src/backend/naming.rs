//! Physical table names for metrics
//!
//! Metric names are used as table names when they fit. Longer names are
//! cut on a char boundary and suffixed with the metric's catalog ID, which
//! keeps two names that differ only past the cut apart.

use crate::backend::{BackendError, BackendResult};
use crate::series::MetricTableId;

/// Longest physical table name, in bytes
pub const MAX_TABLE_NAME_LEN: usize = 62;

/// Suffixed candidates tried before giving up
const MAX_SUFFIX_ATTEMPTS: u32 = 16;

/// Prefix of the SQL table holding a metric's samples
pub const DATA_TABLE_PREFIX: &str = "data_";

/// Pick a physical table name for `metric`
///
/// `taken` reports whether a candidate already belongs to another metric.
pub fn allocate_table_name<F>(
    metric: &str,
    id: MetricTableId,
    mut taken: F,
) -> BackendResult<String>
where
    F: FnMut(&str) -> BackendResult<bool>,
{
    if metric.len() <= MAX_TABLE_NAME_LEN && !taken(metric)? {
        return Ok(metric.to_string());
    }

    for attempt in 0..MAX_SUFFIX_ATTEMPTS {
        let suffix = if attempt == 0 {
            format!("_{}", id)
        } else {
            format!("_{}_{}", id, attempt)
        };
        let prefix = truncate(metric, MAX_TABLE_NAME_LEN.saturating_sub(suffix.len()));
        let candidate = format!("{}{}", prefix, suffix);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
    }

    Err(BackendError::TableNameConflict(metric.to_string()))
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// SQL table that stores the samples of `table_name`
pub fn data_table(table_name: &str) -> String {
    format!("{}{}", DATA_TABLE_PREFIX, table_name)
}

/// Prefix of the index over a data table
pub const DATA_INDEX_PREFIX: &str = "idx_";

/// Index over the samples of `table_name`; never collides with a data table
pub fn data_index(table_name: &str) -> String {
    format!("{}{}", DATA_INDEX_PREFIX, data_table(table_name))
}

/// Quote an SQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
