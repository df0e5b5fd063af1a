//! Method-specific selection over fetched records.

use crate::orchestrator::FetchMethod;
use crate::record::PostRecord;

/// Apply `method` to the materialized candidate set.
///
/// Records are expected in backend order (most recent first); only `Top` reorders them.
#[must_use]
pub fn filter_posts(method: &FetchMethod, mut records: Vec<PostRecord>) -> Vec<PostRecord> {
    match method {
        FetchMethod::All => records,
        FetchMethod::Recent { count } => {
            records.truncate(*count);
            records
        }
        FetchMethod::Top { percentage } => {
            let keep = records.len() * usize::from(*percentage) / 100;
            // `sort_by` is stable, so equal engagement keeps fetch order.
            records.sort_by(|a, b| b.engagement().cmp(&a.engagement()));
            records.truncate(keep);
            records
        }
        FetchMethod::DateRange { .. } => {
            records.retain(|record| method.admits(record));
            records
        }
    }
}
