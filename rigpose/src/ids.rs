use std::sync::atomic::{AtomicU64, Ordering};

// Hierarchy ids are process-global, monotonically increasing counters. Adapters and mappings
// record the id of the hierarchy they were built against to detect instance changes.
static NEXT_HIERARCHY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_hierarchy_id() -> u64 {
    NEXT_HIERARCHY_ID.fetch_add(1, Ordering::Relaxed)
}
