//! Selector: pure functions over a health-map snapshot. Neither function
//! mutates or performs I/O — the Orchestrator owns persisting whatever they
//! return.

use indexmap::IndexMap;

use crate::model::HealthRecord;

/// The healthy record with the minimum `last_latency_ms`. Ties are broken by
/// iteration order of `health` (insertion order in the persisted document),
/// never by IP or label — callers must pass the map exactly as loaded, not
/// re-sorted.
pub fn best(health: &IndexMap<String, HealthRecord>) -> Option<String> {
    health
        .values()
        .filter(|record| record.healthy)
        .filter_map(|record| record.last_latency_ms.map(|latency| (latency, &record.ip)))
        .min_by_key(|(latency, _)| *latency)
        .map(|(_, ip)| ip.clone())
}

/// Round-robins over the sorted-unique set of healthy IPs. `index` is taken
/// modulo the list length both to select and to compute the next index, so
/// any previously-persisted index remains valid even after candidates are
/// added or removed.
pub fn rotate(health: &IndexMap<String, HealthRecord>, index: usize) -> (Option<String>, usize) {
    let mut ips: Vec<&str> = health
        .values()
        .filter(|record| record.healthy)
        .map(|record| record.ip.as_str())
        .collect();
    ips.sort_unstable();
    ips.dedup();

    if ips.is_empty() {
        return (None, index);
    }

    let selected = index % ips.len();
    (Some(ips[selected].to_string()), (index + 1) % ips.len())
}
