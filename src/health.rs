//! Health Aggregator: folds a batch of [`ProbeResult`]s into persistent
//! [`HealthRecord`]s via a streak-based UP/DOWN state machine.
//!
//! The up-transition is sticky within the success path and the
//! down-transition is sticky within the failure path: once healthy, a
//! success-branch tick can only ever reaffirm `healthy = true` — clearing it
//! requires walking the failure branch to `fail_streak >= F`. This mirrors
//! the documented hysteresis exactly; it is intentional, not an oversight.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::model::{HealthRecord, ProbeResult};

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub success: u32,
    pub fail: u32,
}

/// Apply one tick's batch of probe results to the health map in place.
/// Skip-marked results (disabled candidates) are ignored entirely.
pub fn apply(
    health: &mut IndexMap<String, HealthRecord>,
    results: &[ProbeResult],
    tick_time: DateTime<Utc>,
    thresholds: Thresholds,
) {
    for result in results {
        if result.skip {
            continue;
        }
        let record = health.entry(result.id.clone()).or_insert_with(|| HealthRecord {
            label: result.label.clone(),
            ip: result.ip.clone(),
            healthy: false,
            last_latency_ms: None,
            last_error: None,
            last_ok: None,
            last_checked: tick_time,
            ok_streak: 0,
            fail_streak: 0,
        });

        record.label = result.label.clone();
        record.ip = result.ip.clone();
        record.last_checked = tick_time;

        if result.success {
            record.last_latency_ms = result.latency_ms;
            record.last_ok = Some(tick_time);
            record.last_error = None;
            record.fail_streak = 0;
            record.ok_streak += 1;
            if record.ok_streak >= thresholds.success {
                record.healthy = true;
            }
        } else {
            record.last_error = result.error.clone();
            record.last_latency_ms = None;
            record.ok_streak = 0;
            record.fail_streak += 1;
            if record.fail_streak >= thresholds.fail {
                record.healthy = false;
            }
        }
    }
}

/// Remove a candidate's health record. Called by admin `remove-config`.
pub fn remove(health: &mut IndexMap<String, HealthRecord>, id: &str) {
    health.remove(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds { success: 2, fail: 3 }
    }

    fn ok(id: &str, latency_ms: u64, _at: DateTime<Utc>) -> ProbeResult {
        ProbeResult {
            id: id.into(),
            label: "tokyo".into(),
            ip: "1.2.3.4".into(),
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
            skip: false,
        }
    }

    fn fail(id: &str, _at: DateTime<Utc>) -> ProbeResult {
        ProbeResult {
            id: id.into(),
            label: "tokyo".into(),
            ip: "1.2.3.4".into(),
            success: false,
            latency_ms: None,
            error: Some("timeout".into()),
            skip: false,
        }
    }

    #[test]
    fn scenario_hysteresis_up() {
        let mut health = IndexMap::new();
        let t1 = Utc::now();
        apply(&mut health, &[ok("A", 10, t1)], t1, thresholds());
        assert!(!health["A"].healthy);
        assert_eq!(health["A"].ok_streak, 1);

        let t2 = t1 + chrono::Duration::seconds(15);
        apply(&mut health, &[ok("A", 12, t2)], t2, thresholds());
        assert!(health["A"].healthy);
        assert_eq!(health["A"].ok_streak, 2);
        assert_eq!(health["A"].fail_streak, 0);
    }

    #[test]
    fn scenario_hysteresis_down() {
        let mut health = IndexMap::new();
        let t0 = Utc::now();
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        assert!(health["A"].healthy);

        for _ in 0..3 {
            apply(&mut health, &[fail("A", t0)], t0, thresholds());
        }

        let rec = &health["A"];
        assert!(!rec.healthy);
        assert_eq!(rec.fail_streak, 3);
        assert_eq!(rec.ok_streak, 0);
        assert!(rec.last_error.is_some());
    }

    #[test]
    fn up_is_sticky_within_success_path() {
        // Once healthy, further successes (even before S is re-reached from
        // zero) must never flip healthy back to false.
        let mut health = IndexMap::new();
        let t0 = Utc::now();
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        assert!(health["A"].healthy);
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        assert!(health["A"].healthy);
    }

    #[test]
    fn exactly_one_streak_is_positive_at_a_time() {
        let mut health = IndexMap::new();
        let t0 = Utc::now();
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        apply(&mut health, &[fail("A", t0)], t0, thresholds());
        let rec = &health["A"];
        assert!(rec.ok_streak == 0 || rec.fail_streak == 0);
        assert!(!(rec.ok_streak == 0 && rec.fail_streak == 0));
    }

    #[test]
    fn skip_marked_results_are_ignored() {
        let mut health = IndexMap::new();
        let t0 = Utc::now();
        let skip = ProbeResult::skipped("A", "tokyo", "1.2.3.4");
        apply(&mut health, &[skip], t0, thresholds());
        assert!(health.is_empty());
    }

    #[test]
    fn remove_deletes_the_record() {
        let mut health = IndexMap::new();
        let t0 = Utc::now();
        apply(&mut health, &[ok("A", 10, t0)], t0, thresholds());
        assert!(health.contains_key("A"));
        remove(&mut health, "A");
        assert!(!health.contains_key("A"));
    }
}
