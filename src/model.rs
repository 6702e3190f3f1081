//! Core data model: the plain-data entities the Persistent Store durably
//! round-trips and the value objects components pass between each other.

use serde::{Deserialize, Serialize};

/// One proxy choice under consideration.
///
/// `outbound` is opaque to everything except the Probe Runner's template
/// renderer — the core never interprets its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateConfig {
    pub id: String,
    pub label: String,
    pub ip: String,
    pub enabled: bool,
    #[serde(rename = "config_json")]
    pub outbound: serde_json::Value,
}

/// Selection policy, process-wide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Best,
    Rr,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Best => write!(f, "best"),
            Mode::Rr => write!(f, "rr"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Mode::Best),
            "rr" => Ok(Mode::Rr),
            other => Err(format!("unknown mode {other:?}, expected \"best\" or \"rr\"")),
        }
    }
}

/// Per-candidate rolling health, keyed by candidate id in the document map.
///
/// Invariant: at any instant exactly one of `ok_streak`/`fail_streak` is
/// positive. Up is sticky within the success path, down is sticky within
/// the failure path — see the Health Aggregator for the exact transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HealthRecord {
    pub label: String,
    pub ip: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ok: Option<chrono::DateTime<chrono::Utc>>,
    pub last_checked: chrono::DateTime<chrono::Utc>,
    pub ok_streak: u32,
    pub fail_streak: u32,
}

/// One managed A-record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomainEntry {
    pub fqdn: String,
    pub zone_id: String,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
}

/// Output of one Probe Runner invocation for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub id: String,
    pub label: String,
    pub ip: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Disabled candidates are never passed to the Probe Runner; the
    /// Orchestrator emits this synthetic marker instead and the Aggregator
    /// ignores it.
    #[serde(default)]
    pub skip: bool,
}

impl ProbeResult {
    pub fn skipped(id: impl Into<String>, label: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ip: ip.into(),
            success: false,
            latency_ms: None,
            error: None,
            skip: true,
        }
    }
}

/// Outcome of a DNS Reconciler update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    Unchanged,
    Throttled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        assert_eq!("best".parse::<Mode>().unwrap(), Mode::Best);
        assert_eq!("rr".parse::<Mode>().unwrap(), Mode::Rr);
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_display_matches_wire_form() {
        assert_eq!(Mode::Best.to_string(), "best");
        assert_eq!(Mode::Rr.to_string(), "rr");
    }

    #[test]
    fn candidate_config_serializes_outbound_as_config_json() {
        let candidate = CandidateConfig {
            id: "c1".into(),
            label: "tokyo".into(),
            ip: "1.2.3.4".into(),
            enabled: true,
            outbound: serde_json::json!({"type": "vmess"}),
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert!(value.get("config_json").is_some());
        assert!(value.get("outbound").is_none());
    }
}
