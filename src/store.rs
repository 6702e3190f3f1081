//! Persistent Store: durable JSON-like documents on disk.
//!
//! One file per [`CandidateConfig`] keyed by id, a single health document, a
//! single domains document, and scalar files for mode/RR-index/timestamps.
//! Every write is atomic (write to a sibling temp file, then rename); reads
//! of missing files yield the documented defaults rather than erroring.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::{LbError, Result};
use crate::model::{CandidateConfig, DomainEntry, HealthRecord, Mode};

#[derive(Debug, Clone)]
pub struct Store {
    base_dir: PathBuf,
}

impl Store {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    fn configs_dir(&self) -> PathBuf {
        self.base_dir.join("configs")
    }

    // ── CandidateConfig ──────────────────────────────────────────────

    pub fn load_candidates(&self) -> Result<Vec<CandidateConfig>> {
        let dir = self.configs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|source| LbError::Io {
            path: dir.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| LbError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|source| LbError::Io {
                path: path.clone(),
                source,
            })?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        out.sort_by(|a: &CandidateConfig, b: &CandidateConfig| a.id.cmp(&b.id));
        Ok(out)
    }

    pub fn load_candidate(&self, id: &str) -> Result<Option<CandidateConfig>> {
        let path = self.candidate_path(id);
        read_json_opt(&path)
    }

    pub fn save_candidate(&self, candidate: &CandidateConfig) -> Result<()> {
        write_json_atomic(&self.candidate_path(&candidate.id), candidate)
    }

    pub fn delete_candidate(&self, id: &str) -> Result<()> {
        let path = self.candidate_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LbError::Io { path, source }),
        }
    }

    fn candidate_path(&self, id: &str) -> PathBuf {
        self.configs_dir().join(format!("{id}.json"))
    }

    // ── HealthRecord map ─────────────────────────────────────────────
    //
    // Insertion-ordered: the Selector's latency tie-break is defined over
    // iteration order of this map, so it must round-trip through disk
    // without reshuffling entries.

    pub fn load_health(&self) -> Result<IndexMap<String, HealthRecord>> {
        Ok(read_json_opt(&self.state_dir().join("health.json"))?.unwrap_or_default())
    }

    pub fn save_health(&self, health: &IndexMap<String, HealthRecord>) -> Result<()> {
        write_json_atomic(&self.state_dir().join("health.json"), health)
    }

    // ── DomainEntry map, keyed by fqdn ───────────────────────────────

    pub fn load_domains(&self) -> Result<HashMap<String, DomainEntry>> {
        Ok(read_json_opt(&self.state_dir().join("domains.json"))?.unwrap_or_default())
    }

    pub fn save_domains(&self, domains: &HashMap<String, DomainEntry>) -> Result<()> {
        write_json_atomic(&self.state_dir().join("domains.json"), domains)
    }

    // ── Scalars ──────────────────────────────────────────────────────

    pub fn load_mode(&self) -> Result<Mode> {
        match read_string_opt(&self.state_dir().join("mode"))? {
            Some(s) => s.trim().parse().map_err(|_| LbError::ConfigMissing("mode")),
            None => Ok(Mode::default()),
        }
    }

    pub fn save_mode(&self, mode: Mode) -> Result<()> {
        write_string_atomic(&self.state_dir().join("mode"), &mode.to_string())
    }

    pub fn load_rr_index(&self) -> Result<usize> {
        Ok(read_string_opt(&self.state_dir().join("rr_index"))?
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0))
    }

    pub fn save_rr_index(&self, index: usize) -> Result<()> {
        write_string_atomic(&self.state_dir().join("rr_index"), &index.to_string())
    }

    pub fn load_current_ip(&self) -> Result<Option<String>> {
        read_string_opt(&self.state_dir().join("current_ip"))
    }

    pub fn save_current_ip(&self, ip: &str) -> Result<()> {
        write_string_atomic(&self.state_dir().join("current_ip"), ip)
    }

    pub fn load_last_alert(&self) -> Result<DateTime<Utc>> {
        Ok(read_timestamp_opt(&self.state_dir().join("last_alert"))?
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap()))
    }

    pub fn save_last_alert(&self, at: DateTime<Utc>) -> Result<()> {
        write_string_atomic(&self.state_dir().join("last_alert"), &at.timestamp().to_string())
    }

    pub fn load_last_tick(&self, tick: &str) -> Result<DateTime<Utc>> {
        Ok(
            read_timestamp_opt(&self.state_dir().join(format!("last_{tick}")))?
                .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap()),
        )
    }

    pub fn save_last_tick(&self, tick: &str, at: DateTime<Utc>) -> Result<()> {
        write_string_atomic(
            &self.state_dir().join(format!("last_{tick}")),
            &at.timestamp().to_string(),
        )
    }

    pub fn load_bot_offset(&self) -> Result<i64> {
        Ok(read_string_opt(&self.state_dir().join("bot_offset"))?
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0))
    }

    pub fn save_bot_offset(&self, offset: i64) -> Result<()> {
        write_string_atomic(&self.state_dir().join("bot_offset"), &offset.to_string())
    }
}

fn read_timestamp_opt(path: &Path) -> Result<Option<DateTime<Utc>>> {
    Ok(read_string_opt(path)?
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0)))
}

fn read_string_opt(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LbError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LbError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

fn write_string_atomic(path: &Path, value: &str) -> Result<()> {
    write_bytes_atomic(path, value.as_bytes())
}

/// Write to a sibling `.tmp` file (unique per call to tolerate concurrent
/// writers) then rename over the destination — the rename is the atomic
/// commit point.
fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LbError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp_path, bytes).map_err(|source| LbError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| LbError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
