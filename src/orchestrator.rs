//! Orchestrator: owns every state mutation. Hosts the two tick entry points
//! (`monitor_once`, `rotate_once`) and the admin operations behind the
//! Command Surface (§4.9) — add/remove/enable/disable config, set-domain,
//! set-mode, list, status, self-check.
//!
//! Every other component here is a pure function or a thin I/O wrapper over
//! a snapshot; this module is the only place that reads a document, mutates
//! it, and writes it back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::alert::{Alerter, Notifier};
use crate::config::Config;
use crate::dns::{DnsProvider, Reconciler};
use crate::error::{LbError, Result};
use crate::health::{self, Thresholds};
use crate::lock::ProcessMutex;
use crate::logging::EventLog;
use crate::model::{CandidateConfig, DomainEntry, HealthRecord, Mode, ProbeResult};
use crate::probe::ProbeRunner;
use crate::select;
use crate::store::Store;

/// Outcome of a tick invocation — never an [`LbError`], since skipped ticks
/// and policy failures are documented non-error paths (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Interval guard or lock contention suppressed this invocation.
    Skipped,
    /// The tick ran to completion, including the case where there were no
    /// enabled candidates or managed domains to act on.
    Completed,
    /// The tick ran but selection came up empty; an alert was fired and the
    /// command surface should report a non-zero exit.
    PolicyFailure(String),
}

impl TickOutcome {
    pub fn is_policy_failure(&self) -> bool {
        matches!(self, TickOutcome::PolicyFailure(_))
    }
}

#[derive(Debug, Clone)]
pub struct CandidateSummary {
    pub id: String,
    pub label: String,
    pub ip: String,
    pub enabled: bool,
    pub health: Option<HealthRecord>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mode: Mode,
    pub current_ip: Option<String>,
    pub domains: Vec<DomainEntry>,
    pub candidates: Vec<CandidateSummary>,
}

#[derive(Debug, Clone)]
pub struct SelfCheckReport {
    pub probe_proxy_found: bool,
    pub hetzner_token_present: bool,
    pub template_present: bool,
    pub telegram_configured: bool,
}

impl SelfCheckReport {
    pub fn is_healthy(&self) -> bool {
        self.probe_proxy_found && self.hetzner_token_present && self.template_present
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    store: Store,
    mutex: ProcessMutex,
    event_log: EventLog,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>) -> Self {
        let store = Store::new(config.base_dir.clone());
        let mutex = ProcessMutex::new(config.state_dir());
        let event_log = EventLog::with_rotation_policy(
            config.logs_dir().join("dnslb.log"),
            config.log_rotation_mb,
            config.log_max_archives,
        );
        Self { config, store, mutex, event_log }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── monitor_once ─────────────────────────────────────────────────

    pub async fn monitor_once(
        &self,
        probe_runner: Arc<ProbeRunner>,
        dns_provider: &dyn DnsProvider,
        notifier: &dyn Notifier,
    ) -> Result<TickOutcome> {
        let now = Utc::now();
        if !self.interval_elapsed("monitor", now, self.config.monitor_interval)? {
            tracing::info!("monitor tick skipped: interval not elapsed");
            return Ok(TickOutcome::Skipped);
        }

        let outcome = self
            .mutex
            .with_lock("monitor", || self.run_monitor(probe_runner, dns_provider, notifier, now))
            .await?;

        let outcome = outcome.unwrap_or(TickOutcome::Skipped);
        let _ = self.event_log.write("INFO", &format!("monitor_once: {outcome:?}"));
        Ok(outcome)
    }

    async fn run_monitor(
        &self,
        probe_runner: Arc<ProbeRunner>,
        dns_provider: &dyn DnsProvider,
        notifier: &dyn Notifier,
        tick_time: chrono::DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let candidates = self.store.load_candidates()?;
        let enabled: Vec<CandidateConfig> = candidates.iter().filter(|c| c.enabled).cloned().collect();

        if candidates.is_empty() {
            tracing::info!("no configs");
            self.store.save_last_tick("monitor", tick_time)?;
            return Ok(TickOutcome::Completed);
        }

        let mut results: Vec<ProbeResult> = candidates
            .iter()
            .filter(|c| !c.enabled)
            .map(|c| ProbeResult::skipped(&c.id, &c.label, &c.ip))
            .collect();

        if !enabled.is_empty() {
            let mut tasks = tokio::task::JoinSet::new();
            for candidate in enabled {
                let runner = Arc::clone(&probe_runner);
                tasks.spawn(async move { runner.probe(&candidate).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => tracing::warn!(error = %e, "probe task panicked"),
                }
            }
        }

        let mut health = self.store.load_health()?;
        health::apply(&mut health, &results, tick_time, self.thresholds());
        self.store.save_health(&health)?;

        let mode = self.store.load_mode()?;
        if mode != Mode::Best {
            self.store.save_last_tick("monitor", tick_time)?;
            return Ok(TickOutcome::Completed);
        }

        let outcome = match select::best(&health) {
            None => {
                let alerter = Alerter::new(notifier, &self.store, self.config.alert_cooldown);
                alerter.alert("best-IP unavailable").await?;
                TickOutcome::PolicyFailure("best-IP unavailable".into())
            }
            Some(ip) => {
                self.reconcile_domains(dns_provider, &ip).await?;
                TickOutcome::Completed
            }
        };

        self.store.save_last_tick("monitor", tick_time)?;
        Ok(outcome)
    }

    // ── rotate_once ──────────────────────────────────────────────────

    pub async fn rotate_once(
        &self,
        dns_provider: &dyn DnsProvider,
        notifier: &dyn Notifier,
    ) -> Result<TickOutcome> {
        let now = Utc::now();
        if !self.interval_elapsed("rotate", now, self.config.lb_interval)? {
            tracing::info!("rotate tick skipped: interval not elapsed");
            return Ok(TickOutcome::Skipped);
        }

        let outcome = self
            .mutex
            .with_lock("rotate", || self.run_rotate(dns_provider, notifier, now))
            .await?;

        let outcome = outcome.unwrap_or(TickOutcome::Skipped);
        let _ = self.event_log.write("INFO", &format!("rotate_once: {outcome:?}"));
        Ok(outcome)
    }

    async fn run_rotate(
        &self,
        dns_provider: &dyn DnsProvider,
        notifier: &dyn Notifier,
        tick_time: chrono::DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let health = self.store.load_health()?;
        let index = self.store.load_rr_index()?;

        let (selected, next_index) = select::rotate(&health, index);
        self.store.save_rr_index(next_index)?;

        let outcome = match selected {
            None => {
                let alerter = Alerter::new(notifier, &self.store, self.config.alert_cooldown);
                alerter.alert("no healthy IPs").await?;
                TickOutcome::PolicyFailure("no healthy IPs".into())
            }
            Some(ip) => {
                self.reconcile_domains(dns_provider, &ip).await?;
                TickOutcome::Completed
            }
        };

        self.store.save_last_tick("rotate", tick_time)?;
        let _ = self.event_log.rotate_if_needed();
        Ok(outcome)
    }

    async fn reconcile_domains(&self, dns_provider: &dyn DnsProvider, ip: &str) -> Result<()> {
        let reconciler = Reconciler::new(
            dns_provider,
            &self.store,
            self.config.default_ttl,
            self.config.dns_min_update_interval,
        );
        let domains = self.store.load_domains()?;
        for fqdn in domains.keys() {
            match reconciler.update_record(fqdn, ip).await {
                Ok(outcome) => tracing::info!(fqdn, ?outcome, "dns reconcile"),
                Err(e) => tracing::warn!(fqdn, error = %e, "dns reconcile failed, continuing"),
            }
        }
        Ok(())
    }

    fn interval_elapsed(
        &self,
        tick: &str,
        now: chrono::DateTime<Utc>,
        interval: Duration,
    ) -> Result<bool> {
        let last = self.store.load_last_tick(tick)?;
        Ok(now - last >= chrono::Duration::from_std(interval).unwrap())
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            success: self.config.success_threshold,
            fail: self.config.fail_threshold,
        }
    }

    // ── Admin commands (§4.9) ───────────────────────────────────────

    pub fn list_candidates(&self) -> Result<Vec<CandidateSummary>> {
        let candidates = self.store.load_candidates()?;
        let health = self.store.load_health()?;
        Ok(candidates
            .into_iter()
            .map(|c| CandidateSummary {
                health: health.get(&c.id).cloned(),
                id: c.id,
                label: c.label,
                ip: c.ip,
                enabled: c.enabled,
            })
            .collect())
    }

    pub fn add_config(&self, label: String, ip: String, outbound: serde_json::Value) -> Result<CandidateConfig> {
        let candidate = CandidateConfig {
            id: Uuid::new_v4().to_string(),
            label,
            ip,
            enabled: true,
            outbound,
        };
        self.store.save_candidate(&candidate)?;
        Ok(candidate)
    }

    pub fn remove_config(&self, id: &str) -> Result<()> {
        self.store.load_candidate(id)?.ok_or_else(|| LbError::UnknownCandidate(id.to_string()))?;
        self.store.delete_candidate(id)?;
        let mut health = self.store.load_health()?;
        health::remove(&mut health, id);
        self.store.save_health(&health)?;
        Ok(())
    }

    pub fn enable_config(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true)
    }

    pub fn disable_config(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut candidate = self
            .store
            .load_candidate(id)?
            .ok_or_else(|| LbError::UnknownCandidate(id.to_string()))?;
        candidate.enabled = enabled;
        self.store.save_candidate(&candidate)
    }

    pub async fn set_domain(&self, dns_provider: &dyn DnsProvider, fqdn: &str) -> Result<DomainEntry> {
        let existing = self.store.load_domains()?;
        if let Some(entry) = existing.get(fqdn) {
            return Ok(entry.clone());
        }
        let reconciler = Reconciler::new(
            dns_provider,
            &self.store,
            self.config.default_ttl,
            self.config.dns_min_update_interval,
        );
        reconciler.set_domain(fqdn).await
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.store.save_mode(mode)
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            mode: self.store.load_mode()?,
            current_ip: self.store.load_current_ip()?,
            domains: self.store.load_domains()?.into_values().collect(),
            candidates: self.list_candidates()?,
        })
    }

    pub fn self_check(&self) -> SelfCheckReport {
        let probe_proxy_found = crate::probe::resolve_probe_binary(self.config.probe_proxy_bin.as_deref()).is_some();
        SelfCheckReport {
            probe_proxy_found,
            hetzner_token_present: self.config.hetzner_dns_api_token.is_some(),
            template_present: self.config.probe_template_path().exists(),
            telegram_configured: self.config.telegram_bot_token.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullNotifier;
    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FakeDnsProvider {
        zones: Vec<crate::dns::Zone>,
        put_calls: Mutex<u32>,
    }

    #[async_trait]
    impl DnsProvider for FakeDnsProvider {
        async fn list_zones(&self) -> Result<Vec<crate::dns::Zone>> {
            Ok(self.zones.clone())
        }
        async fn list_records(&self, _zone_id: &str) -> Result<Vec<crate::dns::DnsRecord>> {
            Ok(vec![])
        }
        async fn create_record(&self, _zone_id: &str, name: &str, _value: &str, _ttl: u32) -> Result<String> {
            Ok(format!("rec-{name}"))
        }
        async fn update_record(
            &self,
            _record_id: &str,
            _zone_id: &str,
            _name: &str,
            _value: &str,
            _ttl: u32,
        ) -> Result<()> {
            *self.put_calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn orchestrator(base_dir: std::path::PathBuf) -> Orchestrator {
        let config = Config::load(base_dir).unwrap();
        Orchestrator::new(Arc::new(config))
    }

    #[test]
    fn add_then_remove_config_round_trips_configs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let before: Vec<_> = std::fs::read_dir(orch.config.configs_dir()).ok().into_iter().flatten().collect();
        assert!(before.is_empty());

        let candidate = orch.add_config("tokyo".into(), "1.2.3.4".into(), serde_json::json!({})).unwrap();
        assert_eq!(orch.list_candidates().unwrap().len(), 1);

        orch.remove_config(&candidate.id).unwrap();
        let after: Vec<_> = std::fs::read_dir(orch.config.configs_dir()).unwrap().collect();
        assert!(after.is_empty());
    }

    #[test]
    fn remove_config_deletes_health_record() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let candidate = orch.add_config("a".into(), "1.1.1.1".into(), serde_json::json!({})).unwrap();

        let mut health = IndexMap::new();
        health.insert(
            candidate.id.clone(),
            HealthRecord {
                label: "a".into(),
                ip: "1.1.1.1".into(),
                healthy: true,
                last_latency_ms: Some(10),
                last_error: None,
                last_ok: Some(Utc::now()),
                last_checked: Utc::now(),
                ok_streak: 2,
                fail_streak: 0,
            },
        );
        orch.store.save_health(&health).unwrap();

        orch.remove_config(&candidate.id).unwrap();
        assert!(!orch.store.load_health().unwrap().contains_key(&candidate.id));
    }

    #[test]
    fn enable_disable_toggle_independent_of_health() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let candidate = orch.add_config("a".into(), "1.1.1.1".into(), serde_json::json!({})).unwrap();

        orch.disable_config(&candidate.id).unwrap();
        assert!(!orch.store.load_candidate(&candidate.id).unwrap().unwrap().enabled);

        orch.enable_config(&candidate.id).unwrap();
        assert!(orch.store.load_candidate(&candidate.id).unwrap().unwrap().enabled);
    }

    #[test]
    fn remove_unknown_candidate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        assert!(orch.remove_config("no-such-id").is_err());
    }

    #[tokio::test]
    async fn monitor_once_with_empty_candidate_set_completes_without_probing() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let probe_runner = Arc::new(ProbeRunner::new(crate::probe::ProbeRunnerConfig {
            probe_proxy_bin: Some("definitely-not-a-real-binary".into()),
            template_path: dir.path().join("template.json"),
            work_dir: dir.path().join("work"),
            liveness_urls: vec![],
            retries: 1,
            request_timeout: Duration::from_secs(1),
        }));
        let dns = FakeDnsProvider { zones: vec![], put_calls: Mutex::new(0) };
        let notifier = NullNotifier;

        let outcome = orch.monitor_once(probe_runner, &dns, &notifier).await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed);
    }

    #[tokio::test]
    async fn monitor_once_twice_within_interval_is_a_no_op_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let probe_runner = Arc::new(ProbeRunner::new(crate::probe::ProbeRunnerConfig {
            probe_proxy_bin: Some("definitely-not-a-real-binary".into()),
            template_path: dir.path().join("template.json"),
            work_dir: dir.path().join("work"),
            liveness_urls: vec![],
            retries: 1,
            request_timeout: Duration::from_secs(1),
        }));
        let dns = FakeDnsProvider { zones: vec![], put_calls: Mutex::new(0) };
        let notifier = NullNotifier;

        let first = orch.monitor_once(Arc::clone(&probe_runner), &dns, &notifier).await.unwrap();
        assert_eq!(first, TickOutcome::Completed);
        let second = orch.monitor_once(probe_runner, &dns, &notifier).await.unwrap();
        assert_eq!(second, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn rotate_once_with_no_healthy_candidates_fires_policy_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let dns = FakeDnsProvider { zones: vec![], put_calls: Mutex::new(0) };
        let notifier = NullNotifier;

        let outcome = orch.rotate_once(&dns, &notifier).await.unwrap();
        assert!(outcome.is_policy_failure());
    }

    #[tokio::test]
    async fn rotate_once_single_healthy_candidate_points_domain_and_resets_index() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let dns = FakeDnsProvider {
            zones: vec![crate::dns::Zone { id: "z1".into(), name: "example.com".into() }],
            put_calls: Mutex::new(0),
        };
        let notifier = NullNotifier;

        orch.set_domain(&dns, "lb.example.com").await.unwrap();

        let mut health = IndexMap::new();
        health.insert(
            "c1".to_string(),
            HealthRecord {
                label: "a".into(),
                ip: "9.9.9.9".into(),
                healthy: true,
                last_latency_ms: Some(10),
                last_error: None,
                last_ok: Some(Utc::now()),
                last_checked: Utc::now(),
                ok_streak: 2,
                fail_streak: 0,
            },
        );
        orch.store.save_health(&health).unwrap();

        let outcome = orch.rotate_once(&dns, &notifier).await.unwrap();
        assert_eq!(outcome, TickOutcome::Completed);
        assert_eq!(orch.store.load_rr_index().unwrap(), 0);
        assert_eq!(*dns.put_calls.lock().unwrap(), 1);
        assert_eq!(orch.store.load_current_ip().unwrap().as_deref(), Some("9.9.9.9"));
    }

    #[tokio::test]
    async fn rotate_once_drives_log_rotation_when_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf());
        let log_path = orch.config.logs_dir().join("dnslb.log");
        std::fs::create_dir_all(orch.config.logs_dir()).unwrap();
        std::fs::write(&log_path, vec![b'x'; (orch.config.log_rotation_mb * 1024 * 1024 + 1) as usize]).unwrap();

        let dns = FakeDnsProvider { zones: vec![], put_calls: Mutex::new(0) };
        let notifier = NullNotifier;
        orch.rotate_once(&dns, &notifier).await.unwrap();

        let archived = std::fs::read_dir(orch.config.logs_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(".gz"));
        assert!(archived, "oversized log should have been rotated during rotate_once");
    }
}
