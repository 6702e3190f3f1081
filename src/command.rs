//! Command Surface: the single set of handler functions shared by the CLI
//! binary and the Telegram bot's dispatcher — neither owns its own copy of
//! this logic, per the "thin shell" framing of the bot.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::alert::Notifier;
use crate::bot::CommandDispatcher;
use crate::dns::DnsProvider;
use crate::model::Mode;
use crate::orchestrator::{Orchestrator, TickOutcome};
use crate::probe::ProbeRunner;

pub struct Handlers {
    pub orchestrator: Arc<Orchestrator>,
    pub dns_provider: Arc<dyn DnsProvider>,
    pub probe_runner: Arc<ProbeRunner>,
    pub notifier: Arc<dyn Notifier>,
}

impl Handlers {
    pub async fn monitor_once(&self) -> Result<TickOutcome> {
        Ok(self
            .orchestrator
            .monitor_once(Arc::clone(&self.probe_runner), self.dns_provider.as_ref(), self.notifier.as_ref())
            .await?)
    }

    pub async fn rotate_once(&self) -> Result<TickOutcome> {
        Ok(self
            .orchestrator
            .rotate_once(self.dns_provider.as_ref(), self.notifier.as_ref())
            .await?)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<String> {
        self.orchestrator.set_mode(mode)?;
        Ok(format!("mode set to {mode}"))
    }

    pub fn list(&self) -> Result<String> {
        let candidates = self.orchestrator.list_candidates()?;
        if candidates.is_empty() {
            return Ok("no configs".to_string());
        }
        let mut out = String::new();
        for c in candidates {
            let snippet = match c.health {
                Some(h) if h.healthy => format!(
                    "up {}",
                    h.last_latency_ms.map(|l| format!("{l}ms")).unwrap_or_else(|| "-".into())
                ),
                Some(_) => "down".to_string(),
                None => "unprobed".to_string(),
            };
            out.push_str(&format!(
                "{:<36} {:<16} {:<15} {:<8} {}\n",
                c.id,
                c.label,
                c.ip,
                if c.enabled { "enabled" } else { "disabled" },
                snippet,
            ));
        }
        Ok(out)
    }

    pub fn add_config(&self, label: String, ip: String, outbound_json: &str) -> Result<String> {
        let outbound: serde_json::Value =
            serde_json::from_str(outbound_json).context("outbound descriptor is not valid JSON")?;
        let candidate = self.orchestrator.add_config(label, ip, outbound)?;
        Ok(format!("added candidate {}", candidate.id))
    }

    pub fn remove_config(&self, id: &str) -> Result<String> {
        self.orchestrator.remove_config(id)?;
        Ok(format!("removed candidate {id}"))
    }

    pub fn enable_config(&self, id: &str) -> Result<String> {
        self.orchestrator.enable_config(id)?;
        Ok(format!("enabled candidate {id}"))
    }

    pub fn disable_config(&self, id: &str) -> Result<String> {
        self.orchestrator.disable_config(id)?;
        Ok(format!("disabled candidate {id}"))
    }

    pub async fn set_domain(&self, fqdn: &str) -> Result<String> {
        let entry = self.orchestrator.set_domain(self.dns_provider.as_ref(), fqdn).await?;
        Ok(format!(
            "domain {} managed (zone {}, record {})",
            entry.fqdn, entry.zone_id, entry.record_id
        ))
    }

    pub fn status(&self) -> Result<String> {
        let report = self.orchestrator.status()?;
        let mut out = format!(
            "mode: {}\ncurrent_ip: {}\n",
            report.mode,
            report.current_ip.as_deref().unwrap_or("-")
        );
        out.push_str("domains:\n");
        for d in &report.domains {
            out.push_str(&format!(
                "  {} -> {} (updated {})\n",
                d.fqdn,
                d.last_ip.as_deref().unwrap_or("-"),
                d.last_update.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()),
            ));
        }
        out.push_str("candidates:\n");
        for c in &report.candidates {
            out.push_str(&format!(
                "  {} {} {} {}\n",
                c.id,
                c.label,
                c.ip,
                if c.enabled { "enabled" } else { "disabled" },
            ));
        }
        Ok(out)
    }

    pub fn self_check(&self) -> Result<String> {
        let report = self.orchestrator.self_check();
        let mut out = String::new();
        out.push_str(&format!(
            "probe proxy binary: {}\n",
            if report.probe_proxy_found { "found" } else { "NOT FOUND" }
        ));
        out.push_str(&format!(
            "HETZNER_DNS_API_TOKEN: {}\n",
            if report.hetzner_token_present { "set" } else { "MISSING" }
        ));
        out.push_str(&format!(
            "probe template: {}\n",
            if report.template_present { "present" } else { "MISSING" }
        ));
        out.push_str(&format!(
            "telegram bot: {}\n",
            if report.telegram_configured { "configured" } else { "not configured" }
        ));
        if !report.is_healthy() {
            anyhow::bail!("{out}self-check failed");
        }
        Ok(out)
    }
}

pub fn describe_outcome(tick: &str, outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::Skipped => format!("{tick}: skipped (interval not elapsed or lock held)"),
        TickOutcome::Completed => format!("{tick}: completed"),
        TickOutcome::PolicyFailure(reason) => format!("{tick}: policy failure - {reason}"),
    }
}

/// Translates a single Telegram chat-command line into a [`Handlers`] call,
/// mirroring the Command Surface 1:1 — this is the entire bot, by design.
pub struct CommandSurfaceDispatcher {
    pub handlers: Arc<Handlers>,
}

#[async_trait]
impl CommandDispatcher for CommandSurfaceDispatcher {
    async fn dispatch(&self, command_line: &str) -> String {
        match dispatch_bot_command(&self.handlers, command_line).await {
            Ok(reply) => reply,
            Err(e) => format!("error: {e}"),
        }
    }
}

async fn dispatch_bot_command(handlers: &Handlers, line: &str) -> Result<String> {
    let mut parts = line.trim().splitn(2, ' ');
    let command = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("").trim();

    match command {
        "/status" => handlers.status(),
        "/list" => handlers.list(),
        "/set_mode" => {
            let mode: Mode = arg.parse().map_err(anyhow::Error::msg)?;
            handlers.set_mode(mode)
        }
        "/enable" => handlers.enable_config(arg),
        "/disable" => handlers.disable_config(arg),
        "/monitor_now" => {
            let outcome = handlers.monitor_once().await?;
            Ok(describe_outcome("monitor_once", &outcome))
        }
        "/rotate_now" => {
            let outcome = handlers.rotate_once().await?;
            Ok(describe_outcome("rotate_once", &outcome))
        }
        "" => Ok("no command given".to_string()),
        other => Ok(format!("unknown command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dns::{DnsRecord, Zone};
    use crate::error::Result as LbResult;
    use std::time::Duration;

    struct NullNotifier;
    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _message: &str) -> LbResult<()> {
            Ok(())
        }
    }

    struct NullDnsProvider;
    #[async_trait]
    impl DnsProvider for NullDnsProvider {
        async fn list_zones(&self) -> LbResult<Vec<Zone>> {
            Ok(vec![])
        }
        async fn list_records(&self, _zone_id: &str) -> LbResult<Vec<DnsRecord>> {
            Ok(vec![])
        }
        async fn create_record(&self, _zone_id: &str, name: &str, _value: &str, _ttl: u32) -> LbResult<String> {
            Ok(format!("rec-{name}"))
        }
        async fn update_record(
            &self,
            _record_id: &str,
            _zone_id: &str,
            _name: &str,
            _value: &str,
            _ttl: u32,
        ) -> LbResult<()> {
            Ok(())
        }
    }

    fn handlers(base_dir: std::path::PathBuf) -> Handlers {
        let config = Arc::new(Config::load(base_dir).unwrap());
        let orchestrator = Arc::new(Orchestrator::new(config.clone()));
        let probe_runner = Arc::new(ProbeRunner::new(crate::probe::ProbeRunnerConfig {
            probe_proxy_bin: Some("definitely-not-a-real-binary".into()),
            template_path: config.probe_template_path(),
            work_dir: config.state_dir().join("probe-work"),
            liveness_urls: vec![],
            retries: 1,
            request_timeout: Duration::from_secs(1),
        }));
        Handlers {
            orchestrator,
            dns_provider: Arc::new(NullDnsProvider),
            probe_runner,
            notifier: Arc::new(NullNotifier),
        }
    }

    #[test]
    fn list_reports_no_configs_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let h = handlers(dir.path().to_path_buf());
        assert_eq!(h.list().unwrap(), "no configs");
    }

    #[test]
    fn add_config_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let h = handlers(dir.path().to_path_buf());
        assert!(h.add_config("tokyo".into(), "1.2.3.4".into(), "not json").is_err());
    }

    #[test]
    fn add_then_list_shows_the_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let h = handlers(dir.path().to_path_buf());
        h.add_config("tokyo".into(), "1.2.3.4".into(), "{}").unwrap();
        let listing = h.list().unwrap();
        assert!(listing.contains("tokyo"));
        assert!(listing.contains("1.2.3.4"));
        assert!(listing.contains("unprobed"));
    }

    #[test]
    fn self_check_fails_without_hetzner_token_or_template() {
        let dir = tempfile::tempdir().unwrap();
        let h = handlers(dir.path().to_path_buf());
        assert!(h.self_check().is_err());
    }

    #[tokio::test]
    async fn bot_dispatch_unknown_command_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let h = Arc::new(handlers(dir.path().to_path_buf()));
        let dispatcher = CommandSurfaceDispatcher { handlers: h };
        let reply = dispatcher.dispatch("/nonsense").await;
        assert_eq!(reply, "unknown command: /nonsense");
    }

    #[tokio::test]
    async fn bot_dispatch_list_mirrors_the_cli_handler() {
        let dir = tempfile::tempdir().unwrap();
        let h = Arc::new(handlers(dir.path().to_path_buf()));
        h.add_config("a".into(), "1.1.1.1".into(), "{}").unwrap();
        let dispatcher = CommandSurfaceDispatcher { handlers: h };
        let reply = dispatcher.dispatch("/list").await;
        assert!(reply.contains("1.1.1.1"));
    }

    #[tokio::test]
    async fn bot_dispatch_set_mode_rejects_unknown_mode() {
        let dir = tempfile::tempdir().unwrap();
        let h = Arc::new(handlers(dir.path().to_path_buf()));
        let dispatcher = CommandSurfaceDispatcher { handlers: h };
        let reply = dispatcher.dispatch("/set_mode bogus").await;
        assert!(reply.starts_with("error:"));
    }
}
