//! Probe Runner: for one candidate, render a probe-proxy config, spawn the
//! probe proxy as a subprocess bound to an ephemeral local port, issue
//! liveness checks through its SOCKS5 inbound, then tear it down.
//!
//! The probe proxy binary itself is an external black box — this module
//! only renders its config, starts it, waits for a response, and kills it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::LbError;
use crate::model::{CandidateConfig, ProbeResult};

const PORT_RANGE: std::ops::RangeInclusive<u16> = 20_000..=60_000;
const WARMUP: Duration = Duration::from_secs(1);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(50);
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

const PORT_TOKEN: &str = "{{PORT}}";
const OUTBOUND_TOKEN: &str = "{{OUTBOUND}}";

/// Default HTTPS 204 liveness endpoints, probed through the candidate's
/// local SOCKS5 forwarder.
pub const DEFAULT_LIVENESS_URLS: &[&str] = &[
    "https://www.gstatic.com/generate_204",
    "https://cp.cloudflare.com/generate_204",
];

#[derive(Debug, Clone)]
pub struct ProbeRunnerConfig {
    pub probe_proxy_bin: Option<String>,
    pub template_path: PathBuf,
    /// Directory for ephemeral rendered configs and subprocess logs.
    pub work_dir: PathBuf,
    pub liveness_urls: Vec<String>,
    pub retries: u32,
    pub request_timeout: Duration,
}

pub struct ProbeRunner {
    config: ProbeRunnerConfig,
}

impl ProbeRunner {
    pub fn new(config: ProbeRunnerConfig) -> Self {
        Self { config }
    }

    /// Probe one candidate. Never panics and never propagates an error —
    /// every failure mode is folded into the returned [`ProbeResult`].
    pub async fn probe(&self, candidate: &CandidateConfig) -> ProbeResult {
        let bin = match self.resolve_binary() {
            Some(bin) => bin,
            None => {
                return failure(candidate, &LbError::ProbeBinaryNotFound.to_string());
            }
        };

        let port = rand::rng().random_range(PORT_RANGE);
        let rendered = match self.render_template(port, &candidate.outbound) {
            Ok(r) => r,
            Err(e) => return failure(candidate, &e.to_string()),
        };

        let run_id = uuid::Uuid::new_v4();
        let config_path = self.config.work_dir.join(format!("probe-{run_id}.json"));
        let log_path = self.config.work_dir.join(format!("probe-{run_id}.log"));
        if let Err(e) = std::fs::create_dir_all(&self.config.work_dir) {
            return failure(candidate, &format!("failed to create work dir: {e}"));
        }
        if let Err(e) = std::fs::write(&config_path, &rendered) {
            return failure(candidate, &format!("failed to write probe config: {e}"));
        }

        let result = self.run_probe(&bin, &config_path, &log_path, port, candidate).await;

        let _ = std::fs::remove_file(&config_path);
        let _ = std::fs::remove_file(&log_path);

        result
    }

    fn resolve_binary(&self) -> Option<PathBuf> {
        resolve_probe_binary(self.config.probe_proxy_bin.as_deref())
    }

    fn render_template(&self, port: u16, outbound: &serde_json::Value) -> crate::error::Result<String> {
        let template = std::fs::read_to_string(&self.config.template_path).map_err(|source| LbError::Io {
            path: self.config.template_path.clone(),
            source,
        })?;
        if !template.contains(PORT_TOKEN) {
            return Err(LbError::TemplateMissingToken(self.config.template_path.clone(), PORT_TOKEN));
        }
        if !template.contains(OUTBOUND_TOKEN) {
            return Err(LbError::TemplateMissingToken(self.config.template_path.clone(), OUTBOUND_TOKEN));
        }
        let outbound_str = serde_json::to_string(outbound).unwrap_or_else(|_| "{}".to_string());
        Ok(template
            .replace(PORT_TOKEN, &port.to_string())
            .replace(OUTBOUND_TOKEN, &outbound_str))
    }

    async fn run_probe(
        &self,
        bin: &Path,
        config_path: &Path,
        log_path: &Path,
        port: u16,
        candidate: &CandidateConfig,
    ) -> ProbeResult {
        let log_file = match std::fs::File::create(log_path) {
            Ok(f) => f,
            Err(e) => return failure(candidate, &format!("failed to create probe log: {e}")),
        };

        let mut child = match tokio::process::Command::new(bin)
            .arg("-c")
            .arg(config_path)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return failure(candidate, &format!("failed to spawn probe proxy: {e}")),
        };

        self.wait_for_readiness(port).await;

        let proxy_url = format!("socks5://127.0.0.1:{port}");
        let outcome = self.liveness_check(&proxy_url).await;

        teardown(&mut child).await;

        match outcome {
            Ok(latency_ms) => ProbeResult {
                id: candidate.id.clone(),
                label: candidate.label.clone(),
                ip: candidate.ip.clone(),
                success: true,
                latency_ms: Some(latency_ms),
                error: None,
                skip: false,
            },
            Err(e) => failure(candidate, &e),
        }
    }

    /// Poll the local SOCKS port for readiness immediately, capped at
    /// `WARMUP` (1s) total — returns as soon as the port accepts a
    /// connection, so a fast-starting outbound doesn't pay the full warm-up
    /// wait. A slow-starting outbound still gets the full 1s before the
    /// probe proceeds regardless.
    async fn wait_for_readiness(&self, port: u16) {
        let deadline = Instant::now() + WARMUP;
        while Instant::now() < deadline {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return;
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// N attempts, each probing every configured liveness URL. Returns the
    /// minimum observed latency on any success, or the last transport error.
    async fn liveness_check(&self, proxy_url: &str) -> Result<u64, String> {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| e.to_string())?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.config.request_timeout)
            .no_proxy()
            .build()
            .map_err(|e| e.to_string())?;

        let mut best_latency: Option<u64> = None;
        let mut last_error: Option<String> = None;

        for _attempt in 0..self.config.retries.max(1) {
            for url in &self.config.liveness_urls {
                let start = Instant::now();
                match client.get(url).send().await {
                    Ok(resp) => {
                        let _ = resp.status();
                        let latency = start.elapsed().as_millis() as u64;
                        best_latency = Some(best_latency.map_or(latency, |b| b.min(latency)));
                    }
                    Err(e) => last_error = Some(e.to_string()),
                }
            }
        }

        best_latency.ok_or_else(|| last_error.unwrap_or_else(|| "no liveness response".to_string()))
    }
}

/// Resolve the probe proxy binary: a configured name if set, else the first
/// of xray/v2ray/sing-box found on `PATH`. Shared with the Command
/// Surface's `self-check`.
pub fn resolve_probe_binary(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(configured) = configured {
        return which::which(configured).ok();
    }
    which::which("xray")
        .or_else(|_| which::which("v2ray"))
        .or_else(|_| which::which("sing-box"))
        .ok()
}

fn failure(candidate: &CandidateConfig, error: &str) -> ProbeResult {
    ProbeResult {
        id: candidate.id.clone(),
        label: candidate.label.clone(),
        ip: candidate.ip.clone(),
        success: false,
        latency_ms: None,
        error: Some(error.to_string()),
        skip: false,
    }
}

/// SIGTERM, wait briefly for exit, then hard-kill (SIGKILL) if still alive.
#[cfg(unix)]
async fn teardown(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    if tokio::time::timeout(TEARDOWN_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[cfg(not(unix))]
async fn teardown(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
}
