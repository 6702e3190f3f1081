//! Configuration loading: the `env` KEY=VALUE file plus process environment,
//! resolved against a configurable base directory.
//!
//! Precedence: process environment overrides the `env` file, which overrides
//! the documented defaults below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LbError, Result};

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 15;
const DEFAULT_LB_INTERVAL_SECS: u64 = 60;
const DEFAULT_DNS_MIN_UPDATE_INTERVAL_SECS: u64 = 10;
const DEFAULT_FAIL_THRESHOLD: u32 = 3;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_CURL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CURL_RETRIES: u32 = 2;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_TTL: u32 = 60;
const DEFAULT_DNS_MAX_RETRIES: u32 = 3;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOG_ROTATION_MB: u64 = 8;
const DEFAULT_LOG_MAX_ARCHIVES: usize = 5;

/// Resolved runtime configuration. Constructed once at startup via
/// [`Config::load`] and shared (read-only) across the Orchestrator and its
/// components.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,

    pub hetzner_dns_api_token: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_allowed_user_id: Option<i64>,
    pub telegram_proxy: Option<String>,

    pub monitor_interval: Duration,
    pub lb_interval: Duration,
    pub dns_min_update_interval: Duration,

    pub fail_threshold: u32,
    pub success_threshold: u32,

    pub curl_timeout: Duration,
    pub curl_retries: u32,

    pub alert_cooldown: Duration,
    pub default_ttl: u32,

    pub dns_max_retries: u32,
    pub poll_timeout: Duration,

    pub probe_proxy_bin: Option<String>,

    pub log_rotation_mb: u64,
    pub log_max_archives: usize,
}

impl Config {
    /// Load configuration for a given base directory: read `{base_dir}/env`
    /// (if present) into a key/value overlay under the process environment,
    /// then resolve every recognized variable.
    pub fn load(base_dir: PathBuf) -> Result<Self> {
        let env_file_vars = read_env_file(&base_dir.join("env"))?;
        let get = |key: &str| -> Option<String> {
            std::env::var(key).ok().or_else(|| env_file_vars.get(key).cloned())
        };

        Ok(Self {
            hetzner_dns_api_token: get("HETZNER_DNS_API_TOKEN"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_allowed_user_id: get("TELEGRAM_ALLOWED_USER_ID")
                .and_then(|v| v.parse::<i64>().ok()),
            telegram_proxy: get("TELEGRAM_PROXY"),

            monitor_interval: secs(&get, "MONITOR_INTERVAL", DEFAULT_MONITOR_INTERVAL_SECS),
            lb_interval: secs(&get, "LB_INTERVAL", DEFAULT_LB_INTERVAL_SECS),
            dns_min_update_interval: secs(
                &get,
                "DNS_MIN_UPDATE_INTERVAL",
                DEFAULT_DNS_MIN_UPDATE_INTERVAL_SECS,
            ),

            fail_threshold: num(&get, "FAIL_THRESHOLD", DEFAULT_FAIL_THRESHOLD),
            success_threshold: num(&get, "SUCCESS_THRESHOLD", DEFAULT_SUCCESS_THRESHOLD),

            curl_timeout: secs(&get, "CURL_TIMEOUT", DEFAULT_CURL_TIMEOUT_SECS),
            curl_retries: num(&get, "CURL_RETRIES", DEFAULT_CURL_RETRIES),

            alert_cooldown: secs(&get, "ALERT_COOLDOWN", DEFAULT_ALERT_COOLDOWN_SECS),
            default_ttl: num(&get, "DEFAULT_TTL", DEFAULT_TTL),

            dns_max_retries: num(&get, "DNS_MAX_RETRIES", DEFAULT_DNS_MAX_RETRIES),
            poll_timeout: secs(&get, "POLL_TIMEOUT", DEFAULT_POLL_TIMEOUT_SECS),

            probe_proxy_bin: get("PROBE_PROXY_BIN"),

            log_rotation_mb: num(&get, "LOG_ROTATION_MB", DEFAULT_LOG_ROTATION_MB),
            log_max_archives: num(&get, "LOG_MAX_ARCHIVES", DEFAULT_LOG_MAX_ARCHIVES),

            base_dir,
        })
    }

    /// Default base directory: `$XDG_STATE_HOME/dnslb` or `~/.local/state/dnslb`.
    pub fn default_base_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(".local").join("state").join("dnslb"))
            .unwrap_or_else(|| PathBuf::from(".dnslb"))
    }

    pub fn require_hetzner_token(&self) -> Result<&str> {
        self.hetzner_dns_api_token
            .as_deref()
            .ok_or(LbError::ConfigMissing("HETZNER_DNS_API_TOKEN"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.base_dir.join("configs")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.base_dir.join("templates")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn probe_template_path(&self) -> PathBuf {
        self.templates_dir().join("socks-template.json")
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(num(get, key, default_secs))
}

fn num<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

/// Parse a simple `KEY=VALUE` lines file, one assignment per line. Blank
/// lines and lines starting with `#` are ignored. Missing file yields an
/// empty map (documented default), not an error.
fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
        Err(source) => {
            return Err(LbError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_applies_documented_defaults_when_env_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.monitor_interval, Duration::from_secs(15));
        assert_eq!(config.lb_interval, Duration::from_secs(60));
        assert_eq!(config.dns_min_update_interval, Duration::from_secs(10));
        assert_eq!(config.fail_threshold, 3);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.alert_cooldown, Duration::from_secs(300));
        assert_eq!(config.default_ttl, 60);
        assert!(config.hetzner_dns_api_token.is_none());
    }

    #[test]
    fn load_reads_env_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("env"),
            "HETZNER_DNS_API_TOKEN=abc123\nFAIL_THRESHOLD=5\n# a comment\n\n",
        )
        .unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.hetzner_dns_api_token.as_deref(), Some("abc123"));
        assert_eq!(config.fail_threshold, 5);
    }

    #[test]
    fn require_hetzner_token_errors_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        assert!(config.require_hetzner_token().is_err());
    }

    #[test]
    fn derived_paths_are_rooted_at_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.state_dir(), dir.path().join("state"));
        assert_eq!(config.configs_dir(), dir.path().join("configs"));
        assert_eq!(
            config.probe_template_path(),
            dir.path().join("templates").join("socks-template.json")
        );
    }
}
