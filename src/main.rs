use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use dnslb::alert::{NullNotifier, Notifier};
use dnslb::bot::TelegramBot;
use dnslb::command::{describe_outcome, CommandSurfaceDispatcher, Handlers};
use dnslb::config::Config;
use dnslb::dns::{DnsProvider, DnsRecord, HetznerProvider, Zone};
use dnslb::error::{LbError, Result as LbResult};
use dnslb::model::Mode;
use dnslb::orchestrator::Orchestrator;
use dnslb::probe::{ProbeRunner, ProbeRunnerConfig, DEFAULT_LIVENESS_URLS};
use dnslb::store::Store;

/// Stands in for a real [`DnsProvider`] when `HETZNER_DNS_API_TOKEN` is
/// absent, so DNS-independent subcommands (`list`, `add-config`,
/// `self-check`, ...) still run. Any call reaches a live Hetzner client only
/// through `monitor-once`, `rotate-once`, or `set-domain`, which need the
/// token and fail up front with a clear message instead.
struct UnconfiguredDnsProvider;

#[async_trait]
impl DnsProvider for UnconfiguredDnsProvider {
    async fn list_zones(&self) -> LbResult<Vec<Zone>> {
        Err(LbError::ConfigMissing("HETZNER_DNS_API_TOKEN"))
    }
    async fn list_records(&self, _zone_id: &str) -> LbResult<Vec<DnsRecord>> {
        Err(LbError::ConfigMissing("HETZNER_DNS_API_TOKEN"))
    }
    async fn create_record(&self, _zone_id: &str, _name: &str, _value: &str, _ttl: u32) -> LbResult<String> {
        Err(LbError::ConfigMissing("HETZNER_DNS_API_TOKEN"))
    }
    async fn update_record(
        &self,
        _record_id: &str,
        _zone_id: &str,
        _name: &str,
        _value: &str,
        _ttl: u32,
    ) -> LbResult<()> {
        Err(LbError::ConfigMissing("HETZNER_DNS_API_TOKEN"))
    }
}

#[derive(Parser)]
#[command(name = "dnslb", about = "DNS-based load balancer for outbound proxy endpoints", version)]
struct Cli {
    /// Base directory holding `env`, `state/`, `configs/`, `templates/`, `logs/`.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one monitor tick: probe all enabled candidates and reconcile DNS in "best" mode.
    MonitorOnce,
    /// Run one rotate tick: advance the round-robin index and reconcile DNS.
    RotateOnce,
    /// Set the selection policy ("best" or "rr").
    SetMode { mode: String },
    /// List every candidate with its health snippet.
    List,
    /// Register a new candidate. `--config` points at a JSON file holding the outbound descriptor.
    AddConfig {
        label: String,
        ip: String,
        #[arg(long)]
        config: PathBuf,
    },
    /// Remove a candidate and its health record.
    RemoveConfig { id: String },
    /// Re-enable a disabled candidate.
    EnableConfig { id: String },
    /// Disable a candidate without deleting it.
    DisableConfig { id: String },
    /// Register a managed domain (idempotent).
    SetDomain { fqdn: String },
    /// Print mode, current IP, domains, and candidates.
    Status,
    /// Verify the probe-proxy binary, Hetzner token, and template file are present.
    SelfCheck,
    /// Run the Telegram bot's long-poll loop until killed.
    Bot,
}

#[tokio::main]
async fn main() {
    dnslb::logging::init_tracing();

    let cli = Cli::parse();
    let base_dir = cli.base_dir.unwrap_or_else(Config::default_base_dir);

    if let Err(e) = run(base_dir, cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(base_dir: PathBuf, command: Command) -> Result<()> {
    let config = Arc::new(Config::load(base_dir).context("loading configuration")?);
    let store = Store::new(config.base_dir.clone());
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config)));

    let notifier = build_notifier(&config, store.clone())?;
    let dns_provider = build_dns_provider(&config)?;
    let probe_runner = Arc::new(build_probe_runner(&config));

    let handlers = Arc::new(Handlers {
        orchestrator,
        dns_provider,
        probe_runner,
        notifier,
    });

    match command {
        Command::MonitorOnce => {
            let outcome = handlers.monitor_once().await?;
            println!("{}", describe_outcome("monitor_once", &outcome));
            if outcome.is_policy_failure() {
                anyhow::bail!("monitor_once reported a policy failure");
            }
        }
        Command::RotateOnce => {
            let outcome = handlers.rotate_once().await?;
            println!("{}", describe_outcome("rotate_once", &outcome));
            if outcome.is_policy_failure() {
                anyhow::bail!("rotate_once reported a policy failure");
            }
        }
        Command::SetMode { mode } => {
            let mode: Mode = mode.parse().map_err(anyhow::Error::msg)?;
            println!("{}", handlers.set_mode(mode)?);
        }
        Command::List => println!("{}", handlers.list()?),
        Command::AddConfig { label, ip, config: config_path } => {
            let outbound_json = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            println!("{}", handlers.add_config(label, ip, &outbound_json)?);
        }
        Command::RemoveConfig { id } => println!("{}", handlers.remove_config(&id)?),
        Command::EnableConfig { id } => println!("{}", handlers.enable_config(&id)?),
        Command::DisableConfig { id } => println!("{}", handlers.disable_config(&id)?),
        Command::SetDomain { fqdn } => println!("{}", handlers.set_domain(&fqdn).await?),
        Command::Status => println!("{}", handlers.status()?),
        Command::SelfCheck => println!("{}", handlers.self_check()?),
        Command::Bot => run_bot(&config, store, handlers).await?,
    }

    Ok(())
}

async fn run_bot(config: &Config, store: Store, handlers: Arc<Handlers>) -> Result<()> {
    let bot_token = config
        .telegram_bot_token
        .as_deref()
        .context("TELEGRAM_BOT_TOKEN is not set")?;
    let bot = TelegramBot::new(
        bot_token,
        config.telegram_allowed_user_id,
        config.telegram_proxy.as_deref(),
        config.poll_timeout,
        store,
    )?;
    let dispatcher = CommandSurfaceDispatcher { handlers };

    tracing::info!("bot polling loop started");
    loop {
        if let Err(e) = bot.poll_once(&dispatcher).await {
            tracing::warn!(error = %e, "bot poll cycle failed, retrying");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

fn build_notifier(config: &Config, store: Store) -> Result<Arc<dyn Notifier>> {
    match &config.telegram_bot_token {
        Some(token) => {
            let bot = TelegramBot::new(
                token,
                config.telegram_allowed_user_id,
                config.telegram_proxy.as_deref(),
                config.poll_timeout,
                store,
            )?;
            Ok(Arc::new(bot))
        }
        None => Ok(Arc::new(NullNotifier)),
    }
}

fn build_dns_provider(config: &Config) -> Result<Arc<dyn DnsProvider>> {
    match &config.hetzner_dns_api_token {
        Some(token) => {
            let provider = HetznerProvider::new(token, config.curl_timeout, config.dns_max_retries)?;
            Ok(Arc::new(provider))
        }
        None => Ok(Arc::new(UnconfiguredDnsProvider)),
    }
}

fn build_probe_runner(config: &Config) -> ProbeRunner {
    ProbeRunner::new(ProbeRunnerConfig {
        probe_proxy_bin: config.probe_proxy_bin.clone(),
        template_path: config.probe_template_path(),
        work_dir: config.state_dir().join("probe-work"),
        liveness_urls: DEFAULT_LIVENESS_URLS.iter().map(|s| s.to_string()).collect(),
        retries: config.curl_retries,
        request_timeout: config.curl_timeout,
    })
}
