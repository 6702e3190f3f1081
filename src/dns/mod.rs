//! DNS Reconciler: discovers the managed zone, ensures an A-record exists,
//! and applies throttled, change-suppressed updates through a
//! Hetzner-compatible DNS API.
//!
//! The provider surface is a trait so the reconciliation logic (throttling,
//! change suppression, zone suffix matching) is testable against a fake
//! without a real API token or network access.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{LbError, Result};
use crate::model::{DomainEntry, UpdateOutcome};
use crate::store::Store;

const ZONES_PATH: &str = "/zones?per_page=200";

#[derive(Debug, Clone, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
}

#[derive(Debug, Clone, Serialize)]
struct RecordBody<'a> {
    zone_id: &'a str,
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    value: &'a str,
    ttl: u32,
}

#[derive(Deserialize)]
struct ZonesResponse {
    zones: Vec<Zone>,
}

#[derive(Deserialize)]
struct RecordsResponse {
    records: Vec<DnsRecord>,
}

#[derive(Deserialize)]
struct RecordResponse {
    record: DnsRecord,
}

/// The wire surface the reconciler depends on. The production implementation
/// is [`HetznerProvider`]; tests substitute an in-memory fake.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<Zone>>;
    async fn list_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>>;
    async fn create_record(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> Result<String>;
    async fn update_record(&self, record_id: &str, zone_id: &str, name: &str, value: &str, ttl: u32) -> Result<()>;
}

const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(4);

pub struct HetznerProvider {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl HetznerProvider {
    pub fn new(token: &str, request_timeout: Duration, max_retries: u32) -> Result<Self> {
        Self::with_base_url(token, request_timeout, max_retries, "https://dns.hetzner.com/api/v1")
    }

    fn with_base_url(
        token: &str,
        request_timeout: Duration,
        max_retries: u32,
        base_url: &str,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| LbError::DnsProvider("invalid bearer token".into()))?,
        );
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| LbError::DnsProvider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            max_retries,
        })
    }

    /// Send a request, retrying empty-bodied/5xx responses and network errors
    /// with exponential backoff (base 250ms, doubling, capped at 4s). A
    /// non-retryable 4xx is returned to the caller immediately.
    async fn send_with_retry<F>(&self, build_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff = RETRY_BASE_BACKOFF;
        let mut last_err: Option<LbError> = None;

        for attempt in 0..=self.max_retries {
            let resp = match build_request().send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt == self.max_retries {
                        return Err(e.into());
                    }
                    tracing::warn!(attempt, error = %e, "dns provider request failed, retrying");
                    last_err = Some(e.into());
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_BACKOFF_CAP);
                    continue;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            if status.is_client_error() {
                return Ok(resp);
            }
            if attempt == self.max_retries {
                return Ok(resp);
            }

            tracing::warn!(attempt, %status, "dns provider request failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_BACKOFF_CAP);
        }

        Err(last_err.unwrap_or_else(|| LbError::DnsProvider("request failed after retries".into())))
    }
}

#[async_trait]
impl DnsProvider for HetznerProvider {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let resp = self
            .send_with_retry(|| self.client.get(format!("{}{ZONES_PATH}", self.base_url)))
            .await?;
        let resp = check_status(resp).await?;
        let body: ZonesResponse = resp.json().await?;
        Ok(body.zones)
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<DnsRecord>> {
        let resp = self
            .send_with_retry(|| {
                self.client
                    .get(format!("{}/records?zone_id={zone_id}&per_page=200", self.base_url))
            })
            .await?;
        let resp = check_status(resp).await?;
        let body: RecordsResponse = resp.json().await?;
        Ok(body.records)
    }

    async fn create_record(&self, zone_id: &str, name: &str, value: &str, ttl: u32) -> Result<String> {
        let body = RecordBody {
            zone_id,
            record_type: "A",
            name,
            value,
            ttl,
        };
        let resp = self
            .send_with_retry(|| {
                self.client
                    .post(format!("{}/records", self.base_url))
                    .json(&body)
            })
            .await?;
        let resp = check_status(resp).await?;
        let created: RecordResponse = resp.json().await?;
        Ok(created.record.id)
    }

    async fn update_record(&self, record_id: &str, zone_id: &str, name: &str, value: &str, ttl: u32) -> Result<()> {
        let body = RecordBody {
            zone_id,
            record_type: "A",
            name,
            value,
            ttl,
        };
        let resp = self
            .send_with_retry(|| {
                self.client
                    .put(format!("{}/records/{record_id}", self.base_url))
                    .json(&body)
            })
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(LbError::DnsProvider(format!("HTTP {status}: {body}")))
    }
}

/// Throttling, change suppression, and zone/record discovery, layered over
/// any [`DnsProvider`].
pub struct Reconciler<'a> {
    provider: &'a dyn DnsProvider,
    store: &'a Store,
    default_ttl: u32,
    min_update_interval: Duration,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        provider: &'a dyn DnsProvider,
        store: &'a Store,
        default_ttl: u32,
        min_update_interval: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            default_ttl,
            min_update_interval,
        }
    }

    /// Choose the zone whose name is the longest suffix match of `domain`.
    /// Ties (equal-length suffixes) resolve to the lexicographically
    /// smallest zone name, deterministically.
    pub async fn find_zone(&self, domain: &str) -> Result<Zone> {
        let zones = self.provider.list_zones().await?;
        let mut matches: Vec<Zone> = zones
            .into_iter()
            .filter(|z| domain == z.name || domain.ends_with(&format!(".{}", z.name)))
            .collect();
        let max_len = matches.iter().map(|z| z.name.len()).max();
        let max_len = match max_len {
            Some(len) => len,
            None => return Err(LbError::ZoneNotFound(domain.to_string())),
        };
        matches.retain(|z| z.name.len() == max_len);
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
            .into_iter()
            .next()
            .ok_or_else(|| LbError::ZoneNotFound(domain.to_string()))
    }

    /// Find an existing A-record matching `name` under `zone`, or create one
    /// with a placeholder value. Returns the provider record ID.
    pub async fn ensure_record(&self, zone: &Zone, name: &str) -> Result<String> {
        let records = self.provider.list_records(&zone.id).await?;
        if let Some(existing) = records
            .into_iter()
            .find(|r| r.record_type == "A" && r.name == name)
        {
            return Ok(existing.id);
        }
        self.provider
            .create_record(&zone.id, name, "0.0.0.0", self.default_ttl)
            .await
    }

    /// Register `fqdn` as a managed domain: resolve its zone, ensure an
    /// A-record exists, and persist the [`DomainEntry`]. Idempotent — calling
    /// again on an already-managed domain is a no-op re-resolution.
    pub async fn set_domain(&self, fqdn: &str) -> Result<DomainEntry> {
        let zone = self.find_zone(fqdn).await?;
        let record_id = self.ensure_record(&zone, fqdn).await?;
        let entry = DomainEntry {
            fqdn: fqdn.to_string(),
            zone_id: zone.id,
            record_id,
            last_ip: None,
            last_update: None,
        };
        let mut domains = self.store.load_domains()?;
        domains.insert(fqdn.to_string(), entry.clone());
        self.store.save_domains(&domains)?;
        Ok(entry)
    }

    /// Apply the throttle and change-suppression rules, then PUT the record
    /// if and only if both checks pass.
    pub async fn update_record(&self, fqdn: &str, ip: &str) -> Result<UpdateOutcome> {
        let mut domains = self.store.load_domains()?;
        let entry = domains
            .get(fqdn)
            .cloned()
            .ok_or_else(|| LbError::ZoneNotFound(fqdn.to_string()))?;

        let now = Utc::now();
        if let Some(last_update) = entry.last_update {
            if now - last_update < chrono::Duration::from_std(self.min_update_interval).unwrap() {
                return Ok(UpdateOutcome::Throttled);
            }
        }
        if entry.last_ip.as_deref() == Some(ip) {
            return Ok(UpdateOutcome::Unchanged);
        }

        self.provider
            .update_record(&entry.record_id, &entry.zone_id, fqdn, ip, self.default_ttl)
            .await?;

        let mut updated = entry;
        updated.last_ip = Some(ip.to_string());
        updated.last_update = Some(now);
        domains.insert(fqdn.to_string(), updated);
        self.store.save_domains(&domains)?;
        self.store.save_current_ip(ip)?;

        Ok(UpdateOutcome::Updated)
    }
}
