//! Error taxonomy for the load balancer core.
//!
//! Kinds map to the Orchestrator's propagation policy: some are fatal to the
//! current command, some fold into health/throttle state without ever
//! reaching the process exit code.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LbError {
    #[error("required environment variable {0} is not set")]
    ConfigMissing(&'static str),

    #[error("unknown candidate id: {0}")]
    UnknownCandidate(String),

    #[error("probe template at {0:?} is missing required token {1:?}")]
    TemplateMissingToken(PathBuf, &'static str),

    #[error("xray-not-found")]
    ProbeBinaryNotFound,

    #[error("dns provider error: {0}")]
    DnsProvider(String),

    #[error("no DNS zone found for domain {0:?}")]
    ZoneNotFound(String),

    #[error("notification delivery failed: {0}")]
    NotifyFailed(String),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LbError>;
