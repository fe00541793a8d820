//! Process configuration.
//!
//! Everything is read once at startup (flags with environment fallbacks) and
//! is immutable afterwards; requests only ever read it.
//!
//! The routing part ([`RoutingConfig`]) can alternatively come from a JSON
//! file, which is where native keyword lists appear:
//!
//! ```json
//! {
//!   "endpoint": "https://risk.example.com/v1",
//!   "customerId": "acme-prod",
//!   "brand": "acme",
//!   "asyncKeywords": ["/login", "/register"],
//!   "syncKeywords": "transfer, /pay",
//!   "blockThreshold": "750"
//! }
//! ```

use crate::keywords::{KeywordSet, KeywordSource};
use crate::logging::LogFormat;
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Score above which a synchronous decision blocks the response.
pub const DEFAULT_BLOCK_THRESHOLD: i64 = 700;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// The routing file could not be read.
    #[error("Failed to read routing file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The routing file is not valid JSON for a routing config.
    #[error("Invalid routing file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The risk endpoint is not an absolute URL.
    #[error("Invalid risk endpoint {endpoint:?}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

/// Command-line / environment configuration for the `edgeward` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "edgeward",
    version,
    about = "Edge reverse-proxy interceptor: risk telemetry, SDK injection and score-based blocking"
)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "EDGEWARD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Origin base URL requests are forwarded to.
    #[arg(long, env = "UPSTREAM_URL")]
    pub upstream: Url,

    /// Risk service base URL (`/sdk` and `/action` are appended).
    #[arg(long, env = "RISK_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "CUSTOMER_ID", default_value = "")]
    pub customer_id: String,

    #[arg(long, env = "BRAND", default_value = "")]
    pub brand: String,

    /// Fire-and-forget keywords (CSV or JSON array string).
    #[arg(long, env = "ASYNC_KEYWORDS")]
    pub async_keywords: Option<String>,

    /// Wait-and-decide keywords (CSV or JSON array string).
    #[arg(long, env = "SYNC_KEYWORDS")]
    pub sync_keywords: Option<String>,

    /// Block when the score is strictly greater than this (default 700).
    #[arg(long, env = "BLOCK_THRESHOLD")]
    pub block_threshold: Option<String>,

    /// JSON routing file; replaces the routing flags when given.
    #[arg(long, env = "ROUTING_FILE")]
    pub routing_file: Option<PathBuf>,

    /// Timeout for fetching the SDK script.
    #[arg(long, env = "SDK_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration)]
    pub sdk_timeout: Duration,

    /// Timeout for wait-and-decide calls.
    #[arg(long, env = "DECISION_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub decision_timeout: Duration,

    /// Largest request body captured for telemetry.
    #[arg(long, env = "MAX_CAPTURE_BYTES", default_value_t = 1024 * 1024)]
    pub max_capture_bytes: usize,

    /// Attach the full telemetry record to `/action` calls.
    #[arg(long, env = "FORWARD_TELEMETRY")]
    pub forward_telemetry: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Config {
    /// Resolve the routing configuration from the file or the flags.
    pub fn routing(&self) -> Result<RoutingConfig, ConfigError> {
        if let Some(path) = &self.routing_file {
            return RoutingConfig::from_file(path);
        }

        let endpoint = self
            .endpoint
            .clone()
            .ok_or(ConfigError::Missing("RISK_ENDPOINT"))?;

        RoutingConfig::new(
            &endpoint,
            &self.customer_id,
            &self.brand,
            self.async_keywords.as_deref().map(KeywordSource::from),
            self.sync_keywords.as_deref().map(KeywordSource::from),
            self.block_threshold
                .as_deref()
                .map_or(DEFAULT_BLOCK_THRESHOLD, parse_threshold),
        )
    }

    /// Settings for the proxy service itself.
    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            upstream: self.upstream.clone(),
            sdk_timeout: self.sdk_timeout,
            decision_timeout: self.decision_timeout,
            max_capture_bytes: self.max_capture_bytes,
            forward_telemetry: self.forward_telemetry,
        }
    }
}

/// Per-deployment routing: where the risk service lives, who we are, and
/// which paths get which kind of interception.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Risk service base URL without a trailing slash.
    pub endpoint: String,
    pub customer_id: String,
    pub brand: String,
    pub async_keywords: KeywordSet,
    pub sync_keywords: KeywordSet,
    pub block_threshold: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutingFile {
    endpoint: Option<String>,
    #[serde(default)]
    customer_id: String,
    #[serde(default)]
    brand: String,
    async_keywords: Option<KeywordSource>,
    sync_keywords: Option<KeywordSource>,
    block_threshold: Option<Value>,
}

impl RoutingConfig {
    pub fn new(
        endpoint: &str,
        customer_id: &str,
        brand: &str,
        async_keywords: Option<KeywordSource>,
        sync_keywords: Option<KeywordSource>,
        block_threshold: i64,
    ) -> Result<Self, ConfigError> {
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        Url::parse(&endpoint).map_err(|source| ConfigError::Endpoint {
            endpoint: endpoint.clone(),
            source,
        })?;

        Ok(Self {
            endpoint,
            customer_id: customer_id.to_string(),
            brand: brand.to_string(),
            async_keywords: async_keywords
                .as_ref()
                .map(KeywordSet::from_source)
                .unwrap_or_default(),
            sync_keywords: sync_keywords
                .as_ref()
                .map(KeywordSet::from_source)
                .unwrap_or_default(),
            block_threshold,
        })
    }

    /// Load from a JSON routing file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|err| match err {
            ParseFailure::Json(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Config(err) => err,
        })
    }

    /// Parse the JSON routing document.
    pub fn from_json(text: &str) -> Result<Self, ParseFailure> {
        let file: RoutingFile = serde_json::from_str(text).map_err(ParseFailure::Json)?;
        let endpoint = file
            .endpoint
            .ok_or(ConfigError::Missing("endpoint"))
            .map_err(ParseFailure::Config)?;

        let threshold = match &file.block_threshold {
            Some(Value::Number(n)) => n
                .as_f64()
                .map(|f| f.trunc() as i64)
                .filter(|t| *t != 0)
                .unwrap_or(DEFAULT_BLOCK_THRESHOLD),
            Some(Value::String(s)) => parse_threshold(s),
            _ => DEFAULT_BLOCK_THRESHOLD,
        };

        Self::new(
            &endpoint,
            &file.customer_id,
            &file.brand,
            file.async_keywords,
            file.sync_keywords,
            threshold,
        )
        .map_err(ParseFailure::Config)
    }

    /// Full URL of a risk-service route, e.g. `route("sdk")`.
    pub fn route(&self, route: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{}", self.endpoint, route))
    }
}

/// Failure while parsing a routing document.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error(transparent)]
    Json(serde_json::Error),
    #[error(transparent)]
    Config(ConfigError),
}

/// Parse a block threshold leniently.
///
/// Uses the leading integer of the trimmed text (optional sign). No digits,
/// or a value of zero, falls back to [`DEFAULT_BLOCK_THRESHOLD`].
pub fn parse_threshold(text: &str) -> i64 {
    let text = text.trim();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    match digits[..end].parse::<i64>() {
        Ok(0) | Err(_) => DEFAULT_BLOCK_THRESHOLD,
        Ok(value) if negative => -value,
        Ok(value) => value,
    }
}

/// Proxy-level settings that are not part of routing.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Origin base URL.
    pub upstream: Url,
    pub sdk_timeout: Duration,
    pub decision_timeout: Duration,
    pub max_capture_bytes: usize,
    pub forward_telemetry: bool,
}

impl ProxySettings {
    /// Default latency budgets: 3 s for the SDK fetch, 5 s for a decision.
    pub fn new(upstream: Url) -> Self {
        Self {
            upstream,
            sdk_timeout: Duration::from_secs(3),
            decision_timeout: Duration::from_secs(5),
            max_capture_bytes: 1024 * 1024,
            forward_telemetry: false,
        }
    }
}
