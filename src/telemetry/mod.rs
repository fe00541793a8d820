//! Privacy-redacted telemetry for intercepted requests.
//!
//! A [`TelemetryRecord`] is built once per matched request from the captured
//! body, the query string and a handful of headers. Each record carries
//! exactly one [`Classification`]: login, transaction or generic.

pub mod body;
pub mod builder;
pub mod fields;

pub use body::ParsedBody;
pub use builder::{build, classify, client_ip};

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Traffic class and its type-specific payload.
///
/// Serializes as `"type": "<class>", "payload": {...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Classification {
    /// Identifier or external id present, no transaction signal.
    Login(LoginPayload),

    /// Amount or beneficiary-style field present.
    Transaction(TransactionPayload),

    /// Neither; carries the parsed body when it was JSON or a form.
    Generic(Option<Value>),
}

impl Classification {
    pub fn kind(&self) -> &'static str {
        match self {
            Classification::Login(_) => "login",
            Classification::Transaction(_) => "transaction",
            Classification::Generic(_) => "generic",
        }
    }
}

/// Login payload. The raw identifier never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    /// Hex SHA-256 of the trimmed, lower-cased identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Transaction payload with masked account values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    /// Normalized amount; `null` when absent or unparseable.
    pub amount: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_value_masked: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_value_masked: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_bank_code: Option<String>,
}

/// Structured telemetry for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pub classification: Classification,

    pub customer_id: String,
    pub brand: String,

    /// Lower-cased request path.
    pub path: String,
    pub method: String,
    pub timestamp_millis: i64,

    /// Value of the `csid` cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,

    pub query_params: BTreeMap<String, String>,
}

impl TelemetryRecord {
    pub fn kind(&self) -> &'static str {
        self.classification.kind()
    }
}
