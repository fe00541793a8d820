//! Telemetry assembly: body parsing, classification and request metadata.

use super::body::ParsedBody;
use super::fields::{
    self, AMOUNT, EXTERNAL_ID, IDENTIFIER, PAYEE_BANK_CODE, PAYEE_NAME, PAYEE_VALUE, PAYER_VALUE,
    QUERY_IDENTIFIER, TRANSACTION_HINT,
};
use super::{Classification, LoginPayload, TelemetryRecord, TransactionPayload};
use crate::config::RoutingConfig;
use crate::logging::preview;
use http::header::{CONTENT_TYPE, COOKIE, REFERER, USER_AGENT};
use http::{HeaderMap, HeaderName, request::Parts};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

static SESSION_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|;\s*)csid=([^;]+)").expect("csid cookie pattern is valid"));

const CLIENT_IP_HEADERS: [&str; 2] = ["cf-connecting-ip", "x-real-ip"];

/// Classify a request from its parsed body and raw query string.
///
/// Login wins only when no transaction signal is present; a transaction
/// signal is a parseable amount or any beneficiary-style field.
pub fn classify(body: &ParsedBody, query: &str) -> Classification {
    let identifier = IDENTIFIER
        .pick(body)
        .or_else(|| QUERY_IDENTIFIER.pick_query(query));
    let external_id = EXTERNAL_ID.pick(body);
    let amount = AMOUNT
        .pick(body)
        .and_then(|raw| fields::normalize_amount(&raw));

    let transaction_hit = amount.is_some() || TRANSACTION_HINT.pick(body).is_some();
    let login_hit = identifier.is_some() || external_id.is_some();

    debug!(
        identifier = identifier.is_some(),
        external_id = external_id.is_some(),
        ?amount,
        transaction_hit,
        login_hit,
        "field picks"
    );

    if login_hit && !transaction_hit {
        Classification::Login(LoginPayload {
            user_id_hash: identifier.as_deref().map(fields::hash_identifier),
            uuid: external_id,
        })
    } else if transaction_hit {
        Classification::Transaction(TransactionPayload {
            amount,
            payee_value_masked: PAYEE_VALUE.pick(body).map(|v| fields::mask_account(&v)),
            payer_value_masked: PAYER_VALUE.pick(body).map(|v| fields::mask_account(&v)),
            payee_name: PAYEE_NAME.pick(body),
            payee_bank_code: PAYEE_BANK_CODE.pick(body),
        })
    } else {
        Classification::Generic(body.to_value())
    }
}

/// Build the telemetry record for a request whose body was captured.
///
/// Never fails: an unreadable body is treated as absent.
pub fn build(
    parts: &Parts,
    body: &[u8],
    peer: Option<IpAddr>,
    routing: &RoutingConfig,
    path: &str,
) -> TelemetryRecord {
    let content_type = header_text(&parts.headers, &CONTENT_TYPE).unwrap_or_default();
    let parsed = ParsedBody::parse(&content_type, body);

    match &parsed {
        ParsedBody::Json(_) | ParsedBody::Form(_) => {
            debug!(kind = parsed.kind(), "parsed request body")
        }
        ParsedBody::Text(text) => debug!(raw = %preview(text, 64), "raw text body"),
        ParsedBody::Empty => debug!("no body to parse"),
    }

    let query = parts.uri.query().unwrap_or("");
    let query_params: BTreeMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    TelemetryRecord {
        classification: classify(&parsed, query),
        customer_id: routing.customer_id.clone(),
        brand: routing.brand.clone(),
        path: path.to_string(),
        method: parts.method.to_string(),
        timestamp_millis: chrono::Utc::now().timestamp_millis(),
        session_id: session_id(&parts.headers),
        client_ip: client_ip(&parts.headers, peer),
        user_agent: header_text(&parts.headers, &USER_AGENT),
        referer: header_text(&parts.headers, &REFERER),
        query_params,
    }
}

/// Client address: edge-provided headers first, then the socket peer.
///
/// Blank header values are skipped, not treated as an answer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    CLIENT_IP_HEADERS
        .iter()
        .find_map(|name| non_blank(headers.get(*name)?.to_str().ok()?))
        .or_else(|| {
            let forwarded = headers.get("x-forwarded-for")?.to_str().ok()?;
            non_blank(forwarded.split(',').next()?)
        })
        .or_else(|| peer.map(|ip| ip.to_string()))
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers.get_all(COOKIE).iter().find_map(|value| {
        let cookie = value.to_str().ok()?;
        SESSION_COOKIE
            .captures(cookie)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
