//! Risk decision client for `POST {endpoint}/action`.
//!
//! Two modes:
//!
//! - **Fire-and-forget**: the call runs on a detached task; its outcome is
//!   logged and dropped. The caller always gets an allow result.
//! - **Wait-and-decide**: the call is bounded by a timeout. Timeouts,
//!   transport errors and malformed responses all resolve to score 0
//!   (fail-open).

use crate::config::RoutingConfig;
use crate::error::Result;
use crate::telemetry::TelemetryRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// How a decision call is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    /// Issue the call and return immediately.
    FireAndForget,

    /// Wait for the score, at most `timeout`.
    WaitAndDecide {
        /// Upper bound for the whole call, connect to body.
        timeout: Duration,
    },
}

/// Outcome of a decision call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionResult {
    /// Risk score reported by the service (0 when unavailable).
    pub score: f64,

    /// `true` when `score` is strictly above the block threshold.
    pub blocked: bool,
}

impl DecisionResult {
    /// Apply the blocking rule: block only when `score > threshold`.
    pub fn from_score(score: f64, threshold: i64) -> Self {
        Self {
            score,
            blocked: score > threshold as f64,
        }
    }

    /// Returns `true` if the origin response must be replaced.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }
}

impl Default for DecisionResult {
    /// Default is score 0, allowed (fail-open).
    fn default() -> Self {
        Self {
            score: 0.0,
            blocked: false,
        }
    }
}

/// Body of the `/action` call.
#[derive(Debug, Serialize)]
struct ActionRequest<'a> {
    path: &'a str,
    ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    telemetry: Option<&'a TelemetryRecord>,
}

/// Expected `/action` response. A missing or null score counts as 0.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    score: Option<f64>,
}

/// Client for the risk service's decision endpoint.
#[derive(Debug, Clone)]
pub struct DecisionClient {
    http: Client,
    action_url: Url,
    threshold: i64,
    forward_telemetry: bool,
}

impl DecisionClient {
    pub fn new(http: Client, routing: &RoutingConfig, forward_telemetry: bool) -> Result<Self> {
        Ok(Self {
            http,
            action_url: routing.route("action")?,
            threshold: routing.block_threshold,
            forward_telemetry,
        })
    }

    /// Ask the risk service about `telemetry`.
    ///
    /// Never fails; every error path resolves to [`DecisionResult::default`].
    pub async fn decide(&self, telemetry: &TelemetryRecord, mode: DecisionMode) -> DecisionResult {
        let body = ActionRequest {
            path: &telemetry.path,
            ts: chrono::Utc::now().timestamp_millis(),
            telemetry: self.forward_telemetry.then_some(telemetry),
        };
        let request = self.http.post(self.action_url.clone()).json(&body);

        match mode {
            DecisionMode::FireAndForget => {
                tokio::spawn(async move {
                    match request.send().await {
                        Ok(response) => {
                            debug!(status = %response.status(), "fire-and-forget action call sent")
                        }
                        Err(err) => debug!(error = %err, "fire-and-forget action call failed"),
                    }
                });
                DecisionResult::default()
            }
            DecisionMode::WaitAndDecide { timeout } => {
                match self.score(request.timeout(timeout)).await {
                    Ok(score) => DecisionResult::from_score(score, self.threshold),
                    Err(err) => {
                        warn!(error = %err, "decision call failed, allowing");
                        DecisionResult::default()
                    }
                }
            }
        }
    }

    async fn score(&self, request: reqwest::RequestBuilder) -> Result<f64> {
        let response: ActionResponse = request.send().await?.json().await?;
        Ok(response.score.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::KeywordSet;
    use crate::telemetry::Classification;
    use std::collections::BTreeMap;

    fn routing(endpoint: &str) -> RoutingConfig {
        RoutingConfig {
            endpoint: endpoint.to_string(),
            customer_id: "c".to_string(),
            brand: "b".to_string(),
            async_keywords: KeywordSet::default(),
            sync_keywords: KeywordSet::default(),
            block_threshold: 700,
        }
    }

    fn telemetry() -> TelemetryRecord {
        TelemetryRecord {
            classification: Classification::Generic(None),
            customer_id: "c".to_string(),
            brand: "b".to_string(),
            path: "/pay".to_string(),
            method: "POST".to_string(),
            timestamp_millis: 0,
            session_id: None,
            client_ip: None,
            user_agent: None,
            referer: None,
            query_params: BTreeMap::new(),
        }
    }

    /// A local address with nothing listening on it.
    async fn closed_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn test_blocking_rule_is_strict() {
        assert!(DecisionResult::from_score(701.0, 700).is_blocked());
        assert!(!DecisionResult::from_score(700.0, 700).is_blocked());
        assert!(!DecisionResult::from_score(0.0, 700).is_blocked());
    }

    #[test]
    fn test_default_is_fail_open() {
        let result = DecisionResult::default();
        assert_eq!(result.score, 0.0);
        assert!(!result.blocked);
    }

    #[test]
    fn test_action_request_wire_format() {
        let record = telemetry();
        let body = ActionRequest {
            path: "/pay",
            ts: 42,
            telemetry: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"path": "/pay", "ts": 42})
        );

        let with_telemetry = ActionRequest {
            path: "/pay",
            ts: 42,
            telemetry: Some(&record),
        };
        let value = serde_json::to_value(&with_telemetry).unwrap();
        assert_eq!(value["telemetry"]["type"], "generic");
    }

    #[test]
    fn test_action_response_tolerates_missing_score() {
        let parsed: ActionResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.score, None);
        let parsed: ActionResponse = serde_json::from_str(r#"{"score": null}"#).unwrap();
        assert_eq!(parsed.score, None);
        assert!(serde_json::from_str::<ActionResponse>(r#"{"score": "high"}"#).is_err());
    }

    #[tokio::test]
    async fn test_wait_and_decide_unreachable_fails_open() {
        let client = DecisionClient::new(Client::new(), &routing(&closed_endpoint().await), false)
            .unwrap();
        let result = client
            .decide(
                &telemetry(),
                DecisionMode::WaitAndDecide {
                    timeout: Duration::from_millis(500),
                },
            )
            .await;
        assert_eq!(result, DecisionResult::default());
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_immediately() {
        let client = DecisionClient::new(Client::new(), &routing(&closed_endpoint().await), false)
            .unwrap();
        let result = client
            .decide(&telemetry(), DecisionMode::FireAndForget)
            .await;
        assert!(!result.is_blocked());
    }
}
