//! SDK script fetch from `GET {endpoint}/sdk`.

use crate::config::RoutingConfig;
use crate::error::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Fetches the script payload injected into HTML responses.
#[derive(Debug, Clone)]
pub struct SdkClient {
    http: Client,
    sdk_url: Url,
    timeout: Duration,
}

impl SdkClient {
    pub fn new(http: Client, routing: &RoutingConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http,
            sdk_url: routing.route("sdk")?,
            timeout,
        })
    }

    /// Fetch the script, bounded by the configured timeout.
    ///
    /// Returns `None` on timeout, transport error, non-success status or an
    /// empty payload; the caller then serves the response uninjected.
    pub async fn fetch_script(&self) -> Option<String> {
        match self.try_fetch().await {
            Ok(script) if script.is_empty() => {
                debug!("SDK endpoint returned an empty script");
                None
            }
            Ok(script) => Some(script),
            Err(err) => {
                warn!(error = %err, "SDK fetch failed, skipping injection");
                None
            }
        }
    }

    async fn try_fetch(&self) -> Result<String> {
        let response = self
            .http
            .get(self.sdk_url.clone())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywords::KeywordSet;
    use axum::Router;
    use axum::routing::get;

    fn routing(endpoint: String) -> RoutingConfig {
        RoutingConfig {
            endpoint,
            customer_id: String::new(),
            brand: String::new(),
            async_keywords: KeywordSet::default(),
            sync_keywords: KeywordSet::default(),
            block_threshold: 700,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetches_script() {
        let endpoint = serve(Router::new().route("/sdk", get(|| async { "window.sdk = 1;" }))).await;
        let client = SdkClient::new(Client::new(), &routing(endpoint), Duration::from_secs(3)).unwrap();
        assert_eq!(client.fetch_script().await.as_deref(), Some("window.sdk = 1;"));
    }

    #[tokio::test]
    async fn test_timeout_skips_script() {
        let app = Router::new().route(
            "/sdk",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }),
        );
        let endpoint = serve(app).await;
        let client =
            SdkClient::new(Client::new(), &routing(endpoint), Duration::from_millis(50)).unwrap();
        assert_eq!(client.fetch_script().await, None);
    }

    #[tokio::test]
    async fn test_error_status_and_empty_body_skip_script() {
        let app = Router::new()
            .route(
                "/missing/sdk",
                get(|| async { (http::StatusCode::NOT_FOUND, "not found") }),
            )
            .route("/empty/sdk", get(|| async { "" }));
        let base = serve(app).await;

        let missing = SdkClient::new(
            Client::new(),
            &routing(format!("{base}/missing")),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(missing.fetch_script().await, None);

        let empty = SdkClient::new(
            Client::new(),
            &routing(format!("{base}/empty")),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(empty.fetch_script().await, None);
    }
}
