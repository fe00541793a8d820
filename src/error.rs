//! Error types for the interception pipeline.
//!
//! None of these ever reach the client as an interception-caused 5xx: the
//! dispatcher turns every `ProxyError` into a direct passthrough attempt.

use thiserror::Error;

/// Errors raised while forwarding or intercepting a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The origin could not be reached or the exchange failed mid-flight.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// The re-targeted upstream URI could not be built.
    #[error("Invalid upstream URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The inbound body failed while being captured for telemetry.
    #[error("Client body read failed: {0}")]
    ClientBody(String),

    /// The request body was streamed to the origin and cannot be sent again.
    #[error("Request body was streamed and cannot be replayed")]
    NotReplayable,

    /// A call to the risk service failed (transport, timeout or decoding).
    #[error("Risk service call failed: {0}")]
    Remote(#[from] reqwest::Error),

    /// Building the risk-service endpoint URLs failed.
    #[error("Invalid risk endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ProxyError>;
