//! Edgeward - edge reverse-proxy interceptor for risk telemetry.
//!
//! Sits between clients and an origin, forwards every request, and on the
//! way back:
//!
//! - **HTML responses**: streams an SDK script from the risk service into
//!   the document `<head>`.
//! - **Async keyword paths**: builds redacted telemetry and notifies the
//!   risk service fire-and-forget.
//! - **Sync keyword paths**: builds telemetry, waits (bounded) for a risk
//!   score and replaces the response with a 403 when it is over threshold.
//!
//! Every failure in the interception pipeline fails open: the origin
//! response (or a direct re-fetch of it) is served instead.

pub mod config;
pub mod decision;
pub mod error;
pub mod inject;
pub mod keywords;
pub mod logging;
pub mod proxy_body;
pub mod proxy_service;
pub mod sdk;
pub mod server;
pub mod telemetry;
