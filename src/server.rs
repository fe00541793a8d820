//! Accept loop: one tokio task per connection, one logical task per request.

use crate::proxy_service::ProxyService;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serve connections from `listener` until `shutdown` is cancelled.
///
/// Connections already accepted run to completion on their own tasks.
pub async fn serve(listener: TcpListener, service: ProxyService, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "edgeward listening");
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            },
        };

        let service = service.clone();
        tokio::spawn(async move {
            let handler = service_fn(move |req: Request<Incoming>| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(req, Some(peer)).await) }
            });

            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), handler)
                .await
            {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxySettings, RoutingConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let routing =
            RoutingConfig::new("http://127.0.0.1:9", "c", "b", None, None, 700).unwrap();
        let settings = ProxySettings::new(url::Url::parse("http://127.0.0.1:9").unwrap());
        let service = ProxyService::new(settings, routing).unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, service, shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("serve loop exits after cancel")
            .unwrap();
    }
}
