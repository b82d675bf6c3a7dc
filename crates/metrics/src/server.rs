//! Prometheus metrics HTTP endpoint.
//!
//! Serves `/metrics` (text exposition) and `/health`. Anything else is 404.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Route a single request.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => match crate::gather_text() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to encode metrics",
                )
            }
        },
        "/health" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Serve metrics on `addr` until `cancel` fires.
pub async fn start_metrics_server(
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Metrics server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };
        debug!(%peer, "Metrics connection");
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving metrics connection: {}", e);
            }
        });
    }
}

/// Start the metrics server in the background.
pub fn spawn_metrics_server(
    addr: SocketAddr,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(addr, cancel).await {
            error!("Metrics server error: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_text_contains_registered_metrics() {
        crate::init();
        crate::consensus::CONSENSUS_BLOCKS_COMMITTED.inc();
        let text = crate::gather_text().unwrap();
        assert!(text.contains("quorumchain_consensus_blocks_committed_total"));
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let handle = spawn_metrics_server(addr, cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
