//! Webhook HTTP server: accepts `POST {url_path}` carrying one JSON update and pushes it onto the
//! dispatcher's update queue.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    Router,
};
use dbot_core::{Result, Update};
use dbot_dispatch::UpdateQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct WebhookState {
    path: Arc<str>,
    queue: UpdateQueue,
}

/// Router serving the webhook at `path`; every other path or method is answered with 404.
pub fn webhook_router(path: &str, queue: UpdateQueue) -> Router {
    Router::new().fallback(receive_update).with_state(WebhookState {
        path: Arc::from(path),
        queue,
    })
}

async fn receive_update(
    State(state): State<WebhookState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    if method != Method::POST || uri.path() != &*state.path {
        debug!(%method, path = uri.path(), "Webhook request to unknown route");
        return StatusCode::NOT_FOUND;
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"));
    if !is_json {
        warn!("Webhook request without a JSON content type");
        return StatusCode::FORBIDDEN;
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read webhook body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    let update: Update = match serde_json::from_slice(&bytes) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Webhook body is not a valid update");
            return StatusCode::BAD_REQUEST;
        }
    };

    let update_id = update.update_id;
    if let Err(e) = state.queue.push(update) {
        warn!(update_id, error = %e, "Update queue closed, rejecting webhook update");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    info!(update_id, "Webhook received update");
    StatusCode::OK
}

/// Binds `addr`. Binding happens before bootstrap so the registered URL can use the real port.
pub(crate) async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Serves `app` until `cancel` fires, then shuts down gracefully.
pub(crate) fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await;
        match result {
            Ok(()) => info!("step: webhook server stopped"),
            Err(e) => warn!(error = %e, "Webhook server failed"),
        }
    })
}

#[cfg(feature = "tls")]
pub(crate) mod tls {
    use super::*;
    use dbot_core::DbotError;
    use hyper::body::Incoming;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use hyper_util::server::conn::auto;
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::TlsAcceptor;
    use tower_service::Service;

    pub(crate) fn acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor> {
        let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?)).collect::<std::io::Result<Vec<_>>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))?
            .ok_or_else(|| DbotError::Config(format!("no private key in {}", key.display())))?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| DbotError::Config(format!("invalid TLS certificate: {e}")))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// HTTPS counterpart of [`serve`]: TLS handshake per connection, then the same router.
    pub(crate) fn serve_tls(
        listener: TcpListener,
        acceptor: TlsAcceptor,
        app: Router,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (tcp, peer) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Webhook accept failed");
                            continue;
                        }
                    },
                };
                let acceptor = acceptor.clone();
                let app = app.clone();
                tokio::spawn(async move {
                    let stream = match acceptor.accept(tcp).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        let mut app = app.clone();
                        app.call(request)
                    });
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "Webhook connection closed with error");
                    }
                });
            }
            info!("step: webhook server stopped");
        })
    }
}
