// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Proxy HTTP server.
//!
//! Accepts TCP connections and serves each with hyper's HTTP/1 connection
//! builder on its own task. `GET /metrics` in origin form returns the
//! Prometheus text exposition; every other request is relayed.

use anyhow::{Context, Result};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Registry;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::{relay, text_response, ProxyBody};
use crate::metrics::{self, MetricsExporter};
use crate::ssh::pool::ConnectionPool;

pub const METRICS_PATH: &str = "/metrics";

/// `ProxyServer` owns the connection pool and the metrics registry and
/// serves proxy requests until shut down.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use http_over_ssh::config::SshSettings;
/// use http_over_ssh::proxy::ProxyServer;
/// use http_over_ssh::ssh::ConnectionPool;
///
/// # async fn run(settings: SshSettings) -> anyhow::Result<()> {
/// let pool = Arc::new(ConnectionPool::new(settings));
/// let server = Arc::new(ProxyServer::new(pool)?);
/// server.run_at("[::1]:8080".parse()?, async {
///     let _ = tokio::signal::ctrl_c().await;
/// })
/// .await
/// # }
/// ```
pub struct ProxyServer {
    pool: Arc<ConnectionPool>,
    registry: Registry,
}

impl ProxyServer {
    pub fn new(pool: Arc<ConnectionPool>) -> prometheus::Result<Self> {
        let registry = MetricsExporter::registry(Arc::clone(&pool))?;
        Ok(Self { pool, registry })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn run_at<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;
        self.run_on_listener(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    ///
    /// Connections already accepted keep running; SSH sessions stay open.
    pub async fn run_on_listener<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(local_addr = ?listener.local_addr(), "HTTP proxy listening");

        tokio::select! {
            result = self.accept_loop(&listener) => result,
            _ = shutdown => {
                tracing::info!("Shutting down HTTP proxy");
                Ok(())
            }
        }
    }

    async fn accept_loop(self: &Arc<Self>, listener: &TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            tracing::trace!(peer = %peer_addr, "New connection");

            let server = Arc::clone(self);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(peer = %peer_addr, "Connection ended: {}", err);
                }
            });
        }
    }

    /// Route one request.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        if is_metrics_request(&req) {
            return self.metrics_response();
        }
        relay(&self.pool, req).await
    }

    fn metrics_response(&self) -> Response<ProxyBody> {
        match metrics::render(&self.registry) {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                if let Ok(value) = http::HeaderValue::from_str(&metrics::content_type()) {
                    response
                        .headers_mut()
                        .insert(http::header::CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                tracing::error!("Failed to render metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
            }
        }
    }
}

fn is_metrics_request<B>(req: &Request<B>) -> bool {
    req.method() == Method::GET
        && req.uri().authority().is_none()
        && req.uri().path() == METRICS_PATH
}
