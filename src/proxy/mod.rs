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

//! HTTP relay.
//!
//! A proxy request is decoded into a jump host identity and a destination,
//! stripped of hop-by-hop headers, and sent through the pooled tunnel
//! client for that identity. The response is streamed back unchanged.

pub mod headers;
pub mod server;
pub mod target;
pub mod transport;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::error::ProxyError;
use crate::ssh::pool::ConnectionPool;
use headers::strip_hop_by_hop_headers;
use target::ParsedTarget;

pub use server::ProxyServer;

/// Body type for requests and responses passing through the proxy.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Relay one request and turn any failure into a plain-text error response.
pub async fn relay(pool: &ConnectionPool, req: Request<Incoming>) -> Response<ProxyBody> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    match forward(pool, req).await {
        Ok(response) => {
            tracing::debug!(%method, %uri, status = %response.status(), "relayed request");
            response
        }
        Err(e) => {
            tracing::info!(%method, %uri, status = %e.status(), error = %e, "proxy request failed");
            text_response(e.status(), format!("{e}\n"))
        }
    }
}

async fn forward(
    pool: &ConnectionPool,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, ProxyError> {
    let target = ParsedTarget::from_request(&req)?;
    let client = pool.get(&target.identity);

    let (parts, body) = req.into_parts();
    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(target.destination)
        .body(body.boxed())?;
    *outbound.headers_mut() = parts.headers;
    strip_hop_by_hop_headers(outbound.headers_mut());

    let response = client.round_trip(outbound).await?;
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.boxed()))
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn text_response(status: StatusCode, body: String) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
