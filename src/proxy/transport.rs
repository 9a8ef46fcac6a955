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

//! Idle HTTP/1.1 connections carried over SSH channels.
//!
//! Each tunnel client owns one [`HttpTransport`]. Connections are keyed by
//! destination authority and only ever created from the owning client's
//! dial, so a pooled connection always runs over that client's SSH session.

use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use super::ProxyBody;

/// Maximum number of pooled connections per destination.
const MAX_IDLE_PER_HOST: usize = 10;

#[derive(Default)]
pub struct HttpTransport {
    idle: Mutex<HashMap<String, Vec<SendRequest<ProxyBody>>>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a connection to `authority` that can accept a request now.
    ///
    /// Closed connections are discarded. Connections still streaming a
    /// previous response stay pooled until they become ready.
    pub fn checkout(&self, authority: &str) -> Option<SendRequest<ProxyBody>> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let senders = idle.get_mut(authority)?;
        senders.retain(|sender| !sender.is_closed());
        let ready = senders.iter().position(|sender| sender.is_ready());
        let sender = ready.map(|i| senders.swap_remove(i));
        if senders.is_empty() {
            idle.remove(authority);
        }
        if sender.is_some() {
            tracing::trace!(authority = %authority, "reusing pooled HTTP connection");
        }
        sender
    }

    /// Return a connection after its request has been sent.
    pub fn checkin(&self, authority: String, sender: SendRequest<ProxyBody>) {
        if sender.is_closed() {
            tracing::trace!(authority = %authority, "not pooling closed HTTP connection");
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let senders = idle.entry(authority).or_default();
        if senders.len() < MAX_IDLE_PER_HOST {
            senders.push(sender);
        }
    }

    /// Drop every pooled connection. In-flight responses finish first.
    pub fn close_idle_connections(&self) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let dropped: usize = idle.values().map(Vec::len).sum();
        idle.clear();
        if dropped > 0 {
            tracing::debug!(count = dropped, "closed idle HTTP connections");
        }
    }

    pub fn idle_count(&self) -> usize {
        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.values().map(Vec::len).sum()
    }

    /// Run the HTTP/1.1 client handshake over `io` and spawn the connection
    /// driver.
    pub async fn handshake<T>(io: T) -> Result<SendRequest<ProxyBody>, hyper::Error>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = http1::handshake(TokioIo::new(io)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("HTTP connection closed: {}", e);
            }
        });
        Ok(sender)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("idle", &self.idle_count())
            .finish()
    }
}
