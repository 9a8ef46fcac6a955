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

//! One SSH connection to one jump host, and the HTTP traffic carried over it.
//!
//! A [`TunnelClient`] is either disconnected or holds a live session. Dialing
//! a destination connects on demand, opens a `direct-tcpip` channel, and when
//! the session turns out to be broken reconnects and tries once more.

use http::header::HOST;
use http::{HeaderValue, Request, Response, Uri, Version};
use hyper::body::Incoming;
use russh::client::{Handle, Msg};
use russh::keys::Certificate;
use russh::ChannelStream;
use std::sync::{Arc, Mutex};
use tokio::time::timeout;

use super::identity::ClientIdentity;
use super::tokio_client::{Client, ClientHandler, Error};
use crate::config::SshSettings;
use crate::error::{ProxyError, RequestDecodeError};
use crate::metrics::Counters;
use crate::proxy::transport::HttpTransport;
use crate::proxy::ProxyBody;

/// Reconnect attempts after a broken session is detected.
const MAX_RETRIES: usize = 1;

/// Originator reported in `direct-tcpip` channel requests.
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";
const ORIGINATOR_PORT: u32 = 22;

const DEFAULT_HTTP_PORT: u16 = 80;

pub type SessionHandle = Arc<Handle<ClientHandler>>;

pub struct TunnelClient {
    identity: ClientIdentity,
    settings: SshSettings,
    counters: Arc<Counters>,
    /// Serializes connect and channel opening.
    dial_lock: tokio::sync::Mutex<()>,
    session: Mutex<Option<SessionHandle>>,
    certificate: Mutex<Option<Certificate>>,
    transport: HttpTransport,
}

impl TunnelClient {
    pub fn new(identity: ClientIdentity, settings: SshSettings, counters: Arc<Counters>) -> Self {
        Self {
            identity,
            settings,
            counters,
            dial_lock: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
            certificate: Mutex::new(None),
            transport: HttpTransport::new(),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// Whether a session is held and has not been closed by the peer.
    pub fn is_connected(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    /// Expiry of the last host certificate seen on this connection.
    pub fn certificate_valid_before(&self) -> Option<u64> {
        self.certificate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Certificate::valid_before)
    }

    /// Establish the SSH session if there is none.
    pub async fn connect(&self) -> Result<(), Error> {
        let _guard = self.dial_lock.lock().await;
        if self.live_session().is_none() {
            self.establish().await?;
        }
        Ok(())
    }

    /// Open a byte stream to `host:port` through the jump host.
    ///
    /// The destination name is resolved by the jump host.
    pub async fn dial(&self, host: &str, port: u16) -> Result<ChannelStream<Msg>, ProxyError> {
        let _guard = self.dial_lock.lock().await;
        let mut attempt = 0;

        loop {
            let handle = match self.live_session() {
                Some(handle) => handle,
                None => self.establish().await.map_err(ProxyError::Connect)?,
            };

            let err = match handle
                .channel_open_direct_tcpip(
                    host,
                    u32::from(port),
                    ORIGINATOR_ADDRESS,
                    ORIGINATOR_PORT,
                )
                .await
            {
                Ok(channel) => {
                    self.counters.forwarding_established();
                    tracing::debug!(client = %self.identity, host = %host, port, "forwarding established");
                    return Ok(channel.into_stream());
                }
                Err(e) => Error::from(e),
            };

            if attempt < MAX_RETRIES && self.is_broken(&handle, &err).await {
                attempt += 1;
                tracing::warn!(
                    client = %self.identity,
                    error = %err,
                    "SSH connection broken, reconnecting"
                );
                self.reset(&handle).await;
                continue;
            }

            self.counters.forwarding_failed();
            tracing::info!(client = %self.identity, host = %host, port, error = %err, "forwarding failed");
            return Err(ProxyError::Forward {
                destination: format_host_port(host, port),
                source: err,
            });
        }
    }

    /// Send `req` to the destination named by its absolute URI and return
    /// the response with a streaming body.
    pub async fn round_trip(
        &self,
        mut req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, ProxyError> {
        let uri = req.uri().clone();
        match uri.scheme_str() {
            Some("http") => {}
            Some("https") => return Err(ProxyError::NotImplemented),
            other => {
                return Err(ProxyError::UnsupportedScheme(
                    other.unwrap_or_default().to_string(),
                ))
            }
        }
        let authority = uri
            .authority()
            .ok_or(ProxyError::Decode(RequestDecodeError::MissingDestination))?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        let port = authority.port_u16().unwrap_or(DEFAULT_HTTP_PORT);

        let origin_form: Uri = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse()
            .map_err(http::Error::from)?;
        *req.uri_mut() = origin_form;
        *req.version_mut() = Version::HTTP_11;
        req.headers_mut().insert(
            HOST,
            HeaderValue::from_str(authority.as_str()).map_err(http::Error::from)?,
        );

        self.discard_closed_session();

        let key = format_host_port(host, port);
        let mut sender = match self.transport.checkout(&key) {
            Some(sender) => sender,
            None => {
                let stream = self.dial(host, port).await?;
                HttpTransport::handshake(stream).await?
            }
        };

        let response = sender.send_request(req).await?;
        self.transport.checkin(key, sender);
        Ok(response)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<SessionHandle>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget the held session, and the idle HTTP connections riding on it,
    /// once the peer has closed it.
    fn discard_closed_session(&self) {
        let mut session = self.lock_session();
        if session.as_ref().is_some_and(|handle| handle.is_closed()) {
            tracing::debug!(client = %self.identity, "discarding closed SSH session");
            *session = None;
            self.transport.close_idle_connections();
        }
    }

    /// The held session, unless the peer already closed it.
    fn live_session(&self) -> Option<SessionHandle> {
        self.discard_closed_session();
        self.lock_session().clone()
    }

    async fn establish(&self) -> Result<SessionHandle, Error> {
        let settings = &self.settings;
        tracing::info!(client = %self.identity, "establishing SSH connection");

        let connect = Client::connect(
            self.identity.host(),
            self.identity.port(),
            &settings.user,
            &settings.auth,
            Arc::clone(&settings.verifier),
            Arc::new(settings.russh_config()),
        );
        let result = match timeout(settings.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout {
                host: self.identity.host_port(),
                timeout: settings.connect_timeout,
            }),
        };

        let client = match result {
            Ok(client) => client,
            Err(e) => {
                self.counters.connection_failed();
                tracing::warn!(client = %self.identity, error = %e, "SSH connection failed");
                return Err(e);
            }
        };

        self.counters.connection_established();
        tracing::info!(client = %self.identity, address = %client.address(), "SSH connection established");

        let (handle, certificate) = client.into_parts();
        let handle = Arc::new(handle);
        *self.lock_session() = Some(Arc::clone(&handle));
        *self.certificate.lock().unwrap_or_else(|e| e.into_inner()) = certificate;
        Ok(handle)
    }

    /// Whether a failed channel open means the session itself is gone.
    ///
    /// Besides an EOF or a closed handle, a `keepalive@openssh.com` request
    /// that gets no reply within the connect timeout marks a silently dead
    /// link.
    async fn is_broken(&self, handle: &SessionHandle, err: &Error) -> bool {
        if err.is_eof() || handle.is_closed() {
            return true;
        }
        match timeout(self.settings.connect_timeout, handle.send_ping()).await {
            Ok(Ok(())) => handle.is_closed(),
            Ok(Err(e)) => {
                tracing::debug!(client = %self.identity, error = %e, "keepalive probe failed");
                true
            }
            Err(_) => {
                tracing::debug!(
                    client = %self.identity,
                    timeout = ?self.settings.connect_timeout,
                    "keepalive probe got no reply"
                );
                true
            }
        }
    }

    async fn reset(&self, handle: &SessionHandle) {
        {
            let mut session = self.lock_session();
            if session
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, handle))
            {
                *session = None;
            }
        }
        self.transport.close_idle_connections();
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            tracing::trace!(client = %self.identity, error = %e, "disconnect of broken session failed");
        }
    }
}

impl std::fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelClient")
            .field("identity", &self.identity)
            .field("user", &self.settings.user)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Empty};

    fn client(username: &str) -> TunnelClient {
        let settings = SshSettings::new("root", Vec::new());
        TunnelClient::new(
            ClientIdentity::new("::1", 22, username),
            settings.for_user(username),
            Arc::new(Counters::new()),
        )
    }

    fn get(uri: &str) -> Request<ProxyBody> {
        Request::get(uri)
            .body(Empty::new().map_err(|never| match never {}).boxed())
            .unwrap()
    }

    #[tokio::test]
    async fn test_https_not_implemented() {
        let client = client("");
        let err = client
            .round_trip(get("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotImplemented));
        assert_eq!(err.to_string(), "not implemented");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = client("")
            .round_trip(get("ftp://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedScheme(ref s) if s == "ftp"));
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = client("prometheus");
        assert!(!client.is_connected());
        assert_eq!(client.certificate_valid_before(), None);
        assert_eq!(client.settings().user, "prometheus");
        assert_eq!(client.identity().to_string(), "prometheus@[::1]:22");
    }

    #[test]
    fn test_format_host_port() {
        assert_eq!(format_host_port("backend", 80), "backend:80");
        assert_eq!(format_host_port("fe80::2", 9100), "[fe80::2]:9100");
    }
}
