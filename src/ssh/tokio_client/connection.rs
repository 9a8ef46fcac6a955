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

//! SSH connection establishment.
//!
//! This module handles address resolution, connection attempts, the host key
//! check and the initial authentication of a jump host session.

use russh::client::{Config, Handle, Handler};
use russh::keys::Certificate;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::authentication::AuthMethod;
use super::Error;
use crate::ssh::known_hosts::{HostKeyVerdict, HostKeyVerifier};

/// An authenticated SSH session to a jump host.
///
/// ```no_run
/// use std::sync::Arc;
/// use http_over_ssh::ssh::known_hosts::ServerCheckMethod;
/// use http_over_ssh::ssh::tokio_client::{AuthMethod, Client, Config};
///
/// # async fn run(key: russh::keys::PrivateKey) -> Result<(), http_over_ssh::ssh::tokio_client::Error> {
/// let client = Client::connect(
///     "jump.example.com",
///     22,
///     "root",
///     &[AuthMethod::with_key(key)],
///     Arc::new(ServerCheckMethod::NoCheck),
///     Arc::new(Config::default()),
/// )
/// .await?;
/// println!("connected to {}", client.address());
/// # Ok(())
/// # }
/// ```
pub struct Client {
    handle: Handle<ClientHandler>,
    username: String,
    address: SocketAddr,
    certificate: Option<Certificate>,
}

impl Client {
    /// Open an SSH connection to `host:port` and authenticate as `username`.
    ///
    /// If the host resolves to multiple addresses, each is tried in turn until
    /// one accepts the TCP connection and completes the handshake.
    /// Authentication is attempted only on that first successful connection.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: &[AuthMethod],
        verifier: Arc<dyn HostKeyVerifier>,
        config: Arc<Config>,
    ) -> Result<Self, Error> {
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|source| Error::AddressInvalid {
                host: host.to_string(),
                source,
            })?
            .collect();

        let mut connect_res = Err(Error::NoAddress(host.to_string()));
        for socket_addr in socket_addrs {
            let (verdict_tx, mut verdict_rx) = oneshot::channel();
            let handler = ClientHandler::new(host, port, Arc::clone(&verifier), verdict_tx);

            match russh::client::connect(Arc::clone(&config), socket_addr, handler).await {
                Ok(handle) => {
                    connect_res = Ok((socket_addr, handle, verdict_rx));
                    break;
                }
                Err(e) => {
                    tracing::debug!(address = %socket_addr, error = %e, "SSH connect attempt failed");
                    connect_res = match verdict_rx.try_recv() {
                        Ok(HostKeyVerdict::Rejected) => Err(Error::ServerCheckFailed(format!(
                            "host key for {host}:{port} is not trusted"
                        ))),
                        _ => Err(e),
                    };
                }
            }
        }
        let (address, mut handle, mut verdict_rx) = connect_res?;

        super::authentication::authenticate(&mut handle, username, auth).await?;

        // The key exchange, and with it the host key check, precedes
        // authentication, so the verdict is settled by now.
        let certificate = verdict_rx
            .try_recv()
            .ok()
            .and_then(HostKeyVerdict::into_certificate);

        Ok(Self {
            handle,
            username: username.to_string(),
            address,
            certificate,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Host certificate matched to the key the server presented, if any.
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    /// Split into the session handle and the observed certificate.
    pub fn into_parts(self) -> (Handle<ClientHandler>, Option<Certificate>) {
        (self.handle, self.certificate)
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("address", &self.address)
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

/// SSH client handler for server key verification.
///
/// The verdict produced by the verifier is handed back to [`Client::connect`]
/// through a one-shot channel.
#[derive(Debug)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    verifier: Arc<dyn HostKeyVerifier>,
    verdict_tx: Option<oneshot::Sender<HostKeyVerdict>>,
}

impl ClientHandler {
    pub fn new(
        hostname: &str,
        port: u16,
        verifier: Arc<dyn HostKeyVerifier>,
        verdict_tx: oneshot::Sender<HostKeyVerdict>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            verifier,
            verdict_tx: Some(verdict_tx),
        }
    }
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let verdict = self
            .verifier
            .verify(&self.hostname, self.port, server_public_key)?;
        let trusted = verdict.is_trusted();

        // Re-keying calls this again; only the first verdict is reported.
        if let Some(tx) = self.verdict_tx.take() {
            let _ = tx.send(verdict);
        }

        Ok(trusted)
    }
}
