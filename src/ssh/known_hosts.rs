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

//! Jump host key verification.
//!
//! Verification is a two-step protocol: a [`HostKeyVerifier`] decides whether
//! a presented key is trusted and returns a [`HostKeyVerdict`]; the caller
//! keeps whatever certificate the verdict carries. Nothing is stashed through
//! captured references.

use anyhow::Context;
use directories::BaseDirs;
use russh::keys::{Certificate, PublicKey};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::tokio_client::Error;

/// Outcome of checking a jump host's key.
#[derive(Debug, Clone)]
pub enum HostKeyVerdict {
    /// The key is trusted. `certificate` is set when the key is backed by a
    /// host certificate the proxy knows about.
    Trusted { certificate: Option<Certificate> },
    Rejected,
}

impl HostKeyVerdict {
    pub fn trusted() -> Self {
        Self::Trusted { certificate: None }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted { .. })
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Trusted { certificate } => certificate.as_ref(),
            Self::Rejected => None,
        }
    }

    pub fn into_certificate(self) -> Option<Certificate> {
        match self {
            Self::Trusted { certificate } => certificate,
            Self::Rejected => None,
        }
    }
}

/// Decides whether a jump host key is acceptable.
///
/// An `Err` aborts the connection attempt just like `Rejected` does, but
/// carries the reason (unreadable known_hosts file, changed key, ...).
pub trait HostKeyVerifier: Debug + Send + Sync {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyVerdict, Error>;
}

/// Built-in host key checks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerCheckMethod {
    /// Accept any host key.
    NoCheck,
    /// Accept exactly this base64 encoded public key.
    PublicKey(String),
    /// Require a matching entry in the known_hosts file.
    KnownHostsFile(PathBuf),
    /// Like `KnownHostsFile`, but hosts without an entry are accepted.
    /// A host whose recorded key differs is still rejected.
    AcceptNewKnownHostsFile(PathBuf),
}

impl ServerCheckMethod {
    pub fn with_public_key(key: &str) -> Self {
        Self::PublicKey(key.to_string())
    }

    pub fn with_known_hosts_file(known_hosts_file: impl AsRef<Path>) -> Self {
        Self::KnownHostsFile(known_hosts_file.as_ref().to_path_buf())
    }
}

impl HostKeyVerifier for ServerCheckMethod {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyVerdict, Error> {
        let trusted = match self {
            Self::NoCheck => true,
            Self::PublicKey(expected) => {
                let pk = russh::keys::parse_public_key_base64(expected)
                    .map_err(|e| Error::ServerCheckFailed(e.to_string()))?;
                pk == *key
            }
            Self::KnownHostsFile(path) => russh::keys::check_known_hosts_path(host, port, key, path)
                .map_err(|e| Error::ServerCheckFailed(format!("{host}:{port}: {e}")))?,
            Self::AcceptNewKnownHostsFile(path) => {
                if !path.exists() {
                    true
                } else {
                    let known = russh::keys::check_known_hosts_path(host, port, key, path)
                        .map_err(|e| Error::ServerCheckFailed(format!("{host}:{port}: {e}")))?;
                    if !known {
                        tracing::info!(host = %host, port, "accepting unknown host key");
                    }
                    true
                }
            }
        };

        Ok(if trusted {
            HostKeyVerdict::trusted()
        } else {
            tracing::warn!(host = %host, port, "host key not trusted");
            HostKeyVerdict::Rejected
        })
    }
}

/// Wraps another verifier and, once it trusts a key, reports the host
/// certificate issued for that key.
///
/// Certificates never make an untrusted key trusted; they only feed the
/// certificate expiry metric.
#[derive(Debug)]
pub struct CertifiedHostKeys {
    inner: Arc<dyn HostKeyVerifier>,
    certificates: Vec<Certificate>,
}

impl CertifiedHostKeys {
    pub fn new(inner: Arc<dyn HostKeyVerifier>, certificates: Vec<Certificate>) -> Self {
        Self {
            inner,
            certificates,
        }
    }

    /// Read OpenSSH host certificate files (`*-cert.pub`).
    pub fn load(
        inner: Arc<dyn HostKeyVerifier>,
        paths: &[PathBuf],
    ) -> anyhow::Result<Self> {
        let certificates = paths
            .iter()
            .map(|path| {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let cert = Certificate::from_openssh(text.trim())
                    .with_context(|| format!("invalid host certificate {}", path.display()))?;
                tracing::info!(
                    path = %path.display(),
                    key_id = %cert.key_id(),
                    valid_before = cert.valid_before(),
                    "loaded host certificate"
                );
                Ok(cert)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(inner, certificates))
    }

    fn certificate_for(&self, key: &PublicKey) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|cert| cert.public_key() == key.key_data())
    }
}

impl HostKeyVerifier for CertifiedHostKeys {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyVerdict, Error> {
        let verdict = self.inner.verify(host, port, key)?;
        if !verdict.is_trusted() {
            return Ok(verdict);
        }
        Ok(HostKeyVerdict::Trusted {
            certificate: self.certificate_for(key).cloned(),
        })
    }
}

/// Get the default known_hosts file path
pub fn get_default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// Create a ServerCheckMethod based on strict host key checking mode
pub fn get_check_method(
    strict_mode: StrictHostKeyChecking,
    known_hosts: Option<PathBuf>,
) -> ServerCheckMethod {
    let known_hosts = known_hosts.or_else(get_default_known_hosts_path);
    match (strict_mode, known_hosts) {
        (StrictHostKeyChecking::No, _) => {
            tracing::debug!("Host key checking disabled (strict mode = no)");
            ServerCheckMethod::NoCheck
        }
        (StrictHostKeyChecking::Yes, Some(path)) => {
            tracing::debug!("Using known_hosts file: {:?} (strict mode)", path);
            ServerCheckMethod::KnownHostsFile(path)
        }
        (StrictHostKeyChecking::AcceptNew, Some(path)) => {
            tracing::debug!("Using known_hosts file: {:?} (accept-new mode)", path);
            ServerCheckMethod::AcceptNewKnownHostsFile(path)
        }
        (mode, None) => {
            // Strict mode without any known_hosts file can never succeed, so
            // fail closed with a path that does not exist.
            tracing::warn!("Could not determine known_hosts path ({:?})", mode);
            match mode {
                StrictHostKeyChecking::Yes => {
                    ServerCheckMethod::KnownHostsFile(PathBuf::from("known_hosts"))
                }
                _ => ServerCheckMethod::NoCheck,
            }
        }
    }
}

/// Mode for host key checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StrictHostKeyChecking {
    /// Always verify host keys (fail on unknown/changed)
    Yes,
    /// Never verify host keys (accept all)
    #[default]
    No,
    /// Verify known hosts, accept hosts that have no entry yet
    AcceptNew,
}
