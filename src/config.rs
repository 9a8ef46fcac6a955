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

use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Cli;
use crate::ssh::auth::AuthContext;
use crate::ssh::known_hosts::{
    get_check_method, CertifiedHostKeys, HostKeyVerifier, ServerCheckMethod,
};
use crate::ssh::tokio_client::AuthMethod;

/// Keepalive requests left unanswered before russh drops the session.
pub const DEFAULT_KEEPALIVE_MAX: usize = 3;

/// SSH client settings shared by every pooled connection.
///
/// The pool holds the default copy; each tunnel client gets its own copy with
/// the username replaced when the request names one.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub connect_timeout: Duration,
    pub user: String,
    pub auth: Vec<AuthMethod>,
    pub verifier: Arc<dyn HostKeyVerifier>,
    pub keepalive_interval: Option<Duration>,
    pub keepalive_max: usize,
}

impl SshSettings {
    pub fn new(user: impl Into<String>, auth: Vec<AuthMethod>) -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user: user.into(),
            auth,
            verifier: Arc::new(ServerCheckMethod::NoCheck),
            keepalive_interval: None,
            keepalive_max: DEFAULT_KEEPALIVE_MAX,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Copy of these settings for a client authenticating as `username`.
    /// An empty username keeps the default.
    pub fn for_user(&self, username: &str) -> Self {
        let mut settings = self.clone();
        if !username.is_empty() {
            settings.user = username.to_string();
        }
        settings
    }

    pub fn russh_config(&self) -> russh::client::Config {
        russh::client::Config {
            keepalive_interval: self.keepalive_interval,
            keepalive_max: self.keepalive_max,
            ..Default::default()
        }
    }

    /// Build settings from the command line, loading keys and host
    /// certificates from disk.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let key_dir = cli.key_dir.clone().or_else(default_key_dir);
        let auth = AuthContext::new(key_dir)
            .with_identity_files(cli.identities.clone())
            .with_agent(cli.use_agent)
            .determine_methods()?;

        let check: Arc<dyn HostKeyVerifier> = Arc::new(get_check_method(
            cli.strict_host_key_checking,
            cli.known_hosts.clone(),
        ));
        let verifier: Arc<dyn HostKeyVerifier> = if cli.host_certificates.is_empty() {
            check
        } else {
            Arc::new(
                CertifiedHostKeys::load(check, &cli.host_certificates)
                    .context("Failed to load host certificate")?,
            )
        };

        let keepalive = (cli.keepalive_interval > 0)
            .then(|| Duration::from_secs(cli.keepalive_interval));

        Ok(Self::new(cli.user.clone(), auth)
            .with_connect_timeout(Duration::from_secs(cli.timeout))
            .with_verifier(verifier)
            .with_keepalive(keepalive))
    }
}

fn default_key_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh"))
}
