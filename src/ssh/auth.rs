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

//! Assembly of the authentication methods offered to every jump host.
//!
//! Keys are read once at startup. Default key files that do not exist are
//! skipped silently; files that exist but cannot be decoded (for example
//! because they are passphrase protected) are skipped with a warning.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::tokio_client::AuthMethod;

/// Private key file names looked up in the key directory.
pub const DEFAULT_KEY_FILES: &[&str] = &["id_rsa", "id_ed25519"];

/// Inputs for determining the proxy's authentication methods.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Directory searched for [`DEFAULT_KEY_FILES`].
    pub key_dir: Option<PathBuf>,
    /// Explicit identity files. Unlike default keys, these must load.
    pub identity_files: Vec<PathBuf>,
    /// Whether to also offer ssh-agent identities.
    pub use_agent: bool,
}

impl AuthContext {
    pub fn new(key_dir: Option<PathBuf>) -> Self {
        Self {
            key_dir,
            ..Default::default()
        }
    }

    pub fn with_identity_files(mut self, identity_files: Vec<PathBuf>) -> Self {
        self.identity_files = identity_files;
        self
    }

    pub fn with_agent(mut self, use_agent: bool) -> Self {
        self.use_agent = use_agent;
        self
    }

    /// Default key file paths, in the order they are offered.
    pub fn default_key_paths(&self) -> Vec<PathBuf> {
        match &self.key_dir {
            Some(dir) => DEFAULT_KEY_FILES.iter().map(|name| dir.join(name)).collect(),
            None => Vec::new(),
        }
    }

    /// Load every usable key and build the method list.
    ///
    /// Explicit identities come first, then default keys, then the agent.
    /// Fails when the list would be empty.
    pub fn determine_methods(&self) -> Result<Vec<AuthMethod>> {
        let mut methods = Vec::new();

        for path in &self.identity_files {
            let key = load_key(path)
                .with_context(|| format!("Failed to load identity file {}", path.display()))?;
            methods.push(AuthMethod::with_key(key));
        }

        for path in self.default_key_paths() {
            if !path.exists() {
                tracing::trace!(path = %path.display(), "default key not present");
                continue;
            }
            match load_key(&path) {
                Ok(key) => methods.push(AuthMethod::with_key(key)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unusable key: {e:#}");
                }
            }
        }

        #[cfg(not(target_os = "windows"))]
        if self.use_agent {
            if std::env::var_os("SSH_AUTH_SOCK").is_none() {
                tracing::warn!("--use-agent given but SSH_AUTH_SOCK is not set");
            }
            methods.push(AuthMethod::with_agent());
        }

        if methods.is_empty() {
            bail!("no SSH keys found");
        }
        Ok(methods)
    }
}

/// Load an unencrypted OpenSSH or PEM private key.
pub fn load_key(path: &Path) -> Result<russh::keys::PrivateKey> {
    let key = russh::keys::load_secret_key(path, None)
        .with_context(|| format!("Failed to decode private key {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        algorithm = %key.algorithm().as_str(),
        "loaded private key"
    );
    Ok(key)
}
