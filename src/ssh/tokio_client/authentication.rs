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

//! SSH user authentication.
//!
//! The proxy only authenticates with keys: private keys loaded at startup
//! and, optionally, the identities held by a running ssh-agent. Methods are
//! tried in order and the first one the server accepts wins.

use russh::client::{Handle, Handler};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use std::fmt;
use std::sync::Arc;

use super::Error;

/// A way of proving the proxy's identity to a jump host.
#[derive(Clone)]
#[non_exhaustive]
pub enum AuthMethod {
    /// A decoded private key.
    PrivateKey(Arc<PrivateKey>),
    /// Every identity offered by the agent behind `SSH_AUTH_SOCK`.
    #[cfg(not(target_os = "windows"))]
    Agent,
}

impl AuthMethod {
    pub fn with_key(key: PrivateKey) -> Self {
        Self::PrivateKey(Arc::new(key))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn with_agent() -> Self {
        Self::Agent
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey(key) => f
                .debug_tuple("PrivateKey")
                .field(&key.algorithm().as_str())
                .finish(),
            #[cfg(not(target_os = "windows"))]
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// Try each method until the server accepts one.
pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    methods: &[AuthMethod],
) -> Result<(), Error> {
    for method in methods {
        let accepted = match method {
            AuthMethod::PrivateKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await?
                    .success()
            }
            #[cfg(not(target_os = "windows"))]
            AuthMethod::Agent => authenticate_with_agent(handle, username).await?,
        };

        if accepted {
            tracing::debug!(user = %username, method = ?method, "SSH authentication succeeded");
            return Ok(());
        }
        tracing::trace!(user = %username, method = ?method, "SSH authentication method rejected");
    }

    Err(Error::AuthFailed {
        user: username.to_string(),
    })
}

#[cfg(not(target_os = "windows"))]
async fn authenticate_with_agent<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
) -> Result<bool, Error> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|e| Error::AgentFailed(e.to_string()))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| Error::AgentFailed(e.to_string()))?;

    if identities.is_empty() {
        tracing::debug!("ssh-agent holds no identities");
        return Ok(false);
    }

    for identity in identities {
        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        let result = handle
            .authenticate_publickey_with(username, identity, hash_alg, &mut agent)
            .await;

        if let Ok(auth_result) = result {
            if auth_result.success() {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
