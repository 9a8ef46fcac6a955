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

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing or using an SSH session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to resolve {host}: {source}")]
    AddressInvalid {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} did not resolve to any address")]
    NoAddress(String),

    #[error("SSH connection to {host} timed out after {timeout:?}")]
    ConnectTimeout { host: String, timeout: Duration },

    #[error("host key verification failed: {0}")]
    ServerCheckFailed(String),

    #[error("ssh: unable to authenticate as {user}, no supported method remains")]
    AuthFailed { user: String },

    #[error("invalid key: {0}")]
    KeyInvalid(#[from] russh::keys::Error),

    #[error("unable to use ssh-agent: {0}")]
    AgentFailed(String),

    #[error(transparent)]
    SshError(#[from] russh::Error),
}

impl Error {
    /// Whether this error means the peer closed the transport underneath us.
    pub fn is_eof(&self) -> bool {
        match self {
            Self::SshError(russh::Error::Disconnect) => true,
            Self::SshError(russh::Error::IO(err)) => err.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}
