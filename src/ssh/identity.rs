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

//! Jump host identity used as the connection pool key.

use std::fmt;

/// Default SSH port used when a request does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Identifies one pooled SSH connection.
///
/// Two identities are equal only when host, port and username all match.
/// An empty username means "use the proxy default" and is a distinct key
/// from any named user, even if that user happens to be the default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    host: String,
    port: u16,
    username: String,
}

impl ClientIdentity {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username requested by the caller, empty when the default applies.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// `host:port`, with IPv6 literals wrapped in brackets.
    pub fn host_port(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}", self.host_port())
        } else {
            write!(f, "{}@{}", self.username, self.host_port())
        }
    }
}
