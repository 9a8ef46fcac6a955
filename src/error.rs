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

use http::StatusCode;
use thiserror::Error;

use crate::ssh::tokio_client;

/// Why an inbound request target could not be decoded into a jump host and
/// destination.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestDecodeError {
    #[error("invalid URL escape \"{0}\"")]
    InvalidEscape(String),

    #[error("invalid request URI: {0}")]
    InvalidUri(String),

    #[error("host missing in request URI")]
    MissingHost,

    #[error("destination host missing in request URI")]
    MissingDestination,

    #[error("unable to parse port number: parsing \"{0}\": invalid port number")]
    InvalidPort(String),
}

/// Failure while relaying a request. Each variant maps to the status code
/// returned to the caller.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy request: {0}")]
    Decode(#[from] RequestDecodeError),

    #[error("unable to build request: {0}")]
    Request(#[from] http::Error),

    /// The SSH connection to the jump host could not be established.
    #[error(transparent)]
    Connect(tokio_client::Error),

    /// The jump host refused to open a channel to the destination.
    #[error("ssh: unable to open channel to {destination}: {source}")]
    Forward {
        destination: String,
        #[source]
        source: tokio_client::Error,
    },

    #[error("not implemented")]
    NotImplemented,

    #[error("unsupported protocol scheme \"{0}\"")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Transport(#[from] hyper::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::Request(_) => StatusCode::BAD_REQUEST,
            Self::Connect(_)
            | Self::Forward { .. }
            | Self::NotImplemented
            | Self::UnsupportedScheme(_)
            | Self::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
