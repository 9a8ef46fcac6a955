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

//! Decoding of proxy request targets.
//!
//! A request target has the form
//!
//! ```text
//! <scheme>://<jump-host>[:<port>]/<destination>[:<port>][/path][?query]
//! ```
//!
//! The authority names the SSH jump host; the first path segment and
//! everything after it form the destination URI. The SSH username comes from
//! the `Authorization: Basic` header, whose password part is ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::{HeaderMap, Request, Uri};

use crate::error::RequestDecodeError;
use crate::ssh::identity::{ClientIdentity, DEFAULT_SSH_PORT};

/// Jump host identity and destination decoded from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    pub identity: ClientIdentity,
    pub destination: Uri,
}

impl ParsedTarget {
    pub fn from_request<B>(req: &Request<B>) -> Result<Self, RequestDecodeError> {
        Self::parse(&req.uri().to_string(), req.headers())
    }

    pub fn parse(target: &str, headers: &HeaderMap) -> Result<Self, RequestDecodeError> {
        // Escapes are only validated up to the query, which is forwarded raw.
        let before_query = target.split('?').next().unwrap_or(target);
        check_escapes(before_query)?;

        // Origin-form targets ("/...") carry no jump host.
        let (scheme, rest) = match target.split_once("://") {
            Some((scheme, rest)) if is_scheme(scheme) => (scheme, rest),
            _ => return Err(RequestDecodeError::MissingHost),
        };

        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, path_and_query) = rest.split_at(authority_end);
        if authority.is_empty() {
            return Err(RequestDecodeError::MissingHost);
        }

        let path = path_and_query.split('?').next().unwrap_or("");
        if path.is_empty() || path == "/" {
            return Err(RequestDecodeError::MissingDestination);
        }

        let (host, port) = split_host_port(authority)?;
        let username = basic_auth_username(headers).unwrap_or_default();

        let destination: Uri = format!("{scheme}:/{path_and_query}")
            .parse()
            .map_err(|e: http::uri::InvalidUri| RequestDecodeError::InvalidUri(e.to_string()))?;
        if destination.host().is_none() {
            return Err(RequestDecodeError::MissingDestination);
        }

        Ok(Self {
            identity: ClientIdentity::new(host, port, username),
            destination,
        })
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn check_escapes(s: &str) -> Result<(), RequestDecodeError> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                let end = (i + 3).min(bytes.len());
                // the escape may straddle a multi-byte character
                let escape = String::from_utf8_lossy(&bytes[i..end]).into_owned();
                return Err(RequestDecodeError::InvalidEscape(escape));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Split `[userinfo@]host[:port]`, stripping IPv6 brackets and userinfo.
fn split_host_port(authority: &str) -> Result<(&str, u16), RequestDecodeError> {
    let hostport = authority.rsplit('@').next().unwrap_or(authority);

    let (host, port) = if let Some(rest) = hostport.strip_prefix('[') {
        match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':')),
            None => return Err(RequestDecodeError::InvalidUri(authority.to_string())),
        }
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };

    if host.is_empty() {
        return Err(RequestDecodeError::MissingHost);
    }

    let port = match port {
        None | Some("") => DEFAULT_SSH_PORT,
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| RequestDecodeError::InvalidPort(port.to_string()))?,
    };

    Ok((host, port))
}

fn basic_auth_username(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let user = match decoded.iter().position(|&b| b == b':') {
        Some(i) => &decoded[..i],
        None => &decoded[..],
    };
    Some(String::from_utf8_lossy(user).into_owned())
}
