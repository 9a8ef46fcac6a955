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

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::ssh::known_hosts::StrictHostKeyChecking;

#[derive(Parser, Debug)]
#[command(
    name = "http-over-ssh",
    version,
    about = "HTTP reverse proxy that tunnels requests through SSH jump hosts",
    long_about = "http-over-ssh accepts plain HTTP requests whose target names an SSH jump host and a\ndestination behind it, and relays each request through a direct-tcpip channel opened on a\npooled SSH connection to the jump host. Connections are reused across requests and\ntransparently re-established when they break.",
    after_help = "EXAMPLES:\n  Scrape node_exporter behind a jump host:\n    curl -x http://localhost:8080 http://jump.example.com/10.0.0.5:9100/metrics\n  Use a non-default jump port and user:\n    curl -x http://localhost:8080 -u prometheus: http://jump.example.com:2222/10.0.0.5:9100/metrics\n  Proxy metrics:\n    curl http://localhost:8080/metrics"
)]
pub struct Cli {
    #[arg(
        long,
        env = "HOS_LISTEN",
        default_value = "[::1]:8080",
        help = "Address to listen on for HTTP requests"
    )]
    pub listen: SocketAddr,

    #[arg(
        short = 'l',
        long,
        env = "HOS_USER",
        default_value = "root",
        help = "Default SSH username, used when a request carries no Basic credentials"
    )]
    pub user: String,

    #[arg(
        long,
        env = "HOS_TIMEOUT",
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "SSH connection timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(
        long,
        env = "HOS_KEY_DIR",
        help = "Directory containing the id_rsa and id_ed25519 private keys [default: ~/.ssh]"
    )]
    pub key_dir: Option<PathBuf>,

    #[arg(
        short = 'i',
        long = "identity",
        help = "Additional SSH private key file (repeatable). Must be unencrypted"
    )]
    pub identities: Vec<PathBuf>,

    #[arg(
        long,
        env = "HOS_USE_AGENT",
        help = "Also authenticate with identities from the SSH agent (Unix only)"
    )]
    pub use_agent: bool,

    #[arg(
        long,
        env = "HOS_KNOWN_HOSTS",
        help = "known_hosts file used to verify jump hosts [default: ~/.ssh/known_hosts]"
    )]
    pub known_hosts: Option<PathBuf>,

    #[arg(
        long,
        env = "HOS_STRICT_HOST_KEY_CHECKING",
        value_enum,
        default_value_t = StrictHostKeyChecking::No,
        help = "Host key checking mode for jump hosts"
    )]
    pub strict_host_key_checking: StrictHostKeyChecking,

    #[arg(
        long = "host-certificate",
        help = "OpenSSH host certificate of a jump host (repeatable)\nExpiry is exported as sshproxy_certificate_ttl once the host presents the certified key"
    )]
    pub host_certificates: Vec<PathBuf>,

    #[arg(
        long,
        env = "HOS_KEEPALIVE_INTERVAL",
        default_value = "60",
        help = "SSH keepalive interval in seconds (0 to disable)"
    )]
    pub keepalive_interval: u64,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}
