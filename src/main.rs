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
use clap::Parser;
use std::sync::Arc;

use http_over_ssh::{
    cli::Cli, config::SshSettings, proxy::ProxyServer, ssh::ConnectionPool,
    utils::init_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = SshSettings::from_cli(&cli)?;
    tracing::info!(
        user = %settings.user,
        timeout = ?settings.connect_timeout,
        auth_methods = settings.auth.len(),
        "SSH client configured"
    );

    let pool = Arc::new(ConnectionPool::new(settings));
    let server =
        Arc::new(ProxyServer::new(pool).context("Failed to register metrics collector")?);

    server
        .run_at(cli.listen, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
