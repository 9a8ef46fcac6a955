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

//! Connection and forwarding statistics.
//!
//! [`Counters`] are bumped by tunnel clients as they connect and open
//! channels. [`MetricsExporter`] is a Prometheus collector that reads those
//! counters together with a snapshot of the connection pool each time it is
//! scraped.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::ssh::pool::ConnectionPool;

/// Success/failure counters for SSH connections and forwardings.
///
/// Monotonic for the life of the process.
#[derive(Debug, Default)]
pub struct Counters {
    connections_established: AtomicU64,
    connections_failed: AtomicU64,
    forwardings_established: AtomicU64,
    forwardings_failed: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forwarding_established(&self) {
        self.forwardings_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forwarding_failed(&self) {
        self.forwardings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            connections: StateCount {
                established: self.connections_established.load(Ordering::Relaxed),
                failed: self.connections_failed.load(Ordering::Relaxed),
            },
            forwardings: StateCount {
                established: self.forwardings_established.load(Ordering::Relaxed),
                failed: self.forwardings_failed.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCount {
    pub established: u64,
    pub failed: u64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub connections: StateCount,
    pub forwardings: StateCount,
}

/// Liveness of one pooled client, as seen by the exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Identity display form, `[user@]host:port`.
    pub host: String,
    pub up: bool,
    /// Expiry of the jump host certificate, unix seconds.
    pub certificate_valid_before: Option<u64>,
}

/// Prometheus collector over the pool and its counters.
pub struct MetricsExporter {
    pool: Arc<ConnectionPool>,
    connections: IntCounterVec,
    forwardings: IntCounterVec,
    connection_up: GaugeVec,
    certificate_ttl: GaugeVec,
    // collect() resets and refills the vectors above
    collect_lock: Mutex<()>,
}

impl MetricsExporter {
    pub fn new(pool: Arc<ConnectionPool>) -> prometheus::Result<Self> {
        Ok(Self {
            pool,
            connections: IntCounterVec::new(
                Opts::new("sshproxy_connections_total", "Number of SSH connections"),
                &["state"],
            )?,
            forwardings: IntCounterVec::new(
                Opts::new("sshproxy_forwardings_total", "Number of SSH forwardings"),
                &["state"],
            )?,
            connection_up: GaugeVec::new(
                Opts::new("sshproxy_connection_up", "Whether the SSH connection is up"),
                &["host"],
            )?,
            certificate_ttl: GaugeVec::new(
                Opts::new(
                    "sshproxy_certificate_ttl",
                    "Expiry of the jump host certificate as unix timestamp",
                ),
                &["host"],
            )?,
            collect_lock: Mutex::new(()),
        })
    }

    /// Registry holding just this exporter.
    pub fn registry(pool: Arc<ConnectionPool>) -> prometheus::Result<Registry> {
        let registry = Registry::new();
        registry.register(Box::new(Self::new(pool)?))?;
        Ok(registry)
    }
}

impl Collector for MetricsExporter {
    fn desc(&self) -> Vec<&Desc> {
        self.connections
            .desc()
            .into_iter()
            .chain(self.forwardings.desc())
            .chain(self.connection_up.desc())
            .chain(self.certificate_ttl.desc())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = match self.collect_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let counters = self.pool.counters().snapshot();
        self.connections.reset();
        self.forwardings.reset();
        for (vec, count) in [
            (&self.connections, counters.connections),
            (&self.forwardings, counters.forwardings),
        ] {
            vec.with_label_values(&["established"])
                .inc_by(count.established);
            vec.with_label_values(&["failed"]).inc_by(count.failed);
        }

        self.connection_up.reset();
        self.certificate_ttl.reset();
        for status in self.pool.snapshot() {
            self.connection_up
                .with_label_values(&[status.host.as_str()])
                .set(if status.up { 1.0 } else { 0.0 });
            if let Some(valid_before) = status.certificate_valid_before {
                self.certificate_ttl
                    .with_label_values(&[status.host.as_str()])
                    .set(valid_before as f64);
            }
        }

        let mut families = self.connections.collect();
        families.extend(self.forwardings.collect());
        families.extend(self.connection_up.collect());
        families.extend(self.certificate_ttl.collect());
        families
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> prometheus::Result<String> {
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Content type of [`render`] output.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
