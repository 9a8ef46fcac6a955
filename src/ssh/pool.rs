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

//! Connection pooling for SSH jump hosts.
//!
//! The pool maps each [`ClientIdentity`] to exactly one [`TunnelClient`].
//! Clients are created lazily on first use and live for the rest of the
//! process; a broken session is repaired inside the client rather than by
//! replacing it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::identity::ClientIdentity;
use super::tunnel::TunnelClient;
use crate::config::SshSettings;
use crate::metrics::{ClientStatus, Counters};

pub struct ConnectionPool {
    clients: Mutex<HashMap<ClientIdentity, Arc<TunnelClient>>>,
    settings: SshSettings,
    counters: Arc<Counters>,
}

impl ConnectionPool {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings,
            counters: Arc::new(Counters::new()),
        }
    }

    /// Get the client for `identity`, creating it if needed.
    ///
    /// Never connects; the returned client connects on its first dial.
    pub fn get(&self, identity: &ClientIdentity) -> Arc<TunnelClient> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(identity) {
            return Arc::clone(client);
        }

        debug!("Creating tunnel client for {}", identity);
        let client = Arc::new(TunnelClient::new(
            identity.clone(),
            self.settings.for_user(identity.username()),
            Arc::clone(&self.counters),
        ));
        clients.insert(identity.clone(), Arc::clone(&client));
        client
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Liveness and certificate expiry of every pooled client.
    pub fn snapshot(&self) -> Vec<ClientStatus> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .values()
            .map(|client| ClientStatus {
                host: client.identity().to_string(),
                up: client.is_connected(),
                certificate_valid_before: client.certificate_valid_before(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("clients", &self.len())
            .field("user", &self.settings.user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(SshSettings::new("default", Vec::new()))
    }

    #[test]
    fn test_pool_starts_empty() {
        let pool = pool();
        assert!(pool.is_empty());
        assert!(pool.snapshot().is_empty());
    }

    #[test]
    fn test_same_identity_same_client() {
        let pool = pool();
        let identity = ClientIdentity::new("::1", 22, "");
        let a = pool.get(&identity);
        let b = pool.get(&identity);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);

        let c = pool.get(&ClientIdentity::new("::1", 22, "default"));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_default_and_overridden_user() {
        let pool = pool();
        let client = pool.get(&ClientIdentity::new("::1", 22, ""));
        assert_eq!(client.settings().user, "default");

        let client = pool.get(&ClientIdentity::new("::1", 22, "prometheus"));
        assert_eq!(client.settings().user, "prometheus");
        assert_eq!(pool.settings().user, "default");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_inserts_once() {
        let pool = Arc::new(pool());
        let identity = ClientIdentity::new("jump", 2222, "user");

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let identity = identity.clone();
                tokio::spawn(async move { pool.get(&identity) })
            })
            .collect();

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }
        assert_eq!(pool.len(), 1);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    }

    #[test]
    fn test_clients_share_counters() {
        let pool = pool();
        let _ = pool.get(&ClientIdentity::new("a", 22, ""));
        pool.counters().connection_failed();
        assert_eq!(pool.counters().snapshot().connections.failed, 1);
    }

    #[test]
    fn test_snapshot_reports_disconnected() {
        let pool = pool();
        pool.get(&ClientIdentity::new("fe80::1", 2222, "prometheus"));
        let snapshot = pool.snapshot();
        assert_eq!(
            snapshot,
            vec![ClientStatus {
                host: "prometheus@[fe80::1]:2222".to_string(),
                up: false,
                certificate_valid_before: None,
            }]
        );
    }
}
