// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::crypto::PasswordDecryptor;
use crate::errors::{FleetError, FleetResult};
use crate::host::{Host, HostConfig, canonical_address};

/// Fixed set of hosts keyed by canonical address.
pub struct HostPool {
    hosts: HashMap<String, Arc<Host>>,
    // Configuration order, so initialization and listings are deterministic.
    order: Vec<String>,
}

impl HostPool {
    pub fn new(
        configs: Vec<HostConfig>,
        decryptor: Arc<dyn PasswordDecryptor>,
    ) -> FleetResult<Self> {
        if configs.is_empty() {
            return Err(FleetError::InvalidConfig(
                "host pool needs at least one host".to_string(),
            ));
        }
        let mut hosts = HashMap::with_capacity(configs.len());
        let mut order = Vec::with_capacity(configs.len());
        for config in configs {
            let address = canonical_address(&config.address);
            if address.is_empty() {
                return Err(FleetError::InvalidConfig("empty host address".to_string()));
            }
            if hosts.contains_key(&address) {
                return Err(FleetError::DuplicateHost(address));
            }
            let host = Arc::new(Host::new(config, decryptor.clone()));
            order.push(address.clone());
            hosts.insert(address, host);
        }
        Ok(Self { hosts, order })
    }

    /// Initializes every host in configuration order; the first failure aborts.
    #[tracing::instrument(name = "pool", level = "debug", skip(self), fields(hosts = self.order.len()))]
    pub async fn initialize(&self) -> FleetResult<()> {
        for address in &self.order {
            let host = self.get_host(address)?;
            if let Err(err) = host.initialize().await {
                log::error!("failed to initialize host {address}: {err}");
                return Err(err);
            }
        }
        log::info!("initialized {} hosts", self.order.len());
        Ok(())
    }

    pub fn get_host(&self, address: &str) -> FleetResult<Arc<Host>> {
        let key = canonical_address(address);
        self.hosts
            .get(&key)
            .cloned()
            .ok_or(FleetError::HostNotFound(key))
    }

    /// Pings every host concurrently. Attempt `i` is followed by an `i` second pause
    /// before the next one; a host still failing after `try_times` attempts fails the call.
    pub async fn wait_ready(&self, try_times: u32) -> FleetResult<()> {
        let attempts = try_times.max(1);
        let results = join_all(
            self.order
                .iter()
                .filter_map(|address| self.hosts.get(address))
                .map(|host| wait_host_ready(host.clone(), attempts)),
        )
        .await;
        results.into_iter().collect()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub async fn close(&self) {
        for host in self.hosts.values() {
            host.close().await;
        }
    }
}

async fn wait_host_ready(host: Arc<Host>, attempts: u32) -> FleetResult<()> {
    let mut attempt = 1;
    loop {
        match host.ping().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= attempts => return Err(err),
            Err(err) => {
                log::debug!(
                    "host {} not ready (attempt {attempt}/{attempts}): {err}",
                    host.address()
                );
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                attempt += 1;
            }
        }
    }
}
