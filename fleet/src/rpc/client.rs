// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::time::Duration;

use proto::os_call_client::OsCallClient;
use proto::{CpFilesRequest, MkdirRequest, RmFilesRequest, WriteFileRequest};
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

use super::dial::dial;
use crate::errors::{FleetError, FleetResult};

/// Connected client of one host's daemon.
#[derive(Debug)]
pub struct FsClient {
    address: String,
    endpoint: Endpoint,
    dial_timeout: Duration,
    call_timeout: Duration,
    channel: RwLock<Channel>,
}

impl FsClient {
    pub(crate) fn new(
        address: String,
        endpoint: Endpoint,
        channel: Channel,
        dial_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            address,
            endpoint,
            dial_timeout,
            call_timeout,
            channel: RwLock::new(channel),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn channel(&self) -> Channel {
        self.channel.read().await.clone()
    }

    /// Asks the daemon's health service for the overall status.
    pub async fn is_serving(&self, deadline: Duration) -> FleetResult<bool> {
        let mut client = HealthClient::new(self.channel().await);
        let mut request = Request::new(HealthCheckRequest {
            service: String::new(),
        });
        request.set_timeout(deadline);
        let response = tokio::time::timeout(deadline, client.check(request))
            .await
            .map_err(|_| FleetError::Timeout {
                address: self.address.clone(),
                operation: "health check".to_string(),
                after: deadline,
            })?
            .map_err(|status| FleetError::protocol(&self.address, status))?;
        Ok(response.into_inner().status == ServingStatus::Serving as i32)
    }

    /// Filesystem operations of the daemon.
    pub async fn os_call_svc(&self) -> OsCall {
        OsCall {
            address: self.address.clone(),
            client: OsCallClient::new(self.channel().await),
            timeout: self.call_timeout,
        }
    }

    /// Rebuilds the channel from the stored endpoint.
    pub async fn reconnect(&self) -> FleetResult<()> {
        let channel = dial(&self.endpoint, self.dial_timeout)
            .await
            .map_err(|err| FleetError::protocol(&self.address, err))?;
        *self.channel.write().await = channel;
        log::info!("reconnected to daemon on {}", self.address);
        Ok(())
    }
}

/// Typed view of the `OsCall` service. Every call carries the client's deadline.
#[derive(Debug, Clone)]
pub struct OsCall {
    address: String,
    client: OsCallClient<Channel>,
    timeout: Duration,
}

impl OsCall {
    async fn call<T, F, Fut>(&self, operation: &str, message: T, f: F) -> FleetResult<()>
    where
        F: FnOnce(OsCallClient<Channel>, Request<T>) -> Fut,
        Fut: Future<Output = Result<tonic::Response<proto::Ack>, Status>>,
    {
        let mut request = Request::new(message);
        request.set_timeout(self.timeout);
        let result = tokio::time::timeout(self.timeout, f(self.client.clone(), request))
            .await
            .map_err(|_| FleetError::Timeout {
                address: self.address.clone(),
                operation: operation.to_string(),
                after: self.timeout,
            })?;
        result
            .map(|_| ())
            .map_err(|status| FleetError::protocol(&self.address, status))
    }

    /// Creates `dir` and its parents; `mode` 0 means `0755`.
    pub async fn mkdir(&self, dir: &str, mode: u32) -> FleetResult<()> {
        let message = MkdirRequest {
            dir: dir.to_string(),
            mode,
        };
        self.call("mkdir", message, |mut client, request| async move {
            client.mkdir(request).await
        })
        .await
    }

    /// Copies daemon-local `files` into `dir`, stopping at the first failure.
    pub async fn cp_files(&self, files: Vec<String>, dir: &str) -> FleetResult<()> {
        let message = CpFilesRequest {
            files,
            dir: dir.to_string(),
        };
        self.call("cp_files", message, |mut client, request| async move {
            client.cp_files(request).await
        })
        .await
    }

    pub async fn write_file(&self, file: &str, content: Vec<u8>) -> FleetResult<()> {
        let message = WriteFileRequest {
            file: file.to_string(),
            content,
        };
        self.call("write_file", message, |mut client, request| async move {
            client.write_file(request).await
        })
        .await
    }

    /// Removes `files`; individual failures are only logged by the daemon.
    pub async fn rm_files(&self, files: Vec<String>) -> FleetResult<()> {
        let message = RmFilesRequest { files };
        self.call("rm_files", message, |mut client, request| async move {
            client.rm_files(request).await
        })
        .await
    }
}
