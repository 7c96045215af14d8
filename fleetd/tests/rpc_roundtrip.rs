// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet::errors::{FleetError, FleetResult};
use fleet::host::ExecutionSession;
use fleet::rpc::{BootstrapOptions, ConnectionRegistry, DaemonConnector, GrpcConnector};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Daemon {
    port: u16,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Daemon {
    async fn start() -> Self {
        Self::start_on(0).await
    }

    async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(fleetd::adapters::grpc::serve_with_shutdown(
            listener,
            async move {
                let _ = stopped.await;
            },
        ));
        Self {
            port,
            stop: Some(stop),
            task,
        }
    }

    fn options(&self) -> BootstrapOptions {
        BootstrapOptions {
            port: self.port,
            dial_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            ..BootstrapOptions::default()
        }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match tokio::time::timeout(Duration::from_secs(5), &mut self.task).await {
            Ok(joined) => joined.unwrap().unwrap(),
            Err(_) => {
                self.task.abort();
                let _ = (&mut self.task).await;
            }
        }
    }
}

/// Session for a host that already has the daemon installed and running.
struct Installed;

#[async_trait]
impl ExecutionSession for Installed {
    fn address(&self) -> &str {
        "127.0.0.1"
    }

    async fn is_file_exist(&self, _path: &str) -> FleetResult<bool> {
        Ok(true)
    }

    async fn make_dir_all(&self, _path: &str, _mode: u32) -> FleetResult<()> {
        Ok(())
    }

    async fn copy_to_remote(
        &self,
        _local: &Path,
        _remote: &str,
        _permissions: &str,
    ) -> FleetResult<()> {
        Ok(())
    }

    async fn combined_output(&self, _cmd: &str) -> FleetResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn s(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn filesystem_operations_round_trip() {
    let daemon = Daemon::start().await;
    let client = GrpcConnector
        .connect("127.0.0.1", &daemon.options())
        .await
        .unwrap();
    assert!(client.is_serving(Duration::from_secs(2)).await.unwrap());

    let tmp = TempDir::new().unwrap();
    let svc = client.os_call_svc().await;

    let staging = tmp.path().join("staging");
    svc.mkdir(&s(&staging), 0).await.unwrap();
    assert!(staging.is_dir());

    let manifest = staging.join("manifest.yaml");
    svc.write_file(&s(&manifest), b"replicas: 3\n".to_vec())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&manifest).unwrap(), b"replicas: 3\n");

    let deploy = tmp.path().join("deploy");
    svc.cp_files(vec![s(&manifest)], &s(&deploy)).await.unwrap();
    assert_eq!(
        std::fs::read(deploy.join("manifest.yaml")).unwrap(),
        b"replicas: 3\n"
    );

    svc.rm_files(vec![s(&tmp.path().join("missing")), s(&manifest)])
        .await
        .unwrap();
    assert!(!manifest.exists());

    drop((svc, client));
    daemon.stop().await;
}

#[tokio::test]
async fn cp_files_failure_surfaces_as_protocol_error() {
    let daemon = Daemon::start().await;
    let client = GrpcConnector
        .connect("127.0.0.1", &daemon.options())
        .await
        .unwrap();
    let tmp = TempDir::new().unwrap();

    let err = client
        .os_call_svc()
        .await
        .cp_files(vec![s(&tmp.path().join("nope"))], &s(&tmp.path().join("out")))
        .await
        .unwrap_err();
    match err {
        FleetError::Protocol { address, source } => {
            assert_eq!(address, "127.0.0.1");
            assert!(source.to_string().contains("nope"), "{source}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    drop(client);
    daemon.stop().await;
}

#[tokio::test]
async fn registry_bootstraps_against_running_daemon() {
    let daemon = Daemon::start().await;
    let registry = ConnectionRegistry::new(daemon.options());
    let session: Arc<dyn ExecutionSession> = Arc::new(Installed);

    let first = registry
        .remote_handler("127.0.0.1", session.clone())
        .await
        .unwrap();
    let second = registry
        .remote_handler("127.0.0.1", session)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_serving(Duration::from_secs(2)).await.unwrap());

    registry.shutdown().await;
    drop((first, second));
    daemon.stop().await;
}

#[tokio::test]
async fn connect_fails_when_nothing_listens() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let options = BootstrapOptions {
        port,
        dial_timeout: Duration::from_millis(500),
        ..BootstrapOptions::default()
    };
    let err = GrpcConnector.connect("127.0.0.1", &options).await.unwrap_err();
    assert!(matches!(err, FleetError::Protocol { .. }), "{err:?}");
}

#[tokio::test]
async fn reconnect_recovers_after_daemon_restart() {
    let daemon = Daemon::start().await;
    let port = daemon.port;
    let options = BootstrapOptions {
        dial_timeout: Duration::from_millis(500),
        ..daemon.options()
    };
    let client = GrpcConnector.connect("127.0.0.1", &options).await.unwrap();
    assert!(client.is_serving(Duration::from_secs(2)).await.unwrap());

    daemon.stop().await;
    let err = client.reconnect().await.unwrap_err();
    assert!(matches!(err, FleetError::Protocol { .. }), "{err:?}");

    let daemon = Daemon::start_on(port).await;
    client.reconnect().await.unwrap();
    assert!(client.is_serving(Duration::from_secs(2)).await.unwrap());

    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("after-restart");
    client.os_call_svc().await.mkdir(&s(&dir), 0).await.unwrap();
    assert!(dir.is_dir());

    drop(client);
    daemon.stop().await;
}
