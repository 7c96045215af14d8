// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::binary::find_local_daemon;
use super::client::FsClient;
use super::dial::{daemon_endpoint, dial, wait_until};
use crate::errors::{BootstrapStep, FleetError, FleetResult};
use crate::host::{ExecutionSession, canonical_address};

pub const REMOTE_BINARY_PATH: &str = "/usr/local/bin/fleetd";
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub remote_binary_path: String,
    /// Binary uploaded when the remote one is missing; located automatically when unset.
    pub local_binary: Option<PathBuf>,
    pub port: u16,
    pub dial_timeout: Duration,
    pub ready_timeout: Duration,
    pub call_timeout: Duration,
    /// Re-check health of a cached client before handing it out.
    pub verify_on_checkout: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            remote_binary_path: REMOTE_BINARY_PATH.to_string(),
            local_binary: None,
            port: proto::DEFAULT_PORT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            verify_on_checkout: false,
        }
    }
}

impl BootstrapOptions {
    /// Detached start of the remote daemon; stdio is detached so the exec channel closes.
    pub fn start_command(&self) -> String {
        format!(
            "nohup {} --port {} </dev/null >/dev/null 2>&1 &",
            crate::ssh::utils::sh_escape(&self.remote_binary_path),
            self.port
        )
    }
}

/// Dials a started daemon and waits for it to report serving.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn connect(&self, address: &str, options: &BootstrapOptions)
    -> FleetResult<Arc<FsClient>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GrpcConnector;

#[async_trait]
impl DaemonConnector for GrpcConnector {
    async fn connect(
        &self,
        address: &str,
        options: &BootstrapOptions,
    ) -> FleetResult<Arc<FsClient>> {
        let endpoint = daemon_endpoint(address, options.port, options.dial_timeout)
            .map_err(|err| FleetError::protocol(address, err))?;
        let channel = dial(&endpoint, options.dial_timeout)
            .await
            .map_err(|err| FleetError::protocol(address, err))?;
        let client = Arc::new(FsClient::new(
            address.to_string(),
            endpoint,
            channel,
            options.dial_timeout,
            options.call_timeout,
        ));
        wait_until(options.ready_timeout, |remaining| {
            let client = client.clone();
            async move {
                client
                    .is_serving(remaining)
                    .await
                    .map_err(anyhow::Error::from)
            }
        })
        .await
        .map_err(|err| FleetError::protocol(address, err))?;
        Ok(client)
    }
}

/// One daemon client per host address, bootstrapped on first use.
pub struct ConnectionRegistry {
    // Held across check, bootstrap and insert so concurrent callers share one dial.
    clients: Mutex<HashMap<String, Arc<FsClient>>>,
    connector: Arc<dyn DaemonConnector>,
    options: BootstrapOptions,
}

impl ConnectionRegistry {
    pub fn new(options: BootstrapOptions) -> Self {
        Self::with_connector(options, Arc::new(GrpcConnector))
    }

    pub fn with_connector(options: BootstrapOptions, connector: Arc<dyn DaemonConnector>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            connector,
            options,
        }
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Returns the cached client for `address`, or makes sure the daemon binary is
    /// installed, starts it, connects and caches the result. Failures cache nothing.
    #[tracing::instrument(name = "rpc", level = "debug", skip(self, session), fields(op = "remote_handler"))]
    pub async fn remote_handler(
        &self,
        address: &str,
        session: Arc<dyn ExecutionSession>,
    ) -> FleetResult<Arc<FsClient>> {
        let key = canonical_address(address);
        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(&key).cloned() {
            if !self.options.verify_on_checkout {
                return Ok(existing);
            }
            match existing.is_serving(self.options.ready_timeout).await {
                Ok(true) => return Ok(existing),
                Ok(false) => log::warn!("cached daemon client for {key} is not serving, rebuilding"),
                Err(err) => log::warn!("cached daemon client for {key} failed health check: {err}"),
            }
            clients.remove(&key);
        }

        self.ensure_binary(&key, session.as_ref()).await?;
        self.start_daemon(&key, session);
        let client = self.connector.connect(&key, &self.options).await?;
        clients.insert(key.clone(), client.clone());
        log::info!("daemon on {key} is serving");
        Ok(client)
    }

    async fn ensure_binary(&self, address: &str, session: &dyn ExecutionSession) -> FleetResult<()> {
        let remote = self.options.remote_binary_path.as_str();
        let present = session
            .is_file_exist(remote)
            .await
            .map_err(|err| FleetError::bootstrap(address, BootstrapStep::BinaryCheck, err))?;
        if present {
            log::debug!("{remote} already present on {address}");
            return Ok(());
        }

        let copy_err = |err: FleetError| FleetError::bootstrap(address, BootstrapStep::Copy, err);
        let local = find_local_daemon(self.options.local_binary.as_deref())
            .map_err(|err| FleetError::bootstrap(address, BootstrapStep::Copy, err))?;
        if let Some(parent) = Path::new(remote).parent().and_then(Path::to_str) {
            if !parent.is_empty() && parent != "/" {
                session.make_dir_all(parent, 0o755).await.map_err(copy_err)?;
            }
        }
        session
            .copy_to_remote(&local, remote, "0755")
            .await
            .map_err(copy_err)?;
        log::info!("copied {} to {address}:{remote}", local.display());
        Ok(())
    }

    fn start_daemon(&self, address: &str, session: Arc<dyn ExecutionSession>) {
        let cmd = self.options.start_command();
        let address = address.to_string();
        tokio::spawn(async move {
            if let Err(err) = session.combined_output(&cmd).await {
                log::warn!("starting daemon on {address} failed: {err}");
            }
        });
    }

    /// Drops the cached client for `address`; the next call bootstraps again.
    pub async fn invalidate(&self, address: &str) -> bool {
        self.clients
            .lock()
            .await
            .remove(&canonical_address(address))
            .is_some()
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.clients
            .lock()
            .await
            .contains_key(&canonical_address(address))
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Drops every cached client. Channels close once the last handle is released.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.clients.lock().await.drain().collect();
        for (address, _) in &drained {
            log::debug!("dropping daemon client for {address}");
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use tonic::transport::Endpoint;

    #[derive(Default)]
    struct FakeSession {
        binary_present: bool,
        fail_check: bool,
        fail_start: bool,
        copies: StdMutex<Vec<(PathBuf, String, String)>>,
        dirs: StdMutex<Vec<String>>,
        commands: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ExecutionSession for FakeSession {
        fn address(&self) -> &str {
            "10.0.0.9"
        }

        async fn is_file_exist(&self, _path: &str) -> FleetResult<bool> {
            if self.fail_check {
                return Err(FleetError::connection("10.0.0.9", anyhow!("channel closed")));
            }
            Ok(self.binary_present)
        }

        async fn make_dir_all(&self, path: &str, _mode: u32) -> FleetResult<()> {
            self.dirs.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn copy_to_remote(
            &self,
            local: &Path,
            remote: &str,
            permissions: &str,
        ) -> FleetResult<()> {
            self.copies.lock().unwrap().push((
                local.to_path_buf(),
                remote.to_string(),
                permissions.to_string(),
            ));
            Ok(())
        }

        async fn combined_output(&self, cmd: &str) -> FleetResult<Vec<u8>> {
            self.commands.lock().unwrap().push(cmd.to_string());
            if self.fail_start {
                return Err(FleetError::Execution {
                    address: "10.0.0.9".into(),
                    command: cmd.into(),
                    exit_code: Some(127),
                    stderr: "nohup: not found".into(),
                });
            }
            Ok(Vec::new())
        }
    }

    struct FakeConnector {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl DaemonConnector for FakeConnector {
        async fn connect(
            &self,
            address: &str,
            options: &BootstrapOptions,
        ) -> FleetResult<Arc<FsClient>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(FleetError::protocol(address, anyhow!("connection refused")));
            }
            let endpoint = Endpoint::from_static("http://127.0.0.1:1");
            let channel = endpoint.connect_lazy();
            Ok(Arc::new(FsClient::new(
                address.to_string(),
                endpoint,
                channel,
                options.dial_timeout,
                options.call_timeout,
            )))
        }
    }

    fn options_with_binary(dir: &TempDir) -> BootstrapOptions {
        let local = dir.path().join("fleetd");
        std::fs::write(&local, b"\x7fELF").unwrap();
        BootstrapOptions {
            local_binary: Some(local),
            ..BootstrapOptions::default()
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_bootstrap() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(FakeConnector {
            delay: Duration::from_millis(50),
            ..FakeConnector::new()
        });
        let registry = Arc::new(ConnectionRegistry::with_connector(
            options_with_binary(&dir),
            connector.clone(),
        ));
        let session: Arc<dyn ExecutionSession> = Arc::new(FakeSession {
            binary_present: true,
            ..FakeSession::default()
        });

        let (a, b) = tokio::join!(
            registry.remote_handler("10.0.0.9", session.clone()),
            registry.remote_handler("10.0.0.9", session.clone()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn missing_binary_is_copied_with_exec_mode() {
        let dir = TempDir::new().unwrap();
        let options = options_with_binary(&dir);
        let local = options.local_binary.clone().unwrap();
        let registry = ConnectionRegistry::with_connector(options, Arc::new(FakeConnector::new()));
        let session = Arc::new(FakeSession::default());

        registry
            .remote_handler("10.0.0.9", session.clone())
            .await
            .unwrap();
        assert_eq!(*session.dirs.lock().unwrap(), vec!["/usr/local/bin".to_string()]);
        assert_eq!(
            *session.copies.lock().unwrap(),
            vec![(local, REMOTE_BINARY_PATH.to_string(), "0755".to_string())]
        );
    }

    #[tokio::test]
    async fn present_binary_is_not_copied() {
        let dir = TempDir::new().unwrap();
        let registry = ConnectionRegistry::with_connector(
            options_with_binary(&dir),
            Arc::new(FakeConnector::new()),
        );
        let session = Arc::new(FakeSession {
            binary_present: true,
            ..FakeSession::default()
        });
        registry
            .remote_handler("10.0.0.9", session.clone())
            .await
            .unwrap();
        assert!(session.copies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn binary_check_failure_is_reported_and_not_cached() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(FakeConnector::new());
        let registry =
            ConnectionRegistry::with_connector(options_with_binary(&dir), connector.clone());
        let session = Arc::new(FakeSession {
            fail_check: true,
            ..FakeSession::default()
        });
        let err = registry
            .remote_handler("10.0.0.9", session)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FleetError::Bootstrap {
                step: BootstrapStep::BinaryCheck,
                ..
            }
        ));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert!(!registry.contains("10.0.0.9").await);
    }

    #[tokio::test]
    async fn dial_failure_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(FakeConnector {
            fail: true,
            ..FakeConnector::new()
        });
        let registry =
            ConnectionRegistry::with_connector(options_with_binary(&dir), connector.clone());
        let session = Arc::new(FakeSession {
            binary_present: true,
            ..FakeSession::default()
        });
        for _ in 0..2 {
            let err = registry
                .remote_handler("10.0.0.9", session.clone())
                .await
                .unwrap_err();
            assert!(matches!(err, FleetError::Protocol { .. }));
        }
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn start_failure_only_warns() {
        let dir = TempDir::new().unwrap();
        let registry = ConnectionRegistry::with_connector(
            options_with_binary(&dir),
            Arc::new(FakeConnector::new()),
        );
        let session = Arc::new(FakeSession {
            binary_present: true,
            fail_start: true,
            ..FakeSession::default()
        });
        registry
            .remote_handler("10.0.0.9", session)
            .await
            .unwrap();
        assert!(registry.contains("10.0.0.9").await);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_bootstrap() {
        let dir = TempDir::new().unwrap();
        let connector = Arc::new(FakeConnector::new());
        let registry =
            ConnectionRegistry::with_connector(options_with_binary(&dir), connector.clone());
        let session = Arc::new(FakeSession {
            binary_present: true,
            ..FakeSession::default()
        });
        let first = registry
            .remote_handler("10.0.0.9", session.clone())
            .await
            .unwrap();
        assert!(registry.invalidate("10.0.0.9").await);
        assert!(!registry.invalidate("10.0.0.9").await);
        let second = registry
            .remote_handler("10.0.0.9", session.clone())
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);

        registry.shutdown().await;
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn start_command_detaches_daemon() {
        let options = BootstrapOptions::default();
        assert_eq!(
            options.start_command(),
            "nohup '/usr/local/bin/fleetd' --port 50057 </dev/null >/dev/null 2>&1 &"
        );
    }
}
