// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::net::SocketAddr;

use proto::os_call_server::OsCallServer;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

pub mod fs_server;

pub use fs_server::FsService;

/// Serves `OsCall` and the health service on `listener` until `shutdown` resolves.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<OsCallServer<FsService>>()
        .await;

    let local_addr = listener.local_addr()?;
    log::info!("server listening on {}", local_addr);
    Server::builder()
        .add_service(health_service)
        .add_service(OsCallServer::new(FsService::new()))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;
    log::info!("server on {} stopped", local_addr);
    Ok(())
}

pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_shutdown(listener, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for shutdown signal: {err}");
            std::future::pending::<()>().await;
        }
    })
    .await
}
