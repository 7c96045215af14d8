// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use proto::os_call_server::OsCall;
use proto::{Ack, CpFilesRequest, MkdirRequest, RmFilesRequest, WriteFileRequest};
use tonic::{Request, Response, Status};

use crate::app::errors::{AppError, AppErrorKind};
use crate::app::fs_ops;

#[derive(Debug, Default, Clone)]
pub struct FsService;

impl FsService {
    pub fn new() -> Self {
        Self
    }
}

fn app_error_to_status(err: AppError) -> Status {
    let message = err.to_string();
    match err.kind() {
        AppErrorKind::InvalidArgument => Status::invalid_argument(message),
        AppErrorKind::NotFound => Status::not_found(message),
        AppErrorKind::Internal => Status::internal(message),
    }
}

#[async_trait]
impl OsCall for FsService {
    #[tracing::instrument(name = "grpc", level = "debug", skip(self, request), fields(op = "mkdir"))]
    async fn mkdir(&self, request: Request<MkdirRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        fs_ops::mkdir(&req.dir, req.mode)
            .await
            .map_err(app_error_to_status)?;
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(name = "grpc", level = "debug", skip(self, request), fields(op = "cp_files"))]
    async fn cp_files(&self, request: Request<CpFilesRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let report = fs_ops::cp_files(&req.files, &req.dir)
            .await
            .map_err(app_error_to_status)?;
        log::info!("copied {} files into {}", report.succeeded, req.dir);
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(name = "grpc", level = "debug", skip(self, request), fields(op = "write_file"))]
    async fn write_file(
        &self,
        request: Request<WriteFileRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        fs_ops::write_file(&req.file, &req.content)
            .await
            .map_err(app_error_to_status)?;
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(name = "grpc", level = "debug", skip(self, request), fields(op = "rm_files"))]
    async fn rm_files(&self, request: Request<RmFilesRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let report = fs_ops::rm_files(&req.files).await;
        if !report.failures.is_empty() {
            log::warn!(
                "removed {} of {} paths, {} failed",
                report.succeeded,
                req.files.len(),
                report.failures.len()
            );
        }
        Ok(Response::new(Ack {}))
    }
}
