// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt::Display;
use std::future::Future;

use super::errors::{AppError, AppResult};

/// How a batch reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Stop at the first failure and return it.
    FailFast,
    /// Log the failure and keep going; the batch itself always succeeds.
    BestEffort,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<AppError>,
}

pub async fn run_batch<T, F, Fut>(
    policy: BatchPolicy,
    items: impl IntoIterator<Item = T>,
    mut op: F,
) -> AppResult<BatchReport>
where
    T: Display,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    let mut report = BatchReport::default();
    for (index, item) in items.into_iter().enumerate() {
        let label = item.to_string();
        match op(item).await {
            Ok(()) => report.succeeded += 1,
            Err(err) => match policy {
                BatchPolicy::FailFast => {
                    return Err(err.with_context(format!("item {index}: {label}")));
                }
                BatchPolicy::BestEffort => {
                    log::warn!("skipping {label}: {err}");
                    report.failures.push(err);
                }
            },
        }
    }
    Ok(report)
}
