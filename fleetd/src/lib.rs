// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! `fleetd`: the per-host daemon serving filesystem operations over gRPC.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
