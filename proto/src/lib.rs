// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

tonic::include_proto!("fleetd");

/// Port the daemon listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 50057;
