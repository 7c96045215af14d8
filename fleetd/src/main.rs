// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use fleetd::adapters;
use fleetd::config;
use fleetd::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config = config::load(
        opts.config,
        config::Overrides {
            port: opts.port,
            listen: opts.listen,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose.value)?;
    config.log_summary();

    adapters::grpc::serve(config.listen_addr()).await
}
