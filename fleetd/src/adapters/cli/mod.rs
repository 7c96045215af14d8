// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "fleetd",
    version,
    about = "Filesystem daemon for fleet hosts",
    long_about = None,
    after_help = "fleetd server\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < FLEETD_CONFIG_PATH < command-line flags.\n\
If --config is omitted, fleetd tries FLEETD_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Logging is controlled by FLEETD_LOG, FLEETD_LOG_FORMAT, FLEETD_LOG_SPAN_EVENTS and FLEETD_LOG_FILE."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, fleetd uses FLEETD_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PORT",
        help = "Port to bind the daemon on. Overrides `port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        long,
        value_name = "ADDR",
        help = "Address to listen on. Overrides `listen` from the config file."
    )]
    pub listen: Option<IpAddr>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"{before-help}{name} {version}
{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

pub fn cli_command() -> clap::Command {
    Opts::command().help_template(HELP_TEMPLATE)
}

pub fn parse_opts() -> ParsedOpts {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> ParsedOpts
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = cli_command().get_matches_from(args);
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
