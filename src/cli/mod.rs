//! Command-line interface definitions for the `pdcsi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.
//! Flags given here override the layered `pdcsi.toml`/`PDCSI_*` settings.

use clap::Parser;

/// Top-level CLI for the `pdcsi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pdcsi",
    version,
    about = "Persistent-disk storage plugin for container orchestrators",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the driver on the configured endpoint.
    #[command(name = "serve", about = "Run the driver on the configured endpoint")]
    Serve(ServeCommand),
    /// Print the advertised capabilities as JSON.
    #[command(
        name = "capabilities",
        about = "Print the advertised capabilities as JSON and exit"
    )]
    Capabilities(CapabilitiesCommand),
    /// Run the privileged mount proxy.
    #[command(
        name = "mount-proxy",
        about = "Run the privileged mount proxy used by the proxy mounter"
    )]
    MountProxy(MountProxyCommand),
}

/// Arguments for the `pdcsi serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Unix socket to listen on.
    #[arg(long, value_name = "PATH")]
    pub(crate) endpoint: Option<String>,
    /// Services to run: controller, node or all.
    #[arg(long, value_name = "MODE")]
    pub(crate) mode: Option<String>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    pub(crate) log_json: bool,
}

/// Arguments for the `pdcsi capabilities` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CapabilitiesCommand {
    /// Report for this mode instead of the configured one.
    #[arg(long, value_name = "MODE")]
    pub(crate) mode: Option<String>,
}

/// Arguments for the `pdcsi mount-proxy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct MountProxyCommand {
    /// Socket to listen on instead of the configured `proxy_socket`.
    #[arg(long, value_name = "PATH")]
    pub(crate) socket: Option<String>,
}
