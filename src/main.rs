//! Binary entry point for the `pdcsi` driver.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pdcsi::types::PluginInfo;
use pdcsi::{
    CapabilityReport, CloudError, ConfigError, ControllerService, Driver, DriverConfig,
    DriverError, DriverMode, GceCloud, LinuxMounter, MetadataClient, MountError, Mounter,
    MounterKind, NodeService, ProxyMounter, ProxyServer, TransportError, TransportServer,
};

use cli::{CapabilitiesCommand, Cli, MountProxyCommand, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("failed to resolve instance metadata: {0}")]
    Metadata(#[from] CloudError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("mount proxy error: {0}")]
    Proxy(#[from] MountError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Serve(command) => serve(command).await,
        Cli::Capabilities(command) => capabilities(command),
        Cli::MountProxy(command) => mount_proxy(command).await,
    }
}

async fn serve(command: ServeCommand) -> Result<(), CliError> {
    let mut config = DriverConfig::load_without_cli_args()?;
    if let Some(endpoint) = command.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(mode) = command.mode {
        config.mode = mode;
    }
    config.log_json |= command.log_json;
    config.validate()?;
    init_tracing(config.log_json);

    let mode = config.driver_mode()?;
    let metadata = MetadataClient::new();
    let instance = metadata.resolve(config.metadata_overrides()).await?;
    let mut driver = Driver::new(config.driver_name.as_str(), config.vendor_version.as_str())?;
    if mode.runs_controller() {
        let cloud = GceCloud::new(instance.project.as_str(), instance.zone.as_str(), metadata)
            .with_poll_interval(config.poll_interval())
            .with_operation_timeout(config.operation_timeout());
        driver = driver.with_controller(ControllerService::new(Arc::new(cloud)));
    }
    if mode.runs_node() {
        let mounter: Arc<dyn Mounter> = match config.mounter_kind()? {
            MounterKind::Linux => Arc::new(LinuxMounter::new()),
            MounterKind::Proxy => Arc::new(ProxyMounter::new(config.proxy_socket_path()?)),
        };
        driver = driver.with_node(NodeService::new(mounter, instance));
    }

    let endpoint = config.endpoint_path();
    let listener = TransportServer::bind(&endpoint)?;
    info!(
        %endpoint,
        %mode,
        name = %config.driver_name,
        version = %config.vendor_version,
        "starting driver"
    );
    TransportServer::new(Arc::new(driver))
        .serve(listener, shutdown_signal())
        .await?;
    Ok(())
}

fn capabilities(command: CapabilitiesCommand) -> Result<(), CliError> {
    let config = DriverConfig::load_without_cli_args()?;
    let mode = match command.mode {
        Some(raw) => raw.parse::<DriverMode>()?,
        None => config.driver_mode()?,
    };
    let report = CapabilityReport::new(
        PluginInfo {
            name: config.driver_name,
            vendor_version: config.vendor_version,
        },
        mode,
    );
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report)?;
    writeln!(stdout)?;
    Ok(())
}

async fn mount_proxy(command: MountProxyCommand) -> Result<(), CliError> {
    let config = DriverConfig::load_without_cli_args()?;
    init_tracing(config.log_json);
    let socket = match command.socket {
        Some(path) => Utf8PathBuf::from(path),
        None => config.proxy_socket_path()?,
    };
    let listener = ProxyServer::bind(&socket)?;
    info!(%socket, "starting mount proxy");
    let server = ProxyServer::new(Arc::new(LinuxMounter::new()));
    tokio::select! {
        outcome = server.serve(listener) => outcome?,
        () = shutdown_signal() => info!("mount proxy shutting down"),
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let outcome = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = outcome {
        writeln!(io::stderr(), "failed to install log subscriber: {err}").ok();
    }
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            if let Err(err) = interrupted {
                warn!(error = %err, "cannot listen for interrupts");
            }
        }
        () = terminate => {}
    }
    info!("shutdown signal received");
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_on_one_line() {
        let mut buffer = Vec::new();
        write_error(
            &mut buffer,
            &CliError::Config(ConfigError::Invalid(String::from("mode"))),
        );
        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "invalid configuration: mode\n"
        );
    }

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from(["pdcsi", "serve", "--endpoint", "/run/csi.sock", "--mode", "node"])
            .unwrap_or_else(|err| panic!("parse: {err}"));
        let Cli::Serve(command) = cli else {
            panic!("expected serve");
        };
        assert_eq!(command.endpoint.as_deref(), Some("/run/csi.sock"));
        assert_eq!(command.mode.as_deref(), Some("node"));
        assert!(!command.log_json);
    }
}
