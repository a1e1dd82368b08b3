//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloud::metadata::MetadataOverrides;
use crate::driver::{DEFAULT_DRIVER_NAME, DriverMode};

/// Socket the driver listens on unless configured otherwise.
pub const DEFAULT_ENDPOINT: &str = "/tmp/csi.sock";

/// Driver settings merged from defaults, `pdcsi.toml`, `PDCSI_*`
/// environment variables and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PDCSI",
    discovery(
        app_name = "pdcsi",
        env_var = "PDCSI_CONFIG_PATH",
        config_file_name = "pdcsi.toml",
        dotfile_name = ".pdcsi.toml",
        project_file_name = "pdcsi.toml"
    )
)]
pub struct DriverConfig {
    /// Name the plugin registers under.
    #[ortho_config(default = DEFAULT_DRIVER_NAME.to_owned())]
    pub driver_name: String,
    /// Vendor version reported by `GetPluginInfo`. Defaults to the crate
    /// version; an empty value is rejected at startup.
    #[ortho_config(default = env!("CARGO_PKG_VERSION").to_owned())]
    pub vendor_version: String,
    /// Unix socket path the driver listens on.
    #[ortho_config(default = DEFAULT_ENDPOINT.to_owned())]
    pub endpoint: String,
    /// Services to run: `controller`, `node` or `all`.
    #[ortho_config(default = "all".to_owned())]
    pub mode: String,
    /// Mount executor: `linux` runs mounts in-process, `proxy` forwards them
    /// to the privileged mount proxy on `proxy_socket`.
    #[ortho_config(default = "linux".to_owned())]
    pub mounter: String,
    /// Socket of the privileged mount proxy.
    pub proxy_socket: Option<String>,
    /// Project override; fetched from the metadata server when unset.
    pub project: Option<String>,
    /// Zone override.
    pub zone: Option<String>,
    /// Instance name override.
    pub instance_name: Option<String>,
    /// Machine type override.
    pub machine_type: Option<String>,
    /// Deadline for long-running cloud operations, in seconds.
    #[ortho_config(default = 300)]
    pub operation_timeout_secs: u64,
    /// Delay between polls of long-running cloud operations, in
    /// milliseconds.
    #[ortho_config(default = 3000)]
    pub poll_interval_millis: u64,
    /// Emit logs as JSON lines.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

/// How the node service performs mounts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MounterKind {
    /// Mount syscalls and tools run in this process.
    #[default]
    Linux,
    /// Calls are forwarded to the mount proxy.
    Proxy,
}

impl fmt::Display for MounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linux => "linux",
            Self::Proxy => "proxy",
        })
    }
}

impl FromStr for MounterKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "proxy" => Ok(Self::Proxy),
            _ => Err(ConfigError::Invalid(format!(
                "unknown mounter {value:?}: expected linux or proxy (PDCSI_MOUNTER)"
            ))),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl DriverConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to pdcsi.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("pdcsi")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parsed [`DriverConfig::mode`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown mode.
    pub fn driver_mode(&self) -> Result<DriverMode, ConfigError> {
        self.mode
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("{err} (PDCSI_MODE)")))
    }

    /// Parsed [`DriverConfig::mounter`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown mounter.
    pub fn mounter_kind(&self) -> Result<MounterKind, ConfigError> {
        self.mounter.parse()
    }

    /// Endpoint as a path.
    #[must_use]
    pub fn endpoint_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.endpoint)
    }

    /// Mount proxy socket as a path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no socket is configured.
    pub fn proxy_socket_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        let socket = self.proxy_socket.as_deref().unwrap_or_default();
        Self::require_field(
            socket,
            &FieldMetadata::new("mount proxy socket", "PDCSI_PROXY_SOCKET", "proxy_socket"),
        )?;
        Ok(Utf8PathBuf::from(socket))
    }

    /// Instance identity fields that bypass the metadata server.
    #[must_use]
    pub fn metadata_overrides(&self) -> MetadataOverrides {
        let non_blank =
            |value: &Option<String>| value.clone().filter(|text| !text.trim().is_empty());
        MetadataOverrides {
            project: non_blank(&self.project),
            zone: non_blank(&self.zone),
            instance_name: non_blank(&self.instance_name),
            machine_type: non_blank(&self.machine_type),
        }
    }

    /// Deadline for long-running cloud operations.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Delay between operation polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values via environment variables or configuration
    /// files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] for values out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.driver_name,
            &FieldMetadata::new("driver name", "PDCSI_DRIVER_NAME", "driver_name"),
        )?;
        Self::require_field(
            &self.vendor_version,
            &FieldMetadata::new("vendor version", "PDCSI_VENDOR_VERSION", "vendor_version"),
        )?;
        Self::require_field(
            &self.endpoint,
            &FieldMetadata::new("driver endpoint", "PDCSI_ENDPOINT", "endpoint"),
        )?;
        self.driver_mode()?;
        if self.mounter_kind()? == MounterKind::Proxy {
            self.proxy_socket_path()?;
        }
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "operation_timeout_secs must be greater than zero (PDCSI_OPERATION_TIMEOUT_SECS)",
            )));
        }
        if self.poll_interval_millis == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll_interval_millis must be greater than zero (PDCSI_POLL_INTERVAL_MILLIS)",
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A field holds a value the driver cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::EnvGuard;

    #[fixture]
    fn valid_config() -> DriverConfig {
        DriverConfig {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            vendor_version: String::from("v1.2.3"),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            mode: String::from("all"),
            mounter: String::from("linux"),
            proxy_socket: None,
            project: None,
            zone: None,
            instance_name: None,
            machine_type: None,
            operation_timeout_secs: 300,
            poll_interval_millis: 3000,
            log_json: false,
        }
    }

    #[rstest]
    fn valid_config_passes(valid_config: DriverConfig) {
        assert_eq!(valid_config.validate(), Ok(()));
        assert_eq!(valid_config.driver_mode(), Ok(DriverMode::All));
        assert_eq!(valid_config.operation_timeout(), Duration::from_secs(300));
        assert_eq!(valid_config.poll_interval(), Duration::from_secs(3));
    }

    #[rstest]
    #[case::driver_name("PDCSI_DRIVER_NAME", "driver_name")]
    #[case::vendor_version("PDCSI_VENDOR_VERSION", "vendor_version")]
    #[case::endpoint("PDCSI_ENDPOINT", "endpoint")]
    fn blank_required_fields_are_actionable(
        valid_config: DriverConfig,
        #[case] env_var: &str,
        #[case] toml_key: &str,
    ) {
        let mut cfg = valid_config;
        match toml_key {
            "driver_name" => cfg.driver_name = String::from("  "),
            "vendor_version" => cfg.vendor_version = String::new(),
            _ => cfg.endpoint = String::new(),
        }
        let Err(ConfigError::MissingField(message)) = cfg.validate() else {
            panic!("expected MissingField for {toml_key}");
        };
        assert!(message.contains(env_var), "should mention {env_var}: {message}");
        assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
        assert!(message.contains("pdcsi.toml"), "should mention the file: {message}");
    }

    #[rstest]
    fn proxy_mounter_requires_a_socket(valid_config: DriverConfig) {
        let cfg = DriverConfig {
            mounter: String::from("proxy"),
            ..valid_config
        };
        let Err(ConfigError::MissingField(message)) = cfg.validate() else {
            panic!("proxy mounter without a socket should fail");
        };
        assert!(message.contains("PDCSI_PROXY_SOCKET"));

        let with_socket = DriverConfig {
            proxy_socket: Some(String::from("/run/pdcsi/mount.sock")),
            ..cfg
        };
        assert_eq!(with_socket.validate(), Ok(()));
        assert_eq!(with_socket.mounter_kind(), Ok(MounterKind::Proxy));
    }

    #[rstest]
    #[case::mode(|cfg: &mut DriverConfig| cfg.mode = String::from("both"))]
    #[case::mounter(|cfg: &mut DriverConfig| cfg.mounter = String::from("fuse"))]
    #[case::timeout(|cfg: &mut DriverConfig| cfg.operation_timeout_secs = 0)]
    #[case::poll(|cfg: &mut DriverConfig| cfg.poll_interval_millis = 0)]
    fn out_of_range_values_are_invalid(
        valid_config: DriverConfig,
        #[case] mutate: fn(&mut DriverConfig),
    ) {
        let mut cfg = valid_config;
        mutate(&mut cfg);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    fn blank_overrides_are_ignored(valid_config: DriverConfig) {
        let cfg = DriverConfig {
            project: Some(String::from("proj")),
            zone: Some(String::from(" ")),
            ..valid_config
        };
        let overrides = cfg.metadata_overrides();
        assert_eq!(overrides.project.as_deref(), Some("proj"));
        assert_eq!(overrides.zone, None);
        assert_eq!(overrides.instance_name, None);
    }

    #[tokio::test]
    async fn environment_overrides_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("PDCSI_MODE", "node"),
            ("PDCSI_ENDPOINT", "/run/pdcsi/csi.sock"),
            ("PDCSI_OPERATION_TIMEOUT_SECS", "60"),
        ])
        .await;

        let cfg = DriverConfig::load_without_cli_args()
            .unwrap_or_else(|err| panic!("config should load: {err}"));
        assert_eq!(cfg.driver_mode(), Ok(DriverMode::Node));
        assert_eq!(cfg.endpoint, "/run/pdcsi/csi.sock");
        assert_eq!(cfg.operation_timeout_secs, 60);
        assert_eq!(cfg.driver_name, DEFAULT_DRIVER_NAME);
        assert_eq!(cfg.vendor_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(cfg.poll_interval_millis, 3000);
    }
}
