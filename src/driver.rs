//! Driver facade: plugin identity plus the controller and node services.
//!
//! A driver process runs the controller, the node service or both. The
//! transport reaches a service through [`Driver::controller`] and
//! [`Driver::node`]; a service this process does not run answers every
//! call with [`CsiError::Unimplemented`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::{CONTROLLER_CAPABILITIES, ControllerService};
use crate::error::CsiError;
use crate::node::{NODE_CAPABILITIES, NodeService};
use crate::types::{
    AccessMode, ControllerCapability, NodeCapability, PluginCapability, PluginInfo,
};

/// Name the plugin registers under unless configured otherwise.
pub const DEFAULT_DRIVER_NAME: &str = "pd.csi.storage.gke.io";

/// Access modes the driver can serve.
pub const VOLUME_ACCESS_MODES: &[AccessMode] = &[AccessMode::SingleNodeWriter];

/// Plugin-wide capabilities.
pub const PLUGIN_CAPABILITIES: &[PluginCapability] = &[
    PluginCapability::ControllerService,
    PluginCapability::VolumeAccessibilityConstraints,
];

/// Which services a driver process runs.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// Controller service only.
    Controller,
    /// Node service only.
    Node,
    /// Both services.
    #[default]
    All,
}

impl DriverMode {
    /// Whether the controller service runs in this mode.
    #[must_use]
    pub const fn runs_controller(self) -> bool {
        matches!(self, Self::Controller | Self::All)
    }

    /// Whether the node service runs in this mode.
    #[must_use]
    pub const fn runs_node(self) -> bool {
        matches!(self, Self::Node | Self::All)
    }

    /// Lowercase name as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Node => "node",
            Self::All => "all",
        }
    }
}

impl fmt::Display for DriverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverMode {
    type Err = DriverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "controller" => Ok(Self::Controller),
            "node" => Ok(Self::Node),
            "all" => Ok(Self::All),
            _ => Err(DriverError::UnknownMode {
                value: value.to_owned(),
            }),
        }
    }
}

/// Errors raised while assembling a driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// The plugin name is empty.
    #[error("driver name must not be empty")]
    MissingName,
    /// The vendor version is empty.
    #[error("driver vendor version must not be empty")]
    MissingVersion,
    /// The mode string is not one of the known modes.
    #[error("unknown driver mode {value:?}: expected controller, node or all")]
    UnknownMode {
        /// Value that failed to parse.
        value: String,
    },
}

/// Everything the driver advertises, in one serializable record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapabilityReport {
    /// Plugin identity.
    pub plugin: PluginInfo,
    /// Services the reporting process runs.
    pub mode: DriverMode,
    /// Plugin-wide capabilities.
    pub plugin_capabilities: Vec<PluginCapability>,
    /// Controller capabilities; empty when the controller does not run.
    pub controller_capabilities: Vec<ControllerCapability>,
    /// Node capabilities; empty when the node service does not run.
    pub node_capabilities: Vec<NodeCapability>,
    /// Supported access modes.
    pub access_modes: Vec<AccessMode>,
}

impl CapabilityReport {
    /// Report for a process named by `plugin` running in `mode`.
    #[must_use]
    pub fn new(plugin: PluginInfo, mode: DriverMode) -> Self {
        Self {
            plugin,
            mode,
            plugin_capabilities: PLUGIN_CAPABILITIES.to_vec(),
            controller_capabilities: if mode.runs_controller() {
                CONTROLLER_CAPABILITIES.to_vec()
            } else {
                Vec::new()
            },
            node_capabilities: if mode.runs_node() {
                NODE_CAPABILITIES.to_vec()
            } else {
                Vec::new()
            },
            access_modes: VOLUME_ACCESS_MODES.to_vec(),
        }
    }
}

/// Plugin identity and the services this process runs.
#[derive(Debug)]
pub struct Driver {
    info: PluginInfo,
    controller: Option<ControllerService>,
    node: Option<NodeService>,
}

impl Driver {
    /// Creates a driver with no services attached.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingName`] or
    /// [`DriverError::MissingVersion`] for blank identity fields.
    pub fn new(
        name: impl Into<String>,
        vendor_version: impl Into<String>,
    ) -> Result<Self, DriverError> {
        let info = PluginInfo {
            name: name.into(),
            vendor_version: vendor_version.into(),
        };
        if info.name.trim().is_empty() {
            return Err(DriverError::MissingName);
        }
        if info.vendor_version.trim().is_empty() {
            return Err(DriverError::MissingVersion);
        }
        Ok(Self {
            info,
            controller: None,
            node: None,
        })
    }

    /// Attaches the controller service.
    #[must_use]
    pub fn with_controller(mut self, controller: ControllerService) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Attaches the node service.
    #[must_use]
    pub fn with_node(mut self, node: NodeService) -> Self {
        self.node = Some(node);
        self
    }

    /// Name and vendor version.
    #[must_use]
    pub fn get_plugin_info(&self) -> PluginInfo {
        self.info.clone()
    }

    /// Readiness probe. The driver holds no state that could be unready.
    #[must_use]
    pub const fn probe(&self) -> bool {
        true
    }

    /// Plugin-wide capabilities.
    #[must_use]
    pub fn get_plugin_capabilities(&self) -> Vec<PluginCapability> {
        PLUGIN_CAPABILITIES.to_vec()
    }

    /// Services attached to this driver.
    #[must_use]
    pub const fn mode(&self) -> DriverMode {
        match (self.controller.is_some(), self.node.is_some()) {
            (true, false) => DriverMode::Controller,
            (false, true) => DriverMode::Node,
            _ => DriverMode::All,
        }
    }

    /// Capabilities of this process.
    #[must_use]
    pub fn capability_report(&self) -> CapabilityReport {
        CapabilityReport::new(self.get_plugin_info(), self.mode())
    }

    /// The controller service.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Unimplemented`] when this process runs no
    /// controller.
    pub fn controller(&self) -> Result<&ControllerService, CsiError> {
        self.controller.as_ref().ok_or_else(|| {
            CsiError::Unimplemented(String::from("controller service is not running"))
        })
    }

    /// The node service.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::Unimplemented`] when this process runs no node
    /// service.
    pub fn node(&self) -> Result<&NodeService, CsiError> {
        self.node
            .as_ref()
            .ok_or_else(|| CsiError::Unimplemented(String::from("node service is not running")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::cloud::InstanceMetadata;
    use crate::error::StatusCode;
    use crate::test_support::{FakeCloud, FakeMounter};

    fn node_service() -> NodeService {
        NodeService::new(
            Arc::new(FakeMounter::new()),
            InstanceMetadata {
                project: String::from("proj"),
                zone: String::from("zone-a"),
                name: String::from("node-1"),
                machine_type: String::from("e2-medium"),
            },
        )
    }

    fn controller_service() -> ControllerService {
        ControllerService::new(Arc::new(FakeCloud::new("zone-a")))
    }

    #[rstest]
    #[case("", "v1", DriverError::MissingName)]
    #[case("pd.csi.storage.gke.io", " ", DriverError::MissingVersion)]
    fn blank_identity_is_rejected(
        #[case] name: &str,
        #[case] version: &str,
        #[case] expected: DriverError,
    ) {
        assert_eq!(Driver::new(name, version).err(), Some(expected));
    }

    #[test]
    fn identity_reports_name_version_and_capabilities() {
        let driver = Driver::new(DEFAULT_DRIVER_NAME, "v0.1.0")
            .unwrap_or_else(|err| panic!("driver: {err}"));
        let info = driver.get_plugin_info();
        assert_eq!(info.name, DEFAULT_DRIVER_NAME);
        assert_eq!(info.vendor_version, "v0.1.0");
        assert!(driver.probe());
        assert_eq!(
            driver.get_plugin_capabilities(),
            vec![
                PluginCapability::ControllerService,
                PluginCapability::VolumeAccessibilityConstraints
            ]
        );
    }

    #[test]
    fn absent_services_are_unimplemented() {
        let driver = Driver::new(DEFAULT_DRIVER_NAME, "v1")
            .unwrap_or_else(|err| panic!("driver: {err}"))
            .with_node(node_service());
        assert_eq!(
            driver.controller().map(|_| ()).map_err(|err| err.code()),
            Err(StatusCode::Unimplemented)
        );
        assert!(driver.node().is_ok());
        assert_eq!(driver.mode(), DriverMode::Node);
    }

    #[test]
    fn report_follows_attached_services() {
        let driver = Driver::new(DEFAULT_DRIVER_NAME, "v1")
            .unwrap_or_else(|err| panic!("driver: {err}"))
            .with_controller(controller_service());
        let report = driver.capability_report();
        assert_eq!(report.mode, DriverMode::Controller);
        assert_eq!(report.controller_capabilities, CONTROLLER_CAPABILITIES);
        assert!(report.node_capabilities.is_empty());
        assert_eq!(report.access_modes, vec![AccessMode::SingleNodeWriter]);
    }

    #[rstest]
    #[case("controller", DriverMode::Controller)]
    #[case("Node", DriverMode::Node)]
    #[case(" all ", DriverMode::All)]
    fn mode_parses_case_insensitively(#[case] raw: &str, #[case] expected: DriverMode) {
        assert_eq!(raw.parse::<DriverMode>(), Ok(expected));
    }

    #[test]
    fn unknown_mode_names_the_value() {
        let err = "both"
            .parse::<DriverMode>()
            .err()
            .unwrap_or_else(|| panic!("mode should not parse"));
        assert!(err.to_string().contains("\"both\""));
    }
}
