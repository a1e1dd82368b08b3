//! Core library for the `pdcsi` persistent-disk storage plugin.
//!
//! The controller service provisions, attaches and snapshots zonal
//! persistent disks through the [`cloud::CloudDisks`] boundary; the node
//! service formats, mounts and resizes attached disks through the
//! [`mount::Mounter`] boundary. [`driver::Driver`] ties both to the plugin
//! identity and [`transport`] serves it over a Unix socket.

pub mod capacity;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
mod framing;
pub mod locks;
pub mod mount;
pub mod node;
pub mod test_support;
pub mod topology;
pub mod transport;
pub mod types;
pub mod volume_id;

pub use cloud::{CloudDisks, CloudError, GceCloud, InstanceMetadata, MetadataClient};
pub use config::{ConfigError, DriverConfig, MounterKind};
pub use controller::ControllerService;
pub use driver::{CapabilityReport, Driver, DriverError, DriverMode};
pub use error::{CsiError, StatusCode};
pub use mount::{LinuxMounter, MountError, Mounter, ProxyMounter, ProxyServer};
pub use node::NodeService;
pub use transport::{Client, Request, Response, TransportError, TransportServer};
