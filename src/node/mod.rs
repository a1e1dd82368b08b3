//! Node service: staging and publishing attached disks on this host.
//!
//! All volume-scoped mutations serialize on the volume id through
//! [`VolumeLocks`]; the mount work itself goes through a [`Mounter`].

mod expand;
mod publish;
mod stage;

use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::debug;

use crate::cloud::InstanceMetadata;
use crate::error::CsiError;
use crate::locks::VolumeLocks;
use crate::mount::{MountError, Mounter};
use crate::topology::zone_topology;
use crate::types::{AccessType, NodeCapability, NodeInfo, VolumeCapability};
use crate::volume_id::{VolumeKey, node_id};

/// Volume context key selecting a partition of the disk.
pub const VOLUME_CONTEXT_PARTITION: &str = "partition";

/// Filesystem used when the capability names none.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Attach limit for machine families with large limits.
pub const VOLUME_LIMIT_BIG: u64 = 127;

/// Attach limit for every other machine family.
pub const VOLUME_LIMIT_SMALL: u64 = 15;

/// Capabilities advertised by the node service.
pub const NODE_CAPABILITIES: &[NodeCapability] = &[
    NodeCapability::StageUnstageVolume,
    NodeCapability::GetVolumeStats,
    NodeCapability::ExpandVolume,
];

/// Maximum number of attachable volumes for a machine type.
///
/// The documented limits minus one for the boot disk.
#[must_use]
pub fn volume_limit(machine_type: &str) -> u64 {
    if machine_type.starts_with("n1-") || machine_type.starts_with("custom-") {
        VOLUME_LIMIT_BIG
    } else {
        VOLUME_LIMIT_SMALL
    }
}

/// Mounts attached disks for workloads on this node.
pub struct NodeService {
    mounter: Arc<dyn Mounter>,
    metadata: InstanceMetadata,
    locks: VolumeLocks,
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("metadata", &self.metadata)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl NodeService {
    /// Creates a node service for the instance described by `metadata`.
    #[must_use]
    pub fn new(mounter: Arc<dyn Mounter>, metadata: InstanceMetadata) -> Self {
        Self {
            mounter,
            metadata,
            locks: VolumeLocks::new(),
        }
    }

    /// In-flight operation registry.
    #[must_use]
    pub const fn locks(&self) -> &VolumeLocks {
        &self.locks
    }

    /// Capabilities advertised by `NodeGetCapabilities`.
    #[must_use]
    pub fn capabilities(&self) -> Vec<NodeCapability> {
        NODE_CAPABILITIES.to_vec()
    }

    /// Identity, topology and attach limit of this node.
    #[must_use]
    pub fn node_get_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: node_id(
                &self.metadata.project,
                &self.metadata.zone,
                &self.metadata.name,
            ),
            max_volumes_per_node: volume_limit(&self.metadata.machine_type),
            accessible_topology: Some(zone_topology(&self.metadata.zone)),
        }
    }

    /// Finds the local device path of the disk behind `key`.
    async fn device_path(
        &self,
        key: &VolumeKey,
        partition: &str,
    ) -> Result<Utf8PathBuf, MountError> {
        let candidates = self.mounter.disk_by_id_paths(key.device_name(), partition);
        let device = self.mounter.verify_device_path(&candidates).await?;
        debug!(disk = %key, %device, "found attached disk");
        Ok(device)
    }
}

/// Partition requested through the volume context, or the whole disk.
fn partition<S: std::hash::BuildHasher>(context: &HashMap<String, String, S>) -> &str {
    context
        .get(VOLUME_CONTEXT_PARTITION)
        .map_or("", String::as_str)
}

/// Access type of a capability, rejecting capabilities without one.
fn access_type<'a>(
    operation: &str,
    capability: &'a VolumeCapability,
) -> Result<&'a AccessType, CsiError> {
    capability.access_type.as_ref().ok_or_else(|| {
        CsiError::InvalidArgument(format!(
            "{operation} volume capability must specify either mount or block mode"
        ))
    })
}
