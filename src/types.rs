//! Protocol data model: capabilities, topology, requests and responses.
//!
//! These types mirror the orchestrator's storage plugin contract. They are
//! all [`Serialize`]/[`Deserialize`] so the transport can carry them as
//! JSON; the services themselves never persist them.

use std::collections::{BTreeMap, HashMap};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// How a volume may be accessed by workloads.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    /// Mode not specified by the caller.
    #[default]
    Unknown,
    /// Read-write on a single node.
    SingleNodeWriter,
    /// Read-only on a single node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// Many readers, one writer.
    MultiNodeSingleWriter,
    /// Read-write on many nodes.
    MultiNodeMultiWriter,
}

/// Whether the volume is consumed as a filesystem or as a raw device.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Filesystem mount with an optional filesystem type and flags.
    Mount {
        /// Filesystem type; empty selects the driver default.
        #[serde(default)]
        fs_type: String,
        /// Extra mount options.
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Raw block device exposed as a file.
    Block,
}

/// Capability requested for a volume on a given call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Requested access type; `None` is rejected by the node service.
    #[serde(default)]
    pub access_type: Option<AccessType>,
}

impl VolumeCapability {
    /// Capability for a filesystem mount.
    #[must_use]
    pub fn mount(fs_type: impl Into<String>, mount_flags: Vec<String>) -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: Some(AccessType::Mount {
                fs_type: fs_type.into(),
                mount_flags,
            }),
        }
    }

    /// Capability for a raw block device.
    #[must_use]
    pub const fn block() -> Self {
        Self {
            access_mode: AccessMode::SingleNodeWriter,
            access_type: Some(AccessType::Block),
        }
    }
}

/// Requested size bounds in bytes. A bound is set when present and non-zero.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Minimum acceptable size.
    #[serde(default)]
    pub required_bytes: Option<u64>,
    /// Maximum acceptable size.
    #[serde(default)]
    pub limit_bytes: Option<u64>,
}

impl CapacityRange {
    /// Range with only a required size.
    #[must_use]
    pub const fn required(bytes: u64) -> Self {
        Self {
            required_bytes: Some(bytes),
            limit_bytes: None,
        }
    }

    /// Range with only a limit.
    #[must_use]
    pub const fn limit(bytes: u64) -> Self {
        Self {
            required_bytes: None,
            limit_bytes: Some(bytes),
        }
    }

    /// Required size when set.
    #[must_use]
    pub fn required_set(&self) -> Option<u64> {
        self.required_bytes.filter(|bytes| *bytes > 0)
    }

    /// Limit when set.
    #[must_use]
    pub fn limit_set(&self) -> Option<u64> {
        self.limit_bytes.filter(|bytes| *bytes > 0)
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Placement constraint expressed as key/value segments.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"topology.gke.io/zone": "us-central1-c"}`.
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

impl Topology {
    /// Topology with a single segment.
    #[must_use]
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segments: BTreeMap::from([(key.into(), value.into())]),
        }
    }
}

/// Accessibility requirements supplied with `CreateVolume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TopologyRequirement {
    /// Every acceptable topology; one is chosen when nothing is preferred.
    #[serde(default)]
    pub requisite: Vec<Topology>,
    /// Topologies in order of preference.
    #[serde(default)]
    pub preferred: Vec<Topology>,
}

// ---------------------------------------------------------------------------
// Controller messages
// ---------------------------------------------------------------------------

/// A provisioned volume as reported to the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Opaque `zone/name` handle.
    pub volume_id: String,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Context forwarded to node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Where the volume can be reached from.
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Request to provision a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateVolumeRequest {
    /// Caller-chosen name; becomes the disk name.
    pub name: String,
    /// Requested size bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Capabilities the volume must support.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters, keys matched case-insensitively.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Placement constraints.
    #[serde(default)]
    pub accessibility_requirements: Option<TopologyRequirement>,
}

/// Request to delete a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeleteVolumeRequest {
    /// Volume to delete.
    pub volume_id: String,
}

/// Request to attach a volume to a node.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControllerPublishVolumeRequest {
    /// Volume to attach.
    pub volume_id: String,
    /// Node identifier reported by `NodeGetInfo`.
    pub node_id: String,
    /// Capability the node will use.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Attach read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Request to detach a volume from a node.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControllerUnpublishVolumeRequest {
    /// Volume to detach.
    pub volume_id: String,
    /// Node identifier reported by `NodeGetInfo`.
    pub node_id: String,
}

/// Request to check capabilities against an existing volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Volume to check.
    pub volume_id: String,
    /// Capabilities to validate.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Topologies the volume must be reachable from.
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// Result of `ValidateVolumeCapabilities`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Whether every requested capability is supported.
    pub supported: bool,
    /// Explanation when unsupported.
    #[serde(default)]
    pub message: String,
}

/// Lifecycle status of a snapshot.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Status not recognised.
    #[default]
    Unknown,
    /// Snapshot is usable.
    Ready,
    /// Snapshot data is still uploading.
    Uploading,
    /// Upload failed.
    ErrorUploading,
}

/// A point-in-time snapshot of a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Snapshot {
    /// Snapshot identifier (the cloud snapshot name).
    pub snapshot_id: String,
    /// Volume the snapshot was taken from, when known.
    #[serde(default)]
    pub source_volume_id: String,
    /// Creation time in nanoseconds since the Unix epoch.
    pub created_at_nanos: i128,
    /// Current status.
    pub status: SnapshotStatus,
}

/// Request to snapshot a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateSnapshotRequest {
    /// Snapshot name.
    pub name: String,
    /// Volume to snapshot.
    pub source_volume_id: String,
}

/// Request to delete a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeleteSnapshotRequest {
    /// Snapshot to delete.
    pub snapshot_id: String,
}

/// Request to list snapshots.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ListSnapshotsRequest {
    /// Restricts the listing to one snapshot.
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

/// Result of `ListSnapshots`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ListSnapshotsResponse {
    /// Matching snapshots.
    pub entries: Vec<Snapshot>,
}

// ---------------------------------------------------------------------------
// Node messages
// ---------------------------------------------------------------------------

/// Request to stage a volume at a node-local path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: String,
    /// Node-local staging directory.
    pub staging_target_path: Utf8PathBuf,
    /// Capability to stage with.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Context from `CreateVolume`; may carry a partition selector.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to unstage a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeUnstageVolumeRequest {
    /// Volume to unstage.
    pub volume_id: String,
    /// Staging directory used at stage time.
    pub staging_target_path: Utf8PathBuf,
}

/// Request to expose a staged volume at a workload path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: String,
    /// Staging directory (bind-mount source in mount mode).
    pub staging_target_path: Utf8PathBuf,
    /// Workload-visible path.
    pub target_path: Utf8PathBuf,
    /// Capability to publish with.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Publish read-only.
    #[serde(default)]
    pub readonly: bool,
    /// Context from `CreateVolume`; may carry a partition selector.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to remove a workload path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeUnpublishVolumeRequest {
    /// Volume to unpublish.
    pub volume_id: String,
    /// Workload-visible path.
    pub target_path: Utf8PathBuf,
}

/// Request to grow the filesystem after the disk was resized.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeExpandVolumeRequest {
    /// Volume to expand.
    pub volume_id: String,
    /// Path the volume is mounted at.
    pub volume_path: Utf8PathBuf,
    /// New size bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

/// Result of `NodeExpandVolume`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeExpandVolumeResponse {
    /// Capacity after expansion.
    pub capacity_bytes: u64,
}

/// Request for usage statistics of a mounted volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeGetVolumeStatsRequest {
    /// Volume being queried.
    #[serde(default)]
    pub volume_id: String,
    /// Path the volume is mounted at.
    pub volume_path: Utf8PathBuf,
}

/// Unit of a [`VolumeUsage`] entry.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageUnit {
    /// Bytes.
    Bytes,
    /// Inodes.
    Inodes,
}

/// One usage figure for a volume.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeUsage {
    /// Unit of the three counters.
    pub unit: UsageUnit,
    /// Free amount available to unprivileged users.
    pub available: u64,
    /// Total amount.
    pub total: u64,
    /// Amount in use.
    pub used: u64,
}

/// Result of `NodeGetVolumeStats`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeGetVolumeStatsResponse {
    /// Byte and inode usage.
    pub usage: Vec<VolumeUsage>,
}

/// Information about the node the service runs on.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Node identifier passed back to `ControllerPublishVolume`.
    pub node_id: String,
    /// Maximum number of attachable volumes.
    pub max_volumes_per_node: u64,
    /// Topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

// ---------------------------------------------------------------------------
// Identity and capability advertisement
// ---------------------------------------------------------------------------

/// Plugin name and version.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Plugin name in domain notation.
    pub name: String,
    /// Vendor version string.
    pub vendor_version: String,
}

/// Plugin-wide capabilities.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginCapability {
    /// The plugin provides the controller service.
    ControllerService,
    /// Volumes are not equally reachable from every node.
    VolumeAccessibilityConstraints,
}

/// Controller operations the plugin supports.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCapability {
    /// `CreateVolume` and `DeleteVolume`.
    CreateDeleteVolume,
    /// `ControllerPublishVolume` and `ControllerUnpublishVolume`.
    PublishUnpublishVolume,
    /// `CreateSnapshot` and `DeleteSnapshot`.
    CreateDeleteSnapshot,
    /// `ListSnapshots`.
    ListSnapshots,
}

/// Node operations the plugin supports.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    /// `NodeStageVolume` and `NodeUnstageVolume`.
    StageUnstageVolume,
    /// `NodeGetVolumeStats`.
    GetVolumeStats,
    /// `NodeExpandVolume`.
    ExpandVolume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_range_treats_zero_as_unset() {
        let range = CapacityRange {
            required_bytes: Some(0),
            limit_bytes: Some(10),
        };
        assert_eq!(range.required_set(), None);
        assert_eq!(range.limit_set(), Some(10));
    }

    #[test]
    fn block_capability_deserialises_from_wire_form() {
        let json = r#"{"access_mode":"SINGLE_NODE_WRITER","access_type":"block"}"#;
        let cap: VolumeCapability =
            serde_json::from_str(json).unwrap_or_else(|err| panic!("deserialise: {err}"));
        assert_eq!(cap, VolumeCapability::block());
    }

    #[test]
    fn mount_capability_defaults_flags() {
        let json = r#"{"access_type":{"mount":{"fs_type":"xfs"}}}"#;
        let cap: VolumeCapability =
            serde_json::from_str(json).unwrap_or_else(|err| panic!("deserialise: {err}"));
        assert_eq!(cap.access_mode, AccessMode::Unknown);
        assert_eq!(
            cap.access_type,
            Some(AccessType::Mount {
                fs_type: String::from("xfs"),
                mount_flags: Vec::new(),
            })
        );
    }
}
