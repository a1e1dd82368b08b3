//! NodeExpandVolume and NodeGetVolumeStats.

use tracing::{info, instrument};

use super::NodeService;
use crate::capacity::resolve_capacity;
use crate::error::CsiError;
use crate::mount::MountError;
use crate::types::{
    NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetVolumeStatsRequest,
    NodeGetVolumeStatsResponse, UsageUnit, VolumeUsage,
};
use crate::volume_id::VolumeKey;

impl NodeService {
    /// Grows the filesystem to fill the (already enlarged) disk.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing or malformed input, `Aborted` on
    /// contention, `Internal` when resizing fails or the device is smaller
    /// than requested afterwards.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, path = %request.volume_path))]
    pub async fn node_expand_volume(
        &self,
        request: &NodeExpandVolumeRequest,
    ) -> Result<NodeExpandVolumeResponse, CsiError> {
        const OP: &str = "NodeExpandVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        let requested = resolve_capacity(request.capacity_range.as_ref()).map_err(|err| {
            CsiError::InvalidArgument(format!("{OP} capacity range is invalid: {err}"))
        })?;
        if request.volume_path.as_str().is_empty() {
            return Err(CsiError::missing(OP, "Volume Path"));
        }
        let key = VolumeKey::decode(&request.volume_id).map_err(|err| {
            CsiError::InvalidArgument(format!("{OP} Volume ID is invalid: {err}"))
        })?;
        let _guard = self.locks.lock(&request.volume_id)?;

        let device = self.device_path(&key, "").await.map_err(|err| {
            CsiError::Internal(format!(
                "{OP} error when getting device path for {}: {err}",
                request.volume_id
            ))
        })?;
        self.mounter
            .resize(&device, &request.volume_path)
            .await
            .map_err(|err| {
                CsiError::Internal(format!("{OP} error when resizing volume {key}: {err}"))
            })?;

        let actual = self.mounter.block_size_bytes(&device).await.map_err(|err| {
            CsiError::Internal(format!(
                "{OP} error when getting size of block volume at path {device}: {err}"
            ))
        })?;
        if actual < requested {
            return Err(CsiError::Internal(format!(
                "{OP} resize requested for {requested} but after resize volume was size {actual}"
            )));
        }
        info!(%device, requested, actual, "volume expanded");
        Ok(NodeExpandVolumeResponse {
            capacity_bytes: requested,
        })
    }

    /// Byte and inode usage of the filesystem at the volume path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty path, `NotFound` when the path does
    /// not exist, `Internal` for other failures.
    #[instrument(skip(self, request), fields(path = %request.volume_path))]
    pub async fn node_get_volume_stats(
        &self,
        request: &NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError> {
        if request.volume_path.as_str().is_empty() {
            return Err(CsiError::InvalidArgument(String::from(
                "NodeGetVolumeStats volume path was empty",
            )));
        }
        let stats = self
            .mounter
            .volume_stats(&request.volume_path)
            .await
            .map_err(|err| match err {
                MountError::Missing { path } => {
                    CsiError::NotFound(format!("path {path} does not exist"))
                }
                other => CsiError::Internal(format!(
                    "failed to get fs info on path {}: {other}",
                    request.volume_path
                )),
            })?;
        Ok(NodeGetVolumeStatsResponse {
            usage: vec![
                VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: stats.available_bytes,
                    total: stats.total_bytes,
                    used: stats.used_bytes,
                },
                VolumeUsage {
                    unit: UsageUnit::Inodes,
                    available: stats.free_inodes,
                    total: stats.total_inodes,
                    used: stats.used_inodes,
                },
            ],
        })
    }
}
