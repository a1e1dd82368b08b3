//! NodeStageVolume and NodeUnstageVolume.

use tracing::{info, instrument};

use super::{DEFAULT_FS_TYPE, NodeService, access_type, partition};
use crate::error::CsiError;
use crate::mount::cleanup_mount_point;
use crate::types::{AccessType, NodeStageVolumeRequest, NodeUnstageVolumeRequest};
use crate::volume_id::VolumeKey;

impl NodeService {
    /// Formats the attached disk if needed and mounts it at the staging
    /// path. Block volumes only get the staging directory.
    ///
    /// A staging path that is already a mount point is reported as staged
    /// without checking what is mounted there.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing or malformed input, `Aborted` on
    /// contention, `Internal` when the device cannot be found or mounted.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, staging = %request.staging_target_path))]
    pub async fn node_stage_volume(&self, request: &NodeStageVolumeRequest) -> Result<(), CsiError> {
        const OP: &str = "NodeStageVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        if request.staging_target_path.as_str().is_empty() {
            return Err(CsiError::missing(OP, "Staging Target Path"));
        }
        let Some(capability) = &request.volume_capability else {
            return Err(CsiError::missing(OP, "Volume Capability"));
        };
        let _guard = self.locks.lock(&request.volume_id)?;
        let access = access_type(OP, capability)?;
        let key = VolumeKey::decode(&request.volume_id).map_err(|err| {
            CsiError::InvalidArgument(format!("{OP} Volume ID is invalid: {err}"))
        })?;

        let device = self
            .device_path(&key, partition(&request.volume_context))
            .await
            .map_err(|err| CsiError::Internal(format!("Error when getting device path: {err}")))?;

        let staging = request.staging_target_path.as_path();
        let mounted = self.mounter.is_mount_point(staging).await.map_err(|err| {
            CsiError::Internal(format!(
                "Unknown error when checking mount point ({staging}): {err}"
            ))
        })?;
        if mounted {
            info!("staging path already mounted");
            return Ok(());
        }
        self.mounter.make_dir(staging).await.map_err(|err| {
            CsiError::Internal(format!("Failed to create directory ({staging}): {err}"))
        })?;

        let AccessType::Mount {
            fs_type,
            mount_flags,
        } = access
        else {
            return Ok(());
        };
        let filesystem = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type.as_str()
        };

        self.mounter
            .format_and_mount(&device, staging, filesystem, mount_flags)
            .await
            .map_err(|err| {
                CsiError::Internal(format!(
                    "Failed to format and mount device from ({device}) to ({staging}) with fstype ({filesystem}) and options ({mount_flags:?}): {err}"
                ))
            })?;
        info!(%device, filesystem, "volume staged");
        Ok(())
    }

    /// Unmounts and removes the staging path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing input, `Aborted` on contention,
    /// `Internal` when the path cannot be cleaned up.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, staging = %request.staging_target_path))]
    pub async fn node_unstage_volume(
        &self,
        request: &NodeUnstageVolumeRequest,
    ) -> Result<(), CsiError> {
        const OP: &str = "NodeUnstageVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        if request.staging_target_path.as_str().is_empty() {
            return Err(CsiError::missing(OP, "Staging Target Path"));
        }
        let _guard = self.locks.lock(&request.volume_id)?;

        cleanup_mount_point(self.mounter.as_ref(), &request.staging_target_path)
            .await
            .map_err(|err| {
                CsiError::Internal(format!(
                    "{OP} failed to unmount at path {}: {err}",
                    request.staging_target_path
                ))
            })?;
        info!("volume unstaged");
        Ok(())
    }
}
