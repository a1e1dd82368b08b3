//! NodePublishVolume and NodeUnpublishVolume.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{error, info, instrument, warn};

use super::{DEFAULT_FS_TYPE, NodeService, access_type, partition};
use crate::error::CsiError;
use crate::mount::{MountError, cleanup_mount_point};
use crate::types::{AccessType, NodePublishVolumeRequest, NodeUnpublishVolumeRequest};
use crate::volume_id::VolumeKey;

const OP: &str = "NodePublishVolume";

impl NodeService {
    /// Bind-mounts the staged volume (or the raw device, for block
    /// volumes) at the workload's target path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing or malformed input, `Aborted` on
    /// contention, `Internal` when the mount fails.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, target = %request.target_path))]
    pub async fn node_publish_volume(
        &self,
        request: &NodePublishVolumeRequest,
    ) -> Result<(), CsiError> {
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        if request.staging_target_path.as_str().is_empty() {
            return Err(CsiError::missing(OP, "Staging Target Path"));
        }
        if request.target_path.as_str().is_empty() {
            return Err(CsiError::missing(OP, "Target Path"));
        }
        let Some(capability) = &request.volume_capability else {
            return Err(CsiError::missing(OP, "Volume Capability"));
        };
        let _guard = self.locks.lock(&request.volume_id)?;
        let access = access_type(OP, capability)?;

        let target = request.target_path.as_path();
        let mounted = self.mounter.is_mount_point(target).await.map_err(|err| {
            CsiError::Internal(format!("cannot validate mount point: {target} {err}"))
        })?;
        if mounted {
            info!("target already mounted");
            return Ok(());
        }

        let mut options = vec![String::from("bind")];
        if request.readonly {
            options.push(String::from("ro"));
        }
        let (source, mount_type) = match access {
            AccessType::Mount {
                fs_type,
                mount_flags,
            } => {
                options.extend(mount_flags.iter().cloned());
                self.mounter.make_dir(target).await.map_err(|err| {
                    CsiError::Internal(format!("mkdir failed on disk {target} ({err})"))
                })?;
                let filesystem = if fs_type.is_empty() {
                    DEFAULT_FS_TYPE
                } else {
                    fs_type.as_str()
                };
                (request.staging_target_path.clone(), filesystem)
            }
            AccessType::Block => (self.prepare_block_target(request).await?, ""),
        };

        if let Err(err) = self.mounter.mount(&source, target, mount_type, &options).await {
            return Err(self.undo_failed_publish(target, &err).await);
        }
        info!(%source, "volume published");
        Ok(())
    }

    /// Resolves the device and creates the file it is bound onto.
    async fn prepare_block_target(
        &self,
        request: &NodePublishVolumeRequest,
    ) -> Result<Utf8PathBuf, CsiError> {
        let key = VolumeKey::decode(&request.volume_id).map_err(|err| {
            CsiError::InvalidArgument(format!("{OP} Volume ID is invalid: {err}"))
        })?;
        let device = self
            .device_path(&key, partition(&request.volume_context))
            .await
            .map_err(|err| CsiError::Internal(format!("Error when getting device path: {err}")))?;
        let target = request.target_path.as_path();
        if let Err(err) = self.mounter.make_file(target).await {
            if let Err(remove_err) = self.mounter.remove_path(target).await {
                return Err(CsiError::Internal(format!(
                    "Error removing block file at target path {target}: {remove_err}, mount error: {err}"
                )));
            }
            return Err(CsiError::Internal(format!(
                "Failed to create block file at target path {target}: {err}"
            )));
        }
        Ok(device)
    }

    /// Cleans up a partial mount after a failed publish and builds the
    /// error to report.
    async fn undo_failed_publish(&self, target: &Utf8Path, cause: &MountError) -> CsiError {
        let still_mounted = match self.mounter.is_mount_point(target).await {
            Ok(mounted) => mounted,
            Err(check_err) => {
                error!(error = %check_err, "mount point check failed");
                return CsiError::Internal(format!(
                    "{OP} failed to check whether target path is a mount point: {cause}"
                ));
            }
        };
        if still_mounted {
            if let Err(unmount_err) = self.mounter.unmount(target).await {
                error!(error = %unmount_err, "failed to unmount");
                return CsiError::Internal(format!("{OP} failed to unmount target path: {cause}"));
            }
            if !matches!(self.mounter.is_mount_point(target).await, Ok(false)) {
                error!(%target, "still mounted despite unmount");
                return CsiError::Internal(format!(
                    "{OP} something is wrong with mounting: {cause}"
                ));
            }
        }
        if let Err(remove_err) = self.mounter.remove_path(target).await {
            warn!(error = %remove_err, "could not remove target after failed mount");
        }
        error!(error = %cause, "mount of disk failed");
        CsiError::Internal(format!("{OP} mount of disk failed: {cause}"))
    }

    /// Unmounts and removes the target path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing input, `Aborted` on contention,
    /// `Internal` when the path cannot be cleaned up.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, target = %request.target_path))]
    pub async fn node_unpublish_volume(
        &self,
        request: &NodeUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        const UNPUBLISH: &str = "NodeUnpublishVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(UNPUBLISH, "Volume ID"));
        }
        if request.target_path.as_str().is_empty() {
            return Err(CsiError::missing(UNPUBLISH, "Target Path"));
        }
        let _guard = self.locks.lock(&request.volume_id)?;

        cleanup_mount_point(self.mounter.as_ref(), &request.target_path)
            .await
            .map_err(|err| {
                CsiError::Internal(format!(
                    "Unmount failed: {err}; unmounting arguments: {}",
                    request.target_path
                ))
            })?;
        info!("volume unpublished");
        Ok(())
    }
}
