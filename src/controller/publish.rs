//! Attach, detach and capability validation.

use tracing::{info, instrument};

use super::{ControllerService, internal};
use crate::cloud::{AttachMode, AttachedDisk};
use crate::driver::VOLUME_ACCESS_MODES;
use crate::error::CsiError;
use crate::topology::TOPOLOGY_KEY_ZONE;
use crate::types::{
    ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
};
use crate::volume_id::{VolumeKey, instance_name_from_node_id};

impl ControllerService {
    /// Attaches the volume's disk to the node's instance.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing fields, `NotFound` when the disk or the
    /// instance does not exist, `AlreadyExists` when the disk is attached
    /// with a different mode, `Aborted` on contention, `Internal` otherwise.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, node_id = %request.node_id))]
    pub async fn controller_publish_volume(
        &self,
        request: &ControllerPublishVolumeRequest,
    ) -> Result<(), CsiError> {
        const OP: &str = "ControllerPublishVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        if request.node_id.is_empty() {
            return Err(CsiError::missing(OP, "Node ID"));
        }
        if request.volume_capability.is_none() {
            return Err(CsiError::missing(OP, "Volume capability"));
        }
        let key = VolumeKey::decode(&request.volume_id).map_err(|err| {
            CsiError::NotFound(format!(
                "Could not find volume with ID {}: {err}",
                request.volume_id
            ))
        })?;
        let instance_name = instance_name_from_node_id(&request.node_id).map_err(|err| {
            CsiError::NotFound(format!("Could not find instance {}: {err}", request.node_id))
        })?;
        let _guard = self.locks.lock(&request.volume_id)?;

        let disk = self
            .cloud
            .get_disk(&key.zone, &key.name)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::NotFound(format!("Could not find disk {}: {err}", key.name))
                } else {
                    internal("Unknown get disk error", &err)
                }
            })?;
        let instance = self
            .cloud
            .get_instance(&key.zone, instance_name)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::NotFound(format!("Could not find instance {instance_name}: {err}"))
                } else {
                    internal("Unknown get instance error", &err)
                }
            })?;

        let mode = AttachMode::from_readonly(request.readonly);
        if let Some(attached) = instance.attached(&disk.name) {
            if attached.mode != mode {
                return Err(CsiError::AlreadyExists(format!(
                    "Disk {} already published to node {} but incompatible: disk mode does not match. Got {}. Want {}",
                    disk.name,
                    request.node_id,
                    attached.mode.as_str(),
                    mode.as_str()
                )));
            }
            info!(disk = %key, instance = instance_name, "disk already attached");
            return Ok(());
        }

        let attachment = AttachedDisk {
            device_name: disk.name.clone(),
            mode,
            source: disk.self_link.clone(),
            kind: disk.kind.clone(),
        };
        info!(disk = %key, instance = instance_name, mode = mode.as_str(), "attaching disk");
        let operation = self
            .cloud
            .attach_disk(&key.zone, instance_name, &attachment)
            .await
            .map_err(|err| internal("unknown Attach error", &err))?;
        self.cloud
            .wait_for_operation(&operation)
            .await
            .map_err(|err| internal("unknown Attach operation error", &err))?;
        self.cloud
            .wait_for_attach(&key.zone, &disk.name, instance_name)
            .await
            .map_err(|err| internal("unknown WaitForAttach error", &err))?;
        info!(disk = %key, instance = instance_name, "disk attached");
        Ok(())
    }

    /// Detaches the volume's disk from the node's instance.
    ///
    /// A disk that is not attached, or whose disk or instance no longer
    /// exists, counts as detached.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing fields, `NotFound` for a malformed
    /// volume id, `Aborted` on contention, `Internal` otherwise.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, node_id = %request.node_id))]
    pub async fn controller_unpublish_volume(
        &self,
        request: &ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        const OP: &str = "ControllerUnpublishVolume";
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        if request.node_id.is_empty() {
            return Err(CsiError::missing(OP, "Node ID"));
        }
        let key = VolumeKey::decode(&request.volume_id).map_err(|err| {
            CsiError::NotFound(format!(
                "Could not find volume with ID {}: {err}",
                request.volume_id
            ))
        })?;
        let instance_name = instance_name_from_node_id(&request.node_id).map_err(|err| {
            CsiError::NotFound(format!("Could not find instance {}: {err}", request.node_id))
        })?;
        let _guard = self.locks.lock(&request.volume_id)?;

        match self.cloud.get_disk(&key.zone, &key.name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                info!(disk = %key, "disk gone, nothing to detach");
                return Ok(());
            }
            Err(err) => return Err(internal("Unknown get disk error", &err)),
        }
        let instance = match self.cloud.get_instance(&key.zone, instance_name).await {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => {
                info!(instance = instance_name, "instance gone, nothing to detach");
                return Ok(());
            }
            Err(err) => return Err(internal("Unknown get instance error", &err)),
        };
        if instance.attached(key.device_name()).is_none() {
            info!(disk = %key, instance = instance_name, "disk was not attached");
            return Ok(());
        }

        let operation = self
            .cloud
            .detach_disk(&key.zone, instance_name, key.device_name())
            .await
            .map_err(|err| internal("unknown detach error", &err))?;
        self.cloud
            .wait_for_operation(&operation)
            .await
            .map_err(|err| internal("unknown detach operation error", &err))?;
        info!(disk = %key, instance = instance_name, "disk detached");
        Ok(())
    }

    /// Reports whether the volume supports the requested capabilities and
    /// is reachable from the requested topology.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing fields, unsupported access modes and
    /// unknown topology keys, `NotFound` when the disk does not exist,
    /// `Internal` for other cloud failures.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id))]
    pub async fn validate_volume_capabilities(
        &self,
        request: &ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        const OP: &str = "ValidateVolumeCapabilities";
        if request.volume_capabilities.is_empty() {
            return Err(CsiError::missing(OP, "Volume Capabilities"));
        }
        if request.volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Volume ID"));
        }
        let key = VolumeKey::decode(&request.volume_id).map_err(|_| {
            CsiError::NotFound(format!(
                "Volume ID is of improper format, got {}",
                request.volume_id
            ))
        })?;
        self.cloud
            .get_disk(&key.zone, &key.name)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CsiError::NotFound(format!("Could not find disk {}: {err}", key.name))
                } else {
                    internal("Unknown get disk error", &err)
                }
            })?;

        for capability in &request.volume_capabilities {
            if !VOLUME_ACCESS_MODES.contains(&capability.access_mode) {
                return Err(CsiError::InvalidArgument(format!(
                    "Driver does not support mode:{:?}",
                    capability.access_mode
                )));
            }
        }

        // The first segment decides; a zone key either matches or not.
        for topology in &request.accessible_topology {
            if let Some((segment_key, zone)) = topology.segments.iter().next() {
                if segment_key != TOPOLOGY_KEY_ZONE {
                    return Err(CsiError::InvalidArgument(format!(
                        "{OP} unknown topology segment key {segment_key:?}"
                    )));
                }
                if *zone == key.zone {
                    return Ok(ValidateVolumeCapabilitiesResponse {
                        supported: true,
                        message: String::new(),
                    });
                }
                return Ok(ValidateVolumeCapabilitiesResponse {
                    supported: false,
                    message: format!(
                        "Volume {} is not accessible from topology {segment_key}:{zone}",
                        request.volume_id
                    ),
                });
            }
        }
        Ok(ValidateVolumeCapabilitiesResponse {
            supported: true,
            message: String::new(),
        })
    }
}
