//! CreateVolume and DeleteVolume.

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use super::{ControllerService, internal};
use crate::capacity::{request_size_gib, resolve_capacity};
use crate::cloud::{DEFAULT_DISK_TYPE, DiskSpec};
use crate::error::CsiError;
use crate::topology::zone_topology;
use crate::types::{CreateVolumeRequest, DeleteVolumeRequest, Volume};
use crate::volume_id::VolumeKey;

const PARAM_DISK_TYPE: &str = "type";
const PARAM_ZONE: &str = "zone";
const PARAM_REPLICATION_TYPE: &str = "replication-type";
const PARAM_KMS_KEY: &str = "disk-encryption-kms-key";

const REPLICATION_NONE: &str = "none";
const REPLICATION_REGIONAL: &str = "regional-pd";

// Provisioner plumbing, matched case-sensitively.
const SECRET_NAME_KEY: &str = "csiProvisionerSecretName";
const SECRET_NAMESPACE_KEY: &str = "csiProvisionerSecretNamespace";

const DISK_DESCRIPTION: &str = "Disk created by GCE-PD CSI Driver";

/// Storage-class parameters understood by `CreateVolume`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiskParameters {
    /// Disk type name.
    pub disk_type: String,
    /// Zone requested through the `zone` parameter.
    pub zone: Option<String>,
    /// Customer-managed encryption key.
    pub kms_key: Option<String>,
}

impl Default for DiskParameters {
    fn default() -> Self {
        Self {
            disk_type: DEFAULT_DISK_TYPE.to_owned(),
            zone: None,
            kms_key: None,
        }
    }
}

impl DiskParameters {
    /// Parses parameters, matching keys case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`CsiError::InvalidArgument`] for unknown keys and for
    /// replication types other than `none`.
    pub fn parse<S: std::hash::BuildHasher>(
        parameters: &HashMap<String, String, S>,
    ) -> Result<Self, CsiError> {
        let mut parsed = Self::default();
        for (key, value) in parameters {
            if key == SECRET_NAME_KEY || key == SECRET_NAMESPACE_KEY {
                continue;
            }
            match key.to_lowercase().as_str() {
                PARAM_DISK_TYPE => {
                    info!(disk_type = %value, "setting disk type");
                    parsed.disk_type.clone_from(value);
                }
                PARAM_ZONE => parsed.zone = Some(value.clone()),
                PARAM_REPLICATION_TYPE => match value.to_lowercase().as_str() {
                    REPLICATION_NONE => {}
                    REPLICATION_REGIONAL => {
                        return Err(CsiError::InvalidArgument(String::from(
                            "CreateVolume replication type regional-pd is not supported",
                        )));
                    }
                    other => {
                        return Err(CsiError::InvalidArgument(format!(
                            "CreateVolume invalid replication type {other:?}"
                        )));
                    }
                },
                PARAM_KMS_KEY => parsed.kms_key = Some(value.clone()),
                _ => {
                    return Err(CsiError::InvalidArgument(format!("invalid option {key:?}")));
                }
            }
        }
        Ok(parsed)
    }
}

impl ControllerService {
    /// Provisions a disk, or returns the existing one when compatible.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for bad input, `Aborted` when another operation on
    /// the same name is in flight, `AlreadyExists` when a disk with the same
    /// name is incompatible, `Internal` for other cloud failures.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Volume, CsiError> {
        if request.name.is_empty() {
            return Err(CsiError::missing("CreateVolume", "Name"));
        }
        if request.volume_capabilities.is_empty() {
            return Err(CsiError::missing("CreateVolume", "Volume capabilities"));
        }
        let _guard = self.locks.lock(&request.name)?;

        let capacity_bytes = resolve_capacity(request.capacity_range.as_ref()).map_err(|err| {
            CsiError::InvalidArgument(format!("CreateVolume Request Capacity is invalid: {err}"))
        })?;
        let params = DiskParameters::parse(&request.parameters)?;
        let zone = self.resolve_zone(request, params.zone.as_deref())?;

        let key = VolumeKey::new(zone, request.name.clone());
        let volume = Volume {
            volume_id: key.encode(),
            capacity_bytes,
            volume_context: HashMap::new(),
            accessible_topology: vec![zone_topology(&key.zone)],
        };

        if self.existing_disk_matches(&key, &params.disk_type, request).await? {
            warn!(disk = %key, "disk already exists, reusing");
            return Ok(volume);
        }

        let spec = DiskSpec {
            name: key.name.clone(),
            size_gb: request_size_gib(capacity_bytes),
            disk_type: params.disk_type.clone(),
            description: DISK_DESCRIPTION.to_owned(),
            kms_key: params.kms_key,
        };
        let outcome = match self.cloud.insert_disk(&key.zone, &spec).await {
            Ok(operation) => self.cloud.wait_for_operation(&operation).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => {
                info!(disk = %key, size_gb = spec.size_gb, "disk created");
                Ok(volume)
            }
            Err(err) if err.is_already_exists() => {
                self.existing_disk_matches(&key, &params.disk_type, request)
                    .await?;
                warn!(disk = %key, "disk appeared concurrently, reusing");
                Ok(volume)
            }
            Err(err) => Err(internal("CreateVolume insert disk failed", &err)),
        }
    }

    fn resolve_zone(
        &self,
        request: &CreateVolumeRequest,
        parameter_zone: Option<&str>,
    ) -> Result<String, CsiError> {
        if let Some(requirement) = &request.accessibility_requirements {
            if parameter_zone.is_some() {
                return Err(CsiError::InvalidArgument(String::from(
                    "CreateVolume only one of parameter zone or topology zone may be specified",
                )));
            }
            return self.pick_zone(requirement).map_err(|err| {
                CsiError::InvalidArgument(format!("CreateVolume failed to pick topology: {err}"))
            });
        }
        Ok(parameter_zone
            .filter(|zone| !zone.is_empty())
            .unwrap_or_else(|| self.cloud.default_zone())
            .to_owned())
    }

    /// Whether a compatible disk already exists under `key`.
    async fn existing_disk_matches(
        &self,
        key: &VolumeKey,
        disk_type: &str,
        request: &CreateVolumeRequest,
    ) -> Result<bool, CsiError> {
        let disk = match self.cloud.get_disk(&key.zone, &key.name).await {
            Ok(disk) => disk,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(internal("CreateVolume get disk failed", &err)),
        };
        let range = request.capacity_range.unwrap_or_default();
        disk.check_compatible(
            disk_type,
            range.required_set().unwrap_or(0),
            range.limit_set().unwrap_or(0),
        )
        .map_err(CsiError::AlreadyExists)?;
        Ok(true)
    }

    /// Deletes the disk behind a volume identifier.
    ///
    /// Malformed identifiers and missing disks count as already deleted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty id, `Aborted` on contention,
    /// `FailedPrecondition` when the disk is in use, `Internal` otherwise.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id))]
    pub async fn delete_volume(&self, request: &DeleteVolumeRequest) -> Result<(), CsiError> {
        if request.volume_id.is_empty() {
            return Err(CsiError::missing("DeleteVolume", "Volume ID"));
        }
        let Ok(key) = VolumeKey::decode(&request.volume_id) else {
            warn!("malformed volume id, treating as deleted");
            return Ok(());
        };
        let _guard = self.locks.lock(&request.volume_id)?;

        let operation = match self.cloud.delete_disk(&key.zone, &key.name).await {
            Ok(operation) => operation,
            Err(err) if err.is_not_found() => {
                info!(disk = %key, "disk already deleted");
                return Ok(());
            }
            Err(err) if err.is_in_use() => {
                return Err(CsiError::FailedPrecondition(format!("Volume in use: {err}")));
            }
            Err(err) => return Err(internal("DeleteVolume delete disk failed", &err)),
        };
        self.cloud
            .wait_for_operation(&operation)
            .await
            .map_err(|err| internal("DeleteVolume delete operation failed", &err))?;
        info!(disk = %key, "disk deleted");
        Ok(())
    }
}
