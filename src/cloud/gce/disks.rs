//! Disk calls.

use crate::cloud::{CloudError, CloudOperation, Disk, DiskSpec};

use super::wire::{ApiDisk, ApiOperation, DiskEncryptionKey, InsertDiskBody};
use super::{GceCloud, HTTP_CLIENT};

impl GceCloud {
    pub(super) async fn fetch_disk(&self, zone: &str, name: &str) -> Result<Disk, CloudError> {
        let url = self.zonal_url(zone, &format!("disks/{name}"));
        let disk: ApiDisk = self
            .send(HTTP_CLIENT.get(&url), &format!("disk {zone}/{name}"))
            .await?;
        Ok(disk.into())
    }

    pub(super) async fn create_disk(
        &self,
        zone: &str,
        spec: &DiskSpec,
    ) -> Result<CloudOperation, CloudError> {
        let url = self.zonal_url(zone, "disks");
        let body = InsertDiskBody {
            name: &spec.name,
            size_gb: spec.size_gb.to_string(),
            disk_type: self.disk_type_uri(zone, &spec.disk_type),
            description: &spec.description,
            disk_encryption_key: spec
                .kms_key
                .as_deref()
                .map(|kms_key_name| DiskEncryptionKey { kms_key_name }),
        };
        let request = HTTP_CLIENT
            .post(&url)
            .query(&[("requestId", Self::request_id())])
            .json(&body);
        let operation: ApiOperation = self
            .send(request, &format!("disk {zone}/{}", spec.name))
            .await?;
        Ok(operation.handle())
    }

    pub(super) async fn remove_disk(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<CloudOperation, CloudError> {
        let url = self.zonal_url(zone, &format!("disks/{name}"));
        let request = HTTP_CLIENT
            .delete(&url)
            .query(&[("requestId", Self::request_id())]);
        let operation: ApiOperation = self.send(request, &format!("disk {zone}/{name}")).await?;
        Ok(operation.handle())
    }
}
