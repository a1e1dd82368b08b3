//! Instance lookups and disk attachment.

use std::time::Instant;

use tokio::time::sleep;

use crate::cloud::{AttachedDisk, CloudError, CloudOperation, Instance};

use super::wire::{ApiAttachedDisk, ApiInstance, ApiOperation};
use super::{GceCloud, HTTP_CLIENT};

impl GceCloud {
    pub(super) async fn fetch_instance(
        &self,
        zone: &str,
        name: &str,
    ) -> Result<Instance, CloudError> {
        let url = self.zonal_url(zone, &format!("instances/{name}"));
        let instance: ApiInstance = self
            .send(HTTP_CLIENT.get(&url), &format!("instance {zone}/{name}"))
            .await?;
        Ok(instance.into())
    }

    pub(super) async fn post_attach(
        &self,
        zone: &str,
        instance: &str,
        disk: &AttachedDisk,
    ) -> Result<CloudOperation, CloudError> {
        let url = self.zonal_url(zone, &format!("instances/{instance}/attachDisk"));
        let request = HTTP_CLIENT
            .post(&url)
            .query(&[("requestId", Self::request_id())])
            .json(&ApiAttachedDisk::persistent(disk));
        let operation: ApiOperation = self
            .send(request, &format!("instance {zone}/{instance}"))
            .await?;
        Ok(operation.handle())
    }

    pub(super) async fn post_detach(
        &self,
        zone: &str,
        instance: &str,
        device_name: &str,
    ) -> Result<CloudOperation, CloudError> {
        let url = self.zonal_url(zone, &format!("instances/{instance}/detachDisk"));
        let request = HTTP_CLIENT.post(&url).query(&[
            ("deviceName", device_name.to_owned()),
            ("requestId", Self::request_id()),
        ]);
        let operation: ApiOperation = self
            .send(request, &format!("instance {zone}/{instance}"))
            .await?;
        Ok(operation.handle())
    }

    /// Polls the instance until the disk shows up in its attachment list.
    pub(super) async fn poll_attached(
        &self,
        zone: &str,
        disk_name: &str,
        instance: &str,
    ) -> Result<(), CloudError> {
        let deadline = Instant::now() + self.operation_timeout;
        while Instant::now() <= deadline {
            let current = self.fetch_instance(zone, instance).await?;
            if current.attached(disk_name).is_some() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
        Err(CloudError::Timeout {
            action: String::from("attach"),
            resource: format!("disk {disk_name} on instance {instance}"),
        })
    }
}
