//! Snapshot calls.

use std::time::Instant;

use tokio::time::sleep;
use tracing::debug;

use crate::cloud::{CloudError, CloudOperation, CloudSnapshot};

use super::wire::{ApiOperation, ApiSnapshot, CreateSnapshotBody};
use super::{GceCloud, HTTP_CLIENT};

impl GceCloud {
    pub(super) async fn post_snapshot(
        &self,
        zone: &str,
        disk_name: &str,
        snapshot_name: &str,
    ) -> Result<CloudOperation, CloudError> {
        let url = self.zonal_url(zone, &format!("disks/{disk_name}/createSnapshot"));
        let request = HTTP_CLIENT
            .post(&url)
            .query(&[("requestId", Self::request_id())])
            .json(&CreateSnapshotBody {
                name: snapshot_name,
            });
        let operation: ApiOperation = self
            .send(request, &format!("snapshot {snapshot_name}"))
            .await?;
        Ok(operation.handle())
    }

    pub(super) async fn fetch_snapshot(&self, name: &str) -> Result<CloudSnapshot, CloudError> {
        let url = self.global_url(&format!("snapshots/{name}"));
        let snapshot: ApiSnapshot = self
            .send(HTTP_CLIENT.get(&url), &format!("snapshot {name}"))
            .await?;
        Ok(snapshot.into())
    }

    /// Polls until the snapshot record exists. Only `NotFound` is retried.
    pub(super) async fn poll_snapshot(&self, name: &str) -> Result<CloudSnapshot, CloudError> {
        let deadline = Instant::now() + self.operation_timeout;
        while Instant::now() <= deadline {
            match self.fetch_snapshot(name).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if err.is_not_found() => {
                    debug!(snapshot = name, "snapshot not visible yet");
                }
                Err(err) => return Err(err),
            }
            sleep(self.poll_interval).await;
        }
        Err(CloudError::Timeout {
            action: String::from("snapshot"),
            resource: format!("snapshot {name}"),
        })
    }

    pub(super) async fn remove_snapshot(&self, name: &str) -> Result<CloudOperation, CloudError> {
        let url = self.global_url(&format!("snapshots/{name}"));
        let request = HTTP_CLIENT
            .delete(&url)
            .query(&[("requestId", Self::request_id())]);
        let operation: ApiOperation = self.send(request, &format!("snapshot {name}")).await?;
        Ok(CloudOperation::global(operation.handle().name))
    }
}
