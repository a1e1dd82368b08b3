//! Long-running operation polling.

use std::time::Instant;

use tokio::time::sleep;
use tracing::debug;

use crate::cloud::{CloudError, CloudOperation, OperationScope};

use super::wire::ApiOperation;
use super::{GceCloud, HTTP_CLIENT};

impl GceCloud {
    /// Polls `operation` until it is `DONE` or the deadline passes.
    ///
    /// Dropping the returned future abandons the wait; the operation keeps
    /// running on the provider side.
    pub(super) async fn poll_operation(&self, operation: &CloudOperation) -> Result<(), CloudError> {
        let path = format!("operations/{}", operation.name);
        let url = match &operation.scope {
            OperationScope::Zonal(zone) => self.zonal_url(zone, &path),
            OperationScope::Global => self.global_url(&path),
        };
        let resource = format!("operation {}", operation.name);
        let deadline = Instant::now() + self.operation_timeout;

        while Instant::now() <= deadline {
            let current: ApiOperation = self.send(HTTP_CLIENT.get(&url), &resource).await?;
            if current.is_done() {
                debug!(operation = %operation.name, "operation finished");
                return current.outcome(&resource);
            }
            sleep(self.poll_interval).await;
        }

        Err(CloudError::Timeout {
            action: String::from("operation"),
            resource,
        })
    }
}
