//! Compute Engine v1 REST implementation of [`CloudDisks`].

mod disks;
mod instances;
mod operations;
mod snapshots;
mod wire;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::metadata::MetadataClient;
use super::{
    AttachedDisk, CloudDisks, CloudError, CloudFuture, CloudOperation, CloudSnapshot, Disk,
    DiskSpec, Instance,
};

/// Default Compute Engine API endpoint.
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Cloud client backed by the Compute Engine REST API.
#[derive(Debug)]
pub struct GceCloud {
    project: String,
    zone: String,
    api_base: String,
    metadata: MetadataClient,
    token: Mutex<Option<CachedToken>>,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl GceCloud {
    /// Client for `project` whose default zone is `zone`.
    #[must_use]
    pub fn new(project: impl Into<String>, zone: impl Into<String>, metadata: MetadataClient) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            api_base: String::from(COMPUTE_API_BASE),
            metadata,
            token: Mutex::new(None),
            poll_interval: DEFAULT_POLL_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Overrides the API endpoint.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    /// Overrides the delay between polls of long-running operations.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the deadline for long-running operations.
    #[must_use]
    pub const fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    fn zonal_url(&self, zone: &str, path: &str) -> String {
        format!(
            "{}/projects/{}/zones/{zone}/{path}",
            self.api_base, self.project
        )
    }

    fn global_url(&self, path: &str) -> String {
        format!("{}/projects/{}/global/{path}", self.api_base, self.project)
    }

    /// Full URI of a disk type in `zone`.
    #[must_use]
    pub fn disk_type_uri(&self, zone: &str, disk_type: &str) -> String {
        self.zonal_url(zone, &format!("diskTypes/{disk_type}"))
    }

    fn request_id() -> String {
        Uuid::new_v4().to_string()
    }

    async fn bearer_token(&self) -> Result<String, CloudError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }
        let fresh = self.metadata.access_token().await?;
        debug!(expires_in = ?fresh.expires_in, "refreshed access token");
        let lifetime = fresh.expires_in.saturating_sub(TOKEN_REFRESH_MARGIN);
        let value = fresh.value;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<T, CloudError> {
        let token = self.bearer_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|err| CloudError::Provider {
                message: format!("decoding response for {resource}: {err}"),
            });
        }
        Err(wire::classify_api_error(
            status.as_u16(),
            &String::from_utf8_lossy(&body),
            resource,
        ))
    }
}

impl CloudDisks for GceCloud {
    fn default_zone(&self) -> &str {
        &self.zone
    }

    fn get_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Disk> {
        Box::pin(async move { self.fetch_disk(zone, name).await })
    }

    fn insert_disk<'a>(
        &'a self,
        zone: &'a str,
        spec: &'a DiskSpec,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.create_disk(zone, spec).await })
    }

    fn delete_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.remove_disk(zone, name).await })
    }

    fn get_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Instance> {
        Box::pin(async move { self.fetch_instance(zone, name).await })
    }

    fn attach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        disk: &'a AttachedDisk,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.post_attach(zone, instance, disk).await })
    }

    fn detach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        device_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.post_detach(zone, instance, device_name).await })
    }

    fn wait_for_operation<'a>(&'a self, operation: &'a CloudOperation) -> CloudFuture<'a, ()> {
        Box::pin(async move { self.poll_operation(operation).await })
    }

    fn wait_for_attach<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        instance: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move { self.poll_attached(zone, disk_name, instance).await })
    }

    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        snapshot_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.post_snapshot(zone, disk_name, snapshot_name).await })
    }

    fn get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot> {
        Box::pin(async move { self.fetch_snapshot(name).await })
    }

    fn wait_and_get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot> {
        Box::pin(async move { self.poll_snapshot(name).await })
    }

    fn delete_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move { self.remove_snapshot(name).await })
    }
}
