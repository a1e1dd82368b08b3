//! Compute Engine metadata server client.
//!
//! Supplies the identity of the instance the driver runs on and the access
//! token used by [`super::GceCloud`]. Any field configured explicitly is
//! taken as-is and never fetched.

use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{CloudError, last_segment};

/// Default metadata server endpoint.
pub const METADATA_BASE_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

static METADATA_HTTP: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Identity of the instance hosting the driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceMetadata {
    /// Project identifier.
    pub project: String,
    /// Zone name.
    pub zone: String,
    /// Instance name.
    pub name: String,
    /// Machine type name, e.g. `n1-standard-4`.
    pub machine_type: String,
}

/// Values that take precedence over the metadata server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetadataOverrides {
    /// Project identifier.
    pub project: Option<String>,
    /// Zone name.
    pub zone: Option<String>,
    /// Instance name.
    pub instance_name: Option<String>,
    /// Machine type name.
    pub machine_type: Option<String>,
}

/// Short-lived OAuth access token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessToken {
    /// Bearer token value.
    pub value: String,
    /// Lifetime from the moment it was issued.
    pub expires_in: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Client for the metadata server.
#[derive(Clone, Debug)]
pub struct MetadataClient {
    base_url: String,
}

impl Default for MetadataClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataClient {
    /// Client for the well-known metadata endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(METADATA_BASE_URL)
    }

    /// Client for a custom endpoint.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, CloudError> {
        let url = format!("{}/{path}", self.base_url);
        let response = METADATA_HTTP
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body.trim().to_owned());
        }
        Err(CloudError::Provider {
            message: format!("metadata {path} returned {status}: {body}"),
        })
    }

    /// Project the instance belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the server is unreachable.
    pub async fn project_id(&self) -> Result<String, CloudError> {
        self.get_text("project/project-id").await
    }

    /// Zone the instance runs in.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the server is unreachable.
    pub async fn zone(&self) -> Result<String, CloudError> {
        let raw = self.get_text("instance/zone").await?;
        Ok(last_segment(&raw).to_owned())
    }

    /// Name of the instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the server is unreachable.
    pub async fn instance_name(&self) -> Result<String, CloudError> {
        self.get_text("instance/name").await
    }

    /// Machine type of the instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when the server is unreachable.
    pub async fn machine_type(&self) -> Result<String, CloudError> {
        let raw = self.get_text("instance/machine-type").await?;
        Ok(last_segment(&raw).to_owned())
    }

    /// Access token of the default service account.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Auth`] when the token cannot be fetched or
    /// decoded.
    pub async fn access_token(&self) -> Result<AccessToken, CloudError> {
        let body = self
            .get_text("instance/service-accounts/default/token")
            .await
            .map_err(|err| CloudError::Auth {
                message: err.to_string(),
            })?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|err| CloudError::Auth {
                message: err.to_string(),
            })?;
        Ok(AccessToken {
            value: parsed.access_token,
            expires_in: Duration::from_secs(parsed.expires_in),
        })
    }

    /// Resolves the instance identity, fetching only what `overrides` lacks.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Provider`] when a missing field cannot be
    /// fetched.
    pub async fn resolve(
        &self,
        overrides: MetadataOverrides,
    ) -> Result<InstanceMetadata, CloudError> {
        let project = match overrides.project {
            Some(value) => value,
            None => self.project_id().await?,
        };
        let zone = match overrides.zone {
            Some(value) => value,
            None => self.zone().await?,
        };
        let name = match overrides.instance_name {
            Some(value) => value,
            None => self.instance_name().await?,
        };
        let machine_type = match overrides.machine_type {
            Some(value) => value,
            None => self.machine_type().await?,
        };
        debug!(%project, %zone, %name, %machine_type, "resolved instance metadata");
        Ok(InstanceMetadata {
            project,
            zone,
            name,
            machine_type,
        })
    }
}
