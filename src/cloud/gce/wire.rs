//! Compute Engine v1 JSON payloads and error classification.

use serde::{Deserialize, Deserializer, Serialize};

use crate::cloud::{
    AttachMode, AttachedDisk, CloudError, CloudOperation, CloudSnapshot, Disk, Instance,
    OperationScope, last_segment,
};

const OPERATION_DONE: &str = "DONE";

/// Compute encodes int64 fields as JSON strings.
fn de_int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiDisk {
    name: String,
    #[serde(deserialize_with = "de_int64")]
    size_gb: u64,
    #[serde(rename = "type", default)]
    disk_type: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    self_link: String,
    #[serde(default)]
    kind: String,
}

impl From<ApiDisk> for Disk {
    fn from(value: ApiDisk) -> Self {
        Self {
            zone: last_segment(&value.zone).to_owned(),
            name: value.name,
            size_gb: value.size_gb,
            disk_type: value.disk_type,
            self_link: value.self_link,
            kind: value.kind,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InsertDiskBody<'a> {
    pub(super) name: &'a str,
    pub(super) size_gb: String,
    #[serde(rename = "type")]
    pub(super) disk_type: String,
    pub(super) description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) disk_encryption_key: Option<DiskEncryptionKey<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DiskEncryptionKey<'a> {
    pub(super) kms_key_name: &'a str,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiAttachedDisk {
    #[serde(default)]
    device_name: String,
    mode: AttachMode,
    #[serde(default)]
    source: String,
    #[serde(default)]
    kind: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    attach_type: String,
}

impl ApiAttachedDisk {
    pub(super) fn persistent(disk: &AttachedDisk) -> Self {
        Self {
            device_name: disk.device_name.clone(),
            mode: disk.mode,
            source: disk.source.clone(),
            kind: disk.kind.clone(),
            attach_type: String::from("PERSISTENT"),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct ApiInstance {
    name: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    disks: Vec<ApiAttachedDisk>,
}

impl From<ApiInstance> for Instance {
    fn from(value: ApiInstance) -> Self {
        Self {
            zone: last_segment(&value.zone).to_owned(),
            name: value.name,
            disks: value
                .disks
                .into_iter()
                .map(|disk| AttachedDisk {
                    device_name: disk.device_name,
                    mode: disk.mode,
                    source: disk.source,
                    kind: disk.kind,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct CreateSnapshotBody<'a> {
    pub(super) name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApiSnapshot {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    creation_timestamp: String,
    #[serde(default)]
    source_disk: String,
}

impl From<ApiSnapshot> for CloudSnapshot {
    fn from(value: ApiSnapshot) -> Self {
        Self {
            name: value.name,
            status: value.status,
            creation_timestamp: value.creation_timestamp,
            source_disk: value.source_disk,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiOperationErrors {
    #[serde(default)]
    errors: Vec<ApiOperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiOperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiOperation {
    name: String,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<ApiOperationErrors>,
}

impl ApiOperation {
    /// Handle for later polling; zonal when the payload names a zone.
    pub(super) fn handle(&self) -> CloudOperation {
        CloudOperation {
            name: self.name.clone(),
            scope: self
                .zone
                .as_deref()
                .filter(|zone| !zone.is_empty())
                .map_or(OperationScope::Global, |zone| {
                    OperationScope::Zonal(last_segment(zone).to_owned())
                }),
        }
    }

    pub(super) fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }

    /// Outcome of a finished operation.
    pub(super) fn outcome(&self, resource: &str) -> Result<(), CloudError> {
        let Some(first) = self
            .error
            .as_ref()
            .and_then(|error| error.errors.first())
        else {
            return Ok(());
        };
        let target = resource.to_owned();
        Err(match first.code.as_str() {
            "RESOURCE_ALREADY_EXISTS" | "ALREADY_EXISTS" => {
                CloudError::AlreadyExists { resource: target }
            }
            "RESOURCE_NOT_FOUND" | "NOT_FOUND" => CloudError::NotFound { resource: target },
            "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE" => CloudError::InUse {
                resource: target,
                message: first.message.clone(),
            },
            code => CloudError::OperationFailed {
                operation: self.name.clone(),
                message: format!("{code}: {}", first.message),
            },
        })
    }
}

#[derive(Default, Deserialize)]
struct ApiErrorEnvelope {
    #[serde(default)]
    error: ApiErrorBody,
}

#[derive(Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

/// Maps a non-success HTTP response onto [`CloudError`].
pub(super) fn classify_api_error(status: u16, body: &str, resource: &str) -> CloudError {
    let envelope: ApiErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let message = if envelope.error.message.is_empty() {
        body.trim().to_owned()
    } else {
        envelope.error.message
    };
    let target = resource.to_owned();
    let reason = envelope
        .error
        .errors
        .first()
        .map(|item| item.reason.as_str());
    match (reason, status) {
        (Some("notFound"), _) | (None, 404) => CloudError::NotFound { resource: target },
        (Some("alreadyExists"), _) | (None, 409) => CloudError::AlreadyExists { resource: target },
        (Some("resourceInUseByAnotherResource"), _) => CloudError::InUse {
            resource: target,
            message,
        },
        (_, 401 | 403) => CloudError::Auth { message },
        _ => CloudError::Provider {
            message: format!("{status} for {target}: {message}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(404, r#"{"error":{"code":404,"message":"gone","errors":[{"reason":"notFound"}]}}"#)]
    #[case(404, "not json")]
    fn not_found_reason_maps_to_not_found(#[case] status: u16, #[case] body: &str) {
        assert!(classify_api_error(status, body, "disk z/d").is_not_found());
    }

    #[test]
    fn in_use_reason_keeps_message() {
        let body = r#"{"error":{"code":400,"message":"attached to vm-1","errors":[{"reason":"resourceInUseByAnotherResource"}]}}"#;
        assert_eq!(
            classify_api_error(400, body, "disk z/d"),
            CloudError::InUse {
                resource: String::from("disk z/d"),
                message: String::from("attached to vm-1"),
            }
        );
    }

    #[test]
    fn conflict_reason_maps_to_already_exists() {
        let body = r#"{"error":{"errors":[{"reason":"alreadyExists"}]}}"#;
        assert!(classify_api_error(409, body, "disk z/d").is_already_exists());
    }

    #[test]
    fn unknown_failure_is_provider_error() {
        let err = classify_api_error(500, r#"{"error":{"message":"backend"}}"#, "disk z/d");
        assert!(matches!(err, CloudError::Provider { .. }));
    }

    #[test]
    fn disk_size_accepts_string_encoding() {
        let json = r#"{"name":"d1","sizeGb":"20","type":"https://x/zones/z/diskTypes/pd-ssd","zone":"https://x/zones/zone-a"}"#;
        let disk: Disk = serde_json::from_str::<ApiDisk>(json)
            .map(Disk::from)
            .unwrap_or_else(|err| panic!("decode: {err}"));
        assert_eq!(disk.size_gb, 20);
        assert_eq!(disk.zone, "zone-a");
        assert_eq!(disk.type_name(), "pd-ssd");
    }

    #[test]
    fn zonal_operation_handle_carries_zone() {
        let json = r#"{"name":"op-1","zone":"https://x/projects/p/zones/zone-a","status":"RUNNING"}"#;
        let op: ApiOperation =
            serde_json::from_str(json).unwrap_or_else(|err| panic!("decode: {err}"));
        assert!(!op.is_done());
        assert_eq!(op.handle(), CloudOperation::zonal("op-1", "zone-a"));
    }

    #[rstest]
    #[case("RESOURCE_ALREADY_EXISTS", true)]
    #[case("QUOTA_EXCEEDED", false)]
    fn finished_operation_errors_are_classified(#[case] code: &str, #[case] exists: bool) {
        let json = format!(
            r#"{{"name":"op-2","status":"DONE","error":{{"errors":[{{"code":"{code}","message":"m"}}]}}}}"#
        );
        let op: ApiOperation =
            serde_json::from_str(&json).unwrap_or_else(|err| panic!("decode: {err}"));
        assert_eq!(op.handle(), CloudOperation::global("op-2"));
        let err = op
            .outcome("disk z/d")
            .err()
            .unwrap_or_else(|| panic!("expected failure"));
        assert_eq!(err.is_already_exists(), exists);
    }
}
