//! Snapshot operations.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, instrument, warn};

use super::{ControllerService, internal};
use crate::cloud::CloudSnapshot;
use crate::error::CsiError;
use crate::types::{
    CreateSnapshotRequest, DeleteSnapshotRequest, ListSnapshotsRequest, ListSnapshotsResponse,
    Snapshot, SnapshotStatus,
};
use crate::volume_id::VolumeKey;

/// Maps a provider snapshot status onto the protocol status.
///
/// `DELETING` is reported as ready: the snapshot was complete before its
/// deletion started.
#[must_use]
pub fn snapshot_status(provider_status: &str) -> SnapshotStatus {
    match provider_status {
        "READY" | "DELETING" => SnapshotStatus::Ready,
        "UPLOADING" => SnapshotStatus::Uploading,
        "FAILED" => SnapshotStatus::ErrorUploading,
        _ => SnapshotStatus::Unknown,
    }
}

fn created_at_nanos(timestamp: &str) -> Result<i128, time::error::Parse> {
    OffsetDateTime::parse(timestamp, &Rfc3339).map(OffsetDateTime::unix_timestamp_nanos)
}

/// Rebuilds `zone/name` from a `.../zones/<zone>/disks/<name>` URI.
fn volume_id_from_source_disk(uri: &str) -> Option<String> {
    let tail: Vec<&str> = uri.rsplit('/').take(4).collect();
    match tail.as_slice() {
        [name, "disks", zone, "zones"] if !name.is_empty() && !zone.is_empty() => {
            Some(VolumeKey::new(*zone, *name).encode())
        }
        _ => None,
    }
}

fn to_snapshot(record: &CloudSnapshot, source_volume_id: String) -> Result<Snapshot, CsiError> {
    let created = created_at_nanos(&record.creation_timestamp).map_err(|err| {
        CsiError::Internal(format!(
            "snapshot {} has unparsable creation time {:?}: {err}",
            record.name, record.creation_timestamp
        ))
    })?;
    Ok(Snapshot {
        snapshot_id: record.name.clone(),
        source_volume_id,
        created_at_nanos: created,
        status: snapshot_status(&record.status),
    })
}

impl ControllerService {
    /// Snapshots the source volume's disk and waits for the record.
    ///
    /// A snapshot that already exists under the name is reused.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for missing or malformed input, `Internal` for
    /// cloud failures and unparsable creation times.
    #[instrument(skip(self, request), fields(name = %request.name, source = %request.source_volume_id))]
    pub async fn create_snapshot(&self, request: &CreateSnapshotRequest) -> Result<Snapshot, CsiError> {
        const OP: &str = "CreateSnapshot";
        if request.name.is_empty() {
            return Err(CsiError::missing(OP, "Name"));
        }
        if request.source_volume_id.is_empty() {
            return Err(CsiError::missing(OP, "Source Volume ID"));
        }
        let key = VolumeKey::decode(&request.source_volume_id).map_err(CsiError::invalid)?;

        let started = match self
            .cloud
            .create_snapshot(&key.zone, &key.name, &request.name)
            .await
        {
            Ok(operation) => Some(operation),
            Err(err) if err.is_already_exists() => {
                warn!(snapshot = %request.name, "snapshot already exists, reusing");
                None
            }
            Err(err) => return Err(internal("unknown create snapshot error", &err)),
        };
        if let Some(operation) = started {
            debug!(operation = %operation.name, "snapshot operation started");
        }

        let record = self
            .cloud
            .wait_and_get_snapshot(&request.name)
            .await
            .map_err(|err| internal("unknown create snapshot operation error", &err))?;
        let snapshot = to_snapshot(&record, request.source_volume_id.clone())?;
        info!(snapshot = %snapshot.snapshot_id, status = ?snapshot.status, "snapshot created");
        Ok(snapshot)
    }

    /// Deletes a snapshot. A missing snapshot counts as deleted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty id, `FailedPrecondition` when the
    /// snapshot is in use, `Internal` otherwise.
    #[instrument(skip(self, request), fields(snapshot_id = %request.snapshot_id))]
    pub async fn delete_snapshot(&self, request: &DeleteSnapshotRequest) -> Result<(), CsiError> {
        if request.snapshot_id.is_empty() {
            return Err(CsiError::missing("DeleteSnapshot", "Snapshot ID"));
        }
        let operation = match self.cloud.delete_snapshot(&request.snapshot_id).await {
            Ok(operation) => operation,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) if err.is_in_use() => {
                return Err(CsiError::FailedPrecondition(format!("Snapshot in use: {err}")));
            }
            Err(err) => return Err(internal("unknown delete snapshot error", &err)),
        };
        self.cloud
            .wait_for_operation(&operation)
            .await
            .map_err(|err| internal("unknown delete snapshot operation error", &err))?;
        info!("snapshot deleted");
        Ok(())
    }

    /// Looks up a single snapshot by id.
    ///
    /// # Errors
    ///
    /// `Unimplemented` without a snapshot id, `Internal` for cloud failures
    /// other than a missing snapshot.
    #[instrument(skip(self, request))]
    pub async fn list_snapshots(
        &self,
        request: &ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse, CsiError> {
        let Some(snapshot_id) = request.snapshot_id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(CsiError::Unimplemented(String::from(
                "ListSnapshots without a snapshot id",
            )));
        };
        let record = match self.cloud.get_snapshot(snapshot_id).await {
            Ok(record) => record,
            Err(err) if err.is_not_found() => return Ok(ListSnapshotsResponse::default()),
            Err(err) => return Err(internal("unknown get snapshot error", &err)),
        };
        let source = volume_id_from_source_disk(&record.source_disk).unwrap_or_default();
        Ok(ListSnapshotsResponse {
            entries: vec![to_snapshot(&record, source)?],
        })
    }
}

#[cfg(test)]
mod unit {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("READY", SnapshotStatus::Ready)]
    #[case("UPLOADING", SnapshotStatus::Uploading)]
    #[case("FAILED", SnapshotStatus::ErrorUploading)]
    #[case("DELETING", SnapshotStatus::Ready)]
    #[case("CREATING", SnapshotStatus::Unknown)]
    #[case("", SnapshotStatus::Unknown)]
    fn provider_status_maps(#[case] provider: &str, #[case] expected: SnapshotStatus) {
        assert_eq!(snapshot_status(provider), expected);
    }

    #[test]
    fn creation_time_parses_to_unix_nanos() {
        assert_eq!(
            created_at_nanos("1970-01-01T00:00:01.5Z").ok(),
            Some(1_500_000_000)
        );
        assert!(created_at_nanos("yesterday").is_err());
    }

    #[rstest]
    #[case("https://compute/v1/projects/p/zones/us-east1-b/disks/d1", Some("us-east1-b/d1"))]
    #[case("projects/p/zones/z/disks/n", Some("z/n"))]
    #[case("projects/p/regions/r/disks/n", None)]
    #[case("", None)]
    fn source_disk_uri_becomes_volume_id(#[case] uri: &str, #[case] expected: Option<&str>) {
        assert_eq!(volume_id_from_source_disk(uri).as_deref(), expected);
    }
}
