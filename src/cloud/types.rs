//! Cloud resource records exchanged with [`super::CloudDisks`].

use serde::{Deserialize, Serialize};

use crate::capacity::gib_to_bytes;

/// Disk type used when no `type` parameter is supplied.
pub const DEFAULT_DISK_TYPE: &str = "pd-standard";

/// A zonal persistent disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Disk {
    /// Disk name.
    pub name: String,
    /// Provisioned size in GiB.
    pub size_gb: u64,
    /// Disk type name or URI.
    pub disk_type: String,
    /// Zone the disk lives in.
    pub zone: String,
    /// Canonical resource URI, used as the attach source.
    pub self_link: String,
    /// Resource kind reported by the provider.
    pub kind: String,
}

impl Disk {
    /// Disk type without any URI prefix.
    #[must_use]
    pub fn type_name(&self) -> &str {
        last_segment(&self.disk_type)
    }

    /// Provisioned size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        gib_to_bytes(self.size_gb)
    }

    /// Checks that an existing disk satisfies a create request.
    ///
    /// Bounds of `0` are ignored.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch.
    pub fn check_compatible(
        &self,
        disk_type: &str,
        required_bytes: u64,
        limit_bytes: u64,
    ) -> Result<(), String> {
        let size = self.size_bytes();
        if (required_bytes > 0 && size < required_bytes) || (limit_bytes > 0 && size > limit_bytes)
        {
            return Err(format!(
                "disk already exists with incompatible capacity. Need {required_bytes} (required) <= {size} (existing) <= {limit_bytes} (limit)"
            ));
        }
        if self.type_name().trim() != disk_type {
            return Err(format!(
                "disk already exists with incompatible type. Need {disk_type}, got {}",
                self.type_name()
            ));
        }
        Ok(())
    }
}

/// Parameters for a new disk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskSpec {
    /// Disk name.
    pub name: String,
    /// Size in GiB.
    pub size_gb: u64,
    /// Disk type name, e.g. `pd-ssd`.
    pub disk_type: String,
    /// Free-form description stored with the disk.
    pub description: String,
    /// Customer-managed encryption key, if any.
    pub kms_key: Option<String>,
}

/// Attachment mode of a disk on an instance.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachMode {
    /// Read-write.
    ReadWrite,
    /// Read-only.
    ReadOnly,
}

impl AttachMode {
    /// Mode matching a publish request's `readonly` flag.
    #[must_use]
    pub const fn from_readonly(readonly: bool) -> Self {
        if readonly { Self::ReadOnly } else { Self::ReadWrite }
    }

    /// Provider spelling of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "READ_WRITE",
            Self::ReadOnly => "READ_ONLY",
        }
    }
}

/// A disk as attached to an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AttachedDisk {
    /// Name the guest sees the disk under.
    pub device_name: String,
    /// Attachment mode.
    pub mode: AttachMode,
    /// URI of the attached disk.
    pub source: String,
    /// Resource kind reported by the provider.
    pub kind: String,
}

/// A virtual machine instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Zone the instance runs in.
    pub zone: String,
    /// Currently attached disks.
    pub disks: Vec<AttachedDisk>,
}

impl Instance {
    /// Returns the attachment with `device_name`, if any.
    #[must_use]
    pub fn attached(&self, device_name: &str) -> Option<&AttachedDisk> {
        self.disks
            .iter()
            .find(|disk| disk.device_name == device_name)
    }
}

/// A global disk snapshot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudSnapshot {
    /// Snapshot name.
    pub name: String,
    /// Provider status, e.g. `READY` or `UPLOADING`.
    pub status: String,
    /// RFC 3339 creation time.
    pub creation_timestamp: String,
    /// URI of the source disk.
    pub source_disk: String,
}

/// Where an asynchronous operation is tracked.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OperationScope {
    /// Zonal operation in the named zone.
    Zonal(String),
    /// Global operation.
    Global,
}

/// Handle to an asynchronous provider operation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudOperation {
    /// Operation name.
    pub name: String,
    /// Scope the operation is tracked in.
    pub scope: OperationScope,
}

impl CloudOperation {
    /// Operation tracked in `zone`.
    #[must_use]
    pub fn zonal(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: OperationScope::Zonal(zone.into()),
        }
    }

    /// Globally tracked operation.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: OperationScope::Global,
        }
    }
}

/// Last `/`-separated segment of a resource URI.
#[must_use]
pub fn last_segment(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::capacity::GIB;

    fn disk(size_gb: u64, disk_type: &str) -> Disk {
        Disk {
            name: String::from("d1"),
            size_gb,
            disk_type: disk_type.to_owned(),
            ..Disk::default()
        }
    }

    #[rstest]
    #[case(10, "pd-standard", 10 * GIB, 0)]
    #[case(10, "projects/p/zones/z/diskTypes/pd-standard", 5 * GIB, 20 * GIB)]
    #[case(5, "pd-standard", 0, 0)]
    fn compatible_disks_pass(
        #[case] size_gb: u64,
        #[case] disk_type: &str,
        #[case] required: u64,
        #[case] limit: u64,
    ) {
        assert_eq!(
            disk(size_gb, disk_type).check_compatible("pd-standard", required, limit),
            Ok(())
        );
    }

    #[rstest]
    #[case(10, "pd-standard", "pd-standard", 20 * GIB, 0)]
    #[case(10, "pd-standard", "pd-standard", 0, 5 * GIB)]
    #[case(10, "pd-ssd", "pd-standard", 0, 0)]
    fn incompatible_disks_fail(
        #[case] size_gb: u64,
        #[case] existing_type: &str,
        #[case] wanted_type: &str,
        #[case] required: u64,
        #[case] limit: u64,
    ) {
        assert!(
            disk(size_gb, existing_type)
                .check_compatible(wanted_type, required, limit)
                .is_err()
        );
    }

    #[test]
    fn attach_mode_follows_readonly_flag() {
        assert_eq!(AttachMode::from_readonly(true).as_str(), "READ_ONLY");
        assert_eq!(AttachMode::from_readonly(false).as_str(), "READ_WRITE");
    }

    #[test]
    fn last_segment_strips_uri_prefix() {
        assert_eq!(last_segment("projects/p/zones/us-east1-b"), "us-east1-b");
        assert_eq!(last_segment("plain"), "plain");
    }
}
