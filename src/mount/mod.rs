//! Node-local mount execution.
//!
//! The node service drives the host's mount table through [`Mounter`].
//! Two variants exist: [`LinuxMounter`] issues the syscalls and helper
//! commands directly, [`ProxyMounter`] forwards every call to a privileged
//! side-process over a Unix socket. The variant is picked at startup from
//! configuration.

mod linux;
pub mod proxy;

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use linux::{LinuxMounter, MountEntry, parse_mounts};
pub use proxy::{ProxyMounter, ProxyServer};

/// Directory holding stable device symlinks.
pub const DISK_BY_ID_DIR: &str = "/dev/disk/by-id";

/// Errors raised by [`Mounter`] implementations.
#[derive(Clone, Debug, Deserialize, Error, Eq, PartialEq, Serialize)]
pub enum MountError {
    /// The path does not exist.
    #[error("path {path} does not exist")]
    Missing {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A filesystem operation failed.
    #[error("{operation} on {path} failed: {message}")]
    Io {
        /// Operation attempted, e.g. `mkdir`.
        operation: String,
        /// Path operated on.
        path: Utf8PathBuf,
        /// Underlying error.
        message: String,
    },
    /// A helper command failed or could not be run.
    #[error("{program} failed: {message}")]
    Command {
        /// Program name.
        program: String,
        /// Exit status and captured output.
        message: String,
    },
    /// No candidate device path exists.
    #[error("no device found among {candidates:?}")]
    DeviceNotFound {
        /// Paths that were probed.
        candidates: Vec<Utf8PathBuf>,
    },
    /// Candidate paths resolve to different devices.
    #[error("candidate paths {candidates:?} resolve to more than one device")]
    AmbiguousDevice {
        /// Paths that were probed.
        candidates: Vec<Utf8PathBuf>,
    },
    /// A path remained mounted after being unmounted.
    #[error("{path} is still mounted after unmount")]
    StillMounted {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The device holds data the driver refuses to format over.
    #[error("device {device} is not safe to format: {reason}")]
    UnsafeFormat {
        /// Device path.
        device: Utf8PathBuf,
        /// Why formatting was refused.
        reason: String,
    },
    /// The filesystem type is not supported for the operation.
    #[error("unsupported filesystem {fs_type:?} for {operation}")]
    UnsupportedFilesystem {
        /// Filesystem type detected or requested.
        fs_type: String,
        /// Operation attempted.
        operation: String,
    },
    /// The mount proxy could not be reached or answered unexpectedly.
    #[error("mount proxy error: {message}")]
    Proxy {
        /// Transport or protocol failure.
        message: String,
    },
}

impl MountError {
    pub(crate) fn io(operation: &str, path: &Utf8Path, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::Missing {
                path: path.to_owned(),
            };
        }
        Self::Io {
            operation: operation.to_owned(),
            path: path.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Filesystem usage of a mounted volume.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeStats {
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
    /// Total bytes.
    pub total_bytes: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Total inodes.
    pub total_inodes: u64,
    /// Free inodes.
    pub free_inodes: u64,
    /// Inodes in use.
    pub used_inodes: u64,
}

/// Future returned by mount operations.
pub type MountFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MountError>> + Send + 'a>>;

/// Mount, format and probe operations on the host.
pub trait Mounter: Send + Sync {
    /// Whether `path` is a mount point. A missing path is not one.
    fn is_mount_point<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, bool>;

    /// Creates `path` and its parents.
    fn make_dir<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()>;

    /// Creates an empty file at `path`, keeping an existing one.
    fn make_file<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()>;

    /// Removes a file or empty directory. Absence is not an error.
    fn remove_path<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()>;

    /// Mounts `source` at `target`.
    fn mount<'a>(
        &'a self,
        source: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()>;

    /// Unmounts `target`.
    fn unmount<'a>(&'a self, target: &'a Utf8Path) -> MountFuture<'a, ()>;

    /// Formats `device` when it carries no filesystem, then mounts it.
    fn format_and_mount<'a>(
        &'a self,
        device: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()>;

    /// Grows the filesystem on `device` mounted at `mount_path`.
    fn resize<'a>(&'a self, device: &'a Utf8Path, mount_path: &'a Utf8Path)
    -> MountFuture<'a, ()>;

    /// Size of the block device in bytes.
    fn block_size_bytes<'a>(&'a self, device: &'a Utf8Path) -> MountFuture<'a, u64>;

    /// Filesystem usage at `path`.
    fn volume_stats<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, VolumeStats>;

    /// Candidate device paths for an attached disk.
    fn disk_by_id_paths(&self, device_name: &str, partition: &str) -> Vec<Utf8PathBuf> {
        disk_by_id_candidates(Utf8Path::new(DISK_BY_ID_DIR), device_name, partition)
    }

    /// Returns the candidate that exists, requiring all existing candidates
    /// to resolve to the same device.
    fn verify_device_path<'a>(
        &'a self,
        candidates: &'a [Utf8PathBuf],
    ) -> MountFuture<'a, Utf8PathBuf>;
}

/// Device symlinks under `by_id_dir` that may name an attached persistent
/// disk, optionally narrowed to a partition.
#[must_use]
pub fn disk_by_id_candidates(
    by_id_dir: &Utf8Path,
    device_name: &str,
    partition: &str,
) -> Vec<Utf8PathBuf> {
    let suffix = if partition.is_empty() {
        String::new()
    } else {
        format!("-part{partition}")
    };
    vec![
        by_id_dir.join(format!("google-{device_name}{suffix}")),
        by_id_dir.join(format!("scsi-0Google_PersistentDisk_{device_name}{suffix}")),
    ]
}

/// Unmounts `path` if mounted, then removes it.
///
/// A path that is already gone counts as cleaned up.
///
/// # Errors
///
/// Returns [`MountError::StillMounted`] when the path is still a mount point
/// after unmounting, or the underlying error of any failed step.
pub async fn cleanup_mount_point(mounter: &dyn Mounter, path: &Utf8Path) -> Result<(), MountError> {
    if mounter.is_mount_point(path).await? {
        mounter.unmount(path).await?;
        if mounter.is_mount_point(path).await? {
            warn!(%path, "path still mounted after unmount");
            return Err(MountError::StillMounted {
                path: path.to_owned(),
            });
        }
    }
    match mounter.remove_path(path).await {
        Ok(()) | Err(MountError::Missing { .. }) => {
            debug!(%path, "mount point cleaned up");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_both_naming_schemes() {
        let paths = disk_by_id_candidates(Utf8Path::new("/dev/disk/by-id"), "pvc-1", "");
        assert_eq!(
            paths,
            vec![
                Utf8PathBuf::from("/dev/disk/by-id/google-pvc-1"),
                Utf8PathBuf::from("/dev/disk/by-id/scsi-0Google_PersistentDisk_pvc-1"),
            ]
        );
    }

    #[test]
    fn candidates_carry_partition_suffix() {
        let paths = disk_by_id_candidates(Utf8Path::new("/dev/disk/by-id"), "d", "3");
        assert!(paths.iter().all(|path| path.as_str().ends_with("d-part3")));
    }

    #[test]
    fn missing_io_error_maps_to_missing() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            MountError::io("stat", Utf8Path::new("/x"), &err),
            MountError::Missing {
                path: Utf8PathBuf::from("/x")
            }
        );
    }
}
