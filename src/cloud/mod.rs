//! Cloud disk client boundary.
//!
//! The controller talks to the cloud exclusively through [`CloudDisks`].
//! [`GceCloud`] implements it against the Compute Engine REST API; tests use
//! the in-memory double in [`crate::test_support`].

mod error;
pub mod gce;
pub mod metadata;
mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::CloudError;
pub use gce::GceCloud;
pub use metadata::{InstanceMetadata, MetadataClient};
pub use types::{
    AttachMode, AttachedDisk, CloudOperation, CloudSnapshot, DEFAULT_DISK_TYPE, Disk, DiskSpec,
    Instance, OperationScope, last_segment,
};

/// Future returned by cloud operations.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Disk, instance and snapshot operations used by the controller.
///
/// Mutating calls return a [`CloudOperation`] that must be passed to
/// [`CloudDisks::wait_for_operation`] before the change is observable.
pub trait CloudDisks: Send + Sync {
    /// Zone the controller itself runs in.
    fn default_zone(&self) -> &str;

    /// Fetches a disk.
    fn get_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Disk>;

    /// Starts creating a disk.
    fn insert_disk<'a>(&'a self, zone: &'a str, spec: &'a DiskSpec)
    -> CloudFuture<'a, CloudOperation>;

    /// Starts deleting a disk.
    fn delete_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, CloudOperation>;

    /// Fetches an instance with its attached disks.
    fn get_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Instance>;

    /// Starts attaching a disk to an instance.
    fn attach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        disk: &'a AttachedDisk,
    ) -> CloudFuture<'a, CloudOperation>;

    /// Starts detaching the disk with `device_name` from an instance.
    fn detach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        device_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation>;

    /// Blocks until `operation` reaches a terminal state.
    fn wait_for_operation<'a>(&'a self, operation: &'a CloudOperation) -> CloudFuture<'a, ()>;

    /// Blocks until the instance reports the disk as attached.
    fn wait_for_attach<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        instance: &'a str,
    ) -> CloudFuture<'a, ()>;

    /// Starts snapshotting a disk.
    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        snapshot_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation>;

    /// Fetches a snapshot.
    fn get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot>;

    /// Blocks until the snapshot record is retrievable and returns it.
    fn wait_and_get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot>;

    /// Starts deleting a snapshot.
    fn delete_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudOperation>;
}
