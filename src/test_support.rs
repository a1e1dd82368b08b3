//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] and [`FakeMounter`] are in-memory doubles for the two
//! external collaborators. Both record every call, accept one-shot failure
//! injection per method, and can park a method on a [`Gate`] so tests can
//! hold an operation in flight while issuing a second one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, Notify};

use crate::cloud::{
    AttachedDisk, CloudDisks, CloudError, CloudFuture, CloudOperation, CloudSnapshot, Disk,
    DiskSpec, Instance,
};
use crate::mount::{DISK_BY_ID_DIR, MountError, MountFuture, Mounter, VolumeStats};

/// Project name used in fake resource URIs.
pub const FAKE_PROJECT: &str = "test-project";

/// Creation timestamp reported for fake snapshots.
pub const FAKE_SNAPSHOT_TIMESTAMP: &str = "2024-01-02T03:04:05Z";

/// Rendezvous between a parked call and the test driving it.
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Waits until the parked call has been entered.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the parked call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn park(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Debug, Default)]
struct Hooks {
    calls: Vec<String>,
    failures: HashMap<String, CloudOrMount>,
    gates: HashMap<String, Arc<Gate>>,
}

#[derive(Debug)]
enum CloudOrMount {
    Cloud(CloudError),
    Mount(MountError),
}

impl Hooks {
    fn record(&mut self, method: &str, detail: &str) -> (Option<CloudOrMount>, Option<Arc<Gate>>) {
        self.calls.push(format!("{method} {detail}"));
        (self.failures.remove(method), self.gates.remove(method))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Cloud
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CloudState {
    hooks: Hooks,
    disks: BTreeMap<(String, String), Disk>,
    instances: BTreeMap<(String, String), Instance>,
    snapshots: BTreeMap<String, CloudSnapshot>,
    busy: BTreeSet<String>,
    next_operation: u64,
}

impl CloudState {
    fn operation(&mut self, zone: Option<&str>) -> CloudOperation {
        self.next_operation += 1;
        let name = format!("operation-{}", self.next_operation);
        match zone {
            Some(zone) => CloudOperation::zonal(name, zone),
            None => CloudOperation::global(name),
        }
    }
}

/// In-memory [`CloudDisks`] implementation.
///
/// Mutations take effect immediately; `wait_for_operation` only reports
/// injected failures.
#[derive(Clone, Debug)]
pub struct FakeCloud {
    default_zone: String,
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an empty cloud whose controller runs in `default_zone`.
    #[must_use]
    pub fn new(default_zone: impl Into<String>) -> Self {
        Self {
            default_zone: default_zone.into(),
            state: Arc::new(Mutex::new(CloudState::default())),
        }
    }

    /// Seeds a disk.
    pub fn add_disk(&self, zone: &str, name: &str, size_gb: u64, disk_type: &str) {
        let disk = fake_disk(zone, name, size_gb, disk_type);
        lock(&self.state)
            .disks
            .insert((zone.to_owned(), name.to_owned()), disk);
    }

    /// Seeds an instance with no disks attached.
    pub fn add_instance(&self, zone: &str, name: &str) {
        let instance = Instance {
            name: name.to_owned(),
            zone: zone.to_owned(),
            disks: Vec::new(),
        };
        lock(&self.state)
            .instances
            .insert((zone.to_owned(), name.to_owned()), instance);
    }

    /// Seeds a snapshot with the given provider status.
    pub fn add_snapshot(&self, name: &str, status: &str, creation_timestamp: &str) {
        let snapshot = CloudSnapshot {
            name: name.to_owned(),
            status: status.to_owned(),
            creation_timestamp: creation_timestamp.to_owned(),
            source_disk: String::new(),
        };
        lock(&self.state).snapshots.insert(name.to_owned(), snapshot);
    }

    /// Marks a disk or snapshot name as used by another resource.
    pub fn mark_in_use(&self, name: &str) {
        lock(&self.state).busy.insert(name.to_owned());
    }

    /// Makes the next call to `method` fail with `err`.
    pub fn fail_next(&self, method: &str, err: CloudError) {
        lock(&self.state)
            .hooks
            .failures
            .insert(method.to_owned(), CloudOrMount::Cloud(err));
    }

    /// Parks the next call to `method` until the returned gate is released.
    #[must_use]
    pub fn pause_next(&self, method: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        lock(&self.state)
            .hooks
            .gates
            .insert(method.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Calls made so far, as `"<method> <detail>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).hooks.calls.clone()
    }

    /// Number of recorded calls to `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.state)
            .hooks
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    /// Current state of a disk.
    #[must_use]
    pub fn disk(&self, zone: &str, name: &str) -> Option<Disk> {
        lock(&self.state)
            .disks
            .get(&(zone.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Current state of an instance.
    #[must_use]
    pub fn instance(&self, zone: &str, name: &str) -> Option<Instance> {
        lock(&self.state)
            .instances
            .get(&(zone.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Whether a snapshot exists.
    #[must_use]
    pub fn has_snapshot(&self, name: &str) -> bool {
        lock(&self.state).snapshots.contains_key(name)
    }

    /// Records the call and runs any injected failure or gate.
    async fn enter(&self, method: &str, detail: &str) -> Result<(), CloudError> {
        let (failure, gate) = lock(&self.state).hooks.record(method, detail);
        if let Some(gate) = gate {
            gate.park().await;
        }
        match failure {
            Some(CloudOrMount::Cloud(err)) => Err(err),
            Some(CloudOrMount::Mount(err)) => Err(CloudError::Provider {
                message: err.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn fake_disk(zone: &str, name: &str, size_gb: u64, disk_type: &str) -> Disk {
    Disk {
        name: name.to_owned(),
        size_gb,
        disk_type: format!("projects/{FAKE_PROJECT}/zones/{zone}/diskTypes/{disk_type}"),
        zone: zone.to_owned(),
        self_link: format!("projects/{FAKE_PROJECT}/zones/{zone}/disks/{name}"),
        kind: String::from("compute#disk"),
    }
}

fn not_found(kind: &str, path: &str) -> CloudError {
    CloudError::NotFound {
        resource: format!("{kind} {path}"),
    }
}

impl CloudDisks for FakeCloud {
    fn default_zone(&self) -> &str {
        &self.default_zone
    }

    fn get_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Disk> {
        Box::pin(async move {
            self.enter("get_disk", &format!("{zone}/{name}")).await?;
            lock(&self.state)
                .disks
                .get(&(zone.to_owned(), name.to_owned()))
                .cloned()
                .ok_or_else(|| not_found("disk", &format!("{zone}/{name}")))
        })
    }

    fn insert_disk<'a>(
        &'a self,
        zone: &'a str,
        spec: &'a DiskSpec,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter("insert_disk", &format!("{zone}/{}", spec.name))
                .await?;
            let mut state = lock(&self.state);
            let key = (zone.to_owned(), spec.name.clone());
            if state.disks.contains_key(&key) {
                return Err(CloudError::AlreadyExists {
                    resource: format!("disk {zone}/{}", spec.name),
                });
            }
            let disk = fake_disk(zone, &spec.name, spec.size_gb, &spec.disk_type);
            state.disks.insert(key, disk);
            Ok(state.operation(Some(zone)))
        })
    }

    fn delete_disk<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter("delete_disk", &format!("{zone}/{name}")).await?;
            let mut state = lock(&self.state);
            if state.busy.contains(name) {
                return Err(CloudError::InUse {
                    resource: format!("disk {zone}/{name}"),
                    message: String::from("attached to an instance"),
                });
            }
            state
                .disks
                .remove(&(zone.to_owned(), name.to_owned()))
                .ok_or_else(|| not_found("disk", &format!("{zone}/{name}")))?;
            Ok(state.operation(Some(zone)))
        })
    }

    fn get_instance<'a>(&'a self, zone: &'a str, name: &'a str) -> CloudFuture<'a, Instance> {
        Box::pin(async move {
            self.enter("get_instance", &format!("{zone}/{name}"))
                .await?;
            lock(&self.state)
                .instances
                .get(&(zone.to_owned(), name.to_owned()))
                .cloned()
                .ok_or_else(|| not_found("instance", &format!("{zone}/{name}")))
        })
    }

    fn attach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        disk: &'a AttachedDisk,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter(
                "attach_disk",
                &format!("{zone}/{instance} {} {}", disk.device_name, disk.mode.as_str()),
            )
            .await?;
            let mut state = lock(&self.state);
            let target = state
                .instances
                .get_mut(&(zone.to_owned(), instance.to_owned()))
                .ok_or_else(|| not_found("instance", &format!("{zone}/{instance}")))?;
            target
                .disks
                .retain(|attached| attached.device_name != disk.device_name);
            target.disks.push(disk.clone());
            Ok(state.operation(Some(zone)))
        })
    }

    fn detach_disk<'a>(
        &'a self,
        zone: &'a str,
        instance: &'a str,
        device_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter("detach_disk", &format!("{zone}/{instance} {device_name}"))
                .await?;
            let mut state = lock(&self.state);
            let target = state
                .instances
                .get_mut(&(zone.to_owned(), instance.to_owned()))
                .ok_or_else(|| not_found("instance", &format!("{zone}/{instance}")))?;
            target
                .disks
                .retain(|attached| attached.device_name != device_name);
            Ok(state.operation(Some(zone)))
        })
    }

    fn wait_for_operation<'a>(&'a self, operation: &'a CloudOperation) -> CloudFuture<'a, ()> {
        Box::pin(async move { self.enter("wait_for_operation", &operation.name).await })
    }

    fn wait_for_attach<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        instance: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.enter("wait_for_attach", &format!("{zone}/{instance} {disk_name}"))
                .await?;
            let attached = lock(&self.state)
                .instances
                .get(&(zone.to_owned(), instance.to_owned()))
                .is_some_and(|found| found.attached(disk_name).is_some());
            if attached {
                Ok(())
            } else {
                Err(CloudError::Timeout {
                    action: String::from("attach"),
                    resource: format!("disk {zone}/{disk_name}"),
                })
            }
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        zone: &'a str,
        disk_name: &'a str,
        snapshot_name: &'a str,
    ) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter(
                "create_snapshot",
                &format!("{zone}/{disk_name} {snapshot_name}"),
            )
            .await?;
            let mut state = lock(&self.state);
            let source = state
                .disks
                .get(&(zone.to_owned(), disk_name.to_owned()))
                .map(|disk| disk.self_link.clone())
                .ok_or_else(|| not_found("disk", &format!("{zone}/{disk_name}")))?;
            if state.snapshots.contains_key(snapshot_name) {
                return Err(CloudError::AlreadyExists {
                    resource: format!("snapshot {snapshot_name}"),
                });
            }
            state.snapshots.insert(
                snapshot_name.to_owned(),
                CloudSnapshot {
                    name: snapshot_name.to_owned(),
                    status: String::from("READY"),
                    creation_timestamp: FAKE_SNAPSHOT_TIMESTAMP.to_owned(),
                    source_disk: source,
                },
            );
            Ok(state.operation(Some(zone)))
        })
    }

    fn get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot> {
        Box::pin(async move {
            self.enter("get_snapshot", name).await?;
            lock(&self.state)
                .snapshots
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("snapshot", name))
        })
    }

    fn wait_and_get_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudSnapshot> {
        Box::pin(async move {
            self.enter("wait_and_get_snapshot", name).await?;
            lock(&self.state)
                .snapshots
                .get(name)
                .cloned()
                .ok_or_else(|| CloudError::Timeout {
                    action: String::from("snapshot creation"),
                    resource: format!("snapshot {name}"),
                })
        })
    }

    fn delete_snapshot<'a>(&'a self, name: &'a str) -> CloudFuture<'a, CloudOperation> {
        Box::pin(async move {
            self.enter("delete_snapshot", name).await?;
            let mut state = lock(&self.state);
            if state.busy.contains(name) {
                return Err(CloudError::InUse {
                    resource: format!("snapshot {name}"),
                    message: String::from("used by an image"),
                });
            }
            state
                .snapshots
                .remove(name)
                .ok_or_else(|| not_found("snapshot", name))?;
            Ok(state.operation(None))
        })
    }
}

// ---------------------------------------------------------------------------
// Mount
// ---------------------------------------------------------------------------

/// A mount recorded by [`FakeMounter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeMount {
    /// Mounted source.
    pub source: Utf8PathBuf,
    /// Filesystem type passed to the call.
    pub fs_type: String,
    /// Options passed to the call.
    pub options: Vec<String>,
}

#[derive(Debug, Default)]
struct MountState {
    hooks: Hooks,
    mounts: BTreeMap<Utf8PathBuf, FakeMount>,
    dirs: BTreeSet<Utf8PathBuf>,
    files: BTreeSet<Utf8PathBuf>,
    devices: BTreeMap<Utf8PathBuf, u64>,
    formatted: BTreeMap<Utf8PathBuf, String>,
    stats: BTreeMap<Utf8PathBuf, VolumeStats>,
    sticky: BTreeSet<Utf8PathBuf>,
}

impl MountState {
    fn exists(&self, path: &Utf8Path) -> bool {
        self.dirs.contains(path) || self.files.contains(path) || self.mounts.contains_key(path)
    }
}

/// In-memory [`Mounter`] implementation.
#[derive(Clone, Debug, Default)]
pub struct FakeMounter {
    state: Arc<Mutex<MountState>>,
}

impl FakeMounter {
    /// Creates a mounter with no devices and no mounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a disk with `device_name` visible under the by-id directory.
    pub fn add_device(&self, device_name: &str, size_bytes: u64) -> Utf8PathBuf {
        let path = Utf8Path::new(DISK_BY_ID_DIR).join(format!("google-{device_name}"));
        lock(&self.state).devices.insert(path.clone(), size_bytes);
        path
    }

    /// Changes the reported size of a device.
    pub fn set_device_size(&self, device: &Utf8Path, size_bytes: u64) {
        lock(&self.state)
            .devices
            .insert(device.to_owned(), size_bytes);
    }

    /// Seeds an existing directory.
    pub fn add_dir(&self, path: &Utf8Path) {
        lock(&self.state).dirs.insert(path.to_owned());
    }

    /// Seeds filesystem usage for `path`.
    pub fn set_stats(&self, path: &Utf8Path, stats: VolumeStats) {
        lock(&self.state).stats.insert(path.to_owned(), stats);
    }

    /// Keeps `path` mounted even after a successful unmount.
    pub fn make_sticky(&self, path: &Utf8Path) {
        lock(&self.state).sticky.insert(path.to_owned());
    }

    /// Makes the next call to `method` fail with `err`.
    pub fn fail_next(&self, method: &str, err: MountError) {
        lock(&self.state)
            .hooks
            .failures
            .insert(method.to_owned(), CloudOrMount::Mount(err));
    }

    /// Parks the next call to `method` until the returned gate is released.
    #[must_use]
    pub fn pause_next(&self, method: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        lock(&self.state)
            .hooks
            .gates
            .insert(method.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Calls made so far, as `"<method> <detail>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).hooks.calls.clone()
    }

    /// Whether `path` is mounted.
    #[must_use]
    pub fn is_mounted(&self, path: &Utf8Path) -> bool {
        lock(&self.state).mounts.contains_key(path)
    }

    /// The mount at `path`, if any.
    #[must_use]
    pub fn mount_at(&self, path: &Utf8Path) -> Option<FakeMount> {
        lock(&self.state).mounts.get(path).cloned()
    }

    /// Whether `path` exists as a directory, file or mount point.
    #[must_use]
    pub fn exists(&self, path: &Utf8Path) -> bool {
        lock(&self.state).exists(path)
    }

    /// Filesystem written to `device`, if any.
    #[must_use]
    pub fn formatted_as(&self, device: &Utf8Path) -> Option<String> {
        lock(&self.state).formatted.get(device).cloned()
    }

    async fn enter(&self, method: &str, detail: &str) -> Result<(), MountError> {
        let (failure, gate) = lock(&self.state).hooks.record(method, detail);
        if let Some(gate) = gate {
            gate.park().await;
        }
        match failure {
            Some(CloudOrMount::Mount(err)) => Err(err),
            Some(CloudOrMount::Cloud(err)) => Err(MountError::Proxy {
                message: err.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn attach_mount(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mut state = lock(&self.state);
        if !state.exists(target) {
            return Err(MountError::Missing {
                path: target.to_owned(),
            });
        }
        state.mounts.insert(
            target.to_owned(),
            FakeMount {
                source: source.to_owned(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            },
        );
        Ok(())
    }
}

impl Mounter for FakeMounter {
    fn is_mount_point<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, bool> {
        Box::pin(async move {
            self.enter("is_mount_point", path.as_str()).await?;
            Ok(self.is_mounted(path))
        })
    }

    fn make_dir<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("make_dir", path.as_str()).await?;
            lock(&self.state).dirs.insert(path.to_owned());
            Ok(())
        })
    }

    fn make_file<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("make_file", path.as_str()).await?;
            lock(&self.state).files.insert(path.to_owned());
            Ok(())
        })
    }

    fn remove_path<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("remove_path", path.as_str()).await?;
            let mut state = lock(&self.state);
            if state.mounts.contains_key(path) {
                return Err(MountError::Io {
                    operation: String::from("remove"),
                    path: path.to_owned(),
                    message: String::from("device or resource busy"),
                });
            }
            state.dirs.remove(path);
            state.files.remove(path);
            Ok(())
        })
    }

    fn mount<'a>(
        &'a self,
        source: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("mount", &format!("{source} {target}")).await?;
            self.attach_mount(source, target, fs_type, options)
        })
    }

    fn unmount<'a>(&'a self, target: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("unmount", target.as_str()).await?;
            let mut state = lock(&self.state);
            if !state.mounts.contains_key(target) {
                return Err(MountError::Io {
                    operation: String::from("umount"),
                    path: target.to_owned(),
                    message: String::from("not mounted"),
                });
            }
            if !state.sticky.contains(target) {
                state.mounts.remove(target);
            }
            Ok(())
        })
    }

    fn format_and_mount<'a>(
        &'a self,
        device: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("format_and_mount", &format!("{device} {target} {fs_type}"))
                .await?;
            {
                let mut state = lock(&self.state);
                if !state.devices.contains_key(device) {
                    return Err(MountError::Missing {
                        path: device.to_owned(),
                    });
                }
                state
                    .formatted
                    .entry(device.to_owned())
                    .or_insert_with(|| fs_type.to_owned());
            }
            self.attach_mount(device, target, fs_type, options)
        })
    }

    fn resize<'a>(
        &'a self,
        device: &'a Utf8Path,
        mount_path: &'a Utf8Path,
    ) -> MountFuture<'a, ()> {
        Box::pin(async move {
            self.enter("resize", &format!("{device} {mount_path}"))
                .await?;
            if lock(&self.state).devices.contains_key(device) {
                Ok(())
            } else {
                Err(MountError::Missing {
                    path: device.to_owned(),
                })
            }
        })
    }

    fn block_size_bytes<'a>(&'a self, device: &'a Utf8Path) -> MountFuture<'a, u64> {
        Box::pin(async move {
            self.enter("block_size_bytes", device.as_str()).await?;
            lock(&self.state)
                .devices
                .get(device)
                .copied()
                .ok_or_else(|| MountError::Missing {
                    path: device.to_owned(),
                })
        })
    }

    fn volume_stats<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, VolumeStats> {
        Box::pin(async move {
            self.enter("volume_stats", path.as_str()).await?;
            let state = lock(&self.state);
            if let Some(stats) = state.stats.get(path) {
                return Ok(*stats);
            }
            if state.exists(path) {
                Ok(VolumeStats::default())
            } else {
                Err(MountError::Missing {
                    path: path.to_owned(),
                })
            }
        })
    }

    fn verify_device_path<'a>(
        &'a self,
        candidates: &'a [Utf8PathBuf],
    ) -> MountFuture<'a, Utf8PathBuf> {
        Box::pin(async move {
            self.enter("verify_device_path", &format!("{candidates:?}"))
                .await?;
            let state = lock(&self.state);
            candidates
                .iter()
                .find(|candidate| state.devices.contains_key(candidate.as_path()))
                .cloned()
                .ok_or_else(|| MountError::DeviceNotFound {
                    candidates: candidates.to_vec(),
                })
        })
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
