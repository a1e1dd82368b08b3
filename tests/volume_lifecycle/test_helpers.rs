//! Shared fixture for the volume lifecycle scenarios.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pdcsi::test_support::{FakeCloud, FakeMounter};
use pdcsi::types::Volume;
use pdcsi::{ControllerService, CsiError, InstanceMetadata, NodeService};
use rstest::fixture;
use tokio::runtime::Runtime;

pub const ZONE: &str = "zone-a";
pub const NODE_NAME: &str = "n1";
pub const NODE_ID: &str = "projects/proj/zones/zone-a/instances/n1";
pub const STAGING_PATH: &str = "/var/lib/kubelet/plugins/pd/globalmount/d1";
pub const TARGET_PATH: &str = "/var/lib/kubelet/pods/p1/volumes/d1/mount";

/// What the steps have done so far.
#[derive(Debug, Default)]
pub struct Progress {
    pub name: Option<String>,
    pub volumes: Vec<Volume>,
    pub outcome: Option<Result<(), CsiError>>,
}

/// Controller and node wired to the in-memory cloud and mounter.
///
/// Clones share the fakes and the recorded progress.
#[derive(Clone)]
pub struct VolumeWorld {
    pub runtime: Arc<Runtime>,
    pub cloud: FakeCloud,
    pub mounter: FakeMounter,
    pub controller: Arc<ControllerService>,
    pub node: Arc<NodeService>,
    progress: Arc<Mutex<Progress>>,
}

impl fmt::Debug for VolumeWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeWorld")
            .field("cloud", &self.cloud)
            .field("mounter", &self.mounter)
            .finish_non_exhaustive()
    }
}

impl VolumeWorld {
    pub fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, outcome: Result<(), CsiError>) {
        self.progress().outcome = Some(outcome);
    }
}

#[fixture]
pub fn volume_world() -> VolumeWorld {
    let runtime = Runtime::new().unwrap_or_else(|err| panic!("tokio runtime: {err}"));
    let cloud = FakeCloud::new(ZONE);
    cloud.add_instance(ZONE, NODE_NAME);
    let mounter = FakeMounter::new();
    let node = NodeService::new(
        Arc::new(mounter.clone()),
        InstanceMetadata {
            project: String::from("proj"),
            zone: ZONE.to_owned(),
            name: NODE_NAME.to_owned(),
            machine_type: String::from("n1-standard-4"),
        },
    );
    VolumeWorld {
        runtime: Arc::new(runtime),
        controller: Arc::new(ControllerService::new(Arc::new(cloud.clone()))),
        node: Arc::new(node),
        cloud,
        mounter,
        progress: Arc::new(Mutex::new(Progress::default())),
    }
}
