//! Controller service: volume lifecycle against the cloud.
//!
//! Every operation that targets a specific volume serializes on its
//! identifier through [`VolumeLocks`]. A second call for the same
//! identifier fails fast with [`CsiError::Aborted`].

mod create;
mod publish;
mod snapshot;

use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::cloud::{CloudDisks, CloudError};
use crate::error::CsiError;
use crate::locks::VolumeLocks;
use crate::topology::{TopologyError, pick_zone};
use crate::types::{ControllerCapability, TopologyRequirement};

pub use create::DiskParameters;
pub use snapshot::snapshot_status;

/// Capabilities advertised by the controller service.
pub const CONTROLLER_CAPABILITIES: &[ControllerCapability] = &[
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::CreateDeleteSnapshot,
    ControllerCapability::ListSnapshots,
];

/// Provisions, attaches and snapshots persistent disks.
pub struct ControllerService {
    cloud: Arc<dyn CloudDisks>,
    locks: VolumeLocks,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for ControllerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerService")
            .field("default_zone", &self.cloud.default_zone())
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl ControllerService {
    /// Creates a controller backed by `cloud`, with an entropy-seeded RNG
    /// for topology selection.
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudDisks>) -> Self {
        Self {
            cloud,
            locks: VolumeLocks::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the RNG used to pick among requisite zones.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// In-flight operation registry.
    #[must_use]
    pub const fn locks(&self) -> &VolumeLocks {
        &self.locks
    }

    /// Capabilities advertised by `ControllerGetCapabilities`.
    #[must_use]
    pub fn capabilities(&self) -> Vec<ControllerCapability> {
        CONTROLLER_CAPABILITIES.to_vec()
    }

    /// `ListVolumes` is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`CsiError::Unimplemented`].
    pub fn list_volumes(&self) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(String::from("ListVolumes")))
    }

    /// `GetCapacity` is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`CsiError::Unimplemented`].
    pub fn get_capacity(&self) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(String::from("GetCapacity")))
    }

    fn pick_zone(&self, requirement: &TopologyRequirement) -> Result<String, TopologyError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        pick_zone(requirement, &mut *rng)
    }
}

/// Maps an unexpected cloud failure to `Internal` with context.
fn internal(context: &str, err: &CloudError) -> CsiError {
    CsiError::Internal(format!("{context}: {err}"))
}
