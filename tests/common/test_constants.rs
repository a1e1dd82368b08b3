//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Zone every fake resource lives in.
pub const ZONE: &str = "us-central1-c";

/// Project of the fake node.
pub const PROJECT: &str = "proj";

/// Instance name of the fake node.
pub const NODE_NAME: &str = "node-1";

/// Node identifier reported by the fake node.
pub const NODE_ID: &str = "projects/proj/zones/us-central1-c/instances/node-1";

/// Volume name used by lifecycle scenarios.
pub const VOLUME_NAME: &str = "pvc-0b1c";

/// Volume identifier matching [`VOLUME_NAME`] in [`ZONE`].
pub const VOLUME_ID: &str = "us-central1-c/pvc-0b1c";

/// Staging directory used by node scenarios.
pub const STAGING_PATH: &str = "/var/lib/kubelet/plugins/pd/globalmount/pvc-0b1c";

/// Workload path used by node scenarios.
pub const TARGET_PATH: &str = "/var/lib/kubelet/pods/pod-1/volumes/pvc-0b1c";
