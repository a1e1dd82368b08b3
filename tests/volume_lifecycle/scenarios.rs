//! BDD scenarios for the volume lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{VolumeWorld, volume_world};

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Provision, mount and tear down a volume"
)]
fn scenario_full_lifecycle(volume_world: VolumeWorld) {
    drop(volume_world);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Creating the same volume twice reuses the disk"
)]
fn scenario_create_is_idempotent(volume_world: VolumeWorld) {
    drop(volume_world);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Deleting a volume that does not exist succeeds"
)]
fn scenario_delete_missing(volume_world: VolumeWorld) {
    drop(volume_world);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Deleting a malformed volume id succeeds"
)]
fn scenario_delete_malformed(volume_world: VolumeWorld) {
    drop(volume_world);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Attaching again with the same mode is a no-op"
)]
fn scenario_republish_same_mode(volume_world: VolumeWorld) {
    drop(volume_world);
}

#[scenario(
    path = "tests/features/volume_lifecycle.feature",
    name = "Attaching again with a different mode is rejected"
)]
fn scenario_republish_other_mode(volume_world: VolumeWorld) {
    drop(volume_world);
}
