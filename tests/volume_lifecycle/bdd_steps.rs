//! BDD step definitions for the volume lifecycle.

use std::collections::HashMap;

use camino::Utf8Path;
use pdcsi::capacity::GIB;
use pdcsi::cloud::AttachMode;
use pdcsi::types::{
    CapacityRange, ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
    CreateVolumeRequest, DeleteVolumeRequest, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, Volume, VolumeCapability,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{NODE_ID, NODE_NAME, STAGING_PATH, TARGET_PATH, VolumeWorld, ZONE};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn fail<T>(message: impl Into<String>) -> Result<T, StepError> {
    Err(StepError::Assertion(message.into()))
}

fn capability() -> VolumeCapability {
    VolumeCapability::mount("ext4", Vec::new())
}

fn attach_mode(mode: &str) -> Result<AttachMode, StepError> {
    match mode {
        "read-write" => Ok(AttachMode::ReadWrite),
        "read-only" => Ok(AttachMode::ReadOnly),
        other => fail(format!("unknown attach mode {other}")),
    }
}

fn current_volume(world: &VolumeWorld) -> Result<(String, Volume), StepError> {
    let progress = world.progress();
    match (&progress.name, progress.volumes.last()) {
        (Some(name), Some(volume)) => Ok((name.clone(), volume.clone())),
        _ => fail("no volume has been created"),
    }
}

fn create(world: &VolumeWorld, name: &str, size_gib: u64) {
    let request = CreateVolumeRequest {
        name: name.to_owned(),
        capacity_range: Some(CapacityRange::required(size_gib * GIB)),
        volume_capabilities: vec![capability()],
        ..CreateVolumeRequest::default()
    };
    let outcome = world
        .runtime
        .block_on(world.controller.create_volume(&request));
    let mut progress = world.progress();
    progress.name = Some(name.to_owned());
    match outcome {
        Ok(volume) => {
            progress.volumes.push(volume);
            progress.outcome = Some(Ok(()));
        }
        Err(err) => progress.outcome = Some(Err(err)),
    }
}

fn attach(world: &VolumeWorld, mode: &str) -> Result<(), StepError> {
    let (_, volume) = current_volume(world)?;
    let request = ControllerPublishVolumeRequest {
        volume_id: volume.volume_id,
        node_id: NODE_ID.to_owned(),
        volume_capability: Some(capability()),
        readonly: attach_mode(mode)? == AttachMode::ReadOnly,
    };
    let outcome = world
        .runtime
        .block_on(world.controller.controller_publish_volume(&request));
    world.record(outcome);
    Ok(())
}

#[given("a controller and a node in zone \"{zone}\"")]
fn controller_and_node(volume_world: &VolumeWorld, zone: String) -> Result<(), StepError> {
    if zone != ZONE {
        return fail(format!("the fixture node lives in {ZONE}, not {zone}"));
    }
    if volume_world.cloud.instance(ZONE, NODE_NAME).is_none() {
        return fail("the node instance is missing");
    }
    Ok(())
}

#[given("a volume \"{name}\" attached \"{mode}\" to the node")]
fn attached_volume(
    volume_world: &VolumeWorld,
    name: String,
    mode: String,
) -> Result<(), StepError> {
    create(volume_world, &name, 10);
    attach(volume_world, &mode)?;
    match volume_world.progress().outcome.take() {
        Some(Ok(())) => Ok(()),
        other => fail(format!("setting up the attached volume failed: {other:?}")),
    }
}

#[when("I create volume \"{name}\" requiring \"{size}\" GiB")]
fn create_volume(volume_world: &VolumeWorld, name: String, size: u64) {
    create(volume_world, &name, size);
}

#[when("I attach the volume to the node as \"{mode}\"")]
fn attach_volume(volume_world: &VolumeWorld, mode: String) -> Result<(), StepError> {
    attach(volume_world, &mode)
}

#[when("I stage the volume")]
fn stage_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (name, volume) = current_volume(volume_world)?;
    // The kernel exposes the attached disk under its device name.
    volume_world.mounter.add_device(&name, volume.capacity_bytes);
    let request = NodeStageVolumeRequest {
        volume_id: volume.volume_id,
        staging_target_path: STAGING_PATH.into(),
        volume_capability: Some(capability()),
        volume_context: volume.volume_context,
    };
    let outcome = volume_world
        .runtime
        .block_on(volume_world.node.node_stage_volume(&request));
    volume_world.record(outcome);
    Ok(())
}

#[when("I publish the volume")]
fn publish_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    let request = NodePublishVolumeRequest {
        volume_id: volume.volume_id,
        staging_target_path: STAGING_PATH.into(),
        target_path: TARGET_PATH.into(),
        volume_capability: Some(capability()),
        readonly: false,
        volume_context: HashMap::new(),
    };
    let outcome = volume_world
        .runtime
        .block_on(volume_world.node.node_publish_volume(&request));
    volume_world.record(outcome);
    Ok(())
}

#[when("I unpublish the volume")]
fn unpublish_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    let request = NodeUnpublishVolumeRequest {
        volume_id: volume.volume_id,
        target_path: TARGET_PATH.into(),
    };
    let outcome = volume_world
        .runtime
        .block_on(volume_world.node.node_unpublish_volume(&request));
    volume_world.record(outcome);
    Ok(())
}

#[when("I unstage the volume")]
fn unstage_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    let request = NodeUnstageVolumeRequest {
        volume_id: volume.volume_id,
        staging_target_path: STAGING_PATH.into(),
    };
    let outcome = volume_world
        .runtime
        .block_on(volume_world.node.node_unstage_volume(&request));
    volume_world.record(outcome);
    Ok(())
}

#[when("I detach the volume from the node")]
fn detach_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    let request = ControllerUnpublishVolumeRequest {
        volume_id: volume.volume_id,
        node_id: NODE_ID.to_owned(),
    };
    let outcome = volume_world
        .runtime
        .block_on(volume_world.controller.controller_unpublish_volume(&request));
    volume_world.record(outcome);
    Ok(())
}

#[when("I delete the volume")]
fn delete_current_volume(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    delete(volume_world, volume.volume_id);
    Ok(())
}

#[when("I delete volume \"{volume_id}\"")]
fn delete_volume(volume_world: &VolumeWorld, volume_id: String) {
    delete(volume_world, volume_id);
}

fn delete(world: &VolumeWorld, volume_id: String) {
    let request = DeleteVolumeRequest { volume_id };
    let outcome = world
        .runtime
        .block_on(world.controller.delete_volume(&request));
    world.record(outcome);
}

#[then("the operation succeeds")]
fn operation_succeeds(volume_world: &VolumeWorld) -> Result<(), StepError> {
    match &volume_world.progress().outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(err)) => fail(format!("expected success, got {err}")),
        None => fail("no operation ran"),
    }
}

#[then("the operation fails with \"{code}\"")]
fn operation_fails(volume_world: &VolumeWorld, code: String) -> Result<(), StepError> {
    match &volume_world.progress().outcome {
        Some(Err(err)) if format!("{:?}", err.code()) == code => Ok(()),
        Some(Err(err)) => fail(format!("expected {code}, got {err}")),
        Some(Ok(())) => fail(format!("expected {code}, got success")),
        None => fail("no operation ran"),
    }
}

#[then("the volume id is \"{volume_id}\"")]
fn volume_id_is(volume_world: &VolumeWorld, volume_id: String) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    if volume.volume_id == volume_id {
        Ok(())
    } else {
        fail(format!("expected id {volume_id}, got {}", volume.volume_id))
    }
}

#[then("the volume capacity is \"{size}\" GiB")]
fn volume_capacity_is(volume_world: &VolumeWorld, size: u64) -> Result<(), StepError> {
    let (_, volume) = current_volume(volume_world)?;
    if volume.capacity_bytes == size * GIB {
        Ok(())
    } else {
        fail(format!("expected {size} GiB, got {} bytes", volume.capacity_bytes))
    }
}

#[then("every create returned the same volume id")]
fn creates_agree(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let progress = volume_world.progress();
    let Some(first) = progress.volumes.first() else {
        return fail("no volume has been created");
    };
    if progress.volumes.len() < 2 {
        return fail("expected more than one create");
    }
    if progress
        .volumes
        .iter()
        .all(|volume| volume.volume_id == first.volume_id)
    {
        Ok(())
    } else {
        fail(format!("creates disagree: {:?}", progress.volumes))
    }
}

#[then("the cloud received \"{count}\" \"{method}\" calls")]
fn cloud_calls(volume_world: &VolumeWorld, count: usize, method: String) -> Result<(), StepError> {
    let seen = volume_world.cloud.call_count(&method);
    if seen == count {
        Ok(())
    } else {
        fail(format!("expected {count} {method} calls, saw {seen}"))
    }
}

#[then("the disk is attached \"{mode}\" to the node")]
fn disk_attached(volume_world: &VolumeWorld, mode: String) -> Result<(), StepError> {
    let (name, _) = current_volume(volume_world)?;
    let expected = attach_mode(&mode)?;
    let Some(instance) = volume_world.cloud.instance(ZONE, NODE_NAME) else {
        return fail("the node instance is missing");
    };
    match instance.attached(&name) {
        Some(disk) if disk.mode == expected => Ok(()),
        Some(disk) => fail(format!("attached as {:?}, expected {expected:?}", disk.mode)),
        None => fail(format!("{name} is not attached")),
    }
}

#[then("the target path is a mount point")]
fn target_mounted(volume_world: &VolumeWorld) -> Result<(), StepError> {
    if volume_world.mounter.is_mounted(Utf8Path::new(TARGET_PATH)) {
        Ok(())
    } else {
        fail("the target path is not mounted")
    }
}

#[then("the staging and target paths are no longer mount points")]
fn nothing_mounted(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let mounter = &volume_world.mounter;
    if mounter.is_mounted(Utf8Path::new(STAGING_PATH))
        || mounter.is_mounted(Utf8Path::new(TARGET_PATH))
    {
        fail("a path is still mounted")
    } else {
        Ok(())
    }
}

#[then("the disk is no longer attached")]
fn disk_detached(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (name, _) = current_volume(volume_world)?;
    let attached = volume_world
        .cloud
        .instance(ZONE, NODE_NAME)
        .is_some_and(|instance| instance.attached(&name).is_some());
    if attached {
        fail(format!("{name} is still attached"))
    } else {
        Ok(())
    }
}

#[then("the disk no longer exists")]
fn disk_deleted(volume_world: &VolumeWorld) -> Result<(), StepError> {
    let (name, _) = current_volume(volume_world)?;
    if volume_world.cloud.disk(ZONE, &name).is_some() {
        fail(format!("{name} still exists"))
    } else {
        Ok(())
    }
}
