//! Transport tests over a temporary socket.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::rstest;

use super::*;
use crate::capacity::GIB;
use crate::cloud::InstanceMetadata;
use crate::controller::ControllerService;
use crate::driver::{DEFAULT_DRIVER_NAME, Driver};
use crate::error::StatusCode;
use crate::node::NodeService;
use crate::test_support::{FakeCloud, FakeMounter};
use crate::types::{CapacityRange, NodeInfo, PluginInfo, Volume, VolumeCapability};

fn socket_in(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("csi.sock"))
        .unwrap_or_else(|path| panic!("non-UTF-8 path {}", path.display()))
}

fn node_service() -> NodeService {
    NodeService::new(
        Arc::new(FakeMounter::new()),
        InstanceMetadata {
            project: String::from("proj"),
            zone: String::from("zone-a"),
            name: String::from("node-1"),
            machine_type: String::from("n1-standard-1"),
        },
    )
}

fn start(driver: Driver, dir: &tempfile::TempDir) -> (Utf8PathBuf, tokio::task::JoinHandle<()>) {
    let socket = socket_in(dir);
    let listener = TransportServer::bind(&socket).unwrap_or_else(|err| panic!("bind: {err}"));
    let server = TransportServer::new(Arc::new(driver));
    let task = tokio::spawn(async move {
        server
            .serve(listener, std::future::pending())
            .await
            .unwrap_or_else(|err| panic!("serve: {err}"));
    });
    (socket, task)
}

#[rstest]
#[case(Request::from(IdentityRequest::Probe), r#"{"method":"Probe"}"#)]
#[case(
    Request::from(ControllerRequest::DeleteVolume(DeleteVolumeRequest {
        volume_id: String::from("zone-a/d1"),
    })),
    r#"{"method":"DeleteVolume","params":{"volume_id":"zone-a/d1"}}"#
)]
#[case(Request::from(NodeRequest::NodeGetInfo), r#"{"method":"NodeGetInfo"}"#)]
fn requests_use_method_and_params(#[case] request: Request, #[case] wire: &str) {
    let json = serde_json::to_string(&request).unwrap_or_else(|err| panic!("serialise: {err}"));
    assert_eq!(json, wire);
    let decoded: Request =
        serde_json::from_str(wire).unwrap_or_else(|err| panic!("deserialise: {err}"));
    assert_eq!(decoded, request);
}

#[test]
fn failed_operations_travel_as_errors() {
    let response = Response::from_result::<()>(Err(CsiError::NotFound(String::from("disk d1"))));
    let json = serde_json::to_string(&response).unwrap_or_else(|err| panic!("serialise: {err}"));
    assert_eq!(json, r#"{"status":"error","result":{"NotFound":"disk d1"}}"#);
    assert_eq!(
        response.into_result::<()>(),
        Err(TransportError::Remote(CsiError::NotFound(String::from(
            "disk d1"
        ))))
    );
}

#[tokio::test]
async fn one_connection_carries_many_requests() {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let cloud = FakeCloud::new("zone-a");
    let driver = Driver::new(DEFAULT_DRIVER_NAME, "v1")
        .unwrap_or_else(|err| panic!("driver: {err}"))
        .with_controller(ControllerService::new(Arc::new(cloud.clone())))
        .with_node(node_service());
    let (socket, task) = start(driver, &dir);

    let mut client = Client::connect(socket)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let ready: bool = client
        .call(IdentityRequest::Probe)
        .await
        .unwrap_or_else(|err| panic!("probe: {err}"));
    assert!(ready);

    let info: PluginInfo = client
        .call(IdentityRequest::GetPluginInfo)
        .await
        .unwrap_or_else(|err| panic!("plugin info: {err}"));
    assert_eq!(info.name, DEFAULT_DRIVER_NAME);

    let volume: Volume = client
        .call(ControllerRequest::CreateVolume(CreateVolumeRequest {
            name: String::from("pvc-1"),
            capacity_range: Some(CapacityRange::required(5 * GIB)),
            volume_capabilities: vec![VolumeCapability::mount("ext4", Vec::new())],
            ..CreateVolumeRequest::default()
        }))
        .await
        .unwrap_or_else(|err| panic!("create volume: {err}"));
    assert_eq!(volume.volume_id, "zone-a/pvc-1");
    assert!(cloud.disk("zone-a", "pvc-1").is_some());

    let node: NodeInfo = client
        .call(NodeRequest::NodeGetInfo)
        .await
        .unwrap_or_else(|err| panic!("node info: {err}"));
    assert_eq!(node.node_id, "projects/proj/zones/zone-a/instances/node-1");
    task.abort();
}

#[tokio::test]
async fn absent_service_answers_unimplemented() {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let driver = Driver::new(DEFAULT_DRIVER_NAME, "v1")
        .unwrap_or_else(|err| panic!("driver: {err}"))
        .with_node(node_service());
    let (socket, task) = start(driver, &dir);

    let mut client = Client::connect(socket)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let outcome = client
        .call::<Volume>(ControllerRequest::CreateVolume(CreateVolumeRequest::default()))
        .await;
    let Err(TransportError::Remote(err)) = outcome else {
        panic!("expected a remote error, got {outcome:?}");
    };
    assert_eq!(err.code(), StatusCode::Unimplemented);
    task.abort();
}

#[tokio::test]
async fn malformed_lines_get_an_invalid_argument_reply() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let driver =
        Driver::new(DEFAULT_DRIVER_NAME, "v1").unwrap_or_else(|err| panic!("driver: {err}"));
    let (socket, task) = start(driver, &dir);

    let stream = UnixStream::connect(&socket)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(b"{\"method\":\"Reboot\"}\n")
        .await
        .unwrap_or_else(|err| panic!("write: {err}"));
    let mut reply = String::new();
    BufReader::new(read_half)
        .read_line(&mut reply)
        .await
        .unwrap_or_else(|err| panic!("read: {err}"));
    let response: Response =
        serde_json::from_str(&reply).unwrap_or_else(|err| panic!("decode: {err}"));
    let Response::Error(err) = response else {
        panic!("expected an error reply, got {response:?}");
    };
    assert_eq!(err.code(), StatusCode::InvalidArgument);
    task.abort();
}

#[tokio::test]
async fn connecting_to_a_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let outcome = Client::connect(socket_in(&dir)).await;
    assert!(matches!(outcome, Err(TransportError::Io { .. })));
}

async fn next_response(
    replies: &mut tokio::io::Lines<tokio::io::BufReader<tokio::net::unix::OwnedReadHalf>>,
) -> Response {
    let line = replies
        .next_line()
        .await
        .unwrap_or_else(|err| panic!("read: {err}"))
        .unwrap_or_else(|| panic!("server closed the connection"));
    serde_json::from_str(&line).unwrap_or_else(|err| panic!("decode: {err}"))
}

#[tokio::test]
async fn oversized_lines_are_refused_and_the_connection_survives() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let driver =
        Driver::new(DEFAULT_DRIVER_NAME, "v1").unwrap_or_else(|err| panic!("driver: {err}"));
    let (socket, task) = start(driver, &dir);

    let stream = UnixStream::connect(&socket)
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));
    let (read_half, mut write_half) = stream.into_split();
    let mut input = vec![b' '; crate::framing::MAX_LINE_BYTES + 1];
    input.push(b'\n');
    input.extend_from_slice(b"{\"method\":\"Probe\"}\n");
    write_half
        .write_all(&input)
        .await
        .unwrap_or_else(|err| panic!("write: {err}"));

    let mut replies = BufReader::new(read_half).lines();
    let Response::Error(err) = next_response(&mut replies).await else {
        panic!("an oversized line must be refused");
    };
    assert_eq!(err.code(), StatusCode::InvalidArgument);
    assert_eq!(next_response(&mut replies).await.into_result::<bool>(), Ok(true));
    task.abort();
}
