//! Socket server dispatching requests to a [`Driver`].

use std::future::Future;
use std::sync::Arc;

use camino::Utf8Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

use super::{ControllerRequest, IdentityRequest, NodeRequest, Request, Response, TransportError};
use crate::controller::ControllerService;
use crate::driver::Driver;
use crate::error::CsiError;
use crate::framing::{Frame, MAX_LINE_BYTES, read_frame};
use crate::node::NodeService;

/// Serves a [`Driver`] on a Unix socket.
#[derive(Debug)]
pub struct TransportServer {
    driver: Arc<Driver>,
}

impl TransportServer {
    /// Server answering with `driver`.
    #[must_use]
    pub const fn new(driver: Arc<Driver>) -> Self {
        Self { driver }
    }

    /// Binds `endpoint`, replacing a stale socket file and creating the
    /// parent directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the socket cannot be bound.
    pub fn bind(endpoint: &Utf8Path) -> Result<UnixListener, TransportError> {
        if let Some(parent) = endpoint.parent().filter(|dir| !dir.as_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| TransportError::io(endpoint, err))?;
        }
        match std::fs::remove_file(endpoint) {
            Ok(()) => debug!(%endpoint, "removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TransportError::io(endpoint, err)),
        }
        UnixListener::bind(endpoint).map_err(|err| TransportError::io(endpoint, err))
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connection`] when accepting a connection
    /// fails.
    pub async fn serve<F>(&self, listener: UnixListener, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()> + Send,
    {
        info!(mode = %self.driver.mode(), "driver listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(TransportError::connection)?;
                    let driver = Arc::clone(&self.driver);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(&driver, stream).await {
                            warn!(error = %err, "connection failed");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(driver: &Driver, stream: UnixStream) -> Result<(), TransportError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let frame = read_frame(&mut reader, MAX_LINE_BYTES)
            .await
            .map_err(TransportError::connection)?;
        let response = match frame {
            Frame::Closed => break,
            Frame::TooLong => {
                warn!(limit = MAX_LINE_BYTES, "request line too long");
                Response::Error(CsiError::InvalidArgument(format!(
                    "request exceeds {MAX_LINE_BYTES} bytes"
                )))
            }
            Frame::Line(line) if line.trim_ascii().is_empty() => continue,
            Frame::Line(line) => match answer(driver, &mut reader, &line).await {
                Some(response) => response,
                None => {
                    info!("client went away, in-flight request cancelled");
                    return Ok(());
                }
            },
        };
        let mut payload = serde_json::to_vec(&response).map_err(TransportError::codec)?;
        payload.push(b'\n');
        write_half
            .write_all(&payload)
            .await
            .map_err(TransportError::connection)?;
    }
    debug!("connection closed");
    Ok(())
}

/// Decodes and dispatches one line. `None` means the client hung up while
/// the operation was running; the operation future is dropped with it.
async fn answer(
    driver: &Driver,
    reader: &mut BufReader<OwnedReadHalf>,
    line: &[u8],
) -> Option<Response> {
    let request = match serde_json::from_slice::<Request>(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "malformed request");
            return Some(Response::Error(CsiError::InvalidArgument(format!(
                "malformed request: {err}"
            ))));
        }
    };
    tokio::select! {
        biased;
        response = dispatch(driver, request) => Some(response),
        () = peer_closed(reader) => None,
    }
}

/// Completes once the read half reports end of stream. Pipelined input
/// keeps it pending so the running request finishes.
async fn peer_closed(reader: &mut BufReader<OwnedReadHalf>) {
    match reader.fill_buf().await {
        Ok(buffered) if !buffered.is_empty() => std::future::pending::<()>().await,
        Ok(_) | Err(_) => {}
    }
}

/// Routes a request to its service.
#[instrument(skip_all)]
pub(super) async fn dispatch(driver: &Driver, request: Request) -> Response {
    debug!(?request, "request received");
    match request {
        Request::Identity(call) => identity(driver, &call),
        Request::Controller(call) => match driver.controller() {
            Ok(service) => controller(service, call).await,
            Err(err) => Response::Error(err),
        },
        Request::Node(call) => match driver.node() {
            Ok(service) => node(service, call).await,
            Err(err) => Response::Error(err),
        },
    }
}

fn identity(driver: &Driver, call: &IdentityRequest) -> Response {
    match call {
        IdentityRequest::GetPluginInfo => Response::from_result(Ok(driver.get_plugin_info())),
        IdentityRequest::GetPluginCapabilities => {
            Response::from_result(Ok(driver.get_plugin_capabilities()))
        }
        IdentityRequest::Probe => Response::from_result(Ok(driver.probe())),
    }
}

async fn controller(service: &ControllerService, call: ControllerRequest) -> Response {
    match call {
        ControllerRequest::CreateVolume(req) => {
            Response::from_result(service.create_volume(&req).await)
        }
        ControllerRequest::DeleteVolume(req) => {
            Response::from_result(service.delete_volume(&req).await)
        }
        ControllerRequest::ControllerPublishVolume(req) => {
            Response::from_result(service.controller_publish_volume(&req).await)
        }
        ControllerRequest::ControllerUnpublishVolume(req) => {
            Response::from_result(service.controller_unpublish_volume(&req).await)
        }
        ControllerRequest::ValidateVolumeCapabilities(req) => {
            Response::from_result(service.validate_volume_capabilities(&req).await)
        }
        ControllerRequest::ListVolumes => Response::from_result(service.list_volumes()),
        ControllerRequest::GetCapacity => Response::from_result(service.get_capacity()),
        ControllerRequest::ControllerGetCapabilities => {
            Response::from_result(Ok(service.capabilities()))
        }
        ControllerRequest::CreateSnapshot(req) => {
            Response::from_result(service.create_snapshot(&req).await)
        }
        ControllerRequest::DeleteSnapshot(req) => {
            Response::from_result(service.delete_snapshot(&req).await)
        }
        ControllerRequest::ListSnapshots(req) => {
            Response::from_result(service.list_snapshots(&req).await)
        }
    }
}

async fn node(service: &NodeService, call: NodeRequest) -> Response {
    match call {
        NodeRequest::NodeStageVolume(req) => {
            Response::from_result(service.node_stage_volume(&req).await)
        }
        NodeRequest::NodeUnstageVolume(req) => {
            Response::from_result(service.node_unstage_volume(&req).await)
        }
        NodeRequest::NodePublishVolume(req) => {
            Response::from_result(service.node_publish_volume(&req).await)
        }
        NodeRequest::NodeUnpublishVolume(req) => {
            Response::from_result(service.node_unpublish_volume(&req).await)
        }
        NodeRequest::NodeGetVolumeStats(req) => {
            Response::from_result(service.node_get_volume_stats(&req).await)
        }
        NodeRequest::NodeExpandVolume(req) => {
            Response::from_result(service.node_expand_volume(&req).await)
        }
        NodeRequest::NodeGetCapabilities => Response::from_result(Ok(service.capabilities())),
        NodeRequest::NodeGetInfo => Response::from_result(Ok(service.node_get_info())),
    }
}
