//! Newline-delimited JSON transport over a Unix domain socket.
//!
//! Each line a client writes is one [`Request`]; the server answers every
//! line with exactly one [`Response`] line. A connection may carry any
//! number of requests, and every connection runs on its own task.
//!
//! On the wire a request is `{"method": "<Operation>", "params": {...}}`
//! and a response is `{"status": "ok", "result": ...}` or
//! `{"status": "error", "result": <error>}`.

mod server;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::CsiError;
use crate::types::{
    ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest, CreateSnapshotRequest,
    CreateVolumeRequest, DeleteSnapshotRequest, DeleteVolumeRequest, ListSnapshotsRequest,
    NodeExpandVolumeRequest, NodeGetVolumeStatsRequest, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
    ValidateVolumeCapabilitiesRequest,
};

pub use server::TransportServer;

/// Errors raised by the transport itself, as opposed to failed operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Socket setup or I/O failed.
    #[error("transport I/O error on {endpoint}: {message}")]
    Io {
        /// Socket path.
        endpoint: Utf8PathBuf,
        /// Underlying error.
        message: String,
    },
    /// Accepting or serving a connection failed.
    #[error("connection error: {message}")]
    Connection {
        /// Underlying error.
        message: String,
    },
    /// A line could not be encoded or decoded.
    #[error("transport codec error: {message}")]
    Codec {
        /// Underlying error.
        message: String,
    },
    /// The peer closed the connection before replying.
    #[error("connection to {endpoint} closed before a response arrived")]
    Closed {
        /// Socket path.
        endpoint: Utf8PathBuf,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Remote(#[from] CsiError),
}

impl TransportError {
    fn io(endpoint: &Utf8Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        }
    }

    fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }

    fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }
}

/// Identity service calls.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum IdentityRequest {
    /// `GetPluginInfo`.
    GetPluginInfo,
    /// `GetPluginCapabilities`.
    GetPluginCapabilities,
    /// `Probe`.
    Probe,
}

/// Controller service calls.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum ControllerRequest {
    /// `CreateVolume`.
    CreateVolume(CreateVolumeRequest),
    /// `DeleteVolume`.
    DeleteVolume(DeleteVolumeRequest),
    /// `ControllerPublishVolume`.
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// `ControllerUnpublishVolume`.
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    /// `ValidateVolumeCapabilities`.
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    /// `ListVolumes`.
    ListVolumes,
    /// `GetCapacity`.
    GetCapacity,
    /// `ControllerGetCapabilities`.
    ControllerGetCapabilities,
    /// `CreateSnapshot`.
    CreateSnapshot(CreateSnapshotRequest),
    /// `DeleteSnapshot`.
    DeleteSnapshot(DeleteSnapshotRequest),
    /// `ListSnapshots`.
    ListSnapshots(ListSnapshotsRequest),
}

/// Node service calls.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum NodeRequest {
    /// `NodeStageVolume`.
    NodeStageVolume(NodeStageVolumeRequest),
    /// `NodeUnstageVolume`.
    NodeUnstageVolume(NodeUnstageVolumeRequest),
    /// `NodePublishVolume`.
    NodePublishVolume(NodePublishVolumeRequest),
    /// `NodeUnpublishVolume`.
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    /// `NodeGetVolumeStats`.
    NodeGetVolumeStats(NodeGetVolumeStatsRequest),
    /// `NodeExpandVolume`.
    NodeExpandVolume(NodeExpandVolumeRequest),
    /// `NodeGetCapabilities`.
    NodeGetCapabilities,
    /// `NodeGetInfo`.
    NodeGetInfo,
}

/// One request line. The `method` name alone selects the service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Request {
    /// Identity call.
    Identity(IdentityRequest),
    /// Controller call.
    Controller(ControllerRequest),
    /// Node call.
    Node(NodeRequest),
}

impl From<IdentityRequest> for Request {
    fn from(value: IdentityRequest) -> Self {
        Self::Identity(value)
    }
}

impl From<ControllerRequest> for Request {
    fn from(value: ControllerRequest) -> Self {
        Self::Controller(value)
    }
}

impl From<NodeRequest> for Request {
    fn from(value: NodeRequest) -> Self {
        Self::Node(value)
    }
}

/// One response line.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Response {
    /// The operation succeeded with this payload.
    Ok(serde_json::Value),
    /// The operation failed.
    Error(CsiError),
}

impl Response {
    /// Wraps an operation outcome.
    #[must_use]
    pub fn from_result<T: Serialize>(result: Result<T, CsiError>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(CsiError::internal)) {
            Ok(payload) => Self::Ok(payload),
            Err(err) => Self::Error(err),
        }
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Remote`] for a failed operation and
    /// [`TransportError::Codec`] when the payload is not a `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        match self {
            Self::Ok(payload) => serde_json::from_value(payload).map_err(TransportError::codec),
            Self::Error(err) => Err(TransportError::Remote(err)),
        }
    }
}

/// Client end of the transport, holding one connection.
#[derive(Debug)]
pub struct Client {
    endpoint: Utf8PathBuf,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connects to the driver listening on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] when the socket is unreachable.
    pub async fn connect(socket: impl Into<Utf8PathBuf>) -> Result<Self, TransportError> {
        let endpoint = socket.into();
        let stream = UnixStream::connect(&endpoint)
            .await
            .map_err(|err| TransportError::io(&endpoint, err))?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            endpoint,
            lines: BufReader::new(read_half).lines(),
            writer,
        })
    }

    /// Sends one request and waits for its response line.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the exchange itself fails; a failed
    /// operation is an `Ok(Response::Error(..))`.
    pub async fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
        let mut line = serde_json::to_vec(request).map_err(TransportError::codec)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|err| TransportError::io(&self.endpoint, err))?;
        let reply = self
            .lines
            .next_line()
            .await
            .map_err(|err| TransportError::io(&self.endpoint, err))?
            .ok_or_else(|| TransportError::Closed {
                endpoint: self.endpoint.clone(),
            })?;
        serde_json::from_str(&reply).map_err(TransportError::codec)
    }

    /// Sends one request and decodes a successful payload as `T`.
    ///
    /// # Errors
    ///
    /// As [`Client::send`], plus [`TransportError::Remote`] when the
    /// operation failed.
    pub async fn call<T: DeserializeOwned>(
        &mut self,
        request: impl Into<Request>,
    ) -> Result<T, TransportError> {
        self.send(&request.into()).await?.into_result()
    }
}

#[cfg(test)]
mod tests;
