//! Mount execution delegated to a privileged side-process.
//!
//! [`ProxyMounter`] sends one JSON line per call over a Unix socket and
//! reads one JSON line back. [`ProxyServer`] is the privileged end: it
//! decodes each line and runs it against a local [`Mounter`].

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::{MountError, MountFuture, Mounter, VolumeStats};
use crate::framing::{Frame, MAX_LINE_BYTES, read_frame};

/// A mount call as carried over the proxy socket.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProxyRequest {
    /// [`Mounter::is_mount_point`].
    IsMountPoint {
        /// Path to check.
        path: Utf8PathBuf,
    },
    /// [`Mounter::make_dir`].
    MakeDir {
        /// Directory to create.
        path: Utf8PathBuf,
    },
    /// [`Mounter::make_file`].
    MakeFile {
        /// File to create.
        path: Utf8PathBuf,
    },
    /// [`Mounter::remove_path`].
    RemovePath {
        /// Path to remove.
        path: Utf8PathBuf,
    },
    /// [`Mounter::mount`].
    Mount {
        /// Mount source.
        source: Utf8PathBuf,
        /// Mount point.
        target: Utf8PathBuf,
        /// Filesystem type, possibly empty.
        fs_type: String,
        /// Mount options.
        options: Vec<String>,
    },
    /// [`Mounter::unmount`].
    Unmount {
        /// Mount point.
        target: Utf8PathBuf,
    },
    /// [`Mounter::format_and_mount`].
    FormatAndMount {
        /// Block device.
        device: Utf8PathBuf,
        /// Mount point.
        target: Utf8PathBuf,
        /// Filesystem type.
        fs_type: String,
        /// Mount options.
        options: Vec<String>,
    },
    /// [`Mounter::resize`].
    Resize {
        /// Block device.
        device: Utf8PathBuf,
        /// Where the filesystem is mounted.
        mount_path: Utf8PathBuf,
    },
    /// [`Mounter::block_size_bytes`].
    BlockSizeBytes {
        /// Block device.
        device: Utf8PathBuf,
    },
    /// [`Mounter::volume_stats`].
    VolumeStats {
        /// Mounted path.
        path: Utf8PathBuf,
    },
    /// [`Mounter::verify_device_path`].
    VerifyDevicePath {
        /// Candidate device paths.
        candidates: Vec<Utf8PathBuf>,
    },
}

/// Result of a proxied call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyReply {
    /// Call succeeded without a value.
    Done,
    /// Boolean result.
    Flag(bool),
    /// Size in bytes.
    Size(u64),
    /// Filesystem usage.
    Stats(VolumeStats),
    /// Resolved path.
    Path(Utf8PathBuf),
    /// Call failed on the privileged side.
    Failed(MountError),
}

fn proxy_error(err: impl std::fmt::Display) -> MountError {
    MountError::Proxy {
        message: err.to_string(),
    }
}

fn unexpected(reply: &ProxyReply) -> MountError {
    MountError::Proxy {
        message: format!("unexpected reply {reply:?}"),
    }
}

/// Client end of the mount proxy.
#[derive(Clone, Debug)]
pub struct ProxyMounter {
    socket: Utf8PathBuf,
}

impl ProxyMounter {
    /// Client talking to the proxy listening on `socket`.
    #[must_use]
    pub fn new(socket: impl Into<Utf8PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn call(&self, request: &ProxyRequest) -> Result<ProxyReply, MountError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|err| proxy_error(format!("connect {}: {err}", self.socket)))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut line = serde_json::to_vec(request).map_err(proxy_error)?;
        line.push(b'\n');
        write_half.write_all(&line).await.map_err(proxy_error)?;
        write_half.shutdown().await.map_err(proxy_error)?;

        let mut reply = String::new();
        BufReader::new(read_half)
            .read_line(&mut reply)
            .await
            .map_err(proxy_error)?;
        match serde_json::from_str(&reply).map_err(proxy_error)? {
            ProxyReply::Failed(err) => Err(err),
            other => Ok(other),
        }
    }

    async fn call_done(&self, request: ProxyRequest) -> Result<(), MountError> {
        match self.call(&request).await? {
            ProxyReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl Mounter for ProxyMounter {
    fn is_mount_point<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, bool> {
        Box::pin(async move {
            let request = ProxyRequest::IsMountPoint {
                path: path.to_owned(),
            };
            match self.call(&request).await? {
                ProxyReply::Flag(mounted) => Ok(mounted),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn make_dir<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::MakeDir {
            path: path.to_owned(),
        }))
    }

    fn make_file<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::MakeFile {
            path: path.to_owned(),
        }))
    }

    fn remove_path<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::RemovePath {
            path: path.to_owned(),
        }))
    }

    fn mount<'a>(
        &'a self,
        source: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::Mount {
            source: source.to_owned(),
            target: target.to_owned(),
            fs_type: fs_type.to_owned(),
            options: options.to_vec(),
        }))
    }

    fn unmount<'a>(&'a self, target: &'a Utf8Path) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::Unmount {
            target: target.to_owned(),
        }))
    }

    fn format_and_mount<'a>(
        &'a self,
        device: &'a Utf8Path,
        target: &'a Utf8Path,
        fs_type: &'a str,
        options: &'a [String],
    ) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::FormatAndMount {
            device: device.to_owned(),
            target: target.to_owned(),
            fs_type: fs_type.to_owned(),
            options: options.to_vec(),
        }))
    }

    fn resize<'a>(
        &'a self,
        device: &'a Utf8Path,
        mount_path: &'a Utf8Path,
    ) -> MountFuture<'a, ()> {
        Box::pin(self.call_done(ProxyRequest::Resize {
            device: device.to_owned(),
            mount_path: mount_path.to_owned(),
        }))
    }

    fn block_size_bytes<'a>(&'a self, device: &'a Utf8Path) -> MountFuture<'a, u64> {
        Box::pin(async move {
            let request = ProxyRequest::BlockSizeBytes {
                device: device.to_owned(),
            };
            match self.call(&request).await? {
                ProxyReply::Size(bytes) => Ok(bytes),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn volume_stats<'a>(&'a self, path: &'a Utf8Path) -> MountFuture<'a, VolumeStats> {
        Box::pin(async move {
            let request = ProxyRequest::VolumeStats {
                path: path.to_owned(),
            };
            match self.call(&request).await? {
                ProxyReply::Stats(stats) => Ok(stats),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn verify_device_path<'a>(
        &'a self,
        candidates: &'a [Utf8PathBuf],
    ) -> MountFuture<'a, Utf8PathBuf> {
        Box::pin(async move {
            let request = ProxyRequest::VerifyDevicePath {
                candidates: candidates.to_vec(),
            };
            match self.call(&request).await? {
                ProxyReply::Path(path) => Ok(path),
                other => Err(unexpected(&other)),
            }
        })
    }
}

/// Privileged end of the mount proxy.
pub struct ProxyServer {
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer").finish_non_exhaustive()
    }
}

impl ProxyServer {
    /// Server executing calls on `mounter`.
    #[must_use]
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }

    /// Binds `socket`, replacing a stale socket file.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Proxy`] when the socket cannot be bound.
    pub fn bind(socket: &Utf8Path) -> Result<UnixListener, MountError> {
        match std::fs::remove_file(socket) {
            Ok(()) => debug!(%socket, "removed stale proxy socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(proxy_error(format!("remove {socket}: {err}"))),
        }
        UnixListener::bind(socket).map_err(|err| proxy_error(format!("bind {socket}: {err}")))
    }

    /// Accepts connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Proxy`] when accepting a connection fails.
    pub async fn serve(&self, listener: UnixListener) -> Result<(), MountError> {
        info!("mount proxy listening");
        loop {
            let (stream, _) = listener.accept().await.map_err(proxy_error)?;
            let mounter = Arc::clone(&self.mounter);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(mounter.as_ref(), stream).await {
                    warn!(error = %err, "mount proxy connection failed");
                }
            });
        }
    }
}

async fn handle_connection(mounter: &dyn Mounter, stream: UnixStream) -> Result<(), MountError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let reply = match read_frame(&mut reader, MAX_LINE_BYTES)
            .await
            .map_err(proxy_error)?
        {
            Frame::Closed => break,
            Frame::TooLong => {
                warn!(limit = MAX_LINE_BYTES, "proxy request line too long");
                ProxyReply::Failed(proxy_error(format!(
                    "request exceeds {MAX_LINE_BYTES} bytes"
                )))
            }
            Frame::Line(line) => match serde_json::from_slice::<ProxyRequest>(&line) {
                Ok(request) => {
                    debug!(?request, "proxy request");
                    dispatch(mounter, request).await
                }
                Err(err) => ProxyReply::Failed(proxy_error(format!("malformed request: {err}"))),
            },
        };
        let mut payload = serde_json::to_vec(&reply).map_err(proxy_error)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await.map_err(proxy_error)?;
    }
    Ok(())
}

async fn dispatch(mounter: &dyn Mounter, request: ProxyRequest) -> ProxyReply {
    let outcome = match request {
        ProxyRequest::IsMountPoint { path } => {
            mounter.is_mount_point(&path).await.map(ProxyReply::Flag)
        }
        ProxyRequest::MakeDir { path } => mounter.make_dir(&path).await.map(|()| ProxyReply::Done),
        ProxyRequest::MakeFile { path } => {
            mounter.make_file(&path).await.map(|()| ProxyReply::Done)
        }
        ProxyRequest::RemovePath { path } => {
            mounter.remove_path(&path).await.map(|()| ProxyReply::Done)
        }
        ProxyRequest::Mount {
            source,
            target,
            fs_type,
            options,
        } => mounter
            .mount(&source, &target, &fs_type, &options)
            .await
            .map(|()| ProxyReply::Done),
        ProxyRequest::Unmount { target } => {
            mounter.unmount(&target).await.map(|()| ProxyReply::Done)
        }
        ProxyRequest::FormatAndMount {
            device,
            target,
            fs_type,
            options,
        } => mounter
            .format_and_mount(&device, &target, &fs_type, &options)
            .await
            .map(|()| ProxyReply::Done),
        ProxyRequest::Resize { device, mount_path } => mounter
            .resize(&device, &mount_path)
            .await
            .map(|()| ProxyReply::Done),
        ProxyRequest::BlockSizeBytes { device } => {
            mounter.block_size_bytes(&device).await.map(ProxyReply::Size)
        }
        ProxyRequest::VolumeStats { path } => {
            mounter.volume_stats(&path).await.map(ProxyReply::Stats)
        }
        ProxyRequest::VerifyDevicePath { candidates } => mounter
            .verify_device_path(&candidates)
            .await
            .map(ProxyReply::Path),
    };
    outcome.unwrap_or_else(ProxyReply::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeMounter;

    fn socket_in(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("mount.sock"))
            .unwrap_or_else(|path| panic!("non-UTF-8 path {}", path.display()))
    }

    #[test]
    fn request_wire_form_is_tagged() {
        let json = serde_json::to_string(&ProxyRequest::Unmount {
            target: Utf8PathBuf::from("/mnt/x"),
        })
        .unwrap_or_else(|err| panic!("serialise: {err}"));
        assert_eq!(json, r#"{"op":"unmount","target":"/mnt/x"}"#);
    }

    #[tokio::test]
    async fn calls_round_trip_through_the_socket() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let socket = socket_in(&dir);
        let fake = Arc::new(FakeMounter::new());
        let listener = ProxyServer::bind(&socket).unwrap_or_else(|err| panic!("bind: {err}"));
        let server = ProxyServer::new(fake.clone());
        let task = tokio::spawn(async move { server.serve(listener).await });

        let client = ProxyMounter::new(socket);
        let target = Utf8Path::new("/staging/d1");
        client
            .format_and_mount(Utf8Path::new("/dev/sdb"), target, "ext4", &[])
            .await
            .unwrap_or_else(|err| panic!("format and mount: {err}"));
        assert!(matches!(client.is_mount_point(target).await, Ok(true)));
        assert!(fake.is_mounted(target));

        client
            .unmount(target)
            .await
            .unwrap_or_else(|err| panic!("unmount: {err}"));
        assert!(matches!(client.is_mount_point(target).await, Ok(false)));
        task.abort();
    }

    #[tokio::test]
    async fn remote_failures_are_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let socket = socket_in(&dir);
        let listener = ProxyServer::bind(&socket).unwrap_or_else(|err| panic!("bind: {err}"));
        let server = ProxyServer::new(Arc::new(FakeMounter::new()));
        let task = tokio::spawn(async move { server.serve(listener).await });

        let client = ProxyMounter::new(socket);
        let err = client
            .volume_stats(Utf8Path::new("/missing"))
            .await
            .err()
            .unwrap_or_else(|| panic!("stats of a missing path should fail"));
        assert_eq!(
            err,
            MountError::Missing {
                path: Utf8PathBuf::from("/missing")
            }
        );
        task.abort();
    }

    async fn next_reply(
        replies: &mut tokio::io::Lines<tokio::io::BufReader<tokio::net::unix::OwnedReadHalf>>,
    ) -> ProxyReply {
        let line = replies
            .next_line()
            .await
            .unwrap_or_else(|err| panic!("read: {err}"))
            .unwrap_or_else(|| panic!("proxy closed the connection"));
        serde_json::from_str(&line).unwrap_or_else(|err| panic!("decode: {err}"))
    }

    #[tokio::test]
    async fn oversized_lines_are_refused_and_the_connection_survives() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let socket = socket_in(&dir);
        let listener = ProxyServer::bind(&socket).unwrap_or_else(|err| panic!("bind: {err}"));
        let server = ProxyServer::new(Arc::new(FakeMounter::new()));
        let task = tokio::spawn(async move { server.serve(listener).await });

        let stream = UnixStream::connect(&socket)
            .await
            .unwrap_or_else(|err| panic!("connect: {err}"));
        let (read_half, mut write_half) = stream.into_split();
        let mut oversized = vec![b'x'; crate::framing::MAX_LINE_BYTES + 1];
        oversized.push(b'\n');
        oversized.extend_from_slice(b"{\"op\":\"is_mount_point\",\"path\":\"/x\"}\n");
        write_half
            .write_all(&oversized)
            .await
            .unwrap_or_else(|err| panic!("write: {err}"));

        let mut replies = BufReader::new(read_half).lines();
        let ProxyReply::Failed(MountError::Proxy { message }) = next_reply(&mut replies).await else {
            panic!("an oversized line must be refused");
        };
        assert!(message.contains("exceeds"), "unexpected message: {message}");
        assert_eq!(next_reply(&mut replies).await, ProxyReply::Flag(false));
        task.abort();
    }

    #[tokio::test]
    async fn unreachable_proxy_is_a_proxy_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let client = ProxyMounter::new(socket_in(&dir));
        assert!(matches!(
            client.is_mount_point(Utf8Path::new("/x")).await,
            Err(MountError::Proxy { .. })
        ));
    }
}
