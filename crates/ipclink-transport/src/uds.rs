use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::framing::{decode_message, encode_message, DEFAULT_MAX_MESSAGE};
use crate::protocol::MessagePassingProtocol;

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Unix domain socket message transport.
///
/// Wraps a byte stream in length-prefixed framing so the layers above only
/// ever see whole messages. Each connection runs a reader and a writer pump
/// task; the connection surfaces as a [`UdsProtocol`].
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    /// Whether the path should be removed on drop.
    cleanup_on_drop: bool,
    max_message: usize,
}

impl UdsListener {
    /// Permission mode applied to freshly bound socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind to `path` with owner-only permissions.
    ///
    /// A stale socket file from a previous run is unlinked first; any
    /// other kind of file at the path fails the bind.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind to `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &PathBuf, source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        remove_stale_socket(&path).map_err(|e| bind_err(&path, e))?;

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let created_inode = socket_identity(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some(created_inode),
            cleanup_on_drop: true,
            max_message: DEFAULT_MAX_MESSAGE,
        })
    }

    /// Override the maximum framed message size for accepted connections.
    pub fn with_max_message(mut self, max_message: usize) -> Self {
        self.max_message = max_message;
        self
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<UdsProtocol> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(UdsProtocol::from_stream_with_max(stream, self.max_message))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        if !self.cleanup_on_drop {
            return;
        }
        let Some(created) = self.created_inode else {
            return;
        };
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return; // Already gone, nothing to unlink.
        };

        let unchanged =
            metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == created;
        if unchanged {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path replaced; leaving it alone");
        }
    }
}

/// Unlink a socket file left behind by a previous run.
///
/// Anything at the path that is not a socket is an error, never collateral.
fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };

    if !metadata.file_type().is_socket() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        ));
    }

    debug!(?path, "removing stale socket");
    std::fs::remove_file(path)
}

/// The (device, inode) pair of the file at `path`.
///
/// Recorded at bind time so drop only ever unlinks the exact file this
/// listener created.
fn socket_identity(path: &Path) -> std::io::Result<(u64, u64)> {
    let metadata = std::fs::symlink_metadata(path)?;
    Ok((metadata.dev(), metadata.ino()))
}

/// One connected Unix-socket message pipe.
pub struct UdsProtocol {
    outbound: mpsc::UnboundedSender<Bytes>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    disconnected: CancellationToken,
}

impl UdsProtocol {
    /// Connect to a listening Unix domain socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self::from_stream_with_max(stream, DEFAULT_MAX_MESSAGE)
    }

    /// Wrap an already-connected stream with an explicit message size cap.
    pub fn from_stream_with_max(stream: UnixStream, max_message: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let disconnected = CancellationToken::new();

        tokio::spawn(read_pump(
            read_half,
            inbound_tx,
            max_message,
            disconnected.clone(),
        ));
        tokio::spawn(write_pump(write_half, outbound_rx, disconnected.clone()));

        Self {
            outbound,
            incoming: Mutex::new(Some(inbound_rx)),
            disconnected,
        }
    }

    /// Token cancelled when the peer disconnects or the stream fails.
    pub fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}

impl MessagePassingProtocol for UdsProtocol {
    fn send(&self, message: Bytes) {
        // Writer gone: the connection is tearing down, nothing to report.
        let _ = self.outbound.send(message);
    }

    fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.incoming.lock().take()
    }
}

async fn read_pump(
    mut read_half: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Bytes>,
    max_message: usize,
    disconnected: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    loop {
        match decode_message(&mut buf, max_message) {
            Ok(Some(message)) => {
                if inbound.send(message).is_err() {
                    break; // Consumer gone
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "dropping connection on framing error");
                break;
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "read failed");
                break;
            }
        }
    }
    disconnected.cancel();
}

async fn write_pump(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    disconnected: CancellationToken,
) {
    let mut wire = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    while let Some(message) = outbound.recv().await {
        wire.clear();
        if let Err(err) = encode_message(&message, &mut wire) {
            warn!(error = %err, "dropping unencodable message");
            continue;
        }
        if let Err(err) = write_half.write_all(&wire).await {
            debug!(error = %err, "write failed");
            break;
        }
    }
    disconnected.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ipclink-uds-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("test.sock")
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn roundtrip_over_socket() {
        let sock_path = make_sock_path("roundtrip");
        let listener = UdsListener::bind(&sock_path).unwrap();

        let server = tokio::spawn(async move {
            let protocol = listener.accept().await.unwrap();
            let mut inbox = protocol.take_incoming().unwrap();
            let message = inbox.recv().await.unwrap();
            protocol.send(message);
            // Keep the connection alive until the client has read the echo.
            inbox.recv().await
        });

        let client = UdsProtocol::connect(&sock_path).await.unwrap();
        let mut inbox = client.take_incoming().unwrap();
        client.send(Bytes::from_static(b"ping"));

        let echoed = inbox.recv().await.unwrap();
        assert_eq!(echoed.as_ref(), b"ping");

        drop(client);
        server.await.unwrap();
        cleanup(&sock_path);
    }

    #[tokio::test]
    async fn large_message_crosses_whole() {
        let sock_path = make_sock_path("large");
        let listener = UdsListener::bind(&sock_path).unwrap();

        let payload = vec![0xAB; 64 * 1024];
        let expected = payload.clone();

        let server = tokio::spawn(async move {
            let protocol = listener.accept().await.unwrap();
            let mut inbox = protocol.take_incoming().unwrap();
            inbox.recv().await.unwrap()
        });

        let client = UdsProtocol::connect(&sock_path).await.unwrap();
        client.send(Bytes::from(payload));

        let received = server.await.unwrap();
        assert_eq!(received.as_ref(), expected.as_slice());
        cleanup(&sock_path);
    }

    #[tokio::test]
    async fn disconnect_cancels_token() {
        let sock_path = make_sock_path("disconnect");
        let listener = UdsListener::bind(&sock_path).unwrap();

        let accepted = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = UdsProtocol::connect(&sock_path).await.unwrap();
        let server_side = accepted.await.unwrap();

        let disconnected = server_side.disconnected();
        drop(client);
        disconnected.cancelled().await;
        cleanup(&sock_path);
    }

    #[tokio::test]
    async fn bind_rejects_existing_non_socket_file() {
        let sock_path = make_sock_path("nonsocket");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UdsListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        cleanup(&sock_path);
    }

    #[tokio::test]
    async fn bind_hardens_permissions() {
        let sock_path = make_sock_path("perms");
        let listener = UdsListener::bind(&sock_path).unwrap();

        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");
        cleanup(&sock_path);
    }

    #[tokio::test]
    async fn path_too_long_is_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UdsListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }
}
