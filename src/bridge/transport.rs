//! TCP connection to the bridge and its background reader task.

use super::packet::{build_packet, parse_header};
use super::types::{OUTER_HEADER_SIZE, OuterPacket, packet_name};
use crate::error::{AppError, Result};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Consumer of everything the reader task decodes.
///
/// Both callbacks run on the reader task and must not block on the
/// caller-side command lock.
pub trait PacketHandler: Send + Sync + 'static {
    /// One complete outer packet.
    fn on_packet(&self, packet: OuterPacket);

    /// The reader task has exited. Called exactly once per connection, and
    /// always before the next `open` on the same transport returns.
    fn on_disconnect(&self);
}

/// One open connection. Replaced wholesale on every `open`.
struct Link {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    connected: AtomicBool,
    stop: Notify,
}

impl Link {
    /// Mark closed and wake the reader so it exits.
    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }
}

/// Owns the socket to the bridge and the reader task draining it.
pub struct PacketTransport {
    link: Mutex<Option<Arc<Link>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connect_timeout: Duration,
}

impl PacketTransport {
    /// Create a closed transport.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            link: Mutex::new(None),
            reader: Mutex::new(None),
            connect_timeout,
        }
    }

    /// Connect to the bridge and start the reader task.
    pub async fn open(&self, host: &str, port: u16, handler: Arc<dyn PacketHandler>) -> Result<()> {
        if self.is_connected() {
            return Err(AppError::AlreadyConnected);
        }

        // The previous reader must finish its disconnect callback before a
        // new connection can install waiters on the same handler.
        let previous = self.lock_reader().take();
        if let Some(handle) = previous {
            let _ = handle.await;
        }

        let addr = format!("{host}:{port}");
        info!("Connecting to bridge at {addr} (timeout={:?})", self.connect_timeout);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                error!("Connection timeout to {addr}");
                AppError::ConnectionFailed(format!("Connection timeout to {addr}"))
            })?
            .map_err(|e| {
                error!("Failed to connect to {addr}: {e}");
                AppError::ConnectionFailed(format!("Failed to connect to {addr}: {e}"))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {addr}: {e}");
        }

        let (reader, writer) = stream.into_split();
        let link = Arc::new(Link {
            writer: tokio::sync::Mutex::new(writer),
            connected: AtomicBool::new(true),
            stop: Notify::new(),
        });

        {
            let mut slot = self.lock_link();
            // Another caller may have raced us through the check above.
            if slot.as_ref().is_some_and(|l| l.connected.load(Ordering::SeqCst)) {
                return Err(AppError::AlreadyConnected);
            }
            *slot = Some(Arc::clone(&link));
        }

        *self.lock_reader() = Some(tokio::spawn(read_loop(reader, link, handler)));
        info!("Connected to bridge at {addr}");
        Ok(())
    }

    /// Whether the socket is open and the reader task still running.
    pub fn is_connected(&self) -> bool {
        self.lock_link()
            .as_ref()
            .is_some_and(|l| l.connected.load(Ordering::SeqCst))
    }

    /// Write one framed packet. The full packet is written or the call fails.
    pub async fn send(&self, packet_type: u8, payload: &[u8]) -> Result<()> {
        let link = self
            .lock_link()
            .as_ref()
            .filter(|l| l.connected.load(Ordering::SeqCst))
            .cloned()
            .ok_or(AppError::NotConnected)?;

        let packet = build_packet(packet_type, payload)?;
        debug!(
            "TX {} ({} bytes): {:02X?}",
            packet_name(packet_type),
            payload.len(),
            &packet[..packet.len().min(32)]
        );

        let mut writer = link.writer.lock().await;
        writer.write_all(&packet).await.map_err(|e| {
            error!("Write failed: {e}");
            link.close();
            AppError::ConnectionFailed(format!("Write failed: {e}"))
        })
    }

    /// Close the connection. Safe to call repeatedly and from any task.
    ///
    /// The reader task observes the stop request, exits and reports the
    /// disconnect on its own.
    pub fn disconnect(&self) {
        if let Some(link) = self.lock_link().take() {
            info!("Disconnecting from bridge");
            link.close();
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<Arc<Link>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reader(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PacketTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reader task: decode packets until EOF, error, or stop request.
async fn read_loop(mut reader: OwnedReadHalf, link: Arc<Link>, handler: Arc<dyn PacketHandler>) {
    loop {
        let result = tokio::select! {
            _ = link.stop.notified() => {
                debug!("Reader stop requested");
                break;
            }
            result = read_packet(&mut reader) => result,
        };

        match result {
            Ok(Some(packet)) => {
                debug!(
                    "RX {} ({} bytes): {:02X?}",
                    packet_name(packet.packet_type),
                    packet.payload.len(),
                    &packet.payload[..packet.payload.len().min(32)]
                );
                handler.on_packet(packet);
            }
            Ok(None) => {
                info!("Bridge closed the connection");
                break;
            }
            Err(e) => {
                error!("Reader stopped: {e}");
                break;
            }
        }
    }

    link.connected.store(false, Ordering::SeqCst);
    handler.on_disconnect();
}

/// Read one packet. `Ok(None)` means the peer closed the stream.
async fn read_packet(reader: &mut OwnedReadHalf) -> Result<Option<OuterPacket>> {
    let mut header = [0u8; OUTER_HEADER_SIZE];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }

    let (packet_type, length) = parse_header(&header);
    let mut payload = vec![0u8; length];
    if !read_exact_or_eof(reader, &mut payload).await? {
        warn!("Stream ended inside a {length}-byte payload");
        return Ok(None);
    }

    Ok(Some(OuterPacket { packet_type, payload }))
}

/// Fill `buf` completely. Returns `false` on EOF.
async fn read_exact_or_eof(reader: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(AppError::ConnectionFailed(format!("Read failed: {e}"))),
    }
}

/// Quick reachability probe used before opening a full connection.
pub async fn is_port_open(host: &str, port: u16, probe_timeout: Duration) -> bool {
    matches!(
        timeout(probe_timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
