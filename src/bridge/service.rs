//! Command service: request/response correlation over the bridge connection.
//!
//! Every device command holds `command_lock` from compose to reply, so at most
//! one command is outstanding on the wire. The reader task never takes that
//! lock; it resolves the waiting caller through a per-call oneshot installed
//! in the pending slot before the frame is sent.

use super::frame::{build_frame, parse_frame};
use super::parser::{
    DeviceInfo, DeviceStatus, PicState, parse_info_response, parse_pic_state_response, parse_status_response,
};
use super::transport::{PacketHandler, PacketTransport};
use super::types::{
    DeviceCmd, HostState, KeySubType, OuterPacket, PKT_BLE_NOTIFY, PKT_INFO_RESP, PKT_QUERY_INFO, PKT_QUERY_STATUS,
    PKT_STATUS_RESP, PKT_WRITE_CMD, packet_name,
};
use crate::error::{AppError, Result};
use crate::keymap::{self, KeyBinding};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;
const MAX_NAME_LEN: usize = 20;

/// Notifications for observers (UI, hooks, CLI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Bridge connection opened or lost.
    Connection(bool),
    /// A status response arrived.
    Status(DeviceStatus),
    /// An info response arrived.
    Info(DeviceInfo),
    /// Large write progress after each acknowledged chunk.
    Progress { sent: usize, total: usize },
    /// A device frame that no call was waiting for.
    Notify { cmd: u8, data: Vec<u8> },
}

/// Decoded device frame delivered to a waiting call.
#[derive(Debug)]
struct DeviceFrame {
    cmd: u8,
    data: Vec<u8>,
}

/// Waiters installed by callers and resolved by the reader task.
#[derive(Default)]
struct Pending {
    frame: Option<oneshot::Sender<DeviceFrame>>,
    status: Option<oneshot::Sender<DeviceStatus>>,
    info: Option<oneshot::Sender<DeviceInfo>>,
}

/// State shared between callers and the reader task.
struct Shared {
    pending: Mutex<Pending>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl PacketHandler for Shared {
    fn on_packet(&self, packet: OuterPacket) {
        match packet.packet_type {
            PKT_BLE_NOTIFY => {
                let Some((cmd, data)) = parse_frame(&packet.payload) else {
                    debug!("Dropping malformed device frame: {:02X?}", packet.payload);
                    return;
                };
                let frame = DeviceFrame {
                    cmd,
                    data: data.to_vec(),
                };
                let waiter = self.lock().frame.take();
                let unclaimed = match waiter {
                    Some(tx) => tx.send(frame).err(),
                    None => Some(frame),
                };
                if let Some(frame) = unclaimed {
                    debug!("Unsolicited device frame 0x{:02X}", frame.cmd);
                    self.emit(DeviceEvent::Notify {
                        cmd: frame.cmd,
                        data: frame.data,
                    });
                }
            }
            PKT_STATUS_RESP => {
                let status = parse_status_response(&packet.payload);
                if let Some(tx) = self.lock().status.take() {
                    let _ = tx.send(status.clone());
                }
                self.emit(DeviceEvent::Status(status));
            }
            PKT_INFO_RESP => {
                let info = parse_info_response(&packet.payload);
                if let Some(tx) = self.lock().info.take() {
                    let _ = tx.send(info);
                }
                self.emit(DeviceEvent::Info(info));
            }
            other => debug!("Ignoring packet {} (0x{other:02X})", packet_name(other)),
        }
    }

    fn on_disconnect(&self) {
        // Dropping the senders wakes every waiter with ConnectionClosed.
        *self.lock() = Pending::default();
        self.emit(DeviceEvent::Connection(false));
    }
}

/// Synchronous-style device API over the asynchronous bridge connection.
pub struct CommandService {
    transport: PacketTransport,
    shared: Arc<Shared>,
    command_lock: tokio::sync::Mutex<()>,
    status_lock: tokio::sync::Mutex<()>,
    info_lock: tokio::sync::Mutex<()>,
    timeout: Duration,
}

impl CommandService {
    /// Create a disconnected service.
    ///
    /// `timeout` bounds the convenience wrappers; `connect_timeout` bounds the
    /// TCP connect.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport: PacketTransport::new(connect_timeout),
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending::default()),
                events,
            }),
            command_lock: tokio::sync::Mutex::new(()),
            status_lock: tokio::sync::Mutex::new(()),
            info_lock: tokio::sync::Mutex::new(()),
            timeout,
        }
    }

    /// Default reply timeout for the wrapper operations.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Subscribe to connection, status, info, progress and notify events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    /// Connect to the bridge.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let handler: Arc<dyn PacketHandler> = self.shared.clone();
        self.transport.open(host, port, handler).await?;
        self.shared.emit(DeviceEvent::Connection(true));
        Ok(())
    }

    /// Close the bridge connection. Idempotent.
    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// Check if connected to the bridge.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Send a device command and wait for its acknowledgment.
    ///
    /// One-shot: no retry on timeout, mismatch or device error.
    pub async fn send_command(&self, cmd: u8, data: &[u8], timeout: Duration) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        let payload = self.transact(cmd, data, timeout).await?;
        check_status(cmd, &payload)
    }

    /// Send a device command without waiting for any reply.
    pub async fn send_command_no_reply(&self, cmd: u8, data: &[u8]) -> Result<()> {
        let _guard = self.command_lock.lock().await;
        self.transport.send(PKT_WRITE_CMD, &build_frame(cmd, data)).await
    }

    /// Send one frame and await the frame answering `cmd`.
    ///
    /// Caller must hold `command_lock`.
    pub(crate) async fn transact(&self, cmd: u8, data: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let frame = build_frame(cmd, data);
        self.exchange(PKT_WRITE_CMD, &frame, cmd, timeout).await
    }

    /// Send a packet and await the next device frame, expecting `expected`.
    ///
    /// Caller must hold `command_lock`.
    pub(crate) async fn exchange(
        &self,
        packet_type: u8,
        payload: &[u8],
        expected: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        // Replacing the slot discards anything left over from an earlier call.
        self.shared.lock().frame = Some(tx);

        if let Err(e) = self.transport.send(packet_type, payload).await {
            self.shared.lock().frame = None;
            return Err(e);
        }

        let frame = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => {
                warn!("Connection closed while waiting for 0x{expected:02X}");
                return Err(AppError::ConnectionClosed);
            }
            Err(_) => {
                self.shared.lock().frame = None;
                warn!("Timed out after {timeout:?} waiting for 0x{expected:02X}");
                return Err(AppError::Timeout {
                    cmd: expected,
                    waited: timeout,
                });
            }
        };

        if frame.cmd != expected {
            warn!("Unexpected response 0x{:02X}, expected 0x{expected:02X}", frame.cmd);
            return Err(AppError::UnexpectedResponse {
                expected,
                actual: frame.cmd,
            });
        }
        Ok(frame.data)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Ask the bridge for BLE status; the answer arrives as `DeviceEvent::Status`.
    pub async fn query_status(&self) -> Result<()> {
        self.transport.send(PKT_QUERY_STATUS, &[]).await
    }

    /// Ask the bridge for device info; the answer arrives as `DeviceEvent::Info`.
    pub async fn query_info(&self) -> Result<()> {
        self.transport.send(PKT_QUERY_INFO, &[]).await
    }

    /// Query BLE status and wait for the reply.
    pub async fn fetch_status(&self, timeout: Duration) -> Result<DeviceStatus> {
        let _guard = self.status_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        self.shared.lock().status = Some(tx);
        let result = self.await_reply(PKT_QUERY_STATUS, PKT_STATUS_RESP, rx, timeout).await;
        if result.is_err() {
            self.shared.lock().status = None;
        }
        result
    }

    /// Query device info and wait for the reply.
    pub async fn fetch_info(&self, timeout: Duration) -> Result<DeviceInfo> {
        let _guard = self.info_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        self.shared.lock().info = Some(tx);
        let result = self.await_reply(PKT_QUERY_INFO, PKT_INFO_RESP, rx, timeout).await;
        if result.is_err() {
            self.shared.lock().info = None;
        }
        result
    }

    async fn await_reply<T>(
        &self,
        query: u8,
        reply: u8,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T> {
        self.transport.send(query, &[]).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AppError::ConnectionClosed),
            Err(_) => Err(AppError::Timeout {
                cmd: reply,
                waited: timeout,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Device operations
    // ------------------------------------------------------------------

    /// Persist animation and key configuration on the device.
    pub async fn save_config(&self) -> Result<()> {
        info!("Saving device configuration");
        self.send_command(DeviceCmd::SaveConfig.into(), &[], self.timeout).await
    }

    /// Read the animation state of one display mode.
    pub async fn read_pic_state(&self, mode: u8) -> Result<PicState> {
        let cmd = DeviceCmd::ReadPicState as u8;
        let _guard = self.command_lock.lock().await;
        let payload = self.transact(cmd, &[mode], self.timeout).await?;
        check_status(cmd, &payload)?;
        Ok(parse_pic_state_response(&payload[1..]))
    }

    /// Send raw custom-key data for one key of one mode.
    pub async fn update_custom_key(&self, mode: u8, key_index: u8, sub_type: KeySubType, data: &[u8]) -> Result<()> {
        keymap::validate_slot(mode, key_index)?;
        keymap::validate_key_data(sub_type, data)?;

        let mut payload = Vec::with_capacity(3 + data.len());
        payload.extend_from_slice(&[sub_type as u8, mode, key_index]);
        payload.extend_from_slice(data);

        debug!("Updating key {key_index} in mode {mode}: {sub_type:?} ({} bytes)", data.len());
        self.send_command(DeviceCmd::UpdateCustomKey.into(), &payload, self.timeout)
            .await
    }

    /// Encode and send a key binding.
    pub async fn set_key_binding(&self, mode: u8, key_index: u8, binding: &KeyBinding) -> Result<()> {
        let data = binding.encode()?;
        self.update_custom_key(mode, key_index, binding.sub_type(), &data)
            .await
    }

    /// Set the animation range and frame rate of a display mode.
    pub async fn update_pic(&self, mode: u8, start: u16, count: u16, fps: u16) -> Result<()> {
        if fps == 0 {
            return Err(AppError::validation("fps must be greater than 0"));
        }
        self.update_pic_interval(mode, start, count, 1000 / fps).await
    }

    /// Set the animation range with an explicit frame interval in milliseconds.
    pub async fn update_pic_interval(&self, mode: u8, start: u16, count: u16, interval_ms: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(7);
        payload.push(mode);
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&count.to_le_bytes());
        payload.extend_from_slice(&interval_ms.to_le_bytes());
        self.send_command(DeviceCmd::UpdatePic.into(), &payload, self.timeout)
            .await
    }

    /// Push the host application state to the display. Fire-and-forget.
    pub async fn update_state(&self, state: HostState) -> Result<()> {
        debug!("Pushing host state {}", state.name());
        self.send_command_no_reply(DeviceCmd::UpdateState.into(), &[state as u8])
            .await
    }

    /// Rename the device's BLE advertisement.
    pub async fn change_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(AppError::validation(format!(
                "Device name must be 1..={MAX_NAME_LEN} bytes, got {}",
                name.len()
            )));
        }
        self.send_command(DeviceCmd::ChangeName.into(), name.as_bytes(), self.timeout)
            .await
    }

    /// Change the BLE appearance value.
    pub async fn change_appearance(&self, appearance: u16) -> Result<()> {
        self.send_command(DeviceCmd::ChangeAppearance.into(), &appearance.to_le_bytes(), self.timeout)
            .await
    }

    /// Take the single-flight lock for a multi-step exchange.
    pub(crate) async fn lock_commands(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.command_lock.lock().await
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        self.shared.emit(event);
    }
}

/// First payload byte is the device status code; 0 means success.
pub(crate) fn check_status(cmd: u8, payload: &[u8]) -> Result<()> {
    match payload.first() {
        Some(0) => Ok(()),
        code => {
            warn!("Device error, cmd=0x{cmd:02X}, code={code:?}");
            Err(AppError::Device {
                cmd,
                code: code.copied(),
            })
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert!(check_status(0x04, &[0]).is_ok());
        assert!(check_status(0x04, &[0, 9, 9]).is_ok());
        assert!(matches!(
            check_status(0x04, &[3]),
            Err(AppError::Device { cmd: 0x04, code: Some(3) })
        ));
        assert!(matches!(
            check_status(0x04, &[]),
            Err(AppError::Device { cmd: 0x04, code: None })
        ));
    }
}
