//! BLE bridge TCP protocol client.
//!
//! Talks to the BLE-to-TCP bridge over a persistent connection. Outer packets
//! carry either raw data, bridge queries, or device frames; the command
//! service turns the asynchronous reply stream into awaited calls.

mod frame;
mod packet;
mod parser;
mod service;
mod transfer;
mod transport;
mod types;


// Re-export public API
pub use frame::{build_frame, parse_frame};
pub use packet::{build_packet, parse_header};
pub use parser::{
    DeviceInfo, DeviceStatus, PicState, parse_info_response, parse_pic_state_response, parse_status_response,
};
pub use service::{CommandService, DeviceEvent};
pub use transfer::{ChunkPlan, plan_chunks};
pub use transport::{PacketHandler, PacketTransport, is_port_open};
pub use types::{
    APPEARANCE_KEYBOARD, APPEARANCES, DeviceCmd, HostState, KeySubType, MAX_CHUNK, OuterPacket, PKT_BLE_NOTIFY,
    PKT_INFO_RESP, PKT_QUERY_INFO, PKT_QUERY_STATUS, PKT_STATUS_RESP, PKT_WRITE_CMD, PKT_WRITE_DATA, WRITE_ALIGNMENT,
    appearance_by_name, packet_name,
};
