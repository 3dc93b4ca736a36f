//! WebSocket framing (RFC 6455).
//!
//! - [`Frame`] / [`FrameHeader`]: whole-frame codec
//! - [`FrameDecoder`]: streaming decoder driving [`FrameHandler`] hooks
//! - [`WsSession`]: per-connection state machine that reassembles messages
//!   and turns them into dispatcher jobs for a [`WebSocketHandler`]
//! - [`HandshakeRequest`] / [`HandshakeResponse`]: server upgrade handshake
//!
//! Extensions (permessage-deflate) are not negotiated; RSV bits must be zero.

mod close;
mod decoder;
mod frame;
mod handshake;
mod mask;
mod message;
mod opcode;
mod role;
mod session;

pub use close::{CloseCode, CloseFrame, MAX_CLOSE_REASON};
pub use decoder::{FrameDecoder, FrameHandler};
pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, MAX_HEADER_LEN};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key, reject_response,
};
pub use mask::{apply_mask, apply_mask_at, random_mask};
pub use message::Message;
pub use opcode::OpCode;
pub use role::Role;
pub use session::{WebSocketHandler, WsContext, WsSession};
