//! Parley wire protocol
//!
//! The operator console talks to the messaging server over a single WebSocket
//! carrying Engine.IO / Socket.IO v4 text packets. This crate owns both layers:
//!
//! - [`Packet`] / [`SocketPacket`]: the framing (open handshake, ping/pong,
//!   connect, events, connect errors)
//! - [`Command`] / [`ServerEvent`]: typed chat events carried inside Socket.IO
//!   event packets, one variant per [`EventName`]
//!
//! Nothing here performs I/O. The connection state machine in `parley-core`
//! decides when packets are sent; drivers move the encoded text.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod packet;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use packet::{Handshake, Packet, SocketPacket};
pub use payloads::{
    ChatHistory, ChatListEntry, ChatListRequest, Command, ErrorResponse, EventName,
    HistoryRequest, SendMessage, ServerEvent, WireMessage, WireRole, WireTime, WireUser,
};
