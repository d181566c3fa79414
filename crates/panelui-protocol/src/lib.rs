//! # panelui-protocol
//!
//! panelui wire message types and codec.
//!
//! This crate defines the JSON messages exchanged over the control channel
//! (WebSocket text frames) and the bounded-size chunking used to stream a
//! frame out without building the whole payload at once.

pub mod codec;
pub mod messages;

pub use codec::{
    decode_client_message, encode_interface_frames, encode_value_frames, CodecError,
};
pub use messages::{
    is_null_sentinel, ClientMessage, Control, Submission, ValueRecord, PKG_INTERFACE, PKG_POST,
    PKG_VALUE,
};
