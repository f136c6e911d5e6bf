//! Binary wire protocol.
//!
//! - `message`: the `Message` value type and type codes
//! - `frame`: length-prefixed encode/decode, per-connection decode buffer,
//!   and async helpers for clients
pub mod frame;
pub mod message;

pub use frame::{decode, encode, encode_into, Decoded, FrameDecoder};
pub use message::{Message, MessageType, MAX_MESSAGE_SIZE};
