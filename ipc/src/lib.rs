//! # Inter-Process Communication (IPC)
//!
//! This crate defines the message and channel primitives the remote-call
//! layer is built on.
//!
//! ## Philosophy
//!
//! - **Messages, not bytes**: Callers exchange structured [`Message`]s; framing
//!   is the channel's business
//! - **Correlated**: Every message carries a [`Tag`] for request/response matching
//! - **Transport-agnostic**: Anything implementing [`Channel`] can carry messages
//!
//! ## Architecture
//!
//! A message is a 4-tuple:
//! - Tag (correlation identifier)
//! - Kind (request or response)
//! - Function name being invoked or answered
//! - Type-erased payload
//!
//! Two channel implementations ship with the crate: [`MemoryChannel`] for
//! in-process pairs and [`StreamChannel`] for pipes and sockets.

pub mod channel;
pub mod memory;
pub mod message;
pub mod stream;

pub use channel::{Channel, ChannelError};
pub use core_types::Tag;
pub use memory::{duplex, MemoryChannel};
pub use message::{Message, MessageKind, MessagePayload};
pub use stream::{StreamChannel, MAX_FRAME_LEN};
