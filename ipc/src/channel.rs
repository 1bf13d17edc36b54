//! Channel abstraction for message passing

use crate::Message;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer disconnected, or this end was closed
    #[error("channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Codec(err.to_string())
    }
}

/// An already-connected duplex message channel
///
/// Implementations must tolerate one receiver and any number of senders
/// calling concurrently. Once the peer is gone, receiving fails with
/// [`ChannelError::Closed`] after buffered messages are consumed; it never
/// blocks forever on a dead peer.
pub trait Channel: Send + Sync {
    /// Sends a message to the peer
    fn send(&self, message: Message) -> Result<(), ChannelError>;

    /// Receives the next message, blocking until one arrives
    fn recv(&self) -> Result<Message, ChannelError>;

    /// Receives the next message, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError>;

    /// Closes the sending side of this end
    ///
    /// The peer observes [`ChannelError::Closed`] once it has drained what
    /// was already sent. Closing twice is a no-op.
    fn close(&self);
}

impl<C: Channel + ?Sized> Channel for std::sync::Arc<C> {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        (**self).send(message)
    }

    fn recv(&self) -> Result<Message, ChannelError> {
        (**self).recv()
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        (**self).recv_timeout(timeout)
    }

    fn close(&self) {
        (**self).close()
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        (**self).send(message)
    }

    fn recv(&self) -> Result<Message, ChannelError> {
        (**self).recv()
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        (**self).recv_timeout(timeout)
    }

    fn close(&self) {
        (**self).close()
    }
}
