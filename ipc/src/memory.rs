//! In-process channel pairs backed by `std::sync::mpsc`

use crate::{Channel, ChannelError, Message};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Creates two connected channel ends
///
/// Messages sent on one end are received, in order, on the other.
pub fn duplex() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, a_rx) = mpsc::channel::<Message>();
    let (b_tx, b_rx) = mpsc::channel::<Message>();
    (MemoryChannel::new(a_tx, b_rx), MemoryChannel::new(b_tx, a_rx))
}

/// One end of an in-process duplex channel
pub struct MemoryChannel {
    outbound: Mutex<Option<Sender<Message>>>,
    inbound: Mutex<Receiver<Message>>,
}

impl MemoryChannel {
    fn new(outbound: Sender<Message>, inbound: Receiver<Message>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
        }
    }

    /// Checks whether `close` was called on this end
    pub fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        match self.outbound.lock().as_ref() {
            Some(sender) => sender.send(message).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    fn recv(&self) -> Result<Message, ChannelError> {
        self.inbound.lock().recv().map_err(|_| ChannelError::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        match self.inbound.lock().recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn close(&self) {
        self.outbound.lock().take();
    }
}
