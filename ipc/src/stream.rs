//! Length-prefixed message framing over byte streams
//!
//! Each frame is a 4-byte little-endian length followed by the JSON encoding
//! of one [`Message`]. A background thread owns the read half and decodes
//! frames into a queue, which gives every reader timed receives for free.

use crate::{Channel, ChannelError, Message};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// Largest accepted frame body, in bytes
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

type Inbound = Result<Message, ChannelError>;

/// A channel over any `Read` + `Write` pair
pub struct StreamChannel {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    inbound: Mutex<Receiver<Inbound>>,
}

impl StreamChannel {
    /// Wraps a reader and a writer
    ///
    /// Spawns the reader thread, which exits on end-of-stream, on a decode
    /// error, or once this channel is dropped.
    pub fn new<R, W>(reader: R, writer: W) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("ipc-stream-reader".to_string())
            .spawn(move || read_loop(reader, tx))?;

        Ok(Self {
            writer: Mutex::new(Some(Box::new(writer))),
            inbound: Mutex::new(rx),
        })
    }

    /// Builds a channel over a connected Unix socket
    ///
    /// Closing the channel shuts down the write direction of the socket.
    #[cfg(unix)]
    pub fn from_unix_stream(stream: std::os::unix::net::UnixStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        Self::new(reader, unix::WriteHalf(stream))
    }

    /// Creates two connected ends over a Unix socket pair
    #[cfg(unix)]
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix_stream(a)?, Self::from_unix_stream(b)?))
    }
}

impl Channel for StreamChannel {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(ChannelError::Closed)?;
        match write_frame(writer, &message) {
            Ok(()) => Ok(()),
            Err(ChannelError::Io(err)) if is_disconnect(&err) => {
                guard.take();
                Err(ChannelError::Closed)
            }
            Err(err) => Err(err),
        }
    }

    fn recv(&self) -> Result<Message, ChannelError> {
        match self.inbound.lock().recv() {
            Ok(inbound) => inbound,
            Err(_) => Err(ChannelError::Closed),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        match self.inbound.lock().recv_timeout(timeout) {
            Ok(inbound) => inbound.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn close(&self) {
        if let Some(mut writer) = self.writer.lock().take() {
            let _ = writer.flush();
        }
    }
}

/// Writes one frame
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, message: &Message) -> Result<(), ChannelError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Message>, ChannelError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

fn read_loop<R: Read>(mut reader: R, tx: Sender<Inbound>) {
    loop {
        match read_frame(&mut reader) {
            Ok(Some(message)) => {
                tracing::trace!(%message, "frame received");
                if tx.send(Ok(message)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("stream reached end of input");
                break;
            }
            Err(ChannelError::Io(err)) if is_disconnect(&err) => {
                tracing::debug!(error = %err, "stream disconnected");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping stream after unreadable frame");
                let _ = tx.send(Err(err));
                break;
            }
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(unix)]
mod unix {
    use std::io::{self, Write};
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream;

    /// Write side of a socket that half-closes on drop
    pub(super) struct WriteHalf(pub(super) UnixStream);

    impl Write for WriteHalf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl Drop for WriteHalf {
        fn drop(&mut self) {
            let _ = self.0.shutdown(Shutdown::Write);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessagePayload;
    use core_types::Tag;
    use serde_json::json;
    use std::io::Cursor;

    fn sample(tag: u64) -> Message {
        Message::request(
            Tag::new(tag),
            "echo",
            MessagePayload::from_value(json!({"nested": [1, 2, {"k": null}]})),
        )
    }

    #[test]
    fn test_frame_roundtrip_through_buffer() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample(1)).unwrap();
        write_frame(&mut buf, &sample(2)).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(sample(1)));
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(sample(2)));
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ChannelError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_garbage_body_is_codec_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(b"{{{");
        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor), Err(ChannelError::Codec(_))));
    }

    #[test]
    fn test_reader_side_reports_closed_after_input_ends() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample(5)).unwrap();
        let channel = StreamChannel::new(Cursor::new(buf), io::sink()).unwrap();

        assert_eq!(channel.recv().unwrap().tag, Tag::new(5));
        assert!(matches!(channel.recv(), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_send_after_close_fails() {
        let channel = StreamChannel::new(io::empty(), io::sink()).unwrap();
        channel.send(sample(1)).unwrap();
        channel.close();
        assert!(matches!(channel.send(sample(2)), Err(ChannelError::Closed)));
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_pair_roundtrip_and_close() {
        let (a, b) = StreamChannel::pair().unwrap();
        a.send(sample(1)).unwrap();
        b.send(sample(2)).unwrap();

        assert_eq!(b.recv().unwrap(), sample(1));
        assert_eq!(
            a.recv_timeout(Duration::from_secs(5)).unwrap(),
            Some(sample(2))
        );

        a.close();
        assert!(matches!(
            b.recv_timeout(Duration::from_secs(5)),
            Err(ChannelError::Closed)
        ));
    }
}
