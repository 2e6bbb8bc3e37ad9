//! Deadline-aware packet I/O over a stream.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use super::deadline::DeadlineManager;
use super::Stream;

/// A stream wrapped with per-direction deadlines.
///
/// This is the building block the datagram sockets use: reads and writes
/// move whole packets and honor the deadlines set with the `set_*` methods.
pub struct StreamConn {
    stream: Stream,
    read_deadline: DeadlineManager,
    write_deadline: DeadlineManager,
}

impl StreamConn {
    /// Wrap a stream.
    pub fn new(stream: Stream) -> StreamConn {
        StreamConn {
            stream,
            read_deadline: DeadlineManager::new(),
            write_deadline: DeadlineManager::new(),
        }
    }

    /// Receive the next packet, or time out.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let fired = self.read_deadline.fired();
        if fired.is_cancelled() {
            return Err(Error::Timeout("read"));
        }
        tokio::select! {
            biased;
            packet = self.stream.recv() => packet.ok_or(Error::StreamClosed),
            _ = fired.cancelled() => Err(Error::Timeout("read")),
        }
    }

    /// Send a packet, or time out.
    pub async fn write_packet(&self, packet: Vec<u8>) -> Result<()> {
        let fired = self.write_deadline.fired();
        if fired.is_cancelled() {
            return Err(Error::Timeout("write"));
        }
        tokio::select! {
            result = self.stream.send(packet) => result,
            _ = fired.cancelled() => Err(Error::Timeout("write")),
        }
    }

    /// Set both deadlines at once. `None` disarms them.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.read_deadline.set(deadline);
        self.write_deadline.set(deadline);
    }

    /// Set the read deadline.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.read_deadline.set(deadline);
    }

    /// Set the write deadline.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.write_deadline.set(deadline);
    }

    /// Close the underlying stream.
    pub fn close(&self) {
        self.stream.close();
    }

    /// A handle on the stream's done signal.
    pub fn done(&self) -> CancellationToken {
        self.stream.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn read_times_out() {
        let (near, _far) = Stream::pipe(1);
        let mut conn = StreamConn::new(near);
        conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));
        assert_eq!(conn.read_packet().await, Err(Error::Timeout("read")));
        // The deadline is sticky until reset.
        assert_eq!(conn.read_packet().await, Err(Error::Timeout("read")));
    }

    #[tokio::test]
    async fn read_and_write_move_packets() {
        let (near, mut far) = Stream::pipe(4);
        let mut conn = StreamConn::new(near);
        conn.write_packet(b"out".to_vec()).await.unwrap();
        assert_eq!(far.recv().await.unwrap(), b"out");
        far.send(b"in".to_vec()).await.unwrap();
        assert_eq!(conn.read_packet().await.unwrap(), b"in");
    }

    #[tokio::test]
    async fn closed_stream_errors() {
        let (near, far) = Stream::pipe(1);
        let mut conn = StreamConn::new(near);
        far.close();
        assert_eq!(conn.read_packet().await, Err(Error::StreamClosed));
        assert_eq!(conn.write_packet(vec![1]).await, Err(Error::StreamClosed));
    }
}
