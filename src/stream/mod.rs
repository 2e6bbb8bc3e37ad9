//! Bidirectional packet streams.
//!
//! A [`Stream`] is the unit everything else in this crate composes over: a
//! bounded incoming channel of packets, a bounded outgoing sink, and a done
//! signal that fires once when the stream closes or disconnects. A stream
//! could be attached to anything from a tunnel interface to a single TCP
//! connection.
//!
//! Streams are lossy by contract. The outgoing side may drop packets under
//! backpressure (the non-blocking [`Stream::try_send`] reports
//! [`WriteBufferFull`]; multiplex fan-out drops silently), which is the
//! right behavior for a packet network: the transport layers above recover.
//!
//! Ownership of the packet bytes transfers with every channel send. Holders
//! may freely mutate a packet in place through the [`wire`] views before
//! forwarding it; nobody else aliases the buffer.
//!
//! [`WriteBufferFull`]: crate::error::Error::WriteBufferFull
//! [`wire`]: crate::wire

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

mod conn;
mod deadline;
mod filter;
mod multiplex;

pub use self::conn::StreamConn;
pub(crate) use self::deadline::DeadlineManager;
pub use self::filter::{filter, FilterFn};
pub use self::multiplex::MultiStream;

/// A bidirectional stream of packets with a done signal.
pub struct Stream {
    incoming: mpsc::Receiver<Vec<u8>>,
    outgoing: mpsc::Sender<Vec<u8>>,
    done: CancellationToken,
}

impl Stream {
    /// Create two endpoints connected back to back.
    ///
    /// Each direction is one bounded channel of capacity `buffer` (at least
    /// one), so the endpoints exert mutual backpressure. The done signal is
    /// shared: closing either endpoint closes both.
    pub fn pipe(buffer: usize) -> (Stream, Stream) {
        let capacity = buffer.max(1);
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let done = CancellationToken::new();
        let a = Stream { incoming: a_rx, outgoing: a_tx, done: done.clone() };
        let b = Stream { incoming: b_rx, outgoing: b_tx, done };
        (a, b)
    }

    /// Assemble a stream from raw parts.
    ///
    /// This is the constructor for adapters that bridge a stream onto some
    /// other transport, such as the tunnel device. The adapter's tasks are
    /// expected to select on `done` and to drop the `incoming` sender when
    /// the underlying transport goes away.
    pub fn from_parts(incoming: mpsc::Receiver<Vec<u8>>,
                      outgoing: mpsc::Sender<Vec<u8>>,
                      done: CancellationToken) -> Stream {
        Stream { incoming, outgoing, done }
    }

    /// Receive the next incoming packet.
    ///
    /// Buffered packets are delivered even after the done signal has fired;
    /// `None` means the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            packet = self.incoming.recv() => packet,
            _ = self.done.cancelled() => None,
        }
    }

    /// Receive without waiting. `None` when nothing is queued right now.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.incoming.try_recv().ok()
    }

    /// Send a packet, waiting for channel capacity.
    pub async fn send(&self, packet: Vec<u8>) -> Result<()> {
        if self.done.is_cancelled() {
            return Err(Error::StreamClosed);
        }
        tokio::select! {
            result = self.outgoing.send(packet) => {
                result.map_err(|_| Error::StreamClosed)
            }
            _ = self.done.cancelled() => Err(Error::StreamClosed),
        }
    }

    /// Send a packet without waiting.
    ///
    /// Returns [`WriteBufferFull`] when the outgoing channel has no
    /// capacity; the caller is expected to drop the packet.
    ///
    /// [`WriteBufferFull`]: Error::WriteBufferFull
    pub fn try_send(&self, packet: Vec<u8>) -> Result<()> {
        if self.done.is_cancelled() {
            return Err(Error::StreamClosed);
        }
        match self.outgoing.try_send(packet) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::WriteBufferFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::StreamClosed),
        }
    }

    /// Fire the done signal.
    ///
    /// Every task tied to this stream selects on the signal and stops
    /// promptly; closing is idempotent.
    pub fn close(&self) {
        self.done.cancel();
    }

    /// Whether the done signal has fired.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// A handle on the done signal, for selecting in external loops.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub(crate) fn into_parts(self) -> (mpsc::Receiver<Vec<u8>>, mpsc::Sender<Vec<u8>>, CancellationToken) {
        (self.incoming, self.outgoing, self.done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_round_trip() {
        let (a, mut b) = Stream::pipe(4);
        a.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"ping");
        b.send(b"pong".to_vec()).await.unwrap();
        let mut a = a;
        assert_eq!(a.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn close_propagates_to_peer() {
        let (a, mut b) = Stream::pipe(4);
        a.close();
        assert!(b.is_closed());
        assert!(b.recv().await.is_none());
        assert_eq!(b.send(vec![1]).await, Err(Error::StreamClosed));
    }

    #[tokio::test]
    async fn buffered_packets_survive_close() {
        let (a, mut b) = Stream::pipe(4);
        a.send(vec![1]).await.unwrap();
        a.send(vec![2]).await.unwrap();
        a.close();
        assert_eq!(b.recv().await.unwrap(), vec![1]);
        assert_eq!(b.recv().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn try_send_reports_full() {
        let (a, _b) = Stream::pipe(1);
        a.try_send(vec![1]).unwrap();
        assert_eq!(a.try_send(vec![2]), Err(Error::WriteBufferFull));
    }

    #[tokio::test]
    async fn send_after_close_refused() {
        let (a, b) = Stream::pipe(1);
        b.close();
        assert_eq!(a.try_send(vec![1]), Err(Error::StreamClosed));
    }
}
