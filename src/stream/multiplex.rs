//! Stream multiplexing.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use super::Stream;

/// A parent stream fanned out to any number of forked children.
///
/// Every incoming packet on the parent is copied to each child; the copies
/// are independent because children mutate headers in place. Fan-out to a
/// child whose incoming queue is full drops that child's copy only: the
/// incoming side is lossy, per-child FIFO, with no cross-child ordering
/// guarantee. Child writes forward into the parent's outgoing side with
/// backpressure.
///
/// Closing the multi-stream closes the parent and every child. Closing a
/// single child detaches it and leaves the rest undisturbed.
#[derive(Clone)]
pub struct MultiStream {
    shared: Arc<Shared>,
}

struct Shared {
    children: Mutex<Vec<ChildHandle>>,
    outgoing: mpsc::Sender<Vec<u8>>,
    done: CancellationToken,
}

struct ChildHandle {
    tx: mpsc::Sender<Vec<u8>>,
    done: CancellationToken,
}

impl MultiStream {
    /// Multiplex a stream, spawning its fan-out task.
    ///
    /// The underlying stream should not be used anymore.
    pub fn new(stream: Stream) -> MultiStream {
        let (mut parent_rx, parent_tx, done) = stream.into_parts();
        let shared = Arc::new(Shared {
            children: Mutex::new(Vec::new()),
            outgoing: parent_tx,
            done,
        });

        let reader = shared.clone();
        tokio::spawn(async move {
            loop {
                let packet = tokio::select! {
                    biased;
                    packet = parent_rx.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                    _ = reader.done.cancelled() => break,
                };

                let mut children = reader.children.lock();
                children.retain(|child| !child.done.is_cancelled());
                for child in children.iter() {
                    if child.tx.try_send(packet.clone()).is_err() {
                        debug!("multiplex fan-out dropped a packet on a full child");
                    }
                }
            }

            // The parent is gone; tear down every child so their incoming
            // channels close and their done signals fire.
            reader.done.cancel();
            for child in reader.children.lock().drain(..) {
                child.done.cancel();
            }
        });

        MultiStream { shared }
    }

    /// Fork a child stream with an incoming queue of `buffer` packets.
    pub fn fork(&self, buffer: usize) -> Result<Stream> {
        if self.shared.done.is_cancelled() {
            return Err(Error::StreamClosed);
        }

        let capacity = buffer.max(1);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(capacity);
        let child_done = self.shared.done.child_token();

        self.shared.children.lock().push(ChildHandle {
            tx: in_tx,
            done: child_done.clone(),
        });

        let parent_tx = self.shared.outgoing.clone();
        let done = child_done.clone();
        tokio::spawn(async move {
            loop {
                let packet = tokio::select! {
                    biased;
                    packet = out_rx.recv() => match packet {
                        Some(packet) => packet,
                        None => break,
                    },
                    _ = done.cancelled() => break,
                };
                tokio::select! {
                    result = parent_tx.send(packet) => if result.is_err() { break },
                    _ = done.cancelled() => break,
                }
            }
        });

        Ok(Stream::from_parts(in_rx, out_tx, child_done))
    }

    /// Close the parent stream and every child.
    pub fn close(&self) {
        self.shared.done.cancel();
        for child in self.shared.children.lock().drain(..) {
            child.done.cancel();
        }
    }

    /// Whether the multi-stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// A handle on the parent's done signal.
    pub fn done(&self) -> CancellationToken {
        self.shared.done.clone()
    }
}
