//! Packet filtering on a stream.

use tokio::sync::mpsc;

use super::Stream;

/// A function that modifies or drops packets.
///
/// The function may rewrite the packet in place or build an entirely new
/// one; returning `None` drops the packet altogether.
pub type FilterFn = Box<dyn FnMut(Vec<u8>) -> Option<Vec<u8>> + Send>;

/// Wrap a stream so the functions process or drop packets in each
/// direction.
///
/// The underlying stream should not be used anymore; all operations go
/// through the returned stream. Filters compose, preserve order within a
/// direction, and stop forwarding once the stream's done signal fires. A
/// direction with no function passes through without an extra hop.
pub fn filter(stream: Stream, incoming: Option<FilterFn>, outgoing: Option<FilterFn>) -> Stream {
    let (mut parent_rx, parent_tx, done) = stream.into_parts();

    let incoming_rx = match incoming {
        None => parent_rx,
        Some(mut func) => {
            let (tx, rx) = mpsc::channel(1);
            let done = done.clone();
            tokio::spawn(async move {
                loop {
                    let packet = tokio::select! {
                        biased;
                        packet = parent_rx.recv() => match packet {
                            Some(packet) => packet,
                            None => break,
                        },
                        _ = done.cancelled() => break,
                    };
                    if done.is_cancelled() {
                        break;
                    }
                    if let Some(packet) = func(packet) {
                        tokio::select! {
                            result = tx.send(packet) => if result.is_err() { break },
                            _ = done.cancelled() => break,
                        }
                    }
                }
            });
            rx
        }
    };

    let outgoing_tx = match outgoing {
        None => parent_tx,
        Some(mut func) => {
            let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
            let done = done.clone();
            tokio::spawn(async move {
                loop {
                    let packet = tokio::select! {
                        biased;
                        packet = rx.recv() => match packet {
                            Some(packet) => packet,
                            None => break,
                        },
                        _ = done.cancelled() => break,
                    };
                    if done.is_cancelled() {
                        break;
                    }
                    if let Some(packet) = func(packet) {
                        tokio::select! {
                            result = parent_tx.send(packet) => if result.is_err() { break },
                            _ = done.cancelled() => break,
                        }
                    }
                }
            });
            tx
        }
    };

    Stream::from_parts(incoming_rx, outgoing_tx, done)
}
