//! Server-side connection establishment.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::wire::{tcp4, Flags};

/// Attempts before the handshake gives up.
const HANDSHAKE_RETRIES: usize = 10;
/// Gap between SYN-ACK retransmissions.
const RETRY_GAP: Duration = Duration::from_secs(1);
/// Window advertised in the SYN-ACK.
const HANDSHAKE_WINDOW: u16 = 1000;
/// Segment size assumed for the peer.
const DEFAULT_MSS: u16 = 128;

/// The parameters a completed handshake hands to the connection.
pub(crate) struct Handshake {
    /// Our first usable sequence number (ISN + 1).
    pub(crate) local_seq: u32,
    /// The peer's first data byte (its ISN + 1).
    pub(crate) remote_seq: u32,
    /// The peer's advertised window from its ACK.
    pub(crate) remote_window: u16,
    /// Largest segment to send the peer.
    pub(crate) mss: u16,
}

/// Run the server side of the three-way handshake.
///
/// `syn` is the packet that triggered the accept; the stream carries the
/// rest of the exchange. The SYN-ACK is retransmitted up to ten times at
/// one-second intervals until an ACK with the matching acknowledgment
/// number (and no SYN) arrives.
pub(crate) async fn server_handshake(stream: &mut Stream, syn: &[u8], ttl: u8)
                                     -> Result<Handshake> {
    let (src, dst, remote_isn) = {
        let syn = tcp4::new_unchecked(syn);
        (syn.dst_endpoint(), syn.src_endpoint(), syn.seq_number())
    };
    let local_isn: u32 = rand::random();

    let syn_ack = tcp4::buffer(ttl, src, dst, local_isn, remote_isn.wrapping_add(1),
                               HANDSHAKE_WINDOW, &[], Flags::SYN | Flags::ACK);

    for _ in 0..HANDSHAKE_RETRIES {
        if stream.is_closed() {
            return Err(Error::StreamClosed);
        }
        let _ = stream.try_send(syn_ack.clone());

        let retry_at = tokio::time::sleep(RETRY_GAP);
        tokio::pin!(retry_at);
        loop {
            tokio::select! {
                _ = &mut retry_at => break,
                packet = stream.recv() => {
                    let Some(packet) = packet else {
                        return Err(Error::StreamClosed);
                    };
                    let tp = tcp4::new_unchecked(&packet);
                    let flags = tp.flags();
                    if flags.contains(Flags::ACK) && !flags.contains(Flags::SYN)
                        && tp.ack_number() == local_isn.wrapping_add(1)
                    {
                        return Ok(Handshake {
                            local_seq: local_isn.wrapping_add(1),
                            remote_seq: remote_isn.wrapping_add(1),
                            remote_window: tp.window_size(),
                            // TODO: parse the MSS option out of the SYN
                            // instead of assuming a constant.
                            mss: DEFAULT_MSS,
                        });
                    }
                }
            }
        }
    }
    Err(Error::HandshakeFailed)
}
