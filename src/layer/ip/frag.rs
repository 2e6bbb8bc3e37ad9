//! IPv4 fragmentation and reassembly.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::stream::{filter, Stream};
use crate::wire::{ipv4, Address};

/// How long reassembly keeps fragments of a packet before dropping them.
pub const DEFAULT_DEFRAG_TIMEOUT: Duration = Duration::from_secs(1);

/// Split an IPv4 packet into fragments no larger than `mtu` octets.
///
/// The caller is expected to have stamped a unique identification already.
/// Fails with [`Unsupported`] when the packet forbids fragmentation or is
/// itself already a fragment, and when the MTU leaves no room for payload.
///
/// [`Unsupported`]: Error::Unsupported
pub fn fragment_packet(packet: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>> {
    if packet.len() < mtu {
        return Ok(vec![packet.to_vec()]);
    }

    let ip = ipv4::new_checked(packet)?;
    if ip.dont_frag() {
        return Err(Error::Unsupported("fragmenting a don't-fragment packet"));
    }
    if ip.is_fragment() {
        return Err(Error::Unsupported("fragmenting a fragment"));
    }

    let header = ip.header_slice();
    let payload = ip.payload_slice();

    // Every fragment but the last must carry a multiple of eight octets.
    let max_payload = (mtu - header.len()) & !7;
    if max_payload == 0 {
        return Err(Error::Unsupported("mtu leaves no room for payload"));
    }

    let mut fragments = Vec::with_capacity(payload.len().div_ceil(max_payload));
    let mut offset = 0;
    while offset < payload.len() {
        let chunk = max_payload.min(payload.len() - offset);
        let mut data = Vec::with_capacity(header.len() + chunk);
        data.extend_from_slice(header);
        data.extend_from_slice(&payload[offset..offset + chunk]);

        let frag = ipv4::new_unchecked_mut(&mut data);
        frag.set_frag_info(false, offset + chunk < payload.len(), offset as u16);
        frag.fill_total_len();
        frag.fill_checksum();
        fragments.push(data);
        offset += chunk;
    }

    Ok(fragments)
}

/// Split large outgoing packets into fragments.
///
/// Packets shorter than `mtu` pass through unchanged. Packets that cannot
/// be fragmented are dropped and logged; streams are lossy, and the
/// transport layers recover.
///
/// All outgoing packets are assumed to be valid.
pub fn fragment_outgoing(stream: Stream, mtu: usize) -> Stream {
    let (incoming, parent_tx, done) = stream.into_parts();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(1);

    let task_done = done.clone();
    tokio::spawn(async move {
        loop {
            let packet = tokio::select! {
                biased;
                packet = out_rx.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = task_done.cancelled() => break,
            };

            let fragments = match fragment_packet(&packet, mtu) {
                Ok(fragments) => fragments,
                Err(err) => {
                    debug!(%err, "dropping unfragmentable outgoing packet");
                    continue;
                }
            };
            for fragment in fragments {
                tokio::select! {
                    result = parent_tx.send(fragment) => if result.is_err() { return },
                    _ = task_done.cancelled() => return,
                }
            }
        }
    });

    Stream::from_parts(incoming, out_tx, done)
}

/// Reassemble incoming fragmented packets.
///
/// Fragments are grouped by `(source, identification)`; groups that do not
/// complete within `timeout` are discarded. Non-fragmented packets pass
/// through unchanged.
///
/// All incoming packets are assumed to be valid.
pub fn defragment_incoming(stream: Stream, timeout: Duration) -> Stream {
    let mut defrag = Defragmenter::new(timeout);
    filter(stream, Some(Box::new(move |packet: Vec<u8>| {
        if ipv4::new_unchecked(&packet).is_fragment() {
            defrag.add_packet(packet)
        } else {
            Some(packet)
        }
    })), None)
}

/// Tracks in-progress packet reconstructions.
struct Defragmenter {
    timeout: Duration,
    reconstructions: Vec<Reconstruction>,
}

/// The received fragments of one packet, sorted by offset.
struct Reconstruction {
    drop_at: Instant,
    ident: u16,
    source: Address,
    fragments: Vec<Vec<u8>>,
}

impl Defragmenter {
    fn new(timeout: Duration) -> Self {
        Defragmenter {
            timeout,
            reconstructions: Vec::new(),
        }
    }

    /// Account one fragment; returns the whole packet once complete.
    fn add_packet(&mut self, packet: Vec<u8>) -> Option<Vec<u8>> {
        self.drop_old();

        let (source, ident) = {
            let ip = ipv4::new_unchecked(&packet);
            (ip.src_addr(), ip.ident())
        };

        for (index, recon) in self.reconstructions.iter_mut().enumerate() {
            if recon.ident == ident && recon.source == source {
                recon.add_fragment(packet);
                if recon.ready() {
                    let recon = self.reconstructions.remove(index);
                    return Some(recon.reassemble());
                }
                return None;
            }
        }

        self.reconstructions.push(Reconstruction {
            drop_at: Instant::now() + self.timeout,
            ident,
            source,
            fragments: vec![packet],
        });
        None
    }

    fn drop_old(&mut self) {
        let now = Instant::now();
        self.reconstructions.retain(|recon| now < recon.drop_at);
    }
}

impl Reconstruction {
    fn add_fragment(&mut self, packet: Vec<u8>) {
        let offset = ipv4::new_unchecked(&packet).frag_offset();
        let index = self.fragments.partition_point(|other| {
            ipv4::new_unchecked(other).frag_offset() < offset
        });
        if let Some(other) = self.fragments.get(index) {
            if ipv4::new_unchecked(other).frag_offset() == offset {
                // Received the same fragment twice.
                return;
            }
        }
        self.fragments.insert(index, packet);
    }

    /// Whether the fragments cover the packet without gaps.
    fn ready(&self) -> bool {
        let last = ipv4::new_unchecked(self.fragments.last().unwrap());
        if last.more_frags() {
            return false;
        }

        let mut next_offset = 0;
        for data in &self.fragments {
            let frag = ipv4::new_unchecked(data);
            if usize::from(frag.frag_offset()) != next_offset {
                return false;
            }
            next_offset += frag.payload_slice().len();
        }
        true
    }

    /// Concatenate the payloads under the first fragment's header.
    ///
    /// This assumes the packet is ready.
    fn reassemble(self) -> Vec<u8> {
        let first = ipv4::new_unchecked(&self.fragments[0]);
        let mut data = first.header_slice().to_vec();
        for fragment in &self.fragments {
            data.extend_from_slice(ipv4::new_unchecked(fragment).payload_slice());
        }

        let packet = ipv4::new_unchecked_mut(&mut data);
        packet.set_frag_info(false, false, 0);
        packet.fill_total_len();
        packet.fill_checksum();
        data
    }
}
