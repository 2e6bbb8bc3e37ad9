//! The IPv4 pipeline: validation, checksum, demultiplexing filters, and
//! identifier assignment.
//!
//! All of these wrap a stream and return the wrapped stream; they compose
//! in the order applied. Malformed or unwanted packets are dropped
//! silently, since packet networks do not report parse errors to peers.

use crate::stream::{filter, Stream};
use crate::wire::{ipv4, Address, Protocol};

mod frag;
#[cfg(test)]
mod tests;

pub use self::frag::{
    defragment_incoming, fragment_outgoing, fragment_packet, DEFAULT_DEFRAG_TIMEOUT,
};

/// Drop incoming packets that are not structurally valid IPv4.
///
/// Everything downstream of this filter may assume the header invariants
/// hold and use the unchecked view constructors.
pub fn filter_valid(stream: Stream) -> Stream {
    filter(stream, Some(Box::new(|packet: Vec<u8>| {
        match ipv4::new_checked(&packet) {
            Ok(_) => Some(packet),
            Err(_) => None,
        }
    })), None)
}

/// Drop incoming packets whose header checksum does not verify.
///
/// All incoming packets are assumed to be valid.
pub fn filter_checksums(stream: Stream) -> Stream {
    filter(stream, Some(Box::new(|packet: Vec<u8>| {
        if ipv4::new_unchecked(&packet).verify_checksum() {
            Some(packet)
        } else {
            None
        }
    })), None)
}

/// Keep only incoming packets carrying the given transport protocol.
///
/// All incoming packets are assumed to be valid.
pub fn filter_proto(stream: Stream, proto: Protocol) -> Stream {
    filter(stream, Some(Box::new(move |packet: Vec<u8>| {
        if ipv4::new_unchecked(&packet).protocol() == proto {
            Some(packet)
        } else {
            None
        }
    })), None)
}

/// Keep only incoming packets addressed to `dest`.
///
/// All incoming packets are assumed to be valid.
pub fn filter_dest(stream: Stream, dest: Address) -> Stream {
    filter(stream, Some(Box::new(move |packet: Vec<u8>| {
        if ipv4::new_unchecked(&packet).dst_addr() == dest {
            Some(packet)
        } else {
            None
        }
    })), None)
}

/// Stamp outgoing packets with incrementing identification numbers and
/// refresh their header checksums.
///
/// Apply this *outside* [`fragment_outgoing`] so whole datagrams are
/// stamped before they are split; a packet that is already a fragment is
/// dropped rather than restamped.
///
/// All outgoing packets are assumed to be valid.
pub fn add_identifiers(stream: Stream) -> Stream {
    let mut next_ident: u16 = 0;
    filter(stream, None, Some(Box::new(move |mut packet: Vec<u8>| {
        let ident = next_ident;
        next_ident = next_ident.wrapping_add(1);

        let ip = ipv4::new_unchecked_mut(&mut packet);
        if ip.is_fragment() {
            return None;
        }
        ip.set_ident(ident);
        ip.fill_checksum();
        Some(packet)
    })))
}
