//! ICMP echo responder.

use tracing::debug;

use crate::layer::ip::filter_proto;
use crate::stream::Stream;
use crate::wire::{icmpv4, ipv4, Message, Protocol};

/// Answer echo requests on the stream until it closes.
///
/// The reply reuses the request buffer: message type rewritten, addresses
/// swapped in place, both checksums recomputed. Anything that is not a
/// well-formed echo request is dropped.
///
/// All incoming IPv4 packets are assumed to be valid.
pub async fn respond_to_pings(stream: Stream) {
    let mut stream = filter_proto(stream, Protocol::Icmp);

    while let Some(mut packet) = stream.recv().await {
        {
            let ip = ipv4::new_unchecked_mut(&mut packet);
            let message = match icmpv4::new_checked_mut(ip.payload_mut_slice()) {
                Ok(message) => message,
                Err(_) => continue,
            };
            if !message.verify_checksum() || message.msg_type() != Message::EchoRequest {
                continue;
            }

            message.set_msg_type(Message::EchoReply);
            message.fill_checksum();

            let source = ip.src_addr();
            ip.set_src_addr(ip.dst_addr());
            ip.set_dst_addr(source);
            ip.fill_checksum();
        }

        if stream.send(packet).await.is_err() {
            break;
        }
    }
    debug!("ping responder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Address;

    fn echo_request() -> Vec<u8> {
        let mut message = vec![0u8; 12];
        message[0] = 8;
        message[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        message[6..8].copy_from_slice(&1u16.to_be_bytes());
        message[8..].copy_from_slice(b"abcd");
        icmpv4::new_unchecked_mut(&mut message).fill_checksum();

        let mut packet = ipv4::buffer(
            64,
            Protocol::Icmp,
            Address::new(10, 13, 37, 2),
            Address::new(10, 13, 37, 1),
            &message,
        );
        ipv4::new_unchecked_mut(&mut packet).fill_checksum();
        packet
    }

    #[tokio::test]
    async fn replies_to_echo_request() {
        let (near, mut far) = Stream::pipe(8);
        tokio::spawn(respond_to_pings(near));

        far.send(echo_request()).await.unwrap();
        let reply = far.recv().await.unwrap();

        let ip = ipv4::new_checked(&reply).unwrap();
        assert_eq!(ip.src_addr(), Address::new(10, 13, 37, 1));
        assert_eq!(ip.dst_addr(), Address::new(10, 13, 37, 2));
        assert!(ip.verify_checksum());

        let message = icmpv4::new_checked(ip.payload_slice()).unwrap();
        assert_eq!(message.msg_type(), Message::EchoReply);
        assert_eq!(message.echo_ident(), 0x1234);
        assert_eq!(message.echo_seq_no(), 1);
        assert_eq!(message.payload_slice(), b"abcd");
        assert!(message.verify_checksum());
        far.close();
    }

    #[tokio::test]
    async fn ignores_non_requests() {
        let (near, mut far) = Stream::pipe(8);
        tokio::spawn(respond_to_pings(near));

        // An echo reply must not be answered.
        let mut packet = echo_request();
        {
            let ip = ipv4::new_unchecked_mut(&mut packet);
            let message = icmpv4::new_unchecked_mut(ip.payload_mut_slice());
            message.set_msg_type(Message::EchoReply);
            message.fill_checksum();
        }
        far.send(packet).await.unwrap();

        // A corrupted checksum must not be answered either.
        let mut packet = echo_request();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        far.send(packet).await.unwrap();

        // The valid request behind them still gets its reply.
        far.send(echo_request()).await.unwrap();
        let reply = far.recv().await.unwrap();
        let message = icmpv4::new_checked(
            ipv4::new_checked(&reply).unwrap().payload_slice()).unwrap();
        assert_eq!(message.msg_type(), Message::EchoReply);
        far.close();
    }
}
