//! Addresses, endpoints, protocol numbers, and the internet checksum.

use core::fmt;

use byteorder::{ByteOrder, NetworkEndian};

enum_with_unknown! {
    /// The protocol field of an IPv4 header.
    pub enum Protocol(u8) {
        /// Internet Control Message Protocol.
        Icmp = 1,
        /// Transmission Control Protocol.
        Tcp = 6,
        /// User Datagram Protocol.
        Udp = 17,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id),
        }
    }
}

/// A four-octet IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 4]);

impl Address {
    /// An unspecified address.
    pub const UNSPECIFIED: Address = Address([0x00; 4]);

    /// Construct an IPv4 address from parts.
    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address([a0, a1, a2, a3])
    }

    /// Construct an IPv4 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not four octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Return the address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the address falls into the "unspecified" range.
    pub fn is_unspecified(&self) -> bool {
        self.0[0] == 0
    }
}

impl From<std::net::Ipv4Addr> for Address {
    fn from(addr: std::net::Ipv4Addr) -> Address {
        Address(addr.octets())
    }
}

impl From<Address> for std::net::Ipv4Addr {
    fn from(Address(octets): Address) -> std::net::Ipv4Addr {
        octets.into()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Address([a, b, c, d]) = self;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// An IPv4 address with a port, identifying one end of a transport flow.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    /// The host address.
    pub addr: Address,
    /// The transport port. Zero means "let the stack pick".
    pub port: u16,
}

impl Endpoint {
    /// Construct an endpoint from an address and a port.
    pub const fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }
}

impl From<std::net::SocketAddrV4> for Endpoint {
    fn from(addr: std::net::SocketAddrV4) -> Endpoint {
        Endpoint::new((*addr.ip()).into(), addr.port())
    }
}

impl From<Endpoint> for std::net::SocketAddrV4 {
    fn from(ep: Endpoint) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(ep.addr.into(), ep.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Internet checksum helpers (RFC 1071).
pub mod checksum {
    use super::*;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16).wrapping_add(sum as u16)
    }

    /// Compute the ones-complement sum over `data` without the final
    /// complement. An odd trailing byte is padded with a zero in the low
    /// position.
    pub fn sum(mut data: &[u8]) -> u16 {
        let mut accum: u32 = 0;

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several partial ones-complement sums.
    pub fn combine(sums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in sums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute the complemented checksum of `data`.
    ///
    /// Over a buffer whose checksum field holds the emitted value, the
    /// result is zero.
    pub fn data(data: &[u8]) -> u16 {
        !sum(data)
    }

    /// Partial sum of the IPv4 pseudo header used by TCP and UDP:
    /// source, destination, a zero octet, the protocol number, and the
    /// transport length in big-endian.
    pub fn pseudo_header(src_addr: Address, dst_addr: Address,
                         protocol: Protocol, length: u16) -> u16 {
        let mut proto_len = [0u8; 4];
        proto_len[1] = protocol.into();
        NetworkEndian::write_u16(&mut proto_len[2..4], length);

        combine(&[
            sum(src_addr.as_bytes()),
            sum(dst_addr.as_bytes()),
            sum(&proto_len[..]),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_rfc1071_example() {
        // Words from the worked example in RFC 1071 section 3.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum::sum(&data), 0xddf2);
        assert_eq!(checksum::data(&data), !0xddf2);
    }

    #[test]
    fn checksum_odd_length_pads_low() {
        assert_eq!(checksum::sum(&[0xab]), 0xab00);
    }

    #[test]
    fn checksum_round_trip() {
        let mut data = vec![0x45, 0x00, 0x00, 0x1c, 0x12, 0x34, 0x00, 0x00,
                            0x40, 0x01, 0x00, 0x00, 10, 13, 37, 2, 10, 13, 37, 1];
        let value = checksum::data(&data);
        data[10] = (value >> 8) as u8;
        data[11] = value as u8;
        assert_eq!(checksum::data(&data), 0);
    }

    #[test]
    fn pseudo_header_protocol_number() {
        let a = Address::new(10, 0, 0, 1);
        let b = Address::new(10, 0, 0, 2);
        assert_ne!(
            checksum::pseudo_header(a, b, Protocol::Tcp, 20),
            checksum::pseudo_header(a, b, Protocol::Udp, 20),
        );
    }

    #[test]
    fn endpoint_display() {
        let ep = Endpoint::new(Address::new(10, 13, 37, 1), 1337);
        assert_eq!(ep.to_string(), "10.13.37.1:1337");
    }

    #[test]
    fn address_std_conversion() {
        let addr: Address = std::net::Ipv4Addr::new(192, 168, 0, 1).into();
        assert_eq!(addr, Address::new(192, 168, 0, 1));
        let back: std::net::Ipv4Addr = addr.into();
        assert_eq!(back.octets(), [192, 168, 0, 1]);
    }
}
