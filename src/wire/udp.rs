//! UDP packet view, layered over the IPv4 view.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use super::ip::{checksum, Address, Endpoint, Protocol};
use super::ipv4;

byte_wrapper! {
    /// A byte sequence representing a UDP datagram inside an IPv4 packet.
    ///
    /// The wrapper covers the whole IPv4 packet so that the pseudo-header
    /// checksum and the endpoint accessors can reach the enclosing
    /// addresses.
    #[derive(Debug, PartialEq, Eq)]
    pub struct udp4([u8]);
}

mod field {
    use core::ops::Range;

    pub(crate) const SRC_PORT: Range<usize> = 0..2;
    pub(crate) const DST_PORT: Range<usize> = 2..4;
    pub(crate) const LENGTH: Range<usize> = 4..6;
    pub(crate) const CHECKSUM: Range<usize> = 6..8;
    pub(crate) const HEADER_END: usize = 8;
}

impl udp4 {
    /// Imbue a raw octet buffer with UDP-in-IPv4 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &udp4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with UDP-in-IPv4 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut udp4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of `new_unchecked` and [`check_len`].
    ///
    /// [`check_len`]: Self::check_len
    pub fn new_checked(data: &[u8]) -> Result<&udp4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Requires a valid IPv4 header, at least eight octets of IP payload,
    /// and a length field matching the actual datagram length.
    pub fn check_len(&self) -> Result<()> {
        let ip = self.ip();
        ip.check_len()?;
        let datagram = ip.payload_slice();
        if datagram.len() < field::HEADER_END {
            return Err(Error::InvalidPacket);
        }
        let length = NetworkEndian::read_u16(&datagram[field::LENGTH]);
        if usize::from(length) != datagram.len() {
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }

    /// View the enclosing IPv4 packet.
    pub fn ip(&self) -> &ipv4 {
        ipv4::new_unchecked(&self.0)
    }

    fn datagram(&self) -> &[u8] {
        self.ip().payload_slice()
    }

    fn datagram_range(&self) -> core::ops::Range<usize> {
        usize::from(self.ip().header_len())..self.0.len()
    }

    /// Return the source address and port.
    pub fn src_endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip().src_addr(), self.src_port())
    }

    /// Return the destination address and port.
    pub fn dst_endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip().dst_addr(), self.dst_port())
    }

    /// Return the source port field. May be zero.
    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.datagram()[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.datagram()[field::DST_PORT])
    }

    /// Return the length field.
    #[inline]
    pub fn length(&self) -> u16 {
        NetworkEndian::read_u16(&self.datagram()[field::LENGTH])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.datagram()[field::CHECKSUM])
    }

    /// Whether the sender filled in a checksum at all.
    ///
    /// A zero checksum field means checksumming is disabled for this
    /// datagram and [`verify_checksum`] need not be consulted.
    ///
    /// [`verify_checksum`]: Self::verify_checksum
    pub fn use_checksum(&self) -> bool {
        self.checksum() != 0
    }

    /// Validate the checksum over the pseudo header and the datagram.
    pub fn verify_checksum(&self) -> bool {
        let datagram = self.datagram();
        let pseudo = checksum::pseudo_header(
            self.ip().src_addr(), self.ip().dst_addr(),
            Protocol::Udp, datagram.len() as u16);
        !checksum::combine(&[pseudo, checksum::sum(datagram)]) == 0
    }

    /// Compute and fill in the checksum.
    ///
    /// A checksum that computes to zero is stored as `0xffff`, keeping it
    /// distinguishable from the disabled-checksum encoding.
    pub fn fill_checksum(&mut self) {
        let range = self.datagram_range();
        let field = range.start + field::CHECKSUM.start..range.start + field::CHECKSUM.end;
        NetworkEndian::write_u16(&mut self.0[field.clone()], 0);

        let pseudo = checksum::pseudo_header(
            self.ip().src_addr(), self.ip().dst_addr(),
            Protocol::Udp, (range.end - range.start) as u16);
        let mut value = !checksum::combine(&[pseudo, checksum::sum(&self.0[range])]);
        if value == 0 {
            value = 0xffff;
        }
        NetworkEndian::write_u16(&mut self.0[field], value);
    }

    /// Return the datagram payload as a byte slice.
    pub fn payload_slice(&self) -> &[u8] {
        &self.datagram()[field::HEADER_END..]
    }

    /// Build a complete UDP-in-IPv4 packet buffer.
    ///
    /// The UDP checksum is filled in; the IPv4 header checksum is left for
    /// the outgoing pipeline.
    pub fn buffer(ttl: u8, src: Endpoint, dst: Endpoint, payload: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0u8; field::HEADER_END + payload.len()];
        NetworkEndian::write_u16(&mut datagram[field::SRC_PORT], src.port);
        NetworkEndian::write_u16(&mut datagram[field::DST_PORT], dst.port);
        let length = datagram.len() as u16;
        NetworkEndian::write_u16(&mut datagram[field::LENGTH], length);
        datagram[field::HEADER_END..].copy_from_slice(payload);

        let mut data = ipv4::buffer(ttl, Protocol::Udp, src.addr, dst.addr, &datagram);
        udp4::new_unchecked_mut(&mut data).fill_checksum();
        data
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Vec<u8> {
        udp4::buffer(
            64,
            Endpoint::new(Address::new(10, 13, 37, 2), 5000),
            Endpoint::new(Address::new(10, 13, 37, 1), 1337),
            b"ping",
        )
    }

    #[test]
    fn construct_and_deconstruct() {
        let data = sample();
        let packet = udp4::new_checked(&data).unwrap();
        assert_eq!(packet.src_port(), 5000);
        assert_eq!(packet.dst_port(), 1337);
        assert_eq!(packet.length(), 12);
        assert_eq!(packet.payload_slice(), b"ping");
        assert!(packet.use_checksum());
        assert!(packet.verify_checksum());
        assert_eq!(packet.src_endpoint().to_string(), "10.13.37.2:5000");
        assert_eq!(packet.dst_endpoint().to_string(), "10.13.37.1:1337");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut data = sample();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let packet = udp4::new_checked(&data).unwrap();
        assert!(!packet.verify_checksum());
    }

    #[test]
    fn length_field_must_match() {
        let mut data = sample();
        // Shrink the length field below the datagram size.
        let off = 20 + 4;
        data[off] = 0;
        data[off + 1] = 9;
        assert!(udp4::new_checked(&data).is_err());
    }

    #[test]
    fn zero_checksum_means_disabled() {
        let mut data = sample();
        data[20 + 6] = 0;
        data[20 + 7] = 0;
        let packet = udp4::new_checked(&data).unwrap();
        assert!(!packet.use_checksum());
    }
}
