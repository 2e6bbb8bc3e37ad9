//! IPv4 packet view.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use super::ip::{checksum, Address, Protocol};

byte_wrapper! {
    /// A byte sequence representing an IPv4 packet.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ipv4([u8]);
}

mod field {
    use core::ops::Range;

    pub(crate) const VER_IHL: usize = 0;
    pub(crate) const LENGTH: Range<usize> = 2..4;
    pub(crate) const IDENT: Range<usize> = 4..6;
    pub(crate) const FLG_OFF: Range<usize> = 6..8;
    pub(crate) const TTL: usize = 8;
    pub(crate) const PROTOCOL: usize = 9;
    pub(crate) const CHECKSUM: Range<usize> = 10..12;
    pub(crate) const SRC_ADDR: Range<usize> = 12..16;
    pub(crate) const DST_ADDR: Range<usize> = 16..20;
}

/// Don't-fragment flag, bit 6 of the flags octet (RFC 791).
const FLAG_DONT_FRAG: u8 = 0x40;
/// More-fragments flag, bit 5 of the flags octet.
const FLAG_MORE_FRAGS: u8 = 0x20;

impl ipv4 {
    /// Imbue a raw octet buffer with IPv4 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &ipv4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with IPv4 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut ipv4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of [`new_unchecked`] and [`check_len`].
    ///
    /// [`new_unchecked`]: Self::new_unchecked
    /// [`check_len`]: Self::check_len
    pub fn new_checked(data: &[u8]) -> Result<&ipv4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Mutable variant of [`new_checked`].
    ///
    /// [`new_checked`]: Self::new_checked
    pub fn new_checked_mut(data: &mut [u8]) -> Result<&mut ipv4> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked_mut(data))
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Checks the invariants of an IPv4 header against the buffer: at least
    /// twenty octets, version nibble of four, and a header length within
    /// `[20, buffer length]`. The header length field is stored in units of
    /// four octets, so alignment holds by construction.
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::DST_ADDR.end {
            return Err(Error::InvalidPacket);
        }
        if self.version() != 4 {
            return Err(Error::InvalidPacket);
        }
        let header_len = usize::from(self.header_len());
        if header_len < field::DST_ADDR.end || header_len > len {
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }

    /// View the packet as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.0[field::VER_IHL] >> 4
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        (self.0[field::VER_IHL] & 0x0f) * 4
    }

    /// Return the total length field.
    #[inline]
    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Rewrite the total length field from the buffer length.
    #[inline]
    pub fn fill_total_len(&mut self) {
        let len = self.0.len() as u16;
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], len)
    }

    /// Return the fragment identification field.
    #[inline]
    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::IDENT])
    }

    /// Set the fragment identification field.
    #[inline]
    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::IDENT], value)
    }

    /// Return the "don't fragment" flag.
    #[inline]
    pub fn dont_frag(&self) -> bool {
        self.0[field::FLG_OFF.start] & FLAG_DONT_FRAG != 0
    }

    /// Return the "more fragments" flag.
    #[inline]
    pub fn more_frags(&self) -> bool {
        self.0[field::FLG_OFF.start] & FLAG_MORE_FRAGS != 0
    }

    /// Return the fragment offset, in octets.
    ///
    /// The wire field counts eight-octet blocks; the accessor converts.
    #[inline]
    pub fn frag_offset(&self) -> u16 {
        (NetworkEndian::read_u16(&self.0[field::FLG_OFF]) & 0x1fff) << 3
    }

    /// Rewrite all three fragment fields at once.
    ///
    /// `offset` is in octets and must be a multiple of eight.
    pub fn set_frag_info(&mut self, dont_frag: bool, more_frags: bool, offset: u16) {
        let mut raw = offset >> 3;
        if dont_frag {
            raw |= (FLAG_DONT_FRAG as u16) << 8;
        }
        if more_frags {
            raw |= (FLAG_MORE_FRAGS as u16) << 8;
        }
        NetworkEndian::write_u16(&mut self.0[field::FLG_OFF], raw);
    }

    /// Whether the packet is one piece of a fragmented datagram.
    pub fn is_fragment(&self) -> bool {
        self.more_frags() || self.frag_offset() != 0
    }

    /// Return the time to live field.
    #[inline]
    pub fn ttl(&self) -> u8 {
        self.0[field::TTL]
    }

    /// Set the time to live field.
    #[inline]
    pub fn set_ttl(&mut self, value: u8) {
        self.0[field::TTL] = value
    }

    /// Return the protocol field.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.0[field::PROTOCOL])
    }

    /// Set the protocol field.
    #[inline]
    pub fn set_protocol(&mut self, value: Protocol) {
        self.0[field::PROTOCOL] = value.into()
    }

    /// Return the header checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the source address field.
    #[inline]
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    /// Set the source address field.
    #[inline]
    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Return the destination address field.
    #[inline]
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// Set the destination address field.
    #[inline]
    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Validate the header checksum.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(self.header_slice()) == 0
    }

    /// Compute and fill in the header checksum.
    pub fn fill_checksum(&mut self) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], 0);
        let value = checksum::data(self.header_slice());
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value);
    }

    /// Return the header as a byte slice.
    pub fn header_slice(&self) -> &[u8] {
        &self.0[..usize::from(self.header_len())]
    }

    /// Return the payload as a byte slice.
    ///
    /// The payload runs to the end of the buffer; the buffer length is
    /// authoritative over the total length field.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[usize::from(self.header_len())..]
    }

    /// Return the payload as a mutable byte slice.
    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        let start = usize::from(self.header_len());
        &mut self.0[start..]
    }

    /// Build a new packet buffer with a twenty-octet header.
    ///
    /// The total length field is filled in; identification, fragment
    /// fields, and the header checksum are left zero for the outgoing
    /// pipeline to stamp.
    pub fn buffer(ttl: u8, protocol: Protocol, src: Address, dst: Address,
                  payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; field::DST_ADDR.end + payload.len()];
        data[field::VER_IHL] = 0x45;
        data[field::DST_ADDR.end..].copy_from_slice(payload);

        let packet = ipv4::new_unchecked_mut(&mut data);
        packet.fill_total_len();
        packet.set_ttl(ttl);
        packet.set_protocol(protocol);
        packet.set_src_addr(src);
        packet.set_dst_addr(dst);
        data
    }
}

impl AsRef<[u8]> for ipv4 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
