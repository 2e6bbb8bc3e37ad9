//! ICMPv4 message view.
//!
//! The view wraps the ICMP message alone, without the enclosing IPv4
//! header; the echo responder obtains it from `ipv4::payload_mut_slice`.

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use super::ip::checksum;

enum_with_unknown! {
    /// The message type of an ICMPv4 packet.
    pub enum Message(u8) {
        /// Echo reply.
        EchoReply = 0,
        /// Echo request.
        EchoRequest = 8,
    }
}

byte_wrapper! {
    /// A byte sequence representing an ICMPv4 message.
    #[derive(Debug, PartialEq, Eq)]
    pub struct icmpv4([u8]);
}

mod field {
    use core::ops::Range;

    pub(crate) const TYPE: usize = 0;
    pub(crate) const CODE: usize = 1;
    pub(crate) const CHECKSUM: Range<usize> = 2..4;
    pub(crate) const ECHO_IDENT: Range<usize> = 4..6;
    pub(crate) const ECHO_SEQNO: Range<usize> = 6..8;
    pub(crate) const HEADER_END: usize = 8;
}

impl icmpv4 {
    /// Imbue a raw octet buffer with ICMPv4 message structure.
    pub fn new_unchecked(buffer: &[u8]) -> &icmpv4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with ICMPv4 message structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut icmpv4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of `new_unchecked` and [`check_len`].
    ///
    /// [`check_len`]: Self::check_len
    pub fn new_checked(data: &[u8]) -> Result<&icmpv4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Mutable variant of `new_checked`.
    pub fn new_checked_mut(data: &mut [u8]) -> Result<&mut icmpv4> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked_mut(data))
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::HEADER_END {
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }

    /// Return the message type field.
    #[inline]
    pub fn msg_type(&self) -> Message {
        Message::from(self.0[field::TYPE])
    }

    /// Set the message type field.
    #[inline]
    pub fn set_msg_type(&mut self, value: Message) {
        self.0[field::TYPE] = value.into()
    }

    /// Return the message code field.
    #[inline]
    pub fn msg_code(&self) -> u8 {
        self.0[field::CODE]
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the echo identifier field.
    #[inline]
    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_IDENT])
    }

    /// Return the echo sequence number field.
    #[inline]
    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_SEQNO])
    }

    /// Validate the message checksum over the whole message.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(&self.0) == 0
    }

    /// Compute and fill in the message checksum.
    pub fn fill_checksum(&mut self) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], 0);
        let value = checksum::data(&self.0);
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value);
    }

    /// Return the data following the echo header.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::HEADER_END..]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static ECHO_PACKET_BYTES: [u8; 12] =
        [0x08, 0x00, 0x8e, 0xfe,
         0x12, 0x34, 0xab, 0xcd,
         0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn echo_deconstruct() {
        let packet = icmpv4::new_checked(&ECHO_PACKET_BYTES[..]).unwrap();
        assert_eq!(packet.msg_type(), Message::EchoRequest);
        assert_eq!(packet.msg_code(), 0);
        assert_eq!(packet.checksum(), 0x8efe);
        assert_eq!(packet.echo_ident(), 0x1234);
        assert_eq!(packet.echo_seq_no(), 0xabcd);
        assert_eq!(packet.payload_slice(), &ECHO_PACKET_BYTES[8..]);
        assert!(packet.verify_checksum());
    }

    #[test]
    fn echo_to_reply() {
        let mut bytes = ECHO_PACKET_BYTES;
        let packet = icmpv4::new_unchecked_mut(&mut bytes);
        packet.set_msg_type(Message::EchoReply);
        packet.fill_checksum();
        assert!(packet.verify_checksum());
        assert_eq!(packet.msg_type(), Message::EchoReply);
        // Echo fields and data survive the rewrite.
        assert_eq!(packet.echo_ident(), 0x1234);
        assert_eq!(packet.payload_slice(), &ECHO_PACKET_BYTES[8..]);
    }

    #[test]
    fn check_len_rejects_short() {
        assert!(icmpv4::new_checked(&ECHO_PACKET_BYTES[..7]).is_err());
        icmpv4::new_checked(&ECHO_PACKET_BYTES[..8]).unwrap();
    }
}
