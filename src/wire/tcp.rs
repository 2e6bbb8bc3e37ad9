//! TCP packet view, layered over the IPv4 view.

use core::fmt;
use core::ops::{BitOr, Range};

use byteorder::{ByteOrder, NetworkEndian};

use crate::error::{Error, Result};
use super::ip::{checksum, Endpoint, Protocol};
use super::ipv4;

/// The flag bits of a TCP header's thirteenth octet.
///
/// The NS bit lives in the data-offset octet and has its own accessors on
/// [`tcp4`]; it is not part of this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// No flags set.
    pub const EMPTY: Flags = Flags(0);
    /// Congestion window reduced.
    pub const CWR: Flags = Flags(0x80);
    /// ECN echo.
    pub const ECE: Flags = Flags(0x40);
    /// Urgent pointer significant.
    pub const URG: Flags = Flags(0x20);
    /// Acknowledgment number significant.
    pub const ACK: Flags = Flags(0x10);
    /// Push function.
    pub const PSH: Flags = Flags(0x08);
    /// Reset the connection.
    pub const RST: Flags = Flags(0x04);
    /// Synchronize sequence numbers.
    pub const SYN: Flags = Flags(0x02);
    /// No more data from sender.
    pub const FIN: Flags = Flags(0x01);

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(Flags, &str); 8] = [
            (Flags::CWR, "CWR"), (Flags::ECE, "ECE"), (Flags::URG, "URG"),
            (Flags::ACK, "ACK"), (Flags::PSH, "PSH"), (Flags::RST, "RST"),
            (Flags::SYN, "SYN"), (Flags::FIN, "FIN"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "-")?;
        }
        Ok(())
    }
}

/// A single TCP option as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOption<'a> {
    /// The option kind octet.
    pub kind: u8,
    /// The option data, excluding the kind and length octets.
    pub data: &'a [u8],
}

/// Option kind: end of option list.
const OPT_END: u8 = 0;

byte_wrapper! {
    /// A byte sequence representing a TCP segment inside an IPv4 packet.
    ///
    /// As with [`udp4`], the wrapper covers the whole IPv4 packet so the
    /// pseudo-header checksum and endpoint accessors work.
    ///
    /// [`udp4`]: crate::wire::udp4
    #[derive(Debug, PartialEq, Eq)]
    pub struct tcp4([u8]);
}

mod field {
    use core::ops::Range;

    pub(crate) const SRC_PORT: Range<usize> = 0..2;
    pub(crate) const DST_PORT: Range<usize> = 2..4;
    pub(crate) const SEQ_NUM: Range<usize> = 4..8;
    pub(crate) const ACK_NUM: Range<usize> = 8..12;
    pub(crate) const DATA_OFF: usize = 12;
    pub(crate) const FLAGS: usize = 13;
    pub(crate) const WINDOW: Range<usize> = 14..16;
    pub(crate) const CHECKSUM: Range<usize> = 16..18;
    pub(crate) const URGENT: Range<usize> = 18..20;
    pub(crate) const OPTIONS_START: usize = 20;
}

impl tcp4 {
    /// Imbue a raw octet buffer with TCP-in-IPv4 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &tcp4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with TCP-in-IPv4 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut tcp4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of `new_unchecked` and [`check_len`].
    ///
    /// [`check_len`]: Self::check_len
    pub fn new_checked(data: &[u8]) -> Result<&tcp4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Requires a valid IPv4 header, at least twenty octets of IP payload,
    /// and a data offset that stays within the payload.
    pub fn check_len(&self) -> Result<()> {
        let ip = self.ip();
        ip.check_len()?;
        let segment = ip.payload_slice();
        if segment.len() < field::OPTIONS_START {
            return Err(Error::InvalidPacket);
        }
        let header_len = usize::from(segment[field::DATA_OFF] >> 4) * 4;
        if header_len < field::OPTIONS_START || header_len > segment.len() {
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }

    /// View the enclosing IPv4 packet.
    pub fn ip(&self) -> &ipv4 {
        ipv4::new_unchecked(&self.0)
    }

    fn segment(&self) -> &[u8] {
        self.ip().payload_slice()
    }

    fn segment_range(&self) -> Range<usize> {
        usize::from(self.ip().header_len())..self.0.len()
    }

    fn segment_mut(&mut self) -> &mut [u8] {
        let range = self.segment_range();
        &mut self.0[range]
    }

    /// Return the source address and port.
    pub fn src_endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip().src_addr(),
                      NetworkEndian::read_u16(&self.segment()[field::SRC_PORT]))
    }

    /// Return the destination address and port.
    pub fn dst_endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip().dst_addr(),
                      NetworkEndian::read_u16(&self.segment()[field::DST_PORT]))
    }

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.segment()[field::SEQ_NUM])
    }

    /// Return the acknowledgment number field.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.segment()[field::ACK_NUM])
    }

    /// Return the data offset, in 32-bit words.
    #[inline]
    pub fn data_offset(&self) -> u8 {
        self.segment()[field::DATA_OFF] >> 4
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset()) * 4
    }

    /// Return the flag set from the flags octet.
    #[inline]
    pub fn flags(&self) -> Flags {
        Flags(self.segment()[field::FLAGS])
    }

    /// Set or clear bits of the flags octet.
    pub fn set_flag(&mut self, flag: Flags, value: bool) {
        let segment = self.segment_mut();
        if value {
            segment[field::FLAGS] |= flag.0;
        } else {
            segment[field::FLAGS] &= !flag.0;
        }
    }

    /// Return the ECN nonce bit from the data-offset octet.
    #[inline]
    pub fn ns(&self) -> bool {
        self.segment()[field::DATA_OFF] & 0x01 != 0
    }

    /// Return the window size field.
    #[inline]
    pub fn window_size(&self) -> u16 {
        NetworkEndian::read_u16(&self.segment()[field::WINDOW])
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_size(&mut self, value: u16) {
        let segment = self.segment_mut();
        NetworkEndian::write_u16(&mut segment[field::WINDOW], value)
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.segment()[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_pointer(&self) -> u16 {
        NetworkEndian::read_u16(&self.segment()[field::URGENT])
    }

    /// Iterate over the options between the fixed header and the payload.
    pub fn options(&self) -> TcpOptionsIter<'_> {
        TcpOptionsIter {
            data: &self.segment()[field::OPTIONS_START..self.header_len()],
        }
    }

    /// Validate the checksum over the pseudo header and the segment.
    pub fn verify_checksum(&self) -> bool {
        let segment = self.segment();
        let pseudo = checksum::pseudo_header(
            self.ip().src_addr(), self.ip().dst_addr(),
            Protocol::Tcp, segment.len() as u16);
        !checksum::combine(&[pseudo, checksum::sum(segment)]) == 0
    }

    /// Compute and fill in the checksum.
    pub fn fill_checksum(&mut self) {
        let range = self.segment_range();
        let field = range.start + field::CHECKSUM.start..range.start + field::CHECKSUM.end;
        NetworkEndian::write_u16(&mut self.0[field.clone()], 0);

        let pseudo = checksum::pseudo_header(
            self.ip().src_addr(), self.ip().dst_addr(),
            Protocol::Tcp, (range.end - range.start) as u16);
        let value = !checksum::combine(&[pseudo, checksum::sum(&self.0[range])]);
        NetworkEndian::write_u16(&mut self.0[field], value);
    }

    /// Return the segment payload as a byte slice.
    pub fn payload_slice(&self) -> &[u8] {
        &self.segment()[self.header_len()..]
    }

    /// Build a complete TCP-in-IPv4 packet buffer with a bare header.
    ///
    /// The segment checksum is filled in; the IPv4 header checksum is left
    /// for the outgoing pipeline. Callers that flip flags afterwards must
    /// call [`fill_checksum`] again.
    ///
    /// [`fill_checksum`]: Self::fill_checksum
    #[allow(clippy::too_many_arguments)]
    pub fn buffer(ttl: u8, src: Endpoint, dst: Endpoint, seq: u32, ack: u32,
                  window: u16, payload: &[u8], flags: Flags) -> Vec<u8> {
        let mut segment = vec![0u8; field::OPTIONS_START + payload.len()];
        NetworkEndian::write_u16(&mut segment[field::SRC_PORT], src.port);
        NetworkEndian::write_u16(&mut segment[field::DST_PORT], dst.port);
        NetworkEndian::write_u32(&mut segment[field::SEQ_NUM], seq);
        NetworkEndian::write_u32(&mut segment[field::ACK_NUM], ack);
        segment[field::DATA_OFF] = 5 << 4;
        segment[field::FLAGS] = flags.0;
        NetworkEndian::write_u16(&mut segment[field::WINDOW], window);
        segment[field::OPTIONS_START..].copy_from_slice(payload);

        let mut data = ipv4::buffer(ttl, Protocol::Tcp, src.addr, dst.addr, &segment);
        tcp4::new_unchecked_mut(&mut data).fill_checksum();
        data
    }
}

/// Iterator over the options area of a TCP header.
///
/// Yields `Err(InvalidPacket)` once and then stops if an option overruns
/// the area or carries an impossible length.
pub struct TcpOptionsIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for TcpOptionsIter<'a> {
    type Item = Result<TcpOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&kind, rest) = self.data.split_first()?;
        if kind == OPT_END {
            self.data = &[];
            return None;
        }
        if kind == 1 {
            // No-operation has no length octet.
            self.data = rest;
            return Some(Ok(TcpOption { kind, data: &[] }));
        }
        let Some((&len, rest)) = rest.split_first() else {
            self.data = &[];
            return Some(Err(Error::InvalidPacket));
        };
        let Some(data_len) = usize::from(len).checked_sub(2) else {
            self.data = &[];
            return Some(Err(Error::InvalidPacket));
        };
        if rest.len() < data_len {
            self.data = &[];
            return Some(Err(Error::InvalidPacket));
        }
        let (data, rest) = rest.split_at(data_len);
        self.data = rest;
        Some(Ok(TcpOption { kind, data }))
    }
}
