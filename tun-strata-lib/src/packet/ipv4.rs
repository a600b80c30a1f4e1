//! IPv4 packet view (RFC 791).
//!
//! # IPv4 Header Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |Type of Service|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! [`Ipv4Packet`] owns its buffer (the device hands out copies independent of
//! the native ring) and overlays [`Ipv4Header`] on the first 20 bytes for
//! field access. The two address accessors are computed once and cached.
//!
//! # Examples
//!
//! ```
//! use tun_strata::packet::ipv4::Ipv4Packet;
//! use tun_strata::packet::protocol::IpProto;
//! use std::net::Ipv4Addr;
//!
//! let buf = vec![
//!     0x45,              // Version=4, IHL=5
//!     0x00,              // Type of Service
//!     0x00, 0x28,        // Total length: 40
//!     0x1c, 0x46,        // Identification
//!     0x40, 0x00,        // Flags=DF, Fragment offset=0
//!     0x40,              // TTL: 64
//!     0x06,              // Protocol: TCP
//!     0x00, 0x00,        // Checksum
//!     0x0a, 0x00, 0x00, 0x01, // Source: 10.0.0.1
//!     0x0a, 0x00, 0x00, 0x02, // Destination: 10.0.0.2
//! ];
//!
//! let packet = Ipv4Packet::new(buf).unwrap();
//! assert_eq!(packet.version(), 4);
//! assert_eq!(packet.time_to_live(), 64);
//! assert_eq!(packet.protocol(), IpProto::TCP);
//! assert_eq!(packet.source_address(), Ipv4Addr::new(10, 0, 0, 1));
//! assert_eq!(packet.destination_address(), Ipv4Addr::new(10, 0, 0, 2));
//! ```

use std::cell::OnceCell;
use std::fmt::{self, Formatter};
use std::net::Ipv4Addr;

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::protocol::IpProto;
use crate::packet::PacketError;

/// Minimum (and, without options, total) IPv4 header length in bytes.
pub const INET4_HEADER_LEN: usize = 20;

/// Fixed portion of the IPv4 header as defined in RFC 791.
#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Debug, Clone, Copy)]
pub struct Ipv4Header {
    ver_ihl: u8,
    tos: u8,
    total_length: U16<BigEndian>,
    identification: U16<BigEndian>,
    flags_frag_offset: U16<BigEndian>,
    ttl: u8,
    protocol: IpProto,
    checksum: U16<BigEndian>,
    src_ip: U32<BigEndian>,
    dst_ip: U32<BigEndian>,
}

impl Ipv4Header {
    const OFFSET_MASK: u16 = 0x1FFF;
    const MF_FLAG_MASK: u16 = 0x2000;
    const DF_FLAG_MASK: u16 = 0x4000;

    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_ihl >> 4
    }

    /// Internet header length in 32-bit words.
    #[inline]
    pub fn ihl(&self) -> u8 {
        self.ver_ihl & 0x0F
    }

    #[inline]
    pub fn tos(&self) -> u8 {
        self.tos
    }

    #[inline]
    pub fn total_length(&self) -> u16 {
        self.total_length.get()
    }

    #[inline]
    pub fn identification(&self) -> u16 {
        self.identification.get()
    }

    /// Top 3 bits of bytes 6..8.
    #[inline]
    pub fn flags(&self) -> u8 {
        (self.flags_frag_offset.get() >> 13) as u8
    }

    /// Low 13 bits of bytes 6..8, in 8-byte units.
    #[inline]
    pub fn fragment_offset(&self) -> u16 {
        self.flags_frag_offset.get() & Self::OFFSET_MASK
    }

    #[inline]
    pub fn has_dont_fragment(&self) -> bool {
        (self.flags_frag_offset.get() & Self::DF_FLAG_MASK) != 0
    }

    #[inline]
    pub fn has_more_fragments(&self) -> bool {
        (self.flags_frag_offset.get() & Self::MF_FLAG_MASK) != 0
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn protocol(&self) -> IpProto {
        self.protocol
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    #[inline]
    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip.get())
    }

    #[inline]
    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_ip.get())
    }
}

/// An owned IPv4 packet.
///
/// Accessors never mutate the buffer; the source and destination addresses
/// are memoized after the first read.
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    buf: Vec<u8>,
    src: OnceCell<Ipv4Addr>,
    dst: OnceCell<Ipv4Addr>,
}

impl Ipv4Packet {
    /// Wraps `buf`. Fails when the buffer cannot hold a minimal IPv4 header;
    /// no further validation happens here.
    pub fn new(buf: Vec<u8>) -> Result<Self, PacketError> {
        if buf.len() < INET4_HEADER_LEN {
            return Err(PacketError::Malformed {
                version: 4,
                have: buf.len(),
                need: INET4_HEADER_LEN,
            });
        }
        Ok(Self {
            buf,
            src: OnceCell::new(),
            dst: OnceCell::new(),
        })
    }

    #[inline]
    fn header(&self) -> &Ipv4Header {
        // length is checked at construction and the buffer never shrinks
        let (header, _) = Ipv4Header::ref_from_prefix(&self.buf)
            .expect("buffer holds at least a fixed IPv4 header");
        header
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.header().version()
    }

    /// Header length in 32-bit words (value × 4 = header byte length).
    #[inline]
    pub fn internet_header_length(&self) -> u8 {
        self.header().ihl()
    }

    #[inline]
    pub fn type_of_service(&self) -> u8 {
        self.header().tos()
    }

    #[inline]
    pub fn total_length(&self) -> u16 {
        self.header().total_length()
    }

    #[inline]
    pub fn identification(&self) -> u16 {
        self.header().identification()
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.header().flags()
    }

    #[inline]
    pub fn fragment_offset(&self) -> u16 {
        self.header().fragment_offset()
    }

    #[inline]
    pub fn has_dont_fragment(&self) -> bool {
        self.header().has_dont_fragment()
    }

    #[inline]
    pub fn has_more_fragments(&self) -> bool {
        self.header().has_more_fragments()
    }

    #[inline]
    pub fn time_to_live(&self) -> u8 {
        self.header().ttl()
    }

    #[inline]
    pub fn protocol(&self) -> IpProto {
        self.header().protocol()
    }

    #[inline]
    pub fn header_checksum(&self) -> u16 {
        self.header().checksum()
    }

    /// Bytes 12..16, computed once and cached.
    #[inline]
    pub fn source_address(&self) -> Ipv4Addr {
        *self.src.get_or_init(|| self.header().src_ip())
    }

    /// Bytes 16..20, computed once and cached.
    #[inline]
    pub fn destination_address(&self) -> Ipv4Addr {
        *self.dst.get_or_init(|| self.header().dst_ip())
    }

    /// Everything after the fixed 20-byte header.
    ///
    /// Note: this deliberately ignores `internet_header_length()`, so IP
    /// options (IHL > 5) end up at the front of the returned slice. Callers
    /// that care about options must skip them via that accessor.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf[INET4_HEADER_LEN..]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl fmt::Display for Ipv4Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv4 {} -> {} id={} len={}",
            self.source_address(),
            self.destination_address(),
            self.identification(),
            self.total_length()
        )
    }
}
