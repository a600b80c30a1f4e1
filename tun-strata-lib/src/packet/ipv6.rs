//! IPv6 packet view (RFC 8200).
//!
//! The IPv6 header is a fixed 40 bytes; optional features live in extension
//! headers, which this layer does not walk. [`Ipv6Packet`] treats everything
//! after the fixed header as payload.
//!
//! # Examples
//!
//! ```
//! use tun_strata::packet::ipv6::Ipv6Packet;
//! use tun_strata::packet::protocol::IpProto;
//! use std::net::Ipv6Addr;
//!
//! let buf = vec![
//!     0x60, 0x00, 0x00, 0x00, // Version=6, TC=0, Flow Label=0
//!     0x00, 0x08,             // Payload Length: 8
//!     0x3A,                   // Next Header: ICMPv6
//!     0x40,                   // Hop Limit: 64
//!     // Source: ::1
//!     0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
//!     // Destination: ::1
//!     0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
//! ];
//!
//! let packet = Ipv6Packet::new(buf).unwrap();
//! assert_eq!(packet.version(), 6);
//! assert_eq!(packet.next_header(), IpProto::IPV6_ICMP);
//! assert_eq!(packet.hop_limit(), 64);
//! assert_eq!(packet.source_address(), Ipv6Addr::LOCALHOST);
//! ```

use std::cell::OnceCell;
use std::fmt::{self, Formatter};
use std::net::Ipv6Addr;

use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::protocol::IpProto;
use crate::packet::PacketError;

/// Fixed IPv6 header length in bytes.
pub const INET6_HEADER_LEN: usize = 40;

/// Fixed IPv6 header as defined in RFC 8200.
#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Debug, Clone, Copy)]
pub struct Ipv6Header {
    /// Version (4 bits), Traffic Class (8 bits), Flow Label (20 bits)
    ver_tc_flow: [u8; 4],
    payload_length: U16<BigEndian>,
    next_header: IpProto,
    hop_limit: u8,
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
}

impl Ipv6Header {
    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_tc_flow[0] >> 4
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        (self.ver_tc_flow[0] << 4) | (self.ver_tc_flow[1] >> 4)
    }

    #[inline]
    pub fn flow_label(&self) -> u32 {
        (u32::from(self.ver_tc_flow[1] & 0x0F) << 16)
            | (u32::from(self.ver_tc_flow[2]) << 8)
            | u32::from(self.ver_tc_flow[3])
    }

    /// Payload length, excluding the 40-byte header itself.
    #[inline]
    pub fn payload_length(&self) -> u16 {
        self.payload_length.get()
    }

    #[inline]
    pub fn next_header(&self) -> IpProto {
        self.next_header
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    #[inline]
    pub fn src_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src_ip)
    }

    #[inline]
    pub fn dst_ip(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst_ip)
    }
}

/// An owned IPv6 packet with memoized address fields.
#[derive(Debug, Clone)]
pub struct Ipv6Packet {
    buf: Vec<u8>,
    src: OnceCell<Ipv6Addr>,
    dst: OnceCell<Ipv6Addr>,
}

impl Ipv6Packet {
    /// Wraps `buf`. Fails when the buffer cannot hold a fixed IPv6 header.
    pub fn new(buf: Vec<u8>) -> Result<Self, PacketError> {
        if buf.len() < INET6_HEADER_LEN {
            return Err(PacketError::Malformed {
                version: 6,
                have: buf.len(),
                need: INET6_HEADER_LEN,
            });
        }
        Ok(Self {
            buf,
            src: OnceCell::new(),
            dst: OnceCell::new(),
        })
    }

    #[inline]
    fn header(&self) -> &Ipv6Header {
        // length is checked at construction and the buffer never shrinks
        let (header, _) = Ipv6Header::ref_from_prefix(&self.buf)
            .expect("buffer holds at least a fixed IPv6 header");
        header
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.header().version()
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        self.header().traffic_class()
    }

    #[inline]
    pub fn flow_label(&self) -> u32 {
        self.header().flow_label()
    }

    #[inline]
    pub fn payload_length(&self) -> u16 {
        self.header().payload_length()
    }

    #[inline]
    pub fn next_header(&self) -> IpProto {
        self.header().next_header()
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.header().hop_limit()
    }

    /// Bytes 8..24, computed once and cached.
    #[inline]
    pub fn source_address(&self) -> Ipv6Addr {
        *self.src.get_or_init(|| self.header().src_ip())
    }

    /// Bytes 24..40, computed once and cached.
    #[inline]
    pub fn destination_address(&self) -> Ipv6Addr {
        *self.dst.get_or_init(|| self.header().dst_ip())
    }

    /// Everything after the fixed 40-byte header, extension headers included.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf[INET6_HEADER_LEN..]
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

impl fmt::Display for Ipv6Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv6 {} -> {} next={} hlim={} plen={}",
            self.source_address(),
            self.destination_address(),
            self.next_header(),
            self.hop_limit(),
            self.payload_length()
        )
    }
}
