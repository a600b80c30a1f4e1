//! Owned IP packet views.
//!
//! A [`TunPacket`] wraps a buffer that holds one whole IP packet, exactly as
//! it crossed the TUN boundary, and exposes its header fields through
//! read-only accessors. The version nibble of the first byte decides which
//! specialization interprets the buffer: value 4 goes to [`Ipv4Packet`],
//! everything else goes down the IPv6 path.
//!
//! Construction only enforces the minimum header length for the detected
//! version. Header checksum and total-length consistency are exposed as
//! accessors, not validated.

pub mod ipv4;
pub mod ipv6;
pub mod protocol;

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

pub use ipv4::Ipv4Packet;
pub use ipv6::Ipv6Packet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer has {have} bytes, an IPv{version} packet needs at least {need}")]
    Malformed { version: u8, have: usize, need: usize },
}

/// One whole IP packet, owned, interpreted per its version nibble.
#[derive(Debug, Clone)]
pub enum TunPacket {
    Ipv4(Ipv4Packet),
    Ipv6(Ipv6Packet),
}

impl TunPacket {
    /// Wraps `buf`, routing on the top 4 bits of byte 0. Anything that is not
    /// version 4 is handed to the IPv6 view, which rejects it if it is too
    /// short for an IPv6 header.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, PacketError> {
        match buf.first().map(|b| b >> 4) {
            Some(4) => Ipv4Packet::new(buf).map(TunPacket::Ipv4),
            _ => Ipv6Packet::new(buf).map(TunPacket::Ipv6),
        }
    }

    #[inline]
    pub fn version(&self) -> u8 {
        match self {
            TunPacket::Ipv4(p) => p.version(),
            TunPacket::Ipv6(p) => p.version(),
        }
    }

    #[inline]
    pub fn source_address(&self) -> IpAddr {
        match self {
            TunPacket::Ipv4(p) => IpAddr::V4(p.source_address()),
            TunPacket::Ipv6(p) => IpAddr::V6(p.source_address()),
        }
    }

    #[inline]
    pub fn destination_address(&self) -> IpAddr {
        match self {
            TunPacket::Ipv4(p) => IpAddr::V4(p.destination_address()),
            TunPacket::Ipv6(p) => IpAddr::V6(p.destination_address()),
        }
    }

    /// The whole packet, headers included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TunPacket::Ipv4(p) => p.as_bytes(),
            TunPacket::Ipv6(p) => p.as_bytes(),
        }
    }

    /// Releases the backing buffer to the caller.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            TunPacket::Ipv4(p) => p.into_bytes(),
            TunPacket::Ipv6(p) => p.into_bytes(),
        }
    }
}

impl fmt::Display for TunPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunPacket::Ipv4(p) => fmt::Display::fmt(p, f),
            TunPacket::Ipv6(p) => fmt::Display::fmt(p, f),
        }
    }
}
