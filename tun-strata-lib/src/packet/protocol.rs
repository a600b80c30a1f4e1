//! IP protocol numbers (IPv4 `Protocol` field, IPv6 `Next Header` field).
//!
//! A small newtype over `u8` with named constants for the protocols a TUN
//! layer commonly sees. `Display` shows the IANA keyword for known numbers
//! and falls back to the raw value.

use std::fmt::{self, Formatter};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[repr(transparent)]
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct IpProto(pub u8);

impl IpProto {
    pub const HOPOPT: IpProto = IpProto(0);
    pub const ICMP: IpProto = IpProto(1);
    pub const IGMP: IpProto = IpProto(2);
    pub const TCP: IpProto = IpProto(6);
    pub const UDP: IpProto = IpProto(17);
    pub const IPV6: IpProto = IpProto(41);
    pub const GRE: IpProto = IpProto(47);
    pub const ESP: IpProto = IpProto(50);
    pub const IPV6_ICMP: IpProto = IpProto(58);
    pub const IPV6_NONXT: IpProto = IpProto(59);
    pub const OSPF: IpProto = IpProto(89);
    pub const SCTP: IpProto = IpProto(132);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            IpProto::HOPOPT => "hopopt",
            IpProto::ICMP => "icmp",
            IpProto::IGMP => "igmp",
            IpProto::TCP => "tcp",
            IpProto::UDP => "udp",
            IpProto::IPV6 => "ipv6",
            IpProto::GRE => "gre",
            IpProto::ESP => "esp",
            IpProto::IPV6_ICMP => "ipv6-icmp",
            IpProto::IPV6_NONXT => "ipv6-nonxt",
            IpProto::OSPF => "ospf",
            IpProto::SCTP => "sctp",
            _ => return None,
        })
    }
}

impl From<u8> for IpProto {
    #[inline]
    fn from(value: u8) -> Self {
        IpProto(value)
    }
}

impl From<IpProto> for u8 {
    #[inline]
    fn from(proto: IpProto) -> Self {
        proto.0
    }
}

impl fmt::Display for IpProto {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}
