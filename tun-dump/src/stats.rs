use std::fmt::{self, Display};

use tun_strata::packet::protocol::IpProto;
use tun_strata::packet::TunPacket;

/// Running counters over everything read off the device.
///
/// The device serves a single reader, so plain integers are enough here.
#[derive(Debug, Default)]
pub struct Stats {
    pub packets: u64,
    pub bytes: u64,

    // Network layer
    pub ipv4: u64,
    pub ipv6: u64,

    // Transport layer
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    pub icmpv6: u64,
    pub other_proto: u64,

    // Errors
    pub malformed: u64,
}

impl Stats {
    pub fn record(&mut self, packet: &TunPacket) {
        self.packets += 1;
        self.bytes += packet.as_bytes().len() as u64;

        let proto = match packet {
            TunPacket::Ipv4(p) => {
                self.ipv4 += 1;
                p.protocol()
            }
            TunPacket::Ipv6(p) => {
                self.ipv6 += 1;
                p.next_header()
            }
        };

        match proto {
            IpProto::TCP => self.tcp += 1,
            IpProto::UDP => self.udp += 1,
            IpProto::ICMP => self.icmp += 1,
            IpProto::IPV6_ICMP => self.icmpv6 += 1,
            _ => self.other_proto += 1,
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Statistics ===")?;
        writeln!(f, "Packets:        {}", self.packets)?;
        writeln!(f, "Bytes:          {}", self.bytes)?;
        writeln!(f, "IPv4:           {}", self.ipv4)?;
        writeln!(f, "IPv6:           {}", self.ipv6)?;
        writeln!(f, "TCP:            {}", self.tcp)?;
        writeln!(f, "UDP:            {}", self.udp)?;
        writeln!(f, "ICMP:           {}", self.icmp)?;
        writeln!(f, "ICMPv6:         {}", self.icmpv6)?;
        writeln!(f, "Other protocol: {}", self.other_proto)?;
        writeln!(f, "Malformed:      {}", self.malformed)?;
        Ok(())
    }
}
