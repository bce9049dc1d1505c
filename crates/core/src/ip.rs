//! IPv4 packet model.
//!
//! Packets carry a structured [`IpHeader`] and an [`IpPayload`]; there is no
//! byte-level encoding. TTL handling is immutable: [`IpPacket::decrement_ttl`]
//! returns a fresh packet so a forwarder never mutates what a hop handed it.

use std::fmt;
use std::net::Ipv4Addr;

/// Initial TTL stamped on locally originated packets.
pub const DEFAULT_TTL: u8 = 64;

/// IP protocol numbers the simulator labels, with a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    /// 1
    Icmp,
    /// 6
    Tcp,
    /// 17
    Udp,
    /// Any other protocol number
    Other(u8),
}

impl IpProtocol {
    /// Map a raw protocol number onto the enum.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            other => Self::Other(other),
        }
    }

    /// The IANA protocol number.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Icmp => 1,
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(value) => *value,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => write!(f, "ICMP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Other(value) => write!(f, "proto {value}"),
        }
    }
}

/// Packet payload, kept structured rather than serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPayload {
    /// Human-readable text, handy in demos and traces
    Text(String),
    /// Arbitrary bytes
    Bytes(Vec<u8>),
}

impl IpPayload {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Bytes(b) => b.len(),
        }
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The fields of an IPv4 header the simulation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    /// IP version, always 4 for packets built by [`IpPacket::new`]
    pub version: u8,

    /// Remaining hop budget
    pub ttl: u8,

    /// Payload protocol
    pub protocol: IpProtocol,

    /// Originating address
    pub source: Ipv4Addr,

    /// Final destination address
    pub destination: Ipv4Addr,
}

/// An IPv4 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPacket {
    /// Header fields
    pub header: IpHeader,

    /// Carried payload
    pub payload: IpPayload,
}

impl IpPacket {
    /// Build a packet with the default TTL.
    pub fn new(
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: IpProtocol,
        payload: IpPayload,
    ) -> Self {
        Self {
            header: IpHeader {
                version: 4,
                ttl: DEFAULT_TTL,
                protocol,
                source,
                destination,
            },
            payload,
        }
    }

    /// Same packet with an explicit TTL, for tests and hop-limit demos.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.header.ttl = ttl;
        self
    }

    /// A copy of this packet with TTL reduced by one (saturating at zero).
    pub fn decrement_ttl(&self) -> IpPacket {
        let mut copy = self.clone();
        copy.header.ttl = copy.header.ttl.saturating_sub(1);
        copy
    }

    /// Basic header sanity: only version 4 is valid here.
    pub fn is_valid(&self) -> bool {
        self.header.version == 4
    }
}

impl fmt::Display for IpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv4 [{} -> {}] TTL={} {}",
            self.header.source, self.header.destination, self.header.ttl, self.header.protocol
        )
    }
}
