//! Ethernet framing for the layer-2 model.
//!
//! Frames here are structured values rather than byte buffers: the payload
//! travels as a [`FramePayload`] tagged union so receivers dispatch on the
//! enum instead of parsing octets. EtherType numbering still follows the
//! IEEE registry so traces read like real captures.

use crate::addr::MacAddress;
use crate::arp::ArpPacket;
use crate::ip::IpPacket;
use std::fmt;

/// EtherType values the simulator understands, with a catch-all for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    /// 0x0800
    Ipv4,
    /// 0x0806
    Arp,
    /// 0x86DD
    Ipv6,
    /// 0x8100
    Vlan8021Q,
    /// Any other registered or experimental value
    Other(u16),
}

impl EtherType {
    /// Map a raw EtherType number onto the enum.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0800 => Self::Ipv4,
            0x0806 => Self::Arp,
            0x86DD => Self::Ipv6,
            0x8100 => Self::Vlan8021Q,
            other => Self::Other(other),
        }
    }

    /// The registry number for this EtherType.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Ipv4 => 0x0800,
            Self::Arp => 0x0806,
            Self::Ipv6 => 0x86DD,
            Self::Vlan8021Q => 0x8100,
            Self::Other(value) => *value,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "IPv4"),
            Self::Arp => write!(f, "ARP"),
            Self::Ipv6 => write!(f, "IPv6"),
            Self::Vlan8021Q => write!(f, "802.1Q"),
            Self::Other(value) => write!(f, "0x{value:04x}"),
        }
    }
}

/// Frame payload, dispatched on the tag rather than re-parsed per layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// An ARP request or reply
    Arp(ArpPacket),
    /// An IPv4 packet
    Ipv4(IpPacket),
    /// Uninterpreted application bytes for raw layer-2 experiments
    Raw(Vec<u8>),
}

impl FramePayload {
    /// The EtherType this payload would be carried under.
    pub fn ether_type(&self) -> EtherType {
        match self {
            Self::Arp(_) => EtherType::Arp,
            Self::Ipv4(_) => EtherType::Ipv4,
            Self::Raw(_) => EtherType::Other(0x88B5),
        }
    }
}

/// A layer-2 frame as it travels over cables and through switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    /// Destination hardware address
    pub destination: MacAddress,

    /// Source hardware address, stamped by the sending interface
    pub source: MacAddress,

    /// Declared payload type
    pub ether_type: EtherType,

    /// The payload itself
    pub payload: FramePayload,
}

impl EthernetFrame {
    /// Assemble a frame.
    pub fn new(
        destination: MacAddress,
        source: MacAddress,
        ether_type: EtherType,
        payload: FramePayload,
    ) -> Self {
        Self {
            destination,
            source,
            ether_type,
            payload,
        }
    }

    /// True if addressed to the broadcast MAC.
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }
}

impl fmt::Display for EthernetFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} -> {}] {}",
            self.source, self.destination, self.ether_type
        )
    }
}
