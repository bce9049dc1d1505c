//! MAC addresses, subnet masks, and IPv4 subnet arithmetic.
//!
//! IPv4 addresses are plain [`std::net::Ipv4Addr`]; this module adds the
//! layer-2 [`MacAddress`] type, a validated [`SubnetMask`], and the small
//! set of network/broadcast/prefix helpers the routing code builds on.

use crate::error::AddressError;
use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// A 48-bit Ethernet hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The all-ones broadcast address `FF:FF:FF:FF:FF:FF`.
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// The all-zeros address used as the unknown target in ARP requests.
    pub const UNSPECIFIED: MacAddress = MacAddress([0x00; 6]);

    /// Build a MAC from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The raw octets.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True for `FF:FF:FF:FF:FF:FF`.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True for `00:00:00:00:00:00`.
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Generate a random locally-administered unicast MAC.
    ///
    /// Pass a seeded RNG for reproducible addresses.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut octets = [0u8; 6];
        rng.fill(&mut octets[..]);
        // locally administered, unicast
        octets[0] = (octets[0] | 0x02) & 0xFE;
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for slot in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddressError::InvalidMacAddress(s.to_string()))?;
            if part.len() != 2 {
                return Err(AddressError::InvalidMacAddress(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidMacAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressError::InvalidMacAddress(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// An IPv4 subnet mask, validated to a contiguous run of one bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubnetMask(u32);

impl SubnetMask {
    /// `/24`, the conventional small-LAN mask.
    pub const CLASS_C: SubnetMask = SubnetMask(0xFFFF_FF00);

    /// `/0`, matching everything (the default-route mask).
    pub const ANY: SubnetMask = SubnetMask(0);

    /// Build a mask from a prefix length in `0..=32`.
    pub fn from_prefix(prefix: u8) -> Result<Self, AddressError> {
        match prefix {
            0 => Ok(Self(0)),
            1..=32 => Ok(Self(u32::MAX << (32 - prefix as u32))),
            _ => Err(AddressError::InvalidPrefixLength(prefix)),
        }
    }

    /// Build a mask from raw bits, rejecting non-contiguous masks.
    pub fn from_bits(bits: u32) -> Result<Self, AddressError> {
        if bits.leading_ones() + bits.trailing_zeros() == 32 {
            Ok(Self(bits))
        } else {
            Err(AddressError::InvalidSubnetMask(
                Ipv4Addr::from(bits).to_string(),
            ))
        }
    }

    /// The raw mask bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// The prefix length (number of one bits).
    pub const fn prefix_len(&self) -> u8 {
        self.0.count_ones() as u8
    }
}

impl fmt::Display for SubnetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Ipv4Addr::from(self.0), f)
    }
}

impl fmt::Debug for SubnetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (/{})", Ipv4Addr::from(self.0), self.prefix_len())
    }
}

impl FromStr for SubnetMask {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = Ipv4Addr::from_str(s)
            .map_err(|_| AddressError::InvalidSubnetMask(s.to_string()))?;
        Self::from_bits(u32::from(addr))
    }
}

/// The network address of `ip` under `mask`.
pub fn network_address(ip: Ipv4Addr, mask: SubnetMask) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & mask.bits())
}

/// The directed broadcast address of `ip`'s subnet under `mask`.
pub fn broadcast_address(ip: Ipv4Addr, mask: SubnetMask) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & mask.bits() | !mask.bits())
}

/// Whether two addresses fall in the same subnet under `mask`.
pub fn is_same_network(a: Ipv4Addr, b: Ipv4Addr, mask: SubnetMask) -> bool {
    network_address(a, mask) == network_address(b, mask)
}

/// Summary of a subnet derived from an address and mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetInfo {
    /// Network address (host bits zero)
    pub network: Ipv4Addr,

    /// Directed broadcast address (host bits one)
    pub broadcast: Ipv4Addr,

    /// The mask itself
    pub mask: SubnetMask,

    /// Prefix length
    pub prefix_len: u8,

    /// Usable host addresses (excludes network and broadcast; 0 for /31, /32)
    pub host_count: u64,
}

/// Compute the [`SubnetInfo`] for an address under a mask.
pub fn subnet_info(ip: Ipv4Addr, mask: SubnetMask) -> SubnetInfo {
    let prefix_len = mask.prefix_len();
    let host_bits = 32 - prefix_len as u32;
    let host_count = if host_bits >= 2 {
        (1u64 << host_bits) - 2
    } else {
        0
    };
    SubnetInfo {
        network: network_address(ip, mask),
        broadcast: broadcast_address(ip, mask),
        mask,
        prefix_len,
        host_count,
    }
}

/// Parse `a.b.c.d/n` CIDR notation into an address and mask.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, SubnetMask), AddressError> {
    let (ip_part, prefix_part) = cidr
        .split_once('/')
        .ok_or_else(|| AddressError::InvalidCidr(cidr.to_string()))?;
    let ip = Ipv4Addr::from_str(ip_part)
        .map_err(|_| AddressError::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix_part
        .parse()
        .map_err(|_| AddressError::InvalidCidr(cidr.to_string()))?;
    let mask =
        SubnetMask::from_prefix(prefix).map_err(|_| AddressError::InvalidCidr(cidr.to_string()))?;
    Ok((ip, mask))
}
