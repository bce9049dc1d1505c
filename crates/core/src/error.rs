//! Error types for the network stack simulator.
//!
//! All operations return structured errors rather than panicking.
//! Failures are local: nothing here is fatal to the simulation, and
//! misconfiguration (an unplugged cable, a missing upper layer) degrades
//! to a logged drop instead of an error.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Top-level error type for all operations in the simulator.
///
/// Each variant corresponds to a specific failure domain:
/// - Address: MAC/IP/subnet parsing and validation
/// - Arp: IP-to-MAC resolution failures
/// - Routing: route lookup failures for locally originated traffic
#[derive(Debug, Error)]
pub enum Error {
    /// Address parsing or validation failed
    #[error("address error: {0}")]
    Address(#[from] AddressError),

    /// ARP resolution failed or was unavailable
    #[error("ARP error: {0}")]
    Arp(#[from] ArpError),

    /// Route lookup failed for a locally originated packet
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),
}

/// MAC/IP address and subnet validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was not a `AA:BB:CC:DD:EE:FF` style MAC address
    #[error("invalid MAC address: {0:?}")]
    InvalidMacAddress(String),

    /// Mask bits were not a contiguous run of ones
    #[error("invalid subnet mask: {0:?}")]
    InvalidSubnetMask(String),

    /// Prefix length outside 0..=32
    #[error("invalid prefix length: {0}")]
    InvalidPrefixLength(u8),

    /// Input was not `a.b.c.d/n` CIDR notation
    #[error("invalid CIDR notation: {0:?}")]
    InvalidCidr(String),
}

/// ARP resolution errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArpError {
    /// Every request broadcast timed out without a matching reply
    #[error("ARP resolution failed for {target} after {attempts} requests")]
    ResolutionFailed { target: Ipv4Addr, attempts: u32 },

    /// The interface has no IP address bound, so ARP is inactive
    #[error("ARP not available: no IP address configured")]
    NotConfigured,

    /// The handler was cleaned up while resolutions were outstanding
    #[error("ARP handler shut down")]
    HandlerShutdown,
}

/// Routing failures for locally originated sends.
///
/// Forwarded packets never produce these: a forwarding failure is a silent,
/// traced drop (ICMP error generation is out of scope).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No routing entry matched the destination
    #[error("no route to host: {0}")]
    NoRouteToHost(Ipv4Addr),

    /// A route named an interface the stack does not have
    #[error("unknown interface: {0:?}")]
    UnknownInterface(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(RoutingError::NoRouteToHost(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(err.to_string(), "routing error: no route to host: 10.0.0.1");
    }

    #[test]
    fn test_arp_error_display() {
        let err = ArpError::ResolutionFailed {
            target: Ipv4Addr::new(192, 168, 1, 20),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "ARP resolution failed for 192.168.1.20 after 3 requests"
        );
    }
}
