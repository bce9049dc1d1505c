//! tcpip-sim-core: Educational discrete-event simulation of a layered
//! network stack
//!
//! This library models a small TCP/IP-style stack from the wire up:
//! - Signals propagate over cables with latency, through hubs and switches
//! - Interfaces filter frames, answer ARP, and learn neighbor mappings
//! - An IP stack routes by longest prefix and forwards between subnets
//! - Everything runs on one virtual clock, so runs are fully reproducible
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `sim`: Virtual-clock event scheduler and trace log
//! - `addr`: MAC addresses, subnet masks, and subnet arithmetic
//! - `phy`: Signals, ports, cables, and the repeater hub
//! - `ethernet`: Frame and EtherType model
//! - `arp`: Neighbor cache and resolution handler
//! - `nic`: The network interface card
//! - `switch`: Transparent learning switch
//! - `ip`: IPv4 packet model
//! - `route`: Longest-prefix-match routing table
//! - `stack`: Host stack with optional forwarding
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **Deterministic**: One virtual clock, FIFO tie-breaking, seeded MACs
//! - **Observable**: Every drop, flood, and forward lands in the trace log
//! - **Structural**: Payloads are tagged unions, never re-parsed bytes

pub mod addr;
pub mod arp;
pub mod error;
pub mod ethernet;
pub mod ip;
pub mod nic;
pub mod phy;
pub mod route;
pub mod sim;
pub mod stack;
pub mod switch;

// Re-export commonly used types
pub use addr::{MacAddress, SubnetMask};
pub use error::{Error, Result};
pub use sim::{SimTime, Simulation};
