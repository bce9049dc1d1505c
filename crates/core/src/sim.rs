//! Discrete-event scheduler, virtual clock, and trace log.
//!
//! All timing in the simulator flows through [`Simulation`]: cable
//! propagation delays, ARP request timeouts, and retry back-off are all
//! expressed as events scheduled against a virtual millisecond clock.
//! Nothing in the core reads the wall clock, so runs are fully
//! deterministic and tests advance time for free.
//!
//! # Implementation
//!
//! Events live in a priority queue (min-heap) keyed by `(fire_at, seq)`.
//! The monotonic sequence number makes events scheduled at the same
//! instant fire in scheduling order, which is what gives a cable its
//! per-direction FIFO guarantee.
//!
//! # Cancellation
//!
//! [`Simulation::schedule_in`] returns a [`TimerId`]. Cancelling marks the
//! id as a tombstone; the queued closure is skipped (and dropped) when its
//! slot reaches the front of the queue. Owners of a timer (e.g. a pending
//! ARP resolution) hold the id and cancel it the moment the awaited event
//! arrives, so no timer outlives the operation it guards.
//!
//! # Observability
//!
//! Every interesting step of the simulation pushes a [`TraceRecord`] into
//! the log: switch learning, forwarding decisions, ARP cache hits and
//! misses, and drops with a [`DropReason`]. The log is the channel the
//! hosting UI (and the tests) read packet-by-packet behaviour from.

use crate::addr::MacAddress;
use crate::ethernet::EtherType;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

/// Virtual simulation time in milliseconds since the start of the run.
pub type SimTime = u64;

/// Handle to a scheduled event, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type EventFn = Box<dyn FnOnce(&mut Simulation)>;

struct ScheduledEvent {
    fire_at: SimTime,
    seq: u64,
    timer: TimerId,
    action: EventFn,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest fire_at, lowest seq first)
        (other.fire_at, other.seq).cmp(&(self.fire_at, self.seq))
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Events handed to the scheduler
    pub events_scheduled: u64,

    /// Events whose closure actually ran
    pub events_executed: u64,

    /// Events skipped because their timer was cancelled
    pub events_cancelled: u64,
}

/// The single-threaded event loop driving the whole simulation.
///
/// Entities never run concurrently: one event fires at a time, may mutate
/// shared state, and may schedule further events. Data races are
/// structurally impossible as long as every entity is driven from one
/// `Simulation`.
pub struct Simulation {
    now: SimTime,
    queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    next_timer: u64,
    live: HashSet<TimerId>,
    cancelled: HashSet<TimerId>,
    log: Vec<TraceRecord>,
    stats: SimStats,
}

impl Simulation {
    /// Create an idle simulation at time zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_timer: 0,
            live: HashSet::new(),
            cancelled: HashSet::new(),
            log: Vec::new(),
            stats: SimStats::default(),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `action` to run `delay_ms` from now.
    ///
    /// Events scheduled at the same instant run in scheduling order.
    pub fn schedule_in(
        &mut self,
        delay_ms: u64,
        action: impl FnOnce(&mut Simulation) + 'static,
    ) -> TimerId {
        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent {
            fire_at: self.now.saturating_add(delay_ms),
            seq,
            timer,
            action: Box::new(action),
        });
        self.live.insert(timer);
        self.stats.events_scheduled += 1;
        timer
    }

    /// Cancel a scheduled event.
    ///
    /// Returns `false` if the event already fired or was already cancelled.
    pub fn cancel(&mut self, timer: TimerId) -> bool {
        if self.live.remove(&timer) {
            self.cancelled.insert(timer);
            true
        } else {
            false
        }
    }

    /// Execute the next pending event, advancing the clock to its fire time.
    ///
    /// Returns `false` when the queue is empty. Cancelled events are
    /// discarded without running (they still advance the internal
    /// bookkeeping, not the clock).
    pub fn step(&mut self) -> bool {
        self.step_bounded(None)
    }

    /// Run until no events remain. Returns the number of events executed.
    pub fn run(&mut self) -> u64 {
        let before = self.stats.events_executed;
        while self.step() {}
        self.stats.events_executed - before
    }

    /// Run events up to and including `deadline`, then set the clock there.
    pub fn run_until(&mut self, deadline: SimTime) -> u64 {
        let before = self.stats.events_executed;
        while self.step_bounded(Some(deadline)) {}
        if self.now < deadline {
            self.now = deadline;
        }
        self.stats.events_executed - before
    }

    fn step_bounded(&mut self, deadline: Option<SimTime>) -> bool {
        loop {
            let due = match self.queue.peek() {
                Some(event) => deadline.map_or(true, |d| event.fire_at <= d),
                None => false,
            };
            if !due {
                return false;
            }
            let Some(event) = self.queue.pop() else {
                return false;
            };
            if self.cancelled.remove(&event.timer) {
                self.stats.events_cancelled += 1;
                continue;
            }
            self.live.remove(&event.timer);
            self.now = event.fire_at;
            self.stats.events_executed += 1;
            (event.action)(self);
            return true;
        }
    }

    /// True when no runnable events are pending.
    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Record a structured trace event at the current time.
    pub fn trace(&mut self, event: TraceEvent) {
        tracing::debug!(at_ms = self.now, "{event}");
        self.log.push(TraceRecord {
            at: self.now,
            event,
        });
    }

    /// All trace records so far, in emission order.
    pub fn events(&self) -> &[TraceRecord] {
        &self.log
    }

    /// Count trace records matching a predicate.
    pub fn count_events(&self, mut pred: impl FnMut(&TraceEvent) -> bool) -> usize {
        self.log.iter().filter(|r| pred(&r.event)).count()
    }

    /// Discard the trace log (counters are kept).
    pub fn clear_events(&mut self) {
        self.log.clear();
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

/// A timestamped trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Virtual time the event was emitted
    pub at: SimTime,

    /// What happened
    pub event: TraceEvent,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6} ms] {}", self.at, self.event)
    }
}

/// Why a signal, frame, or packet was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `Port::send` with no cable attached
    NoCableAttached,
    /// Frame was not for this MAC and promiscuous mode is off
    WrongDestination,
    /// ARP frame arrived but the NIC has no IP bound
    NoArpHandler,
    /// Frame for the upper layer but none is registered
    NoUpperLayer,
    /// Locally addressed packet but no transport layer registered
    NoTransportLayer,
    /// Stack received a frame with a non-IPv4 EtherType
    NonIpv4EtherType,
    /// Payload did not match its declared type
    MalformedPacket,
    /// Forwarding a packet whose TTL would reach zero
    TtlExceeded,
    /// No route matched a forwarded packet's destination
    NoRoute,
    /// Packet was not for us and forwarding is disabled
    ForwardingDisabled,
    /// Next-hop MAC resolution failed
    ArpResolutionFailed,
    /// A route named an interface the stack does not have
    UnknownInterface,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::NoCableAttached => "no cable attached",
            DropReason::WrongDestination => "wrong destination MAC",
            DropReason::NoArpHandler => "no IP configured for ARP",
            DropReason::NoUpperLayer => "no upper layer registered",
            DropReason::NoTransportLayer => "no transport layer registered",
            DropReason::NonIpv4EtherType => "non-IPv4 EtherType",
            DropReason::MalformedPacket => "malformed packet",
            DropReason::TtlExceeded => "TTL exceeded",
            DropReason::NoRoute => "no matching route",
            DropReason::ForwardingDisabled => "forwarding disabled",
            DropReason::ArpResolutionFailed => "ARP resolution failed",
            DropReason::UnknownInterface => "unknown egress interface",
        };
        f.write_str(s)
    }
}

/// A switch's per-frame forwarding decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchDecision {
    /// Relayed out every port except ingress
    Flooded { egress_count: usize },
    /// Relayed out exactly one learned port
    Unicast { port: String },
    /// Destination lives on the ingress port; frame filtered
    Filtered,
}

impl fmt::Display for SwitchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchDecision::Flooded { egress_count } => {
                write!(f, "flooded to {egress_count} ports")
            }
            SwitchDecision::Unicast { port } => write!(f, "unicast out {port}"),
            SwitchDecision::Filtered => f.write_str("filtered"),
        }
    }
}

/// Structured per-hop observation emitted by the simulation entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A port discarded an outbound signal
    SignalDropped { port: String, reason: DropReason },
    /// A hub replicated a signal out all other ports
    HubFlooded {
        hub: String,
        ingress: String,
        egress_count: usize,
    },
    /// A switch learned a new source MAC
    SwitchLearned {
        switch: String,
        mac: MacAddress,
        port: String,
    },
    /// A known MAC appeared on a different ingress port
    SwitchMoved {
        switch: String,
        mac: MacAddress,
        from: String,
        to: String,
    },
    /// A switch made a forwarding decision for a frame
    SwitchForwarded {
        switch: String,
        destination: MacAddress,
        decision: SwitchDecision,
    },
    /// A NIC transmitted a frame
    FrameSent {
        nic: MacAddress,
        destination: MacAddress,
        ether_type: EtherType,
    },
    /// A NIC accepted an inbound frame past MAC filtering
    FrameAccepted {
        nic: MacAddress,
        source: MacAddress,
        ether_type: EtherType,
    },
    /// A NIC discarded an inbound or outbound frame
    FrameDropped { nic: MacAddress, reason: DropReason },
    /// An ARP handler learned a sender mapping from any inbound ARP packet
    ArpLearned {
        nic: MacAddress,
        ip: Ipv4Addr,
        mac: MacAddress,
    },
    /// Resolution answered from the cache
    ArpCacheHit {
        nic: MacAddress,
        ip: Ipv4Addr,
        mac: MacAddress,
    },
    /// Resolution had to go to the wire
    ArpCacheMiss { nic: MacAddress, ip: Ipv4Addr },
    /// A request broadcast went out (attempt is 1-based)
    ArpRequestSent {
        nic: MacAddress,
        target: Ipv4Addr,
        attempt: u32,
    },
    /// A unicast reply went out for a request addressed to us
    ArpReplySent { nic: MacAddress, target: Ipv4Addr },
    /// A pending resolution completed
    ArpResolved {
        nic: MacAddress,
        ip: Ipv4Addr,
        mac: MacAddress,
    },
    /// A pending resolution exhausted its retries
    ArpFailed {
        nic: MacAddress,
        ip: Ipv4Addr,
        attempts: u32,
    },
    /// A stack sent a locally originated packet
    PacketSent {
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
    /// A stack delivered a packet to its transport layer
    PacketDelivered {
        destination: Ipv4Addr,
        protocol: u8,
    },
    /// A stack forwarded a packet towards another network
    PacketForwarded {
        destination: Ipv4Addr,
        ttl: u8,
        via: String,
    },
    /// A stack discarded a packet
    PacketDropped { reason: DropReason },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::SignalDropped { port, reason } => {
                write!(f, "port {port}: signal dropped ({reason})")
            }
            TraceEvent::HubFlooded {
                hub,
                ingress,
                egress_count,
            } => write!(f, "hub {hub}: flooded from {ingress} to {egress_count} ports"),
            TraceEvent::SwitchLearned { switch, mac, port } => {
                write!(f, "switch {switch}: learned {mac} on {port}")
            }
            TraceEvent::SwitchMoved {
                switch,
                mac,
                from,
                to,
            } => write!(f, "switch {switch}: {mac} moved {from} -> {to}"),
            TraceEvent::SwitchForwarded {
                switch,
                destination,
                decision,
            } => write!(f, "switch {switch}: frame for {destination} {decision}"),
            TraceEvent::FrameSent {
                nic,
                destination,
                ether_type,
            } => write!(f, "nic {nic}: sent {ether_type} frame to {destination}"),
            TraceEvent::FrameAccepted {
                nic,
                source,
                ether_type,
            } => write!(f, "nic {nic}: accepted {ether_type} frame from {source}"),
            TraceEvent::FrameDropped { nic, reason } => {
                write!(f, "nic {nic}: frame dropped ({reason})")
            }
            TraceEvent::ArpLearned { nic, ip, mac } => {
                write!(f, "arp {nic}: learned {ip} -> {mac}")
            }
            TraceEvent::ArpCacheHit { nic, ip, mac } => {
                write!(f, "arp {nic}: cache hit {ip} -> {mac}")
            }
            TraceEvent::ArpCacheMiss { nic, ip } => write!(f, "arp {nic}: cache miss for {ip}"),
            TraceEvent::ArpRequestSent {
                nic,
                target,
                attempt,
            } => write!(f, "arp {nic}: request {attempt} for {target}"),
            TraceEvent::ArpReplySent { nic, target } => {
                write!(f, "arp {nic}: reply sent to {target}")
            }
            TraceEvent::ArpResolved { nic, ip, mac } => {
                write!(f, "arp {nic}: resolved {ip} -> {mac}")
            }
            TraceEvent::ArpFailed { nic, ip, attempts } => {
                write!(f, "arp {nic}: resolution of {ip} failed after {attempts} requests")
            }
            TraceEvent::PacketSent {
                source,
                destination,
            } => write!(f, "ip: sent {source} -> {destination}"),
            TraceEvent::PacketDelivered {
                destination,
                protocol,
            } => write!(f, "ip: delivered to {destination} (proto {protocol})"),
            TraceEvent::PacketForwarded {
                destination,
                ttl,
                via,
            } => write!(f, "ip: forwarded to {destination} via {via} (ttl {ttl})"),
            TraceEvent::PacketDropped { reason } => write!(f, "ip: packet dropped ({reason})"),
        }
    }
}
