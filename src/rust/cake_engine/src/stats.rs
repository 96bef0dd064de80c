//! Statistics snapshots, in the shape CAKE stats consumers expect.

use serde::{Deserialize, Serialize};

/// Per-tin counters and gauges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TinStats {
    /// Configured threshold rate in bytes per second.
    pub threshold_rate: u64,
    pub target_us: u32,
    pub interval_us: u32,
    pub sent_packets: u32,
    pub sent_bytes: u64,
    pub dropped_packets: u32,
    pub ecn_marked_packets: u32,
    /// Packets evicted by the memory-overflow policy while this tin was
    /// being enqueued into.
    pub drop_overlimit: u32,
    pub backlog_bytes: u32,
    pub sparse_flows: u16,
    pub bulk_flows: u16,
    pub flow_quantum: u16,
}

/// Whole-scheduler snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CakeStats {
    pub tin_cnt: u16,
    pub memory_limit: u32,
    pub memory_used: u32,
    pub backlog_bytes: u32,
    pub qlen: u32,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    /// Dequeue attempts refused by the global shaper gate.
    pub overlimits: u32,
    pub tins: Vec<TinStats>,
}

/// Debug view of a single flow, the class-stats equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub qlen: u32,
    pub backlog_bytes: u32,
    pub deficit: i32,
    pub dropped: u32,
    pub codel_count: u32,
    pub dropping: bool,
    /// Nanoseconds until the next scheduled CoDel drop, negative when
    /// overdue. Only meaningful while dropping.
    pub drop_next_ns: i64,
}
