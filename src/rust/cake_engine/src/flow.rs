//! One hashed flow: a FIFO of packets plus its DRR and CoDel state.

use crate::codel::CodelVars;
use crate::packet::Packet;
use std::collections::VecDeque;

/// A packet plus the time it joined its flow queue.
#[derive(Debug)]
pub(crate) struct QueuedPacket {
    pub packet: Packet,
    pub enqueue_ts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CakeFlow {
    pub queue: VecDeque<QueuedPacket>,
    /// Signed byte allowance for the current DRR turn.
    pub deficit: i32,
    /// Drops (or ECN marks) charged to this flow since it last went active.
    pub dropped: u32,
    pub cvars: CodelVars,
}

impl CakeFlow {
    pub fn push(&mut self, packet: Packet, enqueue_ts: u64) {
        self.queue.push_back(QueuedPacket { packet, enqueue_ts });
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
