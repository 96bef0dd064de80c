//! The CAKE scheduler proper: global shaper -> tin DRR -> flow DRR -> CoDel.
//!
//! The priority queue operates as a weighted DRR across tins, combined with
//! a per-tin bandwidth tracker that reuses the shaper logic to detect which
//! side of its sharing threshold a tin is on. That picks whether the tin's
//! priority weight (high) or bandwidth weight (low) is used for the current
//! pass, so priority tins are snappy inside their allocation and harmless
//! outside it.

use crate::codel::{codel_dequeue, CodelParams, CodelQueue, CodelVars};
use crate::config::{apply_preset, CakeSettings, DiffservMode, FlowMode};
use crate::flow::QueuedPacket;
use crate::flowchain::ChainId;
use crate::hash::flow_index;
use crate::packet::Packet;
use crate::shaper::{overhead_adjust, TinRate, MTU};
use crate::stats::{CakeStats, FlowStats, TinStats};
use crate::tin::CakeTin;
use crate::watchdog::Watchdog;
use tracing::{debug, warn};

pub const CAKE_MAX_TINS: usize = 8;

const FLOWS_PER_TIN: usize = 1024;

/// Packet-count ceiling; bounds the byte budget via `limit * MTU`.
const DEFAULT_PACKET_LIMIT: u32 = 10240;

pub struct CakeScheduler {
    tins: Vec<CakeTin>,
    tin_index: [u8; 64],
    tin_cnt: u16,
    tin_mode: DiffservMode,
    flow_mode: FlowMode,

    /// Global byte clock; `rate_bps` holds the configured base rate.
    rate: TinRate,
    rate_overhead: i16,
    atm_framing: bool,
    wash_dscp: bool,
    autorate_ingress: bool,
    interval_us: u32,
    target_us: u32,
    cparams: CodelParams,

    buffer_used: u32,
    buffer_limit: u32,
    buffer_config_limit: u32,
    limit: u32,

    backlog: u32,
    qlen: u32,
    sent_packets: u64,
    sent_bytes: u64,
    overlimits: u32,

    cur_tin: u16,
    peeked: Option<Packet>,
    watchdog: Box<dyn Watchdog>,
}

/// Scheduler-side pop context for the flow CoDel is servicing.
struct CurrentFlow<'a> {
    sched: &'a mut CakeScheduler,
    tin: usize,
    flow: usize,
}

impl CodelQueue for CurrentFlow<'_> {
    fn pop(&mut self) -> Option<QueuedPacket> {
        self.sched.pop_flow_head(self.tin, self.flow)
    }

    fn backlog_bytes(&self) -> u32 {
        self.sched.backlog
    }
}

impl CakeScheduler {
    pub fn new(settings: CakeSettings, watchdog: Box<dyn Watchdog>) -> Self {
        let tins = (0..CAKE_MAX_TINS)
            .map(|_| CakeTin::new(FLOWS_PER_TIN, rand::random()))
            .collect();

        let mut sched = Self {
            tins,
            tin_index: [0; 64],
            tin_cnt: 0,
            tin_mode: DiffservMode::default(),
            flow_mode: FlowMode::default(),
            rate: TinRate::default(),
            rate_overhead: 0,
            atm_framing: false,
            wash_dscp: false,
            autorate_ingress: false,
            interval_us: 100_000,
            target_us: 5_000,
            cparams: CodelParams {
                target: 5_000_000,
                interval: 100_000_000,
                mtu: MTU,
            },
            buffer_used: 0,
            buffer_limit: 0,
            buffer_config_limit: 0,
            limit: DEFAULT_PACKET_LIMIT,
            backlog: 0,
            qlen: 0,
            sent_packets: 0,
            sent_bytes: 0,
            overlimits: 0,
            cur_tin: 0,
            peeked: None,
            watchdog,
        };
        sched.store_settings(settings);
        sched.reconfigure();
        debug!(
            mode = ?sched.tin_mode,
            rate_bps = sched.rate.rate_bps,
            buffer_limit = sched.buffer_limit,
            "cake scheduler initialized"
        );
        sched
    }

    /// Apply a new parameter block. The host must hold its instance lock,
    /// as for every other entry point. Tins beyond the new tin count are
    /// drained; applying an identical block is a no-op for all queue state.
    pub fn change(&mut self, settings: CakeSettings) {
        self.store_settings(settings);
        self.reconfigure();
        debug!(
            mode = ?self.tin_mode,
            rate_bps = self.rate.rate_bps,
            buffer_limit = self.buffer_limit,
            "cake scheduler reconfigured"
        );
    }

    /// Current parameter block, dump-style.
    pub fn config(&self) -> CakeSettings {
        CakeSettings {
            base_rate: self.rate.rate_bps,
            diffserv_mode: self.tin_mode,
            flow_mode: self.flow_mode,
            atm: self.atm_framing,
            wash: self.wash_dscp,
            autorate_ingress: self.autorate_ingress,
            overhead: self.rate_overhead,
            rtt_us: self.interval_us,
            target_us: self.target_us,
            memory: self.buffer_config_limit,
        }
    }

    fn store_settings(&mut self, s: CakeSettings) {
        self.rate.rate_bps = s.base_rate;
        self.tin_mode = s.diffserv_mode;
        self.flow_mode = s.flow_mode;
        self.atm_framing = s.atm;
        self.wash_dscp = s.wash;
        self.autorate_ingress = s.autorate_ingress;
        self.rate_overhead = s.overhead;
        self.interval_us = s.rtt_us.max(1);
        self.target_us = s.target_us.max(1);
        self.buffer_config_limit = s.memory;
    }

    fn reconfigure(&mut self) {
        let base_rate = self.rate.rate_bps;
        self.tin_cnt = apply_preset(self.tin_mode, &mut self.tins, &mut self.tin_index, base_rate);

        for tin in usize::from(self.tin_cnt)..CAKE_MAX_TINS {
            self.clear_tin(tin);
        }

        self.rate.rate_ns = self.tins[0].rate.rate_ns;
        self.rate.rate_shift = self.tins[0].rate.rate_shift;

        self.buffer_limit = if self.buffer_config_limit != 0 {
            self.buffer_config_limit
        } else if base_rate != 0 {
            // enough for four codel intervals at the shaped rate
            let t = base_rate * u64::from(self.interval_us) / 250_000;
            t.clamp(65_536, u64::from(u32::MAX)) as u32
        } else {
            u32::MAX
        };
        self.buffer_limit = self.buffer_limit.min(
            self.limit
                .saturating_mul(MTU)
                .max(self.buffer_config_limit),
        );

        self.cparams = CodelParams {
            target: u64::from(self.target_us) * 1_000,
            interval: u64::from(self.interval_us) * 1_000,
            mtu: MTU,
        };
    }

    /// Accept a packet. Never rejects the arrival itself; when the memory
    /// budget overflows, packets are shed from the fattest flow until the
    /// budget holds again (which may claim the packet just queued if its
    /// own flow is the fat one). Returns the number of packets evicted.
    pub fn enqueue(&mut self, mut packet: Packet, now: u64) -> u32 {
        // Extract the Diffserv field and clear DSCP bits if washing.
        let tin = if self.tin_mode != DiffservMode::Besteffort {
            let dscp = usize::from(packet.dscp());
            if self.wash_dscp {
                packet.wash();
            }
            let tin = usize::from(self.tin_index[dscp]);
            if tin >= usize::from(self.tin_cnt) {
                0
            } else {
                tin
            }
        } else {
            if self.wash_dscp {
                packet.wash();
            }
            0
        };

        let idx = flow_index(
            &packet.keys,
            self.flow_mode,
            self.tins[tin].perturbation,
            self.tins[tin].flows_cnt(),
        ) as usize;

        // Ensure shaper state isn't stale from an idle period.
        if self.tins[tin].tin_backlog == 0 {
            if self.tins[tin].rate.time_next_packet < now {
                self.tins[tin].rate.time_next_packet = now;
            }
            if self.qlen == 0 && self.rate.time_next_packet < now {
                self.rate.time_next_packet = now;
            }
        }

        let len = packet.len;
        let truesize = packet.truesize;
        let b = &mut self.tins[tin];
        b.flows[idx].push(packet, now);
        b.packets += 1;
        b.bytes += u64::from(len);
        b.backlogs[idx] += len;
        b.tin_backlog += len;
        if !b.chains.is_queued(idx as u16) {
            b.chains.push_tail(ChainId::New, idx as u16);
            b.flows[idx].deficit = i32::from(b.quantum);
            b.flows[idx].dropped = 0;
        }
        self.qlen += 1;
        self.backlog += len;
        self.buffer_used += truesize;

        let mut dropped = 0u32;
        while self.buffer_used > self.buffer_limit {
            if self.drop_fattest().is_none() {
                break;
            }
            dropped += 1;
        }
        if dropped > 0 {
            self.tins[tin].drop_overlimit += dropped;
        }
        dropped
    }

    /// Release the next packet the shaper allows, or nothing. When gated,
    /// the watchdog is armed for the time the gate opens.
    pub fn dequeue(&mut self, now: u64) -> Option<Packet> {
        if let Some(pkt) = self.peeked.take() {
            return Some(pkt);
        }
        self.dequeue_inner(now)
    }

    /// The next packet without consuming it; implemented as
    /// dequeue-and-cache, so the cached packet no longer counts toward the
    /// reported backlog.
    pub fn peek(&mut self, now: u64) -> Option<&Packet> {
        if self.peeked.is_none() {
            self.peeked = self.dequeue_inner(now);
        }
        self.peeked.as_ref()
    }

    fn dequeue_inner(&mut self, now: u64) -> Option<Packet> {
        'begin: loop {
            if self.qlen == 0 {
                return None;
            }

            // global hard shaper
            if !self.rate.is_open(now) {
                self.overlimits += 1;
                self.watchdog.schedule_at(self.rate.time_next_packet);
                return None;
            }

            // Choose a tin to work on. A tin inside its rate allocation
            // replenishes with the priority weight, one outside it with
            // the plain bandwidth weight.
            let mut cur = usize::from(self.cur_tin);
            loop {
                let b = &mut self.tins[cur];
                if b.tin_backlog > 0 && b.tin_deficit > 0 {
                    break;
                }
                if b.tin_deficit <= 0 {
                    b.tin_deficit += i32::from(if b.rate.is_open(now) {
                        b.tin_quantum_prio
                    } else {
                        b.tin_quantum_band
                    });
                }
                cur += 1;
                if cur >= usize::from(self.tin_cnt) {
                    cur = 0;
                }
            }
            self.cur_tin = cur as u16;

            // Service the tin: new flows first, then the old rotation.
            let (flow_idx, from_new) = loop {
                let b = &mut self.tins[cur];
                let (chain, head) = if let Some(h) = b.chains.head(ChainId::New) {
                    (ChainId::New, h)
                } else if let Some(h) = b.chains.head(ChainId::Old) {
                    (ChainId::Old, h)
                } else {
                    // accounting went stale; resynchronize and move on
                    warn!(tin = cur, backlog = b.tin_backlog, "backlogged tin has no active flows");
                    b.tin_backlog = 0;
                    continue 'begin;
                };

                let flow = &mut b.flows[usize::from(head)];
                if flow.deficit <= 0 {
                    flow.deficit += i32::from(b.quantum);
                    b.chains.move_to_tail(ChainId::Old, head);
                    if chain == ChainId::New {
                        b.bulk_flow_count += 1;
                    }
                    continue;
                }
                break (head, chain == ChainId::New);
            };

            let overloaded =
                self.buffer_used > (self.buffer_limit >> 2) + (self.buffer_limit >> 1);
            let cparams = self.cparams;
            let mut cvars = self.tins[cur].flows[usize::from(flow_idx)].cvars;
            let pkt = codel_dequeue(
                &mut cvars,
                &cparams,
                &mut CurrentFlow {
                    sched: self,
                    tin: cur,
                    flow: usize::from(flow_idx),
                },
                now,
                overloaded,
            );

            // Fold this service's drop/mark tallies into the tin and flow.
            let drops = cvars.drop_count;
            let marks = cvars.ecn_mark;
            cvars.drop_count = 0;
            cvars.ecn_mark = 0;
            let b = &mut self.tins[cur];
            let flow = &mut b.flows[usize::from(flow_idx)];
            flow.cvars = cvars;
            flow.dropped += drops;
            b.tin_dropped += drops;
            b.tin_ecn_mark += marks;

            let Some(pkt) = pkt else {
                // codel drained this queue; demote or retire the flow
                if from_new && b.chains.head(ChainId::Old).is_some() {
                    b.chains.move_to_tail(ChainId::Old, flow_idx);
                    b.bulk_flow_count += 1;
                } else {
                    b.chains.remove(flow_idx);
                    if !from_new {
                        b.bulk_flow_count -= 1;
                    }
                }
                continue 'begin;
            };

            let len = overhead_adjust(pkt.len, self.rate_overhead, self.atm_framing);
            let b = &mut self.tins[cur];
            b.flows[usize::from(flow_idx)].deficit -= len as i32;
            b.tin_deficit -= len as i32;

            // Charge bandwidth to this tin and every lower-priority tin,
            // then to the global shaper; tins that lost the wire to a
            // higher tin must not bank the time.
            for b in &mut self.tins[..=cur] {
                b.rate.charge(len);
            }
            self.rate.charge(len);

            self.sent_packets += 1;
            self.sent_bytes += u64::from(pkt.len);

            return Some(pkt);
        }
    }

    /// Shed one packet from the fattest flow anywhere in the scheduler.
    /// Returns the (tin, flow) identity of the victim. This punishes the
    /// flow causing memory pressure rather than whoever arrives next.
    pub fn drop_fattest(&mut self) -> Option<(u16, u16)> {
        let mut maxbacklog = 0u32;
        let mut victim = None;

        for (t, b) in self
            .tins
            .iter()
            .enumerate()
            .take(usize::from(self.tin_cnt))
        {
            for chain in [ChainId::Old, ChainId::New] {
                for idx in b.chains.iter(chain) {
                    if b.backlogs[usize::from(idx)] > maxbacklog {
                        maxbacklog = b.backlogs[usize::from(idx)];
                        victim = Some((t, usize::from(idx)));
                    }
                }
            }
        }

        let (tin, idx) = victim?;
        self.pop_flow_head(tin, idx)?;
        let b = &mut self.tins[tin];
        b.tin_dropped += 1;
        b.flows[idx].dropped += 1;
        Some((tin as u16, idx as u16))
    }

    /// Drop all held packets; configuration and cumulative counters stay.
    pub fn reset(&mut self) {
        for tin in 0..CAKE_MAX_TINS {
            self.clear_tin(tin);
        }
        self.peeked = None;
    }

    pub fn stats(&self) -> CakeStats {
        CakeStats {
            tin_cnt: self.tin_cnt,
            memory_limit: self.buffer_limit,
            memory_used: self.buffer_used,
            backlog_bytes: self.backlog,
            qlen: self.qlen,
            sent_packets: self.sent_packets,
            sent_bytes: self.sent_bytes,
            overlimits: self.overlimits,
            tins: self.tins[..usize::from(self.tin_cnt)]
                .iter()
                .map(|b| TinStats {
                    threshold_rate: b.rate.rate_bps,
                    target_us: self.target_us,
                    interval_us: self.interval_us,
                    sent_packets: b.packets,
                    sent_bytes: b.bytes,
                    dropped_packets: b.tin_dropped,
                    ecn_marked_packets: b.tin_ecn_mark,
                    drop_overlimit: b.drop_overlimit,
                    backlog_bytes: b.tin_backlog,
                    sparse_flows: b.active_flows().saturating_sub(b.bulk_flow_count),
                    bulk_flows: b.bulk_flow_count,
                    flow_quantum: b.quantum,
                })
                .collect(),
        }
    }

    /// Debug view of one flow slot, or None when out of range.
    pub fn flow_stats(&self, tin: u16, flow: u16, now: u64) -> Option<FlowStats> {
        if tin >= self.tin_cnt {
            return None;
        }
        let b = self.tins.get(usize::from(tin))?;
        let f = b.flows.get(usize::from(flow))?;
        Some(FlowStats {
            qlen: f.queue.len() as u32,
            backlog_bytes: b.backlogs[usize::from(flow)],
            deficit: f.deficit,
            dropped: f.dropped,
            codel_count: f.cvars.count,
            dropping: f.cvars.dropping,
            drop_next_ns: if f.cvars.dropping {
                f.cvars.drop_next as i64 - now as i64
            } else {
                0
            },
        })
    }

    /// Pop the head of a specific flow, with all accounting.
    fn pop_flow_head(&mut self, tin: usize, flow: usize) -> Option<QueuedPacket> {
        let b = &mut self.tins[tin];
        let qp = b.flows[flow].queue.pop_front()?;
        let len = qp.packet.len;
        b.backlogs[flow] -= len;
        b.tin_backlog -= len;
        self.backlog -= len;
        self.buffer_used -= qp.packet.truesize;
        self.qlen -= 1;
        Some(qp)
    }

    /// Discard everything a tin holds and return its flows to a clean
    /// slate, ready for a different role after reconfigure.
    fn clear_tin(&mut self, tin: usize) {
        for flow in 0..self.tins[tin].flows.len() {
            while self.pop_flow_head(tin, flow).is_some() {}
        }
        let b = &mut self.tins[tin];
        b.chains.clear();
        b.bulk_flow_count = 0;
        for flow in &mut b.flows {
            flow.deficit = 0;
            flow.cvars = CodelVars::default();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_perturbation(&mut self, seed: u32) {
        for b in &mut self.tins {
            b.perturbation = seed;
        }
    }
}

impl Drop for CakeScheduler {
    fn drop(&mut self) {
        self.watchdog.cancel();
    }
}
