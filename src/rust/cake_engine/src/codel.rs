//! The CoDel AQM applied at the head of each flow queue.
//!
//! <https://tools.ietf.org/html/rfc8289>, in the form used by fq_codel-style
//! schedulers: the scheduler owns the queues and hands this module a view of
//! the flow currently being serviced. Drop pacing uses the standard
//! fixed-point reciprocal-inverse-sqrt control law, refined one Newton step
//! per drop.

use crate::flow::QueuedPacket;
use crate::packet::Packet;

const REC_INV_SQRT_SHIFT: u32 = 16;

/// Parameters shared by every flow of a scheduler instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CodelParams {
    /// Sojourn time (ns) below which the queue is considered uncongested.
    pub target: u64,
    /// Window (ns) over which a standing queue must persist before drops.
    pub interval: u64,
    /// A total backlog at or below this many bytes never triggers drops.
    pub mtu: u32,
}

/// Per-flow CoDel state.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CodelVars {
    /// Packets dropped or marked since the flow entered dropping state.
    pub count: u32,
    /// `count` when the previous dropping cycle ended.
    pub lastcount: u32,
    pub dropping: bool,
    /// 0.16 fixed-point estimate of 1/sqrt(count).
    pub rec_inv_sqrt: u16,
    /// Deadline by which the sojourn time must fall back below target.
    pub first_above_time: u64,
    /// Next scheduled drop while in dropping state.
    pub drop_next: u64,
    /// Drops performed during the current service; the scheduler folds
    /// these into tin/flow counters and resets them.
    pub drop_count: u32,
    /// ECN marks during the current service; likewise.
    pub ecn_mark: u32,
}

/// Scheduler-side view of the flow being serviced. Popping a packet must
/// perform all backlog and memory accounting for it.
pub(crate) trait CodelQueue {
    fn pop(&mut self) -> Option<QueuedPacket>;
    /// Total backlog in bytes after the most recent pop.
    fn backlog_bytes(&self) -> u32;
}

/// One Newton-Raphson step to refine 1/sqrt(count):
/// new = old * (3/2 - count/2 * old^2).
fn newton_step(vars: &mut CodelVars) {
    let invsqrt = (vars.rec_inv_sqrt as u32) << REC_INV_SQRT_SHIFT;
    let invsqrt2 = ((invsqrt as u64 * invsqrt as u64) >> 32) as u32;
    let mut val = (3u64 << 32).wrapping_sub(vars.count as u64 * invsqrt2 as u64);

    val >>= 2; // avoid overflow in the following multiply
    val = (val * invsqrt as u64) >> (32 - 2 + 1);

    vars.rec_inv_sqrt = (val >> REC_INV_SQRT_SHIFT) as u16;
}

/// Schedule the next drop: t + interval / sqrt(count).
fn control_law(t: u64, interval: u64, rec_inv_sqrt: u16) -> u64 {
    t + ((interval * ((rec_inv_sqrt as u64) << REC_INV_SQRT_SHIFT)) >> 32)
}

fn should_drop<Q: CodelQueue>(
    head: Option<&QueuedPacket>,
    queue: &Q,
    vars: &mut CodelVars,
    params: &CodelParams,
    now: u64,
) -> bool {
    let Some(qp) = head else {
        vars.first_above_time = 0;
        return false;
    };

    let sojourn = now.saturating_sub(qp.enqueue_ts);
    if sojourn < params.target || queue.backlog_bytes() <= params.mtu {
        // went below target; stay below for at least an interval
        vars.first_above_time = 0;
        return false;
    }
    if vars.first_above_time == 0 {
        // just went above from below; only drop if we stay above for a
        // full interval
        vars.first_above_time = now + params.interval;
    } else if now > vars.first_above_time {
        return true;
    }
    false
}

/// Pull packets from the flow head until one is acceptable or the flow
/// drains. `overloaded` suppresses the ECN-mark escape so real backlog is
/// shed when the buffer is nearly full.
pub(crate) fn codel_dequeue<Q: CodelQueue>(
    vars: &mut CodelVars,
    params: &CodelParams,
    queue: &mut Q,
    now: u64,
    overloaded: bool,
) -> Option<Packet> {
    let mut head = queue.pop();
    if head.is_none() {
        vars.dropping = false;
        return None;
    }

    let decided_drop = should_drop(head.as_ref(), queue, vars, params, now);
    if vars.dropping {
        if !decided_drop {
            // sojourn time fell below target; leave dropping state
            vars.dropping = false;
        } else {
            // A large standing queue can demand drop rates high enough
            // that several scheduled drops are already due.
            while vars.dropping && now >= vars.drop_next {
                vars.count = vars.count.saturating_add(1);
                newton_step(vars);

                let qp = head.as_mut().expect("dropping loop holds a packet");
                if !overloaded && qp.packet.set_ce() {
                    vars.ecn_mark += 1;
                    vars.drop_next =
                        control_law(vars.drop_next, params.interval, vars.rec_inv_sqrt);
                    break;
                }

                vars.drop_count += 1;
                head = queue.pop();
                if !should_drop(head.as_ref(), queue, vars, params, now) {
                    vars.dropping = false;
                } else {
                    vars.drop_next =
                        control_law(vars.drop_next, params.interval, vars.rec_inv_sqrt);
                }
            }
        }
    } else if decided_drop {
        let qp = head.as_mut().expect("checked above");
        if !overloaded && qp.packet.set_ce() {
            vars.ecn_mark += 1;
        } else {
            vars.drop_count += 1;
            head = queue.pop();
            let _ = should_drop(head.as_ref(), queue, vars, params, now);
        }
        vars.dropping = true;

        // If the sojourn time went back above target soon after we last
        // controlled the queue, resume the previous drop rate rather than
        // starting the search over.
        let delta = vars.count.wrapping_sub(vars.lastcount);
        if delta > 1
            && (now.wrapping_sub(vars.drop_next) as i64) < (16 * params.interval) as i64
        {
            vars.count = delta;
            newton_step(vars);
        } else {
            vars.count = 1;
            vars.rec_inv_sqrt = u16::MAX;
        }
        vars.lastcount = vars.count;
        vars.drop_next = control_law(now, params.interval, vars.rec_inv_sqrt);
    }

    head.map(|qp| qp.packet)
}
