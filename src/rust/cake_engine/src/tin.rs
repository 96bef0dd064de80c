//! One traffic tin: a flow table with DRR bookkeeping and its own byte
//! clock.

use crate::flow::CakeFlow;
use crate::flowchain::{ChainId, FlowChains};
use crate::shaper::TinRate;

#[derive(Debug)]
pub(crate) struct CakeTin {
    pub flows: Vec<CakeFlow>,
    /// Backlog in wire bytes per flow slot.
    pub backlogs: Vec<u32>,
    /// Hash perturbation seed.
    pub perturbation: u32,
    /// DRR quantum granted per flow turn.
    pub quantum: u16,
    pub chains: FlowChains,
    pub rate: TinRate,

    /// DRR weight while this tin is inside its rate allocation.
    pub tin_quantum_prio: u16,
    /// DRR weight once it has exceeded it.
    pub tin_quantum_band: u16,
    pub tin_deficit: i32,
    pub tin_backlog: u32,

    pub tin_dropped: u32,
    pub tin_ecn_mark: u32,
    pub drop_overlimit: u32,
    pub packets: u32,
    pub bytes: u64,
    pub bulk_flow_count: u16,
}

impl CakeTin {
    pub fn new(flows_cnt: usize, perturbation: u32) -> Self {
        Self {
            flows: (0..flows_cnt).map(|_| CakeFlow::default()).collect(),
            backlogs: vec![0; flows_cnt],
            perturbation,
            quantum: 1514,
            chains: FlowChains::new(flows_cnt),
            rate: TinRate::default(),
            tin_quantum_prio: 0,
            tin_quantum_band: 0,
            tin_deficit: 0,
            tin_backlog: 0,
            tin_dropped: 0,
            tin_ecn_mark: 0,
            drop_overlimit: 0,
            packets: 0,
            bytes: 0,
            bulk_flow_count: 0,
        }
    }

    pub fn flows_cnt(&self) -> u32 {
        self.flows.len() as u32
    }

    /// Flows currently on either service list.
    pub fn active_flows(&self) -> u16 {
        self.chains.len(ChainId::New) + self.chains.len(ChainId::Old)
    }

    pub fn set_rate(&mut self, rate: u64) {
        self.quantum = self.rate.set_rate(rate);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_tin_is_idle() {
        let tin = CakeTin::new(1024, 42);
        assert_eq!(tin.flows_cnt(), 1024);
        assert_eq!(tin.active_flows(), 0);
        assert_eq!(tin.tin_backlog, 0);
        assert_eq!(tin.quantum, 1514);
        assert!(tin.flows.iter().all(|f| f.is_empty()));
    }

    #[test]
    fn test_set_rate_updates_quantum() {
        let mut tin = CakeTin::new(16, 0);
        tin.set_rate(100_000);
        assert_eq!(tin.quantum, 300);
        assert_eq!(tin.rate.rate_bps, 100_000);
        tin.set_rate(0);
        assert_eq!(tin.quantum, 1514);
    }
}
