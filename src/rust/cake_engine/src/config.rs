//! User-visible configuration and the preset Diffserv mappings.
//!
//! Configuration is deliberately simple: four class presets, one rate, a
//! handful of link-layer corrections. Complete generality is not a goal.

use crate::tin::CakeTin;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors surfaced while parsing configuration keywords.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown diffserv mode: {0}")]
    UnknownDiffservMode(String),
    #[error("unknown flow mode: {0}")]
    UnknownFlowMode(String),
}

/// Priority-class presets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffservMode {
    Besteffort,
    Precedence,
    Diffserv8,
    #[default]
    Diffserv4,
}

impl FromStr for DiffservMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "besteffort" => Ok(Self::Besteffort),
            "precedence" => Ok(Self::Precedence),
            "diffserv8" => Ok(Self::Diffserv8),
            "diffserv4" => Ok(Self::Diffserv4),
            other => Err(ConfigError::UnknownDiffservMode(other.to_string())),
        }
    }
}

/// Which header fields identify a flow. The low two bits select the
/// address halves, the third bit brings in the full 5-tuple.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMode {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "srchost")]
    SrcIp,
    #[serde(rename = "dsthost")]
    DstIp,
    #[serde(rename = "hosts")]
    Hosts,
    #[default]
    #[serde(rename = "flows")]
    Flows,
    #[serde(rename = "dual-srchost")]
    DualSrc,
    #[serde(rename = "dual-dsthost")]
    DualDst,
    #[serde(rename = "dual")]
    Dual,
}

impl FlowMode {
    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::SrcIp => 1,
            Self::DstIp => 2,
            Self::Hosts => 3,
            Self::Flows => 4,
            Self::DualSrc => 5,
            Self::DualDst => 6,
            Self::Dual => 7,
        }
    }
}

impl FromStr for FlowMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "srchost" => Ok(Self::SrcIp),
            "dsthost" => Ok(Self::DstIp),
            "hosts" => Ok(Self::Hosts),
            "flows" => Ok(Self::Flows),
            "dual-srchost" => Ok(Self::DualSrc),
            "dual-dsthost" => Ok(Self::DualDst),
            "dual" => Ok(Self::Dual),
            other => Err(ConfigError::UnknownFlowMode(other.to_string())),
        }
    }
}

/// The full parameter block. Every field has a default, so a host can
/// deserialize a sparse blob on top of `CakeSettings::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CakeSettings {
    /// Shaped rate in bytes per second; 0 leaves the shaper unlimited.
    pub base_rate: u64,
    pub diffserv_mode: DiffservMode,
    pub flow_mode: FlowMode,
    /// ATM cell-framing compensation.
    pub atm: bool,
    /// Clear DSCP (never ECN) bits on enqueue.
    pub wash: bool,
    /// Accepted and stored; the ingress rate estimator is not wired into
    /// the core dataplane.
    pub autorate_ingress: bool,
    /// Signed per-packet framing overhead in bytes.
    pub overhead: i16,
    /// CoDel interval ("rtt") in microseconds.
    pub rtt_us: u32,
    /// CoDel target in microseconds.
    pub target_us: u32,
    /// Explicit buffer limit in bytes; 0 derives it from rate and interval.
    pub memory: u32,
}

impl Default for CakeSettings {
    fn default() -> Self {
        Self {
            base_rate: 0,
            diffserv_mode: DiffservMode::default(),
            flow_mode: FlowMode::default(),
            atm: false,
            wash: false,
            autorate_ingress: false,
            overhead: 0,
            rtt_us: 100_000,
            target_us: 5_000, // codel RFC argues for 5-10% of interval
            memory: 0,
        }
    }
}

/// Program tins and the DSCP map for `mode`; returns the tin count.
pub(crate) fn apply_preset(
    mode: DiffservMode,
    tins: &mut [CakeTin],
    tin_index: &mut [u8; 64],
    rate: u64,
) -> u16 {
    match mode {
        DiffservMode::Besteffort => config_besteffort(tins, tin_index, rate),
        DiffservMode::Precedence => config_precedence(tins, tin_index, rate),
        DiffservMode::Diffserv8 => config_diffserv8(tins, tin_index, rate),
        DiffservMode::Diffserv4 => config_diffserv4(tins, tin_index, rate),
    }
}

fn config_besteffort(tins: &mut [CakeTin], tin_index: &mut [u8; 64], rate: u64) -> u16 {
    tin_index.fill(0);
    let b = &mut tins[0];
    b.set_rate(rate);
    b.tin_quantum_prio = 65535;
    b.tin_quantum_band = 65535;
    1
}

fn config_precedence(tins: &mut [CakeTin], tin_index: &mut [u8; 64], rate: u64) -> u16 {
    for (dscp, entry) in tin_index.iter_mut().enumerate() {
        *entry = ((dscp >> 3) as u8).min(7);
    }
    geometric_tins(tins, rate, 8);
    8
}

/// List of traffic classes in RFC 4594, pruned to eight for typical use:
///
///   Network Control          (CS6, CS7)
///   Minimum Latency          (EF, VA, CS5, CS4)
///   Interactive Shell        (CS2, TOS1)
///   Low Latency Transactions (AF2x, TOS4)
///   Video Streaming          (AF4x, AF3x, CS3)
///   Bog Standard             (CS0 etc.)
///   High Throughput          (AF1x, TOS2)
///   Background Traffic       (CS1)
fn config_diffserv8(tins: &mut [CakeTin], tin_index: &mut [u8; 64], rate: u64) -> u16 {
    tin_index.fill(2); // default to best-effort

    tin_index[0x08] = 0; // CS1
    tin_index[0x02] = 1; // TOS2
    tin_index[0x18] = 3; // CS3
    tin_index[0x04] = 4; // TOS4
    tin_index[0x01] = 5; // TOS1
    tin_index[0x10] = 5; // CS2
    tin_index[0x20] = 6; // CS4
    tin_index[0x28] = 6; // CS5
    tin_index[0x2c] = 6; // VA
    tin_index[0x2e] = 6; // EF
    tin_index[0x30] = 7; // CS6
    tin_index[0x38] = 7; // CS7

    for i in (2..=6).step_by(2) {
        tin_index[0x08 + i] = 1; // AF1x
        tin_index[0x10 + i] = 4; // AF2x
        tin_index[0x18 + i] = 3; // AF3x
        tin_index[0x20 + i] = 3; // AF4x
    }

    geometric_tins(tins, rate, 8);
    8
}

/// Further pruned four-class system:
///
///   Latency Sensitive  (CS7, CS6, EF, VA, CS5, CS4)
///   Streaming Media    (AF4x, AF3x, CS3, AF2x, TOS4, CS2, TOS1)
///   Best Effort        (CS0, AF1x, TOS2, and those not specified)
///   Background Traffic (CS1)
fn config_diffserv4(tins: &mut [CakeTin], tin_index: &mut [u8; 64], rate: u64) -> u16 {
    tin_index.fill(1); // default to best-effort

    tin_index[0x08] = 0; // CS1

    tin_index[0x18] = 2; // CS3
    tin_index[0x04] = 2; // TOS4
    tin_index[0x01] = 2; // TOS1
    tin_index[0x10] = 2; // CS2

    tin_index[0x20] = 3; // CS4
    tin_index[0x28] = 3; // CS5
    tin_index[0x2c] = 3; // VA
    tin_index[0x2e] = 3; // EF
    tin_index[0x30] = 3; // CS6
    tin_index[0x38] = 3; // CS7

    for i in (2..=6).step_by(2) {
        tin_index[0x10 + i] = 2; // AF2x
        tin_index[0x18 + i] = 2; // AF3x
        tin_index[0x20 + i] = 2; // AF4x
    }

    tins[0].set_rate(rate); // background still gets the full threshold
    tins[1].set_rate(rate - (rate >> 4));
    tins[2].set_rate(rate - (rate >> 2));
    tins[3].set_rate(rate >> 2);

    let quantum: u32 = 256;

    // priority weights, biased hard toward the latency tin
    tins[0].tin_quantum_prio = (quantum >> 4) as u16;
    tins[1].tin_quantum_prio = quantum as u16;
    tins[2].tin_quantum_prio = (quantum << 2) as u16;
    tins[3].tin_quantum_prio = (quantum << 4) as u16;

    // bandwidth-sharing weights, biased toward best effort
    tins[0].tin_quantum_band = (quantum >> 4) as u16;
    tins[1].tin_quantum_band = ((quantum >> 3) + (quantum >> 4)) as u16;
    tins[2].tin_quantum_band = (quantum >> 1) as u16;
    tins[3].tin_quantum_band = (quantum >> 2) as u16;

    4
}

/// The precedence/diffserv8 progression: each tier gets 7/8 the rate of the
/// one below, a 3/2-growing priority weight and a 7/8-decaying bandwidth
/// weight.
fn geometric_tins(tins: &mut [CakeTin], mut rate: u64, cnt: usize) {
    let mut quantum1: u32 = 256;
    let mut quantum2: u32 = 256;

    for b in &mut tins[..cnt] {
        b.set_rate(rate);
        b.tin_quantum_prio = quantum1.clamp(1, u16::MAX as u32) as u16;
        b.tin_quantum_band = quantum2.clamp(1, u16::MAX as u32) as u16;

        rate = (rate * 7) >> 3;
        quantum1 = (quantum1 * 3) >> 1;
        quantum2 = (quantum2 * 7) >> 3;
    }
}
