//! Jenkins-hash flow classification within a tin.
//!
//! A 32-bit jhash over the fields the flow mode selects, perturbed by the
//! tin's random seed, reduced to a table index with a reciprocal multiply
//! instead of a modulo.

use crate::config::FlowMode;
use crate::packet::FlowKeys;

const JHASH_INITVAL: u32 = 0xdeadbeef;

/// Final mix of three words, jhash style.
fn jhash_final(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

fn jhash_3words(a: u32, b: u32, c: u32, initval: u32) -> u32 {
    jhash_final(
        a.wrapping_add(JHASH_INITVAL),
        b.wrapping_add(JHASH_INITVAL),
        c.wrapping_add(initval),
    )
}

/// Map a 32-bit hash uniformly onto [0, n) without a divide.
fn reciprocal_scale(hash: u32, n: u32) -> u32 {
    ((hash as u64 * n as u64) >> 32) as u32
}

/// Reduce a packet's flow keys to an index in [0, flows_cnt).
pub(crate) fn flow_index(keys: &FlowKeys, mode: FlowMode, perturbation: u32, flows_cnt: u32) -> u32 {
    if mode == FlowMode::None {
        return 0;
    }

    // The Flows bit pulls in the full 5-tuple; the host bits select the
    // address halves on their own.
    let bits = mode.bits();
    let five_tuple = bits & 0x4 != 0;
    let src = if five_tuple || bits & 0x1 != 0 {
        keys.src
    } else {
        0
    };
    let dst = if five_tuple || bits & 0x2 != 0 {
        keys.dst
    } else {
        0
    };
    let ports = if five_tuple {
        keys.ports ^ u32::from(keys.proto)
    } else {
        0
    };

    reciprocal_scale(jhash_3words(dst, src, ports, perturbation), flows_cnt)
}
