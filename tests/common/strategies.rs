//! Proptest strategies for partition inputs

use proptest::prelude::*;
use std::net::Ipv4Addr;

/// Item counts from empty up to a few thousand
pub fn item_count_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..=32, 33usize..=4096]
}

/// Fan-out values, including fan-outs larger than most inputs
pub fn fanout_strategy() -> impl Strategy<Value = usize> {
    1usize..=64
}

/// Networks with at most 2^12 hosts so tests can afford to iterate them
pub fn small_network_strategy() -> impl Strategy<Value = (Ipv4Addr, u8)> {
    (any::<u32>(), 20u8..=32).prop_map(|(bits, prefix)| (Ipv4Addr::from(bits), prefix))
}
