//! Smooth weighted round-robin strategy.
//!
//! Every selection adds each healthy target's weight to its running weight,
//! picks the largest running weight, and subtracts the total weight from the
//! winner. Over `sum(weights)` selections each target is picked exactly
//! `weight` times, interleaved rather than in bursts.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::load_balancer::{Selection, Strategy};

/// Weighted selector. Targets with weight 0 are never picked.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn select(&self, healthy: &[&str], selection: &Selection<'_>) -> Option<String> {
        let mut current = self.current.lock().expect("weighted state mutex poisoned");

        let mut total: i64 = 0;
        let mut best: Option<(&str, i64)> = None;
        for &target in healthy {
            let weight = i64::from(selection.weight(target));
            if weight == 0 {
                continue;
            }
            total += weight;
            let running = current.entry(target.to_owned()).or_insert(0);
            *running += weight;
            if best.map_or(true, |(_, b)| *running > b) {
                best = Some((target, *running));
            }
        }

        let (winner, _) = best?;
        if let Some(running) = current.get_mut(winner) {
            *running -= total;
        }
        Some(winner.to_owned())
    }

    fn forget(&self, target: &str) {
        self.current
            .lock()
            .expect("weighted state mutex poisoned")
            .remove(target);
    }
}
