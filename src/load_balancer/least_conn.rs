//! Least Connections load balancing strategy.

use crate::load_balancer::{Selection, Strategy};

/// Least connections selector.
/// Selects the target with the minimum number of tracked connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn select(&self, healthy: &[&str], selection: &Selection<'_>) -> Option<String> {
        // In case of tie, the first one is selected (stability)
        healthy
            .iter()
            .min_by_key(|target| selection.connections(target))
            .map(|target| (*target).to_owned())
    }
}
