//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{Selection, Strategy};

/// Round-robin selector.
///
/// A single monotonic counter indexes into the healthy list by modulo, so a
/// membership change shifts which target a given counter value maps to.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor and pick from `targets`.
    pub fn next<'a>(&self, targets: &[&'a str]) -> Option<&'a str> {
        if targets.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[index])
    }
}

impl Strategy for RoundRobin {
    fn select(&self, healthy: &[&str], _selection: &Selection<'_>) -> Option<String> {
        self.next(healthy).map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{LoadBalancer, StrategyKind};
    use std::collections::HashSet;

    #[test]
    fn test_round_robin() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        let targets = ["http://a:80", "http://b:80"];

        assert_eq!(lb.get_target(&targets).as_deref(), Some("http://a:80"));
        assert_eq!(lb.get_target(&targets).as_deref(), Some("http://b:80"));
        assert_eq!(lb.get_target(&targets).as_deref(), Some("http://a:80"));
    }

    #[test]
    fn cycle_visits_every_target_once() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        let targets = ["http://a:80", "http://b:80", "http://c:80", "http://d:80"];

        let seen: HashSet<String> = (0..targets.len())
            .map(|_| lb.get_target(&targets).unwrap())
            .collect();
        assert_eq!(seen.len(), targets.len());
    }

    #[test]
    fn unhealthy_target_is_skipped_mid_cycle() {
        let lb = LoadBalancer::new(StrategyKind::RoundRobin);
        let targets = ["http://a:80", "http://b:80", "http://c:80"];

        lb.get_target(&targets);
        lb.update_health("http://b:80", false, None);

        for _ in 0..10 {
            let picked = lb.get_target(&targets).unwrap();
            assert_ne!(picked, "http://b:80");
        }
    }
}
