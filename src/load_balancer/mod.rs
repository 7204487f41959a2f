//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route function has a candidate target list
//!     → LoadBalancer::get_target (filter explicitly unhealthy targets)
//!     → Strategy::select over the healthy list:
//!         - round_robin.rs (rotate through targets)
//!         - least_conn.rs (fewest tracked connections)
//!         - sticky.rs (remember client → target)
//!         - weighted.rs (smooth weighted round-robin)
//!     → Return target URL or None (caller answers 503)
//! ```
//!
//! # Design Decisions
//! - One balancer instance per owner (site or plugin), never a process global
//! - Untracked targets count as healthy; only an explicit `false` excludes
//! - Connection counts are caller-driven (increment/decrement or guard)
//! - Health has no automatic expiry; state changes only through the API

pub mod least_conn;
pub mod round_robin;
pub mod sticky;
pub mod target;
pub mod weighted;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub use target::{ConnectionGuard, TargetHealth, TrackedBody};

/// Read-only view of balancer bookkeeping handed to a strategy.
#[derive(Debug)]
pub struct Selection<'a> {
    /// Client identifier used by sticky sessions.
    pub client_id: Option<&'a str>,
    /// Tracked in-flight connections per target.
    pub connections: &'a DashMap<String, usize>,
    /// Configured weights per target (missing = 1).
    pub weights: &'a DashMap<String, u32>,
}

impl Selection<'_> {
    pub fn connections(&self, target: &str) -> usize {
        self.connections.get(target).map_or(0, |c| *c)
    }

    pub fn weight(&self, target: &str) -> u32 {
        self.weights.get(target).map_or(1, |w| *w)
    }
}

/// Trait for target selection algorithms.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Pick one of the already health-filtered targets.
    fn select(&self, healthy: &[&str], selection: &Selection<'_>) -> Option<String>;

    /// Drop any per-target state kept by the strategy.
    fn forget(&self, _target: &str) {}
}

/// Named strategy variants, as they appear in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    LeastConnections,
    Sticky,
    Weighted,
}

impl StrategyKind {
    fn build(self) -> Box<dyn Strategy> {
        match self {
            StrategyKind::RoundRobin => Box::new(round_robin::RoundRobin::new()),
            StrategyKind::LeastConnections => Box::new(least_conn::LeastConnections::new()),
            StrategyKind::Sticky => Box::new(sticky::Sticky::new()),
            StrategyKind::Weighted => Box::new(weighted::WeightedRoundRobin::new()),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::RoundRobin => "round-robin",
            StrategyKind::LeastConnections => "least-connections",
            StrategyKind::Sticky => "sticky",
            StrategyKind::Weighted => "weighted",
        };
        f.write_str(name)
    }
}

/// Target selection plus health and connection bookkeeping.
///
/// All maps are sharded (`DashMap`), so concurrent increments and health
/// updates from many connection tasks never lose writes.
#[derive(Debug)]
pub struct LoadBalancer {
    kind: StrategyKind,
    strategy: Box<dyn Strategy>,
    health: DashMap<String, TargetHealth>,
    connections: DashMap<String, usize>,
    weights: DashMap<String, u32>,
}

impl LoadBalancer {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            strategy: kind.build(),
            health: DashMap::new(),
            connections: DashMap::new(),
            weights: DashMap::new(),
        }
    }

    /// Strategy this balancer was built with.
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Select a target among `candidates`, or `None` if none is healthy.
    pub fn get_target<S: AsRef<str>>(&self, candidates: &[S]) -> Option<String> {
        self.get_target_for(candidates, None)
    }

    /// Select a target for a specific client (used by the sticky strategy).
    pub fn get_target_for<S: AsRef<str>>(
        &self,
        candidates: &[S],
        client_id: Option<&str>,
    ) -> Option<String> {
        let healthy: Vec<&str> = candidates
            .iter()
            .map(AsRef::as_ref)
            .filter(|target| self.is_healthy(target))
            .collect();

        if healthy.is_empty() {
            tracing::debug!(
                strategy = %self.kind,
                candidates = candidates.len(),
                "No healthy targets available"
            );
            return None;
        }

        let selection = Selection {
            client_id,
            connections: &self.connections,
            weights: &self.weights,
        };
        self.strategy.select(&healthy, &selection)
    }

    /// True unless the target's tracked health is explicitly unhealthy.
    pub fn is_healthy(&self, target: &str) -> bool {
        self.health.get(target).map_or(true, |h| h.healthy)
    }

    pub fn increment_connections(&self, target: &str) {
        *self.connections.entry(target.to_owned()).or_insert(0) += 1;
    }

    /// Decrement the tracked count, saturating at zero.
    pub fn decrement_connections(&self, target: &str) {
        if let Some(mut count) = self.connections.get_mut(target) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn connection_count(&self, target: &str) -> usize {
        self.connections.get(target).map_or(0, |c| *c)
    }

    /// Increment the count for `target` and return a guard that decrements
    /// it again when dropped.
    pub fn track(self: &Arc<Self>, target: &str) -> ConnectionGuard {
        self.increment_connections(target);
        ConnectionGuard::new(Arc::clone(self), target.to_owned())
    }

    /// Record a health observation. `response_time` is only overwritten
    /// when a new value is supplied.
    pub fn update_health(&self, target: &str, healthy: bool, response_time: Option<Duration>) {
        let now = SystemTime::now();
        self.health
            .entry(target.to_owned())
            .and_modify(|h| {
                h.healthy = healthy;
                h.last_check = now;
                if response_time.is_some() {
                    h.response_time = response_time;
                }
            })
            .or_insert_with(|| TargetHealth {
                url: target.to_owned(),
                healthy,
                last_check: now,
                response_time,
            });
    }

    /// Start tracking a target as healthy.
    pub fn add_target(&self, target: &str) {
        self.health
            .insert(target.to_owned(), TargetHealth::healthy(target));
    }

    /// Stop tracking a target: health, connection count and strategy state.
    pub fn remove_target(&self, target: &str) {
        self.health.remove(target);
        self.connections.remove(target);
        self.strategy.forget(target);
    }

    /// Set the weight used by the weighted strategy.
    pub fn set_weight(&self, target: &str, weight: u32) {
        self.weights.insert(target.to_owned(), weight);
    }

    /// Snapshot of all tracked health records.
    pub fn health_status(&self) -> HashMap<String, TargetHealth> {
        self.health
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(StrategyKind::default())
    }
}
