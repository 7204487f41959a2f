//! Sticky-session load balancing strategy.

use dashmap::DashMap;

use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{Selection, Strategy};

/// Sticky selector.
///
/// Remembers the last target handed to each client id. A remembered target is
/// reused while it stays in the healthy list; otherwise selection falls back
/// to round-robin and the new assignment replaces the old one.
#[derive(Debug, Default)]
pub struct Sticky {
    fallback: RoundRobin,
    sessions: DashMap<String, String>,
}

impl Sticky {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered client assignments.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Strategy for Sticky {
    fn select(&self, healthy: &[&str], selection: &Selection<'_>) -> Option<String> {
        let Some(client_id) = selection.client_id else {
            return self.fallback.next(healthy).map(str::to_owned);
        };

        let existing = self
            .sessions
            .get(client_id)
            .filter(|assigned| healthy.contains(&assigned.as_str()))
            .map(|assigned| assigned.value().clone());
        if existing.is_some() {
            return existing;
        }

        let target = self.fallback.next(healthy)?.to_owned();
        self.sessions.insert(client_id.to_owned(), target.clone());
        Some(target)
    }
}
