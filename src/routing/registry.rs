//! Site registry.
//!
//! # Responsibilities
//! - Own the ordered site list
//! - Resolve a host to a site (exact first, then wildcard)
//! - Swap the whole list atomically on reload
//!
//! # Design Decisions
//! - Lock-free reads through `ArcSwap`; a request keeps the snapshot it
//!   loaded even if the list is replaced mid-flight
//! - Registration order decides ties within each match kind

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::site::Site;

pub type SiteList = Arc<Vec<Arc<Site>>>;

/// Shared, hot-swappable list of sites. Clones share the same list.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    sites: Arc<ArcSwap<Vec<Arc<Site>>>>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        let registry = Self::default();
        registry.update_sites(sites);
        registry
    }

    /// Append `site`, or replace the site with the same domain pattern in
    /// place. Domains compare case-insensitively.
    pub fn register(&self, site: Site) {
        let site = Arc::new(site);
        self.sites.rcu(|current| {
            let mut next = Vec::clone(current);
            match next.iter_mut().find(|s| s.pattern() == site.pattern()) {
                Some(slot) => *slot = Arc::clone(&site),
                None => next.push(Arc::clone(&site)),
            }
            next
        });
        tracing::debug!(domain = %site.domain(), "Site registered");
    }

    /// Replace the whole list.
    pub fn update_sites(&self, sites: Vec<Site>) {
        let count = sites.len();
        self.sites
            .store(Arc::new(sites.into_iter().map(Arc::new).collect()));
        tracing::info!(sites = count, "Site list replaced");
    }

    /// The current list; stays valid after later swaps.
    pub fn snapshot(&self) -> SiteList {
        self.sites.load_full()
    }

    pub fn match_host(&self, host: Option<&str>) -> Option<Arc<Site>> {
        find_site(&self.snapshot(), host)
    }

    pub fn len(&self) -> usize {
        self.sites.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sites = self.sites.load();
        f.debug_list()
            .entries(sites.iter().map(|s| s.domain()))
            .finish()
    }
}

/// First exact match in order, else the first wildcard match. A missing host
/// never matches.
pub fn find_site(sites: &[Arc<Site>], host: Option<&str>) -> Option<Arc<Site>> {
    let host = host?.trim();
    if host.is_empty() {
        return None;
    }
    sites
        .iter()
        .find(|s| s.pattern().matches_exact(host))
        .or_else(|| sites.iter().find(|s| s.pattern().matches_wildcard(host)))
        .cloned()
}
