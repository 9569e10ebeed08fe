//! Provider router — selects the best available provider based on strategy.
//!
//! Filters out excluded, keyless, and all-keys-unhealthy providers, then
//! applies the configured [`RoutingStrategy`] to whatever remains.

use crate::key_manager::KeyManager;
use crate::provider::{ProviderConfig, RoutingStrategy};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Selects the best available provider from a configured pool.
///
/// Shares `KeyManager` instances with [`crate::gateway::Gateway`] via `Arc`
/// so circuit/quota state recorded during an attempt is immediately
/// visible to routing decisions, rather than tracked in a second,
/// out-of-sync copy.
pub struct Router {
    providers: Vec<ProviderConfig>,
    strategy: RoutingStrategy,
    key_managers: HashMap<String, Arc<KeyManager>>,
    rr_index: Mutex<usize>,
}

impl Router {
    pub fn new(
        providers: Vec<ProviderConfig>,
        strategy: RoutingStrategy,
        key_managers: HashMap<String, Arc<KeyManager>>,
    ) -> Self {
        Self {
            providers,
            strategy,
            key_managers,
            rr_index: Mutex::new(0),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn key_manager(&self, provider_id: &str) -> Option<&Arc<KeyManager>> {
        self.key_managers.get(provider_id)
    }

    pub fn key_managers(&self) -> &HashMap<String, Arc<KeyManager>> {
        &self.key_managers
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Select a single provider, honoring the configured strategy.
    pub fn select_provider(
        &self,
        exclude: &HashSet<String>,
        estimated_tokens: u64,
    ) -> Option<&ProviderConfig> {
        let candidates = self.filter_candidates(exclude, estimated_tokens);
        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            RoutingStrategy::PriorityFailover => self.select_priority(&candidates),
            RoutingStrategy::RoundRobin => self.select_round_robin(&candidates),
            RoutingStrategy::Weighted => self.select_weighted(&candidates),
            RoutingStrategy::LeastLatency => self.select_least_latency(&candidates),
        }
    }

    /// All available providers in priority order, for failover. Always
    /// priority-sorted regardless of the configured strategy — fallback
    /// order is a separate concern from primary selection.
    pub fn fallback_chain(
        &self,
        exclude: &HashSet<String>,
        estimated_tokens: u64,
    ) -> Vec<&ProviderConfig> {
        let mut candidates = self.filter_candidates(exclude, estimated_tokens);
        candidates.sort_by_key(|p| p.priority);
        candidates
    }

    fn select_priority<'a>(&self, candidates: &[&'a ProviderConfig]) -> Option<&'a ProviderConfig> {
        candidates.iter().min_by_key(|p| p.priority).copied()
    }

    fn select_round_robin<'a>(&self, candidates: &[&'a ProviderConfig]) -> Option<&'a ProviderConfig> {
        let mut rr = self.rr_index.lock().unwrap_or_else(|p| p.into_inner());
        let idx = *rr % candidates.len();
        *rr = rr.wrapping_add(1);
        candidates.get(idx).copied()
    }

    fn select_weighted<'a>(&self, candidates: &[&'a ProviderConfig]) -> Option<&'a ProviderConfig> {
        let weights: Vec<u32> = candidates.iter().map(|p| p.weight).collect();
        let dist = WeightedIndex::new(&weights).ok()?;
        let idx = dist.sample(&mut rand::rng());
        candidates.get(idx).copied()
    }

    fn select_least_latency<'a>(&self, candidates: &[&'a ProviderConfig]) -> Option<&'a ProviderConfig> {
        // Simplification carried from the upstream router: latency is
        // distributed per-key rather than per-provider, so this falls back
        // to the first candidate rather than computing a true aggregate.
        candidates.first().copied()
    }

    fn filter_candidates(&self, exclude: &HashSet<String>, _estimated_tokens: u64) -> Vec<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| !exclude.contains(&p.provider_id))
            .filter(|p| p.has_keys())
            .filter(|p| {
                self.key_managers
                    .get(&p.provider_id)
                    .map(|km| km.any_healthy())
                    .unwrap_or(false)
            })
            .collect()
    }
}
