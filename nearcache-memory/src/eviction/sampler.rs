// Copyright 2025 foyer Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use itertools::Itertools;
use nearcache_common::{code::Key, event::Event, strict_assert};
use rand::seq::{IteratorRandom, SliceRandom};

use super::EvictionPolicy;
use crate::{config::NearCacheConfig, record::Record, store::RecordStore};

/// Sampling based evictor.
///
/// Instead of maintaining a global order over all records, every round samples a few records at random, merges them
/// into a bounded pool of candidates ordered by the policy, and evicts the best candidate. Sampled records that have
/// already expired are dropped instead and end the round.
#[derive(Debug)]
pub struct EvictionSampler<K> {
    policy: EvictionPolicy,
    max_size: usize,
    sampling_count: usize,
    pool_size: usize,

    pool: Vec<K>,
}

impl<K> EvictionSampler<K>
where
    K: Key,
{
    /// Create a sampler from the eviction part of the config.
    pub fn new(config: &NearCacheConfig) -> Self {
        Self {
            policy: config.eviction_policy,
            max_size: config.eviction_max_size,
            sampling_count: config.eviction_sampling_count,
            pool_size: config.eviction_sampling_pool_size,
            pool: Vec::with_capacity(config.eviction_sampling_pool_size),
        }
    }

    /// The eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Whether the store reached its bound.
    pub fn is_full<V>(&self, store: &RecordStore<K, V>) -> bool {
        self.policy != EvictionPolicy::None && store.len() >= self.max_size
    }

    /// Run one eviction round if the store reached its bound.
    ///
    /// Removed records are pushed into `garbages` with the reason, so the caller can account for them and notify
    /// listeners outside of the lock.
    pub fn evict_if_required<V>(
        &mut self,
        store: &mut RecordStore<K, V>,
        max_idle: Duration,
        garbages: &mut Vec<(Event, Record<K, V>)>,
    ) {
        if !self.is_full(store) {
            return;
        }

        let mut rng = rand::rng();
        let samples = store
            .keys()
            .choose_multiple(&mut rng, self.sampling_count)
            .into_iter()
            .cloned()
            .collect_vec();

        let expired = samples
            .iter()
            .filter(|key| store.get(*key).is_some_and(|record| record.is_expired(max_idle)))
            .cloned()
            .collect_vec();
        if !expired.is_empty() {
            for record in expired.iter().filter_map(|key| store.take(key)) {
                tracing::trace!("[sampler]: drop expired sample {:?}", record.key());
                garbages.push((Event::Expire, record));
            }
            return;
        }

        let policy = self.policy;
        let mut candidates = self
            .pool
            .drain(..)
            .chain(samples)
            .unique()
            .filter(|key| store.contains(key))
            .collect_vec();

        match policy {
            EvictionPolicy::Random => candidates.shuffle(&mut rng),
            _ => candidates.sort_by(|a, b| match (store.get(a), store.get(b)) {
                (Some(a), Some(b)) => policy.compare(a, b),
                _ => std::cmp::Ordering::Equal,
            }),
        }
        candidates.truncate(self.pool_size);

        if candidates.is_empty() {
            return;
        }
        let victim = candidates.remove(0);
        self.pool = candidates;

        let before = store.len();
        if let Some(record) = store.take(&victim) {
            tracing::trace!("[sampler]: evict {:?} with policy {}", record.key(), policy);
            garbages.push((Event::Evict, record));
        }
        strict_assert!(store.len() < before);
    }

    /// Drop all pooled candidates.
    pub fn clear(&mut self) {
        self.pool.clear();
    }
}
