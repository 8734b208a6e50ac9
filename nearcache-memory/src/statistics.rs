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

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

use serde::Serialize;

/// Counters updated by the near cache.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn evict(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn expire(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, creation_time: SystemTime, entry_count: usize) -> NearCacheStatistics {
        NearCacheStatistics {
            creation_time,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            evicted_count: self.evictions.load(Ordering::Relaxed),
            expired_count: self.expirations.load(Ordering::Relaxed),
            invalidation_count: self.invalidations.load(Ordering::Relaxed),
            entry_count,
        }
    }
}

/// Point-in-time statistics of a near cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearCacheStatistics {
    /// When the near cache was created.
    pub creation_time: SystemTime,
    /// Reads served from the near cache.
    pub hit_count: u64,
    /// Reads that found nothing servable.
    pub miss_count: u64,
    /// Records evicted to make room.
    pub evicted_count: u64,
    /// Records dropped after their time-to-live or max idle time passed.
    pub expired_count: u64,
    /// Records invalidated explicitly or by remote invalidation events.
    pub invalidation_count: u64,
    /// Current count of records, including reserved placeholders.
    pub entry_count: usize,
}

impl NearCacheStatistics {
    /// Ratio of hits among all reads, `0.0` before the first read.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
