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

use std::{cmp::Ordering, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Policy choosing the victim among sampled records when the near cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicy {
    /// Evict the least recently accessed candidate.
    Lru,
    /// Evict the least frequently accessed candidate.
    Lfu,
    /// Evict an arbitrary candidate.
    Random,
    /// Never evict, the size bound is not enforced.
    #[default]
    None,
}

impl EvictionPolicy {
    /// Order two records so that the preferred victim comes first.
    ///
    /// [`EvictionPolicy::Random`] and [`EvictionPolicy::None`] do not order records.
    pub fn compare<K, V>(&self, a: &Record<K, V>, b: &Record<K, V>) -> Ordering {
        match self {
            EvictionPolicy::Lru => a.lru_cmp(b),
            EvictionPolicy::Lfu => a.lfu_cmp(b).then_with(|| a.lru_cmp(b)),
            EvictionPolicy::Random | EvictionPolicy::None => Ordering::Equal,
        }
    }
}

impl Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Random => "RANDOM",
            EvictionPolicy::None => "NONE",
        };
        write!(f, "{s}")
    }
}

pub mod sampler;
