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

pub use crate::{
    cache::{NearCache, NearCacheBuilder, Publish, Reservation},
    config::{InMemoryFormat, NearCacheConfig},
    eviction::{sampler::EvictionSampler, EvictionPolicy},
    manager::NearCacheManager,
    metadata::{MetadataContainer, MetadataTable},
    ready::ReadinessGate,
    record::{InvalidationMetadata, Record, RecordStatus, ReservationId, StoredValue},
    repair::{FetchedMetadata, MetadataFetcher, RepairingConfig, RepairingHandler, RepairingTask},
    stale::{AlwaysFresh, MetadataSource, PartitionMetadata, PartitionResolver, SequenceBasedDetector, StaleReadDetector},
    statistics::NearCacheStatistics,
    store::RecordStore,
};
