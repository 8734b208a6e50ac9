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
    common::{
        code::{BincodeCodec, Codec, CodeError, CodeResult, Key, Value},
        error::{Error, ErrorKind, Result},
        event::{Event, EventListener},
    },
    memory::{
        AlwaysFresh, EvictionPolicy, EvictionSampler, FetchedMetadata, InMemoryFormat, InvalidationMetadata,
        MetadataContainer, MetadataFetcher, MetadataSource, MetadataTable, NearCache, NearCacheBuilder,
        NearCacheConfig, NearCacheManager, NearCacheStatistics, PartitionMetadata, PartitionResolver, Publish,
        ReadinessGate, Record, RecordStatus, RecordStore, RepairingConfig, RepairingHandler, RepairingTask,
        Reservation, ReservationId, SequenceBasedDetector, StaleReadDetector, StoredValue,
    },
};
