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

use std::{fmt::Debug, sync::Arc};

use uuid::Uuid;

use crate::record::{InvalidationMetadata, Record};

/// Maps a key to the partition that owns it.
pub trait PartitionResolver<K>: Send + Sync + 'static {
    /// Get the partition id of the key.
    fn partition_id(&self, key: &K) -> u32;

    /// Get the partition id owning the near cache with the given name.
    ///
    /// Events clearing the whole near cache carry no key and are sequenced on this partition. Defaults to partition 0.
    #[expect(unused_variables)]
    fn name_partition_id(&self, name: &str) -> u32 {
        0
    }
}

impl<K, F> PartitionResolver<K> for F
where
    F: Fn(&K) -> u32 + Send + Sync + 'static,
{
    fn partition_id(&self, key: &K) -> u32 {
        self(key)
    }
}

/// Invalidation metadata known locally for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionMetadata {
    /// Uuid of the partition owner, `None` if not known yet.
    pub uuid: Option<Uuid>,
    /// Latest invalidation sequence observed.
    pub sequence: i64,
    /// Records stamped with a sequence below this are stale.
    pub stale_sequence: i64,
}

/// Provides the locally known invalidation metadata per partition.
pub trait MetadataSource: Send + Sync + 'static {
    /// Get the metadata of the partition.
    fn metadata(&self, partition_id: u32) -> PartitionMetadata;
}

impl<T: MetadataSource + ?Sized> MetadataSource for Arc<T> {
    fn metadata(&self, partition_id: u32) -> PartitionMetadata {
        self.as_ref().metadata(partition_id)
    }
}

/// Decides whether a cached record may still be served.
pub trait StaleReadDetector<K, V>: Send + Sync + 'static {
    /// Whether the record of the key must not be served anymore.
    fn is_stale_read(&self, key: &K, record: &Record<K, V>) -> bool;

    /// Invalidation metadata to stamp on a record of the key when it is stored.
    ///
    /// `None` leaves the record unstamped.
    fn invalidation_metadata(&self, key: &K) -> Option<InvalidationMetadata>;
}

/// Stale read detector that never reports a record as stale.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFresh;

impl<K, V> StaleReadDetector<K, V> for AlwaysFresh {
    fn is_stale_read(&self, _: &K, _: &Record<K, V>) -> bool {
        false
    }

    fn invalidation_metadata(&self, _: &K) -> Option<InvalidationMetadata> {
        None
    }
}

/// Stale read detector comparing the metadata stamped on a record with the metadata currently known for its
/// partition.
///
/// A record is stale if it was stamped by another partition owner, or if its sequence fell behind the stale sequence
/// of the partition.
pub struct SequenceBasedDetector<R, M> {
    resolver: R,
    source: M,
}

impl<R, M> Debug for SequenceBasedDetector<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBasedDetector").finish()
    }
}

impl<R, M> SequenceBasedDetector<R, M> {
    /// Create a detector with the partition resolver and the metadata source.
    pub fn new(resolver: R, source: M) -> Self {
        Self { resolver, source }
    }
}

impl<K, V, R, M> StaleReadDetector<K, V> for SequenceBasedDetector<R, M>
where
    R: PartitionResolver<K>,
    M: MetadataSource,
{
    fn is_stale_read(&self, key: &K, record: &Record<K, V>) -> bool {
        let metadata = self.source.metadata(self.resolver.partition_id(key));
        !record.has_same_uuid(metadata.uuid) || record.invalidation_sequence() < metadata.stale_sequence
    }

    fn invalidation_metadata(&self, key: &K) -> Option<InvalidationMetadata> {
        let metadata = self.source.metadata(self.resolver.partition_id(key));
        Some(InvalidationMetadata {
            sequence: metadata.sequence,
            uuid: metadata.uuid,
        })
    }
}
