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
    cmp::Ordering,
    fmt::Debug,
    time::{Duration, Instant},
};

use bytes::Bytes;
use uuid::Uuid;

/// Identifier of a reservation, unique and increasing within one near cache.
pub type ReservationId = u64;

/// Status of a record in the reservation protocol.
///
/// `Free` and `Published` records are read permitted and can be reserved. A `Reserved` record can only be published
/// by the holder of the exact reservation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// Freshly created, not reserved yet.
    Free,
    /// Reserved for population by the holder of the id.
    Reserved(ReservationId),
    /// Populated and readable.
    Published,
}

impl RecordStatus {
    /// Whether the record can be reserved.
    pub fn is_read_permitted(&self) -> bool {
        !matches!(self, RecordStatus::Reserved(_))
    }
}

/// Invalidation metadata stamped on a record when it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationMetadata {
    /// Invalidation sequence of the owning partition at the time the record was stored.
    pub sequence: i64,
    /// Uuid of the partition owner at the time the record was stored.
    pub uuid: Option<Uuid>,
}

/// The representation a value is kept in inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue<V> {
    /// The decoded value.
    Object(V),
    /// The encoded value, decoded on every read.
    Binary(Bytes),
}

/// [`Record`] holds the information of the cached entry.
pub struct Record<K, V> {
    key: K,
    value: Option<StoredValue<V>>,

    time_to_live: Option<Duration>,
    creation_time: Instant,
    expiration_time: Option<Instant>,
    last_access_time: Instant,
    hits: u64,

    status: RecordStatus,

    invalidation_sequence: i64,
    uuid: Option<Uuid>,
}

impl<K, V> Debug for Record<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("populated", &self.value.is_some())
            .field("status", &self.status)
            .field("hits", &self.hits)
            .field("invalidation_sequence", &self.invalidation_sequence)
            .field("uuid", &self.uuid)
            .finish()
    }
}

impl<K, V> Record<K, V> {
    /// Create a record.
    ///
    /// `value` is `None` for a placeholder created by a reservation. A `time_to_live` of `None` never expires.
    pub fn new(key: K, value: Option<StoredValue<V>>, time_to_live: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            time_to_live,
            creation_time: now,
            expiration_time: time_to_live.map(|ttl| now + ttl),
            last_access_time: now,
            hits: 0,
            status: RecordStatus::Free,
            invalidation_sequence: 0,
            uuid: None,
        }
    }

    /// Get the immutable reference of the record key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Get the stored value, `None` if the record is a placeholder.
    pub fn value(&self) -> Option<&StoredValue<V>> {
        self.value.as_ref()
    }

    /// Replace the stored value.
    pub fn set_value(&mut self, value: StoredValue<V>) {
        self.value = Some(value);
    }

    /// Get the current status.
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// Get the creation time.
    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    /// Get the expiration time derived from the time-to-live, `None` if it never expires.
    pub fn expiration_time(&self) -> Option<Instant> {
        self.expiration_time
    }

    /// Get the last access time.
    pub fn last_access_time(&self) -> Instant {
        self.last_access_time
    }

    /// Get the access hit count.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Restart the lifetime of the record, used when a reserved record gets published.
    pub fn reset_creation_time(&mut self) {
        let now = Instant::now();
        self.creation_time = now;
        self.expiration_time = self.time_to_live.map(|ttl| now + ttl);
        self.last_access_time = now;
    }

    /// Whether the record passed its time-to-live, or has not been accessed for `max_idle`.
    ///
    /// A zero `max_idle` disables the idle check.
    pub fn is_expired(&self, max_idle: Duration) -> bool {
        let now = Instant::now();
        if self.expiration_time.is_some_and(|expiration| expiration < now) {
            return true;
        }
        !max_idle.is_zero() && self.last_access_time + max_idle < now
    }

    /// Update the last access time.
    pub fn touch(&mut self) {
        self.last_access_time = Instant::now();
    }

    /// Increase the access hit count.
    pub fn record_hit(&mut self) {
        self.hits = self.hits.saturating_add(1);
    }

    /// Move the status from `expected` to `next`.
    ///
    /// Returns `false` and leaves the status untouched if the current status is not `expected`.
    pub fn compare_and_set_status(&mut self, expected: RecordStatus, next: RecordStatus) -> bool {
        if self.status != expected {
            return false;
        }
        tracing::trace!("[record]: status {:?} => {:?}", self.status, next);
        self.status = next;
        true
    }

    /// Stamp the record with the invalidation metadata of its partition.
    pub fn set_invalidation_metadata(&mut self, sequence: i64, uuid: Option<Uuid>) {
        self.invalidation_sequence = sequence;
        self.uuid = uuid;
    }

    /// Get the invalidation sequence the record was stamped with.
    pub fn invalidation_sequence(&self) -> i64 {
        self.invalidation_sequence
    }

    /// Get the partition owner uuid the record was stamped with.
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Whether the record was stamped by the given partition owner.
    pub fn has_same_uuid(&self, uuid: Option<Uuid>) -> bool {
        self.uuid.is_some() && self.uuid == uuid
    }

    /// Least recently used first.
    pub fn lru_cmp(&self, other: &Self) -> Ordering {
        self.last_access_time.cmp(&other.last_access_time)
    }

    /// Least frequently used first.
    pub fn lfu_cmp(&self, other: &Self) -> Ordering {
        self.hits.cmp(&other.hits)
    }
}
