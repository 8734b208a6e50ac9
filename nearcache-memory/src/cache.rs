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
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use equivalent::Equivalent;
use nearcache_common::{
    code::{BincodeCodec, Codec, Key, Value},
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::{InMemoryFormat, NearCacheConfig},
    eviction::{sampler::EvictionSampler, EvictionPolicy},
    ready::ReadinessGate,
    record::{Record, RecordStatus, ReservationId, StoredValue},
    stale::{AlwaysFresh, StaleReadDetector},
    statistics::{Counters, NearCacheStatistics},
    store::RecordStore,
};

/// Outcome of [`NearCache::try_reserve_for_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller holds the reservation and may publish with the id.
    Reserved(ReservationId),
    /// Another populator holds the key.
    Conflict,
}

impl Reservation {
    /// The reservation id, `None` on conflict.
    pub fn id(&self) -> Option<ReservationId> {
        match self {
            Reservation::Reserved(id) => Some(*id),
            Reservation::Conflict => None,
        }
    }
}

/// Outcome of [`NearCache::try_publish_reserved`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publish<V> {
    /// The value is now cached.
    Published,
    /// The reservation is no longer valid. Carries the value currently cached for the key, if any.
    Superseded(Option<V>),
    /// The key has no record anymore, e.g. it has been invalidated.
    Absent,
}

struct State<K, V> {
    store: RecordStore<K, V>,
    sampler: EvictionSampler<K>,
}

struct Inner<K, V> {
    config: NearCacheConfig,
    time_to_live: Option<Duration>,
    max_idle: Duration,

    state: Mutex<State<K, V>>,

    detector: ArcSwap<Box<dyn StaleReadDetector<K, V>>>,
    codec: Option<Arc<dyn Codec<V>>>,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,

    reservation_id: AtomicU64,
    counters: Counters,
    creation_time: SystemTime,
    gate: ReadinessGate,
}

/// Client-side near cache.
///
/// Keeps recently read remote values locally, bounded by a sampling based eviction policy, with optional
/// time-to-live and max idle expiry. Concurrent populators coordinate through reservations, and a stale read detector
/// decides whether a cached record may still be served. Reads wait until the near cache is marked ready.
///
/// Cloning a near cache is cheap, all clones share the same records.
pub struct NearCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for NearCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for NearCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("name", &self.inner.config.name)
            .field("in_memory_format", &self.inner.config.in_memory_format)
            .field("eviction_policy", &self.inner.config.eviction_policy)
            .finish()
    }
}

enum Lookup<V> {
    Miss,
    Hit(StoredValue<V>),
    Remove(Event),
}

impl<K, V> NearCache<K, V>
where
    K: Key,
    V: Value,
{
    /// Get the name of the near cache.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Whether remote changes invalidate the cached entries.
    pub fn is_invalidated_on_change(&self) -> bool {
        self.inner.config.invalidate_on_change
    }

    /// Get the config the near cache was built with.
    pub fn config(&self) -> &NearCacheConfig {
        &self.inner.config
    }

    /// Read the value of the key.
    ///
    /// Waits until the near cache is ready, and fails with the readiness error if it never will be. A record that is
    /// stale or expired is dropped and reads as a miss, so does a reserved placeholder that has no value yet.
    pub async fn get<Q>(&self, key: &Q) -> Result<Option<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.gate.wait().await?;

        let mut garbages = vec![];
        let lookup = {
            let detector = self.inner.detector.load();
            let mut state = self.inner.state.lock();
            let lookup = match state.store.get_mut(key) {
                None => Lookup::Miss,
                Some(record) => {
                    if detector.is_stale_read(record.key(), record) {
                        Lookup::Remove(Event::Stale)
                    } else if record.is_expired(self.inner.max_idle) {
                        Lookup::Remove(Event::Expire)
                    } else if let Some(value) = record.value().cloned() {
                        record.touch();
                        record.record_hit();
                        Lookup::Hit(value)
                    } else {
                        Lookup::Miss
                    }
                }
            };
            if let Lookup::Remove(event) = lookup {
                if let Some(record) = state.store.take(key) {
                    garbages.push((event, record));
                }
            }
            lookup
        };
        self.release(garbages);

        match lookup {
            Lookup::Hit(value) => {
                self.inner.counters.hit();
                self.materialize(value).map(Some)
            }
            Lookup::Miss | Lookup::Remove(_) => {
                self.inner.counters.miss();
                Ok(None)
            }
        }
    }

    /// Cache the value of the key unconditionally, replacing any existing record.
    ///
    /// Does not wait for readiness. If the value cannot be stored in the configured in-memory format, the error is
    /// returned and the store is left untouched.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        let value = self.store_value(value)?;

        let mut record = Record::new(key.clone(), Some(value), self.inner.time_to_live);
        if let Some(metadata) = self.inner.detector.load().invalidation_metadata(&key) {
            record.set_invalidation_metadata(metadata.sequence, metadata.uuid);
        }
        record.compare_and_set_status(RecordStatus::Free, RecordStatus::Published);

        let mut garbages = vec![];
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !state.store.contains(&key) {
                state
                    .sampler
                    .evict_if_required(&mut state.store, self.inner.max_idle, &mut garbages);
            }
            state.store.set(key, record);
        }
        self.release(garbages);

        Ok(())
    }

    /// Try to reserve the key for population.
    ///
    /// An absent key gets an empty placeholder record, evicting first if the near cache is full. A present key can
    /// be reserved unless another populator holds it. Reservations never time out, a holder that gives up must call
    /// [`NearCache::release_reservation`] or [`NearCache::invalidate`].
    pub fn try_reserve_for_update(&self, key: K) -> Reservation {
        let id = self.inner.reservation_id.fetch_add(1, Ordering::Relaxed);

        let mut garbages = vec![];
        let reservation = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match state.store.get_mut(&key) {
                Some(record) => {
                    let current = record.status();
                    if current.is_read_permitted()
                        && record.compare_and_set_status(current, RecordStatus::Reserved(id))
                    {
                        Reservation::Reserved(id)
                    } else {
                        Reservation::Conflict
                    }
                }
                None => {
                    state
                        .sampler
                        .evict_if_required(&mut state.store, self.inner.max_idle, &mut garbages);
                    let mut record = Record::new(key.clone(), None, self.inner.time_to_live);
                    record.compare_and_set_status(RecordStatus::Free, RecordStatus::Reserved(id));
                    state.store.set(key, record);
                    Reservation::Reserved(id)
                }
            }
        };
        self.release(garbages);

        tracing::trace!("[near cache]: {} reservation {:?}", self.inner.config.name, reservation);
        reservation
    }

    /// Publish the value of a reserved key.
    ///
    /// Succeeds only if the record is still reserved with exactly `id`. Otherwise the value is discarded and the
    /// current state of the key is returned.
    pub fn try_publish_reserved<Q>(&self, key: &Q, value: V, id: ReservationId) -> Result<Publish<V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let value = self.store_value(value)?;

        let current = {
            let detector = self.inner.detector.load();
            let mut state = self.inner.state.lock();
            match state.store.get_mut(key) {
                None => return Ok(Publish::Absent),
                Some(record) => {
                    if record.compare_and_set_status(RecordStatus::Reserved(id), RecordStatus::Published) {
                        record.set_value(value);
                        record.reset_creation_time();
                        if let Some(metadata) = detector.invalidation_metadata(record.key()) {
                            record.set_invalidation_metadata(metadata.sequence, metadata.uuid);
                        }
                        return Ok(Publish::Published);
                    }
                    record.value().cloned()
                }
            }
        };

        tracing::trace!("[near cache]: {} reservation {} superseded", self.inner.config.name, id);
        let current = current.map(|value| self.materialize(value)).transpose()?;
        Ok(Publish::Superseded(current))
    }

    /// Give up a reservation without publishing.
    ///
    /// A placeholder is removed, a reserved record that still has a value becomes readable again. Returns `false` if
    /// the key is not reserved with `id`.
    pub fn release_reservation<Q>(&self, key: &Q, id: ReservationId) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let mut state = self.inner.state.lock();
        let populated = match state.store.get_mut(key) {
            Some(record) if record.status() == RecordStatus::Reserved(id) => record.value().is_some(),
            _ => return false,
        };
        if populated {
            if let Some(record) = state.store.get_mut(key) {
                record.compare_and_set_status(RecordStatus::Reserved(id), RecordStatus::Published);
            }
        } else {
            state.store.delete(key);
        }
        true
    }

    /// Read the value of the key, populating it with `fetch` on miss.
    ///
    /// The key is reserved before fetching, so a concurrent invalidation or update of the key wins over the fetched
    /// value. If another populator already holds the key, the fetched value is returned without being cached. If the
    /// fetch fails or finds nothing, the reservation is released.
    pub async fn get_or_fetch<F, FU>(&self, key: K, fetch: F) -> Result<Option<V>>
    where
        F: FnOnce() -> FU,
        FU: Future<Output = Result<Option<V>>>,
    {
        if let Some(value) = self.get(&key).await? {
            return Ok(Some(value));
        }

        let reservation = self.try_reserve_for_update(key.clone());
        let fetched = match fetch().await {
            Ok(fetched) => fetched,
            Err(e) => {
                if let Reservation::Reserved(id) = reservation {
                    tracing::warn!(
                        "[near cache]: {} fetch of {:?} failed, release reservation {}: {}",
                        self.inner.config.name,
                        key,
                        id,
                        e
                    );
                    self.release_reservation(&key, id);
                }
                return Err(e);
            }
        };

        let (Reservation::Reserved(id), Some(value)) = (reservation, fetched.clone()) else {
            if let Reservation::Reserved(id) = reservation {
                self.release_reservation(&key, id);
            }
            return Ok(fetched);
        };

        match self.try_publish_reserved(&key, value.clone(), id) {
            Ok(Publish::Published) | Ok(Publish::Absent) | Ok(Publish::Superseded(None)) => Ok(Some(value)),
            Ok(Publish::Superseded(Some(current))) => Ok(Some(current)),
            Err(e) => {
                self.release_reservation(&key, id);
                Err(e)
            }
        }
    }

    /// Remove the record of the key, reserved or not. Returns `true` if a record was removed.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let record = self.inner.state.lock().store.take(key);
        match record {
            Some(record) => {
                self.release(vec![(Event::Invalidate, record)]);
                true
            }
            None => false,
        }
    }

    /// Remove all records.
    pub fn clear(&self) {
        let records = {
            let mut state = self.inner.state.lock();
            state.sampler.clear();
            state.store.clear()
        };
        tracing::debug!("[near cache]: {} cleared {} records", self.inner.config.name, records.len());
        self.release(records.into_iter().map(|record| (Event::Clear, record)).collect());
    }

    /// Count of records, including reserved placeholders.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    /// Whether the near cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a snapshot of the statistics.
    pub fn statistics(&self) -> NearCacheStatistics {
        self.inner.counters.snapshot(self.inner.creation_time, self.len())
    }

    /// Resolve the readiness of the near cache.
    ///
    /// Only the first call takes effect, later calls are ignored. On error, every read fails with it from then on.
    pub fn set_ready(&self, outcome: Result<()>) {
        let failed = outcome.as_ref().err().cloned();
        if !self.inner.gate.resolve(outcome) {
            tracing::warn!("[near cache]: {} readiness already resolved, ignored", self.inner.config.name);
            return;
        }
        match failed {
            None => tracing::debug!("[near cache]: {} is ready", self.inner.config.name),
            Some(e) => tracing::warn!("[near cache]: {} will not become ready: {}", self.inner.config.name, e),
        }
    }

    /// Whether the readiness of the near cache has been resolved, successfully or not.
    pub fn is_ready_resolved(&self) -> bool {
        self.inner.gate.is_resolved()
    }

    /// Replace the stale read detector.
    pub fn set_stale_read_detector(&self, detector: impl StaleReadDetector<K, V>) {
        let detector: Box<dyn StaleReadDetector<K, V>> = Box::new(detector);
        self.inner.detector.store(Arc::new(detector));
    }

    fn codec(&self) -> Result<&Arc<dyn Codec<V>>> {
        self.inner
            .codec
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Codec, "no codec for the binary in-memory format"))
    }

    fn store_value(&self, value: V) -> Result<StoredValue<V>> {
        match self.inner.config.in_memory_format {
            InMemoryFormat::Object => Ok(StoredValue::Object(value)),
            InMemoryFormat::Binary => Ok(StoredValue::Binary(self.codec()?.encode(&value)?)),
        }
    }

    fn materialize(&self, value: StoredValue<V>) -> Result<V> {
        match value {
            StoredValue::Object(value) => Ok(value),
            StoredValue::Binary(bytes) => Ok(self.codec()?.decode(&bytes)?),
        }
    }

    /// Account for records that left the store and notify the listener, out of the lock.
    fn release(&self, garbages: Vec<(Event, Record<K, V>)>) {
        for (event, record) in garbages {
            match event {
                Event::Evict => self.inner.counters.evict(),
                Event::Expire => self.inner.counters.expire(),
                Event::Invalidate => self.inner.counters.invalidate(),
                Event::Stale | Event::Clear => {}
            }
            if matches!(event, Event::Evict | Event::Expire | Event::Stale) {
                tracing::debug!("[near cache]: {} {:?} {:?}", self.inner.config.name, event, record.key());
            }
            if let Some(listener) = self.inner.event_listener.as_ref() {
                listener.on_leave(event, record.key());
            }
        }
    }
}

/// Builder for [`NearCache`].
pub struct NearCacheBuilder<K, V> {
    config: NearCacheConfig,
    codec: Option<Arc<dyn Codec<V>>>,
    detector: Option<Box<dyn StaleReadDetector<K, V>>>,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,
}

impl<K, V> NearCacheBuilder<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a builder with the default config and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(NearCacheConfig {
            name: name.into(),
            ..Default::default()
        })
    }

    /// Create a builder from a config.
    pub fn from_config(config: NearCacheConfig) -> Self {
        Self {
            config,
            codec: None,
            detector: None,
            event_listener: None,
        }
    }

    /// Set whether remote changes invalidate the cached entries.
    pub fn with_invalidate_on_change(mut self, invalidate_on_change: bool) -> Self {
        self.config.invalidate_on_change = invalidate_on_change;
        self
    }

    /// Set the time-to-live of records in seconds, `0` for never.
    pub fn with_time_to_live_seconds(mut self, seconds: u64) -> Self {
        self.config.time_to_live_seconds = seconds;
        self
    }

    /// Set the max idle time of records in seconds, `0` for never.
    pub fn with_max_idle_seconds(mut self, seconds: u64) -> Self {
        self.config.max_idle_seconds = seconds;
        self
    }

    /// Set the in-memory format.
    ///
    /// The binary format requires a codec.
    pub fn with_in_memory_format(mut self, in_memory_format: InMemoryFormat) -> Self {
        self.config.in_memory_format = in_memory_format;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = eviction_policy;
        self
    }

    /// Set the count of records that triggers eviction.
    pub fn with_eviction_max_size(mut self, max_size: usize) -> Self {
        self.config.eviction_max_size = max_size;
        self
    }

    /// Set the count of records sampled on every eviction round.
    ///
    /// The default value is 8.
    pub fn with_eviction_sampling_count(mut self, sampling_count: usize) -> Self {
        self.config.eviction_sampling_count = sampling_count;
        self
    }

    /// Set the size of the eviction candidate pool.
    ///
    /// The default value is 16.
    pub fn with_eviction_sampling_pool_size(mut self, pool_size: usize) -> Self {
        self.config.eviction_sampling_pool_size = pool_size;
        self
    }

    /// Set the codec used by the binary in-memory format.
    pub fn with_codec(mut self, codec: Arc<dyn Codec<V>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Use serde and bincode for the binary in-memory format.
    pub fn with_bincode_codec(self) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        self.with_codec(Arc::new(BincodeCodec::<V>::default()))
    }

    /// Set the initial stale read detector. The default never reports a record as stale.
    pub fn with_stale_read_detector(mut self, detector: impl StaleReadDetector<K, V>) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    /// Set the listener notified when records leave the near cache.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = K>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Build the near cache. It is not ready for reads until [`NearCache::set_ready`] is called.
    pub fn build(self) -> Result<NearCache<K, V>> {
        self.config.validate()?;
        if self.config.in_memory_format == InMemoryFormat::Binary && self.codec.is_none() {
            return Err(Error::config(
                "in_memory_format",
                "BINARY",
                "binary in-memory format requires a codec",
            ));
        }

        tracing::debug!("[near cache]: build {:?}", self.config);

        let detector = self.detector.unwrap_or_else(|| Box::new(AlwaysFresh));
        let inner = Inner {
            time_to_live: self.config.time_to_live(),
            max_idle: self.config.max_idle(),
            state: Mutex::new(State {
                store: RecordStore::default(),
                sampler: EvictionSampler::new(&self.config),
            }),
            detector: ArcSwap::new(Arc::new(detector)),
            codec: self.codec,
            event_listener: self.event_listener,
            reservation_id: AtomicU64::new(0),
            counters: Counters::default(),
            creation_time: SystemTime::now(),
            gate: ReadinessGate::new(),
            config: self.config,
        };
        Ok(NearCache { inner: Arc::new(inner) })
    }
}
