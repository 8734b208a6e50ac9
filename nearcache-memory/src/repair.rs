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
    any::Any,
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Weak},
    time::Duration,
};

use futures_util::future::BoxFuture;
use itertools::izip;
use nearcache_common::{
    code::{Key, Value},
    error::{Error, ErrorKind, Result},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    cache::NearCache,
    metadata::MetadataTable,
    stale::{MetadataSource, PartitionMetadata, PartitionResolver, SequenceBasedDetector},
};

/// Configuration of the [`RepairingTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepairingConfig {
    /// Interval of the periodic metadata reconciliation in seconds, `0` to disable it.
    pub reconciliation_interval_seconds: u64,
    /// Sum of missed invalidations per near cache at which its records are considered stale.
    pub max_tolerated_miss_count: i64,
    /// Count of partitions of the remote cluster.
    pub partition_count: u32,
}

impl Default for RepairingConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval_seconds: 60,
            max_tolerated_miss_count: 10,
            partition_count: 271,
        }
    }
}

impl RepairingConfig {
    /// Smallest accepted non-zero reconciliation interval in seconds.
    pub const MIN_RECONCILIATION_INTERVAL_SECONDS: u64 = 30;

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reconciliation_interval_seconds > 0
            && self.reconciliation_interval_seconds < Self::MIN_RECONCILIATION_INTERVAL_SECONDS
        {
            return Err(Error::config(
                "reconciliation_interval_seconds",
                self.reconciliation_interval_seconds,
                format!(
                    "reconciliation interval must be 0 or at least {} seconds",
                    Self::MIN_RECONCILIATION_INTERVAL_SECONDS
                ),
            ));
        }
        if self.max_tolerated_miss_count < 0 {
            return Err(Error::config(
                "max_tolerated_miss_count",
                self.max_tolerated_miss_count,
                "max tolerated miss count must not be negative",
            ));
        }
        if self.partition_count == 0 {
            return Err(Error::config(
                "partition_count",
                self.partition_count,
                "partition count must be positive",
            ));
        }
        Ok(())
    }

    /// The reconciliation interval, `None` if disabled.
    pub fn reconciliation_interval(&self) -> Option<Duration> {
        (self.reconciliation_interval_seconds > 0).then(|| Duration::from_secs(self.reconciliation_interval_seconds))
    }
}

/// Invalidation metadata reported by the remote cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMetadata {
    /// Latest invalidation sequences per partition, grouped by near cache name.
    pub sequences: Vec<(String, Vec<(u32, i64)>)>,
    /// Owner uuid per partition.
    pub uuids: Vec<(u32, Uuid)>,
}

/// Fetches invalidation metadata from the remote cluster.
pub trait MetadataFetcher: Send + Sync + 'static {
    /// Fetch the metadata of the near caches with the given names.
    fn fetch(&self, names: Vec<String>) -> BoxFuture<'static, Result<FetchedMetadata>>;
}

/// Applies remote invalidation events to a near cache and tracks the invalidation metadata of its partitions.
pub struct RepairingHandler<K, V> {
    local_uuid: Uuid,
    cache: NearCache<K, V>,
    resolver: Arc<dyn PartitionResolver<K>>,
    name_partition_id: u32,
    table: Arc<MetadataTable>,
}

impl<K, V> Debug for RepairingHandler<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairingHandler")
            .field("cache", &self.cache)
            .field("local_uuid", &self.local_uuid)
            .finish()
    }
}

impl<K, V> RepairingHandler<K, V>
where
    K: Key,
    V: Value,
{
    fn new(local_uuid: Uuid, cache: NearCache<K, V>, resolver: Arc<dyn PartitionResolver<K>>, partitions: u32) -> Self {
        let name_partition_id = resolver.name_partition_id(cache.name());
        Self {
            local_uuid,
            cache,
            resolver,
            name_partition_id,
            table: Arc::new(MetadataTable::new(partitions)),
        }
    }

    /// Name of the handled near cache.
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// The handled near cache.
    pub fn cache(&self) -> &NearCache<K, V> {
        &self.cache
    }

    /// The invalidation metadata of the partitions.
    pub fn table(&self) -> &Arc<MetadataTable> {
        &self.table
    }

    /// Handle a remote invalidation event.
    ///
    /// `key` is `None` for an event clearing the whole near cache, its sequence is tracked on the partition given by
    /// [`PartitionResolver::name_partition_id`]. Events caused by this client itself do not drop local records, but
    /// their sequences are still tracked.
    pub fn handle(&self, key: Option<&K>, source_uuid: Option<Uuid>, partition_uuid: Uuid, sequence: i64) {
        if source_uuid != Some(self.local_uuid) {
            match key {
                Some(key) => {
                    self.cache.invalidate(key);
                }
                None => self.cache.clear(),
            }
        }

        let partition_id = match key {
            Some(key) => self.resolver.partition_id(key),
            None => self.name_partition_id,
        };
        // Sequences of a new owner start from this event, records of the previous owner are stale by their uuid.
        if self.table.check_or_repair_uuid(partition_id, partition_uuid) {
            self.table.init_sequence(partition_id, sequence);
        } else {
            self.table.check_or_repair_sequence(partition_id, sequence, false);
        }
    }

    /// Handle a batch of remote invalidation events, element-wise.
    pub fn handle_batch(&self, keys: &[K], source_uuids: &[Option<Uuid>], partition_uuids: &[Uuid], sequences: &[i64]) {
        for (key, source_uuid, partition_uuid, sequence) in izip!(keys, source_uuids, partition_uuids, sequences) {
            self.handle(Some(key), *source_uuid, *partition_uuid, *sequence);
        }
    }

    fn stale_read_detector(&self) -> SequenceBasedDetector<impl PartitionResolver<K>, Arc<MetadataTable>> {
        let resolver = self.resolver.clone();
        SequenceBasedDetector::new(move |key: &K| resolver.partition_id(key), self.table.clone())
    }
}

impl<K, V> MetadataSource for RepairingHandler<K, V>
where
    K: Key,
    V: Value,
{
    fn metadata(&self, partition_id: u32) -> PartitionMetadata {
        self.table.metadata(partition_id)
    }
}

struct Registration {
    table: Arc<MetadataTable>,
    handler: Arc<dyn Any + Send + Sync>,
}

struct Inner {
    config: RepairingConfig,
    local_uuid: Uuid,
    fetcher: Arc<dyn MetadataFetcher>,

    registrations: RwLock<HashMap<String, Registration>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the invalidation metadata of all registered near caches consistent with the remote cluster.
///
/// Invalidation events can get lost. Every reconciliation round, near caches that missed too many events get all
/// records stamped before the latest known sequence declared stale, then the metadata is refetched to detect owner
/// changes and sequence gaps.
#[derive(Clone)]
pub struct RepairingTask {
    inner: Arc<Inner>,
}

impl Debug for RepairingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairingTask")
            .field("config", &self.inner.config)
            .field("local_uuid", &self.inner.local_uuid)
            .finish()
    }
}

impl RepairingTask {
    /// Create a repairing task. The reconciliation loop starts with the first registered handler.
    pub fn new(config: RepairingConfig, local_uuid: Uuid, fetcher: Arc<dyn MetadataFetcher>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                local_uuid,
                fetcher,
                registrations: RwLock::new(HashMap::new()),
                task: Mutex::new(None),
            }),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &RepairingConfig {
        &self.inner.config
    }

    /// Register the near cache and return its handler, or the existing handler if already registered.
    ///
    /// A new handler gets its metadata initialized from the remote cluster, then installs a sequence based stale read
    /// detector on the near cache. A near cache that is not invalidated on change keeps serving its records as they
    /// are and is rejected.
    pub async fn register_handler<K, V>(
        &self,
        cache: &NearCache<K, V>,
        resolver: impl PartitionResolver<K>,
    ) -> Result<Arc<RepairingHandler<K, V>>>
    where
        K: Key,
        V: Value,
    {
        if !cache.is_invalidated_on_change() {
            return Err(Error::config(
                "invalidate_on_change",
                false,
                "near cache is not invalidated on change",
            )
            .with_context("name", cache.name()));
        }
        if let Some(handler) = self.registered(cache.name())? {
            return Ok(handler);
        }

        let handler = RepairingHandler::new(
            self.inner.local_uuid,
            cache.clone(),
            Arc::new(resolver),
            self.inner.config.partition_count,
        );
        let metadata = self.inner.fetcher.fetch(vec![cache.name().to_string()]).await?;
        for (partition_id, uuid) in metadata.uuids.iter() {
            handler.table.init_uuid(*partition_id, *uuid);
        }
        for (_, sequences) in metadata.sequences.iter().filter(|(name, _)| name == cache.name()) {
            for (partition_id, sequence) in sequences {
                handler.table.init_sequence(*partition_id, *sequence);
            }
        }

        let handler = Arc::new(handler);
        {
            let mut registrations = self.inner.registrations.write();
            if let Some(registration) = registrations.get(cache.name()) {
                return downcast(cache.name(), registration.handler.clone());
            }
            registrations.insert(
                cache.name().to_string(),
                Registration {
                    table: handler.table.clone(),
                    handler: handler.clone(),
                },
            );
        }
        cache.set_stale_read_detector(handler.stale_read_detector());
        tracing::debug!("[repairing task]: registered {}", cache.name());

        self.start();
        Ok(handler)
    }

    /// Deregister the near cache. The reconciliation loop stops with the last handler.
    pub fn deregister_handler(&self, name: &str) {
        let empty = {
            let mut registrations = self.inner.registrations.write();
            registrations.remove(name);
            registrations.is_empty()
        };
        if empty {
            self.shutdown();
        }
    }

    /// Names of the registered near caches.
    pub fn names(&self) -> Vec<String> {
        self.inner.registrations.read().keys().cloned().collect()
    }

    /// Run one reconciliation round.
    pub async fn reconcile(&self) -> Result<()> {
        self.inner.reconcile().await
    }

    /// Stop the reconciliation loop.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            tracing::info!("[repairing task]: stop reconciliation");
            task.abort();
        }
    }

    fn registered<K, V>(&self, name: &str) -> Result<Option<Arc<RepairingHandler<K, V>>>>
    where
        K: Key,
        V: Value,
    {
        match self.inner.registrations.read().get(name) {
            Some(registration) => downcast(name, registration.handler.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Start the reconciliation loop if it is enabled and not running yet.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let Some(interval) = self.inner.config.reconciliation_interval() else {
            return;
        };
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }

        tracing::info!("[repairing task]: start reconciliation every {interval:?}");
        let inner = Arc::downgrade(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = Weak::upgrade(&inner) else {
                    break;
                };
                if let Err(e) = inner.reconcile().await {
                    tracing::debug!("[repairing task]: reconciliation failed, retry next round: {e}");
                }
            }
        }));
    }
}

fn downcast<K, V>(name: &str, handler: Arc<dyn Any + Send + Sync>) -> Result<Arc<RepairingHandler<K, V>>>
where
    K: Key,
    V: Value,
{
    handler.downcast::<RepairingHandler<K, V>>().map_err(|_| {
        Error::new(
            ErrorKind::Config,
            "near cache registered with different key or value types",
        )
        .with_context("name", name)
    })
}

impl Inner {
    async fn reconcile(&self) -> Result<()> {
        let tables = self
            .registrations
            .read()
            .iter()
            .map(|(name, registration)| (name.clone(), registration.table.clone()))
            .collect::<Vec<_>>();
        if tables.is_empty() {
            return Ok(());
        }

        for (name, table) in tables.iter() {
            let missed = table.missed_sequence_count();
            if missed >= self.config.max_tolerated_miss_count {
                tracing::debug!("[repairing task]: {name} missed {missed} invalidations, mark records stale");
                table.update_last_known_stale_sequences();
            }
        }

        let names = tables.iter().map(|(name, _)| name.clone()).collect();
        let metadata = self.fetcher.fetch(names).await?;

        for (name, table) in tables.iter() {
            for (partition_id, uuid) in metadata.uuids.iter() {
                table.check_or_repair_uuid(*partition_id, *uuid);
            }
            for (_, sequences) in metadata.sequences.iter().filter(|(n, _)| n == name) {
                for (partition_id, sequence) in sequences {
                    table.check_or_repair_sequence(*partition_id, *sequence, true);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;

    use super::*;
    use crate::{cache::NearCacheBuilder, config::InMemoryFormat};

    #[derive(Default)]
    struct MockFetcher {
        metadata: Mutex<FetchedMetadata>,
        fail: Mutex<bool>,
        fetches: AtomicUsize,
    }

    impl MetadataFetcher for MockFetcher {
        fn fetch(&self, _: Vec<String>) -> BoxFuture<'static, Result<FetchedMetadata>> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let res = if *self.fail.lock() {
                Err(Error::external(std::io::Error::other("member unreachable")))
            } else {
                Ok(self.metadata.lock().clone())
            };
            async move { res }.boxed()
        }
    }

    fn cache(name: &str) -> NearCache<u64, String> {
        let cache = NearCacheBuilder::new(name)
            .with_in_memory_format(InMemoryFormat::Object)
            .build()
            .unwrap();
        cache.set_ready(Ok(()));
        cache
    }

    fn config() -> RepairingConfig {
        RepairingConfig {
            reconciliation_interval_seconds: 0,
            max_tolerated_miss_count: 10,
            partition_count: 4,
        }
    }

    fn partition(key: &u64) -> u32 {
        (*key % 4) as u32
    }

    #[test]
    fn test_config_validate() {
        assert!(RepairingConfig::default().validate().is_ok());
        assert_eq!(
            RepairingConfig::default().reconciliation_interval(),
            Some(Duration::from_secs(60))
        );

        let config = RepairingConfig {
            reconciliation_interval_seconds: 10,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);

        let config = RepairingConfig {
            reconciliation_interval_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.reconciliation_interval().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_register_initializes_metadata() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        *fetcher.metadata.lock() = FetchedMetadata {
            sequences: vec![
                ("users".to_string(), vec![(1, 7)]),
                ("orders".to_string(), vec![(1, 99)]),
            ],
            uuids: (0..4).map(|p| (p, owner)).collect(),
        };
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        assert_eq!(handler.name(), "users");
        assert_eq!(
            handler.metadata(1),
            PartitionMetadata {
                uuid: Some(owner),
                sequence: 7,
                stale_sequence: 0
            }
        );

        // Registering again returns the same handler without fetching.
        let again = task.register_handler(&users, partition).await.unwrap();
        assert!(Arc::ptr_eq(&handler, &again));
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 1);
        assert_eq!(task.names(), vec!["users".to_string()]);

        // Records are stamped and served while the owner stays the same.
        users.put(5, "v".to_string()).unwrap();
        assert_eq!(users.get(&5u64).await.unwrap(), Some("v".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn test_register_fails_when_fetch_fails() {
        let fetcher = Arc::new(MockFetcher::default());
        *fetcher.fail.lock() = true;
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher).unwrap();

        let err = task.register_handler(&cache("users"), partition).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(task.names().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_invalidation() {
        let local = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), local, fetcher).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        users.put(1, "a".to_string()).unwrap();
        users.put(2, "b".to_string()).unwrap();

        // Events caused by this client keep the record but advance the sequence.
        handler.handle(Some(&1), Some(local), owner, 1);
        assert_eq!(users.get(&1u64).await.unwrap(), Some("a".to_string()));
        assert_eq!(handler.metadata(1).sequence, 1);

        handler.handle(Some(&1), Some(Uuid::new_v4()), owner, 2);
        assert_eq!(users.get(&1u64).await.unwrap(), None);

        handler.handle(None, None, owner, 1);
        assert!(users.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_batch() {
        let local = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), local, fetcher).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        for key in 0..4u64 {
            users.put(key, key.to_string()).unwrap();
        }

        let remote = Uuid::new_v4();
        handler.handle_batch(
            &[0, 1, 2],
            &[Some(remote), Some(local), None],
            &[owner, owner, owner],
            &[1, 1, 4],
        );

        assert_eq!(users.get(&0u64).await.unwrap(), None);
        assert_eq!(users.get(&1u64).await.unwrap(), Some("1".to_string()));
        assert_eq!(users.get(&2u64).await.unwrap(), None);
        assert_eq!(users.get(&3u64).await.unwrap(), Some("3".to_string()));
        // Partition 2 jumped from 0 to 4.
        assert_eq!(handler.table().missed_sequence_count(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_owner_change_event_starts_new_sequence() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();

        let migrated = Uuid::new_v4();
        handler.handle(Some(&1), None, migrated, 5);
        assert_eq!(
            handler.metadata(1),
            PartitionMetadata {
                uuid: Some(migrated),
                sequence: 5,
                stale_sequence: 0
            }
        );

        handler.handle(Some(&1), None, migrated, 6);
        assert_eq!(handler.metadata(1).sequence, 6);
        assert_eq!(handler.table().missed_sequence_count(), 0);

        // Records stamped under the new owner survive a reconciliation round.
        users.put(5, "v".to_string()).unwrap();
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, if p == 1 { migrated } else { owner })).collect();
        task.reconcile().await.unwrap();
        assert_eq!(users.get(&5u64).await.unwrap(), Some("v".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn test_missed_count_at_tolerance_marks_records_stale() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        users.put(1, "a".to_string()).unwrap();

        // Sequences 1 to 10 are lost.
        handler.handle(Some(&5), None, owner, 11);
        assert_eq!(handler.table().missed_sequence_count(), 10);

        task.reconcile().await.unwrap();
        assert_eq!(handler.metadata(1).stale_sequence, 11);
        assert_eq!(handler.table().missed_sequence_count(), 0);
        assert_eq!(users.get(&1u64).await.unwrap(), None);
    }

    #[test_log::test(tokio::test)]
    async fn test_reject_cache_not_invalidated_on_change() {
        let fetcher = Arc::new(MockFetcher::default());
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();

        let cache: NearCache<u64, String> = NearCacheBuilder::new("static")
            .with_in_memory_format(InMemoryFormat::Object)
            .with_invalidate_on_change(false)
            .build()
            .unwrap();
        cache.set_ready(Ok(()));
        cache.put(1, "v".to_string()).unwrap();

        let err = task.register_handler(&cache, partition).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(task.names().is_empty());
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 0);
        assert_eq!(cache.get(&1u64).await.unwrap(), Some("v".to_string()));
    }

    struct NamedPartitions;

    impl PartitionResolver<u64> for NamedPartitions {
        fn partition_id(&self, key: &u64) -> u32 {
            partition(key)
        }

        fn name_partition_id(&self, name: &str) -> u32 {
            (name.len() % 4) as u32
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_clear_event_uses_name_partition() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, NamedPartitions).await.unwrap();
        users.put(1, "a".to_string()).unwrap();

        handler.handle(None, None, owner, 3);
        assert!(users.is_empty());
        // "users" has 5 characters.
        assert_eq!(handler.metadata(1).sequence, 3);
        assert_eq!(handler.metadata(0).sequence, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_owner_change_makes_records_stale() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        users.put(1, "a".to_string()).unwrap();
        users.put(2, "b".to_string()).unwrap();

        // Partition 1 migrates to a new owner.
        let migrated = Uuid::new_v4();
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, if p == 1 { migrated } else { owner })).collect();
        task.reconcile().await.unwrap();
        assert_eq!(handler.metadata(1).uuid, Some(migrated));

        assert_eq!(users.get(&1u64).await.unwrap(), None);
        assert_eq!(users.get(&2u64).await.unwrap(), Some("b".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn test_too_many_missed_invalidations() {
        let owner = Uuid::new_v4();
        let fetcher = Arc::new(MockFetcher::default());
        fetcher.metadata.lock().uuids = (0..4).map(|p| (p, owner)).collect();
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();

        let users = cache("users");
        let handler = task.register_handler(&users, partition).await.unwrap();
        handler.handle(Some(&3), None, owner, 1);
        users.put(3, "a".to_string()).unwrap();
        users.put(7, "b".to_string()).unwrap();

        // 11 invalidations are lost between sequence 1 and 13.
        handler.handle(Some(&7), None, owner, 13);
        assert_eq!(handler.table().missed_sequence_count(), 11);
        users.put(7, "c".to_string()).unwrap();
        assert_eq!(users.get(&3u64).await.unwrap(), Some("a".to_string()));

        task.reconcile().await.unwrap();
        assert_eq!(handler.table().missed_sequence_count(), 0);
        assert_eq!(handler.metadata(3).stale_sequence, 13);

        // Stamped before the latest sequence: stale. Stamped at it: fresh.
        assert_eq!(users.get(&3u64).await.unwrap(), None);
        assert_eq!(users.get(&7u64).await.unwrap(), Some("c".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn test_reconcile_failure_is_retried() {
        let fetcher = Arc::new(MockFetcher::default());
        let task = RepairingTask::new(config(), Uuid::new_v4(), fetcher.clone()).unwrap();
        task.register_handler(&cache("users"), partition).await.unwrap();

        *fetcher.fail.lock() = true;
        assert_eq!(task.reconcile().await.unwrap_err().kind(), ErrorKind::External);

        *fetcher.fail.lock() = false;
        assert!(task.reconcile().await.is_ok());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_periodic_reconciliation() {
        let fetcher = Arc::new(MockFetcher::default());
        let task = RepairingTask::new(
            RepairingConfig {
                reconciliation_interval_seconds: 30,
                ..config()
            },
            Uuid::new_v4(),
            fetcher.clone(),
        )
        .unwrap();
        task.register_handler(&cache("users"), partition).await.unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 1);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 4);

        task.deregister_handler("users");
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(fetcher.fetches.load(Ordering::Relaxed), 4);
    }

    #[test_log::test(tokio::test)]
    async fn test_type_mismatch_is_rejected() {
        let task = RepairingTask::new(config(), Uuid::new_v4(), Arc::new(MockFetcher::default())).unwrap();
        task.register_handler(&cache("users"), partition).await.unwrap();

        let other: NearCache<String, String> = NearCacheBuilder::new("users")
            .with_in_memory_format(InMemoryFormat::Object)
            .build()
            .unwrap();
        let err = task.register_handler(&other, |_: &String| 0u32).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
