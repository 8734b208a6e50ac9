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

use hashbrown::HashMap;
use nearcache_common::{
    code::{Codec, Key, Value},
    error::Result,
    event::EventListener,
};
use parking_lot::RwLock;

use crate::{
    cache::{NearCache, NearCacheBuilder},
    config::NearCacheConfig,
};

/// Registry of the near caches of a client, created on demand from a set of named configs.
pub struct NearCacheManager<K, V> {
    configs: Vec<NearCacheConfig>,
    codec: Option<Arc<dyn Codec<V>>>,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,

    caches: RwLock<HashMap<String, NearCache<K, V>>>,
}

impl<K, V> Debug for NearCacheManager<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCacheManager")
            .field("configs", &self.configs)
            .field("caches", &self.caches.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K, V> NearCacheManager<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a manager with the named configs.
    ///
    /// A config name ending with `*` applies to every near cache whose name starts with the part before it. Near
    /// caches without a matching config use the default config.
    pub fn new(configs: Vec<NearCacheConfig>) -> Result<Self> {
        for config in configs.iter() {
            config.validate()?;
        }
        Ok(Self {
            configs,
            codec: None,
            event_listener: None,
            caches: RwLock::new(HashMap::new()),
        })
    }

    /// Set the codec shared by all near caches using the binary in-memory format.
    pub fn with_codec(mut self, codec: Arc<dyn Codec<V>>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the listener shared by all near caches.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = K>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Resolve the config of the near cache with the given name.
    ///
    /// An exact name match wins over wildcard matches, the longest wildcard prefix wins among them.
    pub fn config_for(&self, name: &str) -> NearCacheConfig {
        let config = self
            .configs
            .iter()
            .find(|config| config.name == name)
            .or_else(|| {
                self.configs
                    .iter()
                    .filter(|config| config.name.ends_with('*') && config.matches(name))
                    .max_by_key(|config| config.name.len())
            })
            .cloned()
            .unwrap_or_default();
        NearCacheConfig {
            name: name.to_string(),
            ..config
        }
    }

    /// Get the near cache with the given name, creating it if absent.
    ///
    /// A created near cache is not ready for reads until [`NearCache::set_ready`] is called.
    pub fn get_or_create(&self, name: &str) -> Result<NearCache<K, V>> {
        if let Some(cache) = self.caches.read().get(name) {
            return Ok(cache.clone());
        }

        let mut caches = self.caches.write();
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }

        let mut builder = NearCacheBuilder::from_config(self.config_for(name));
        if let Some(codec) = self.codec.as_ref() {
            builder = builder.with_codec(codec.clone());
        }
        if let Some(event_listener) = self.event_listener.as_ref() {
            builder = builder.with_event_listener(event_listener.clone());
        }
        let cache = builder.build()?;

        tracing::debug!("[near cache manager]: created {name}");
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    /// Get the near cache with the given name.
    pub fn get(&self, name: &str) -> Option<NearCache<K, V>> {
        self.caches.read().get(name).cloned()
    }

    /// List all near caches.
    pub fn list(&self) -> Vec<NearCache<K, V>> {
        self.caches.read().values().cloned().collect()
    }

    /// Clear and forget the near cache with the given name. Returns `false` if there is none.
    pub fn destroy(&self, name: &str) -> bool {
        let cache = self.caches.write().remove(name);
        match cache {
            Some(cache) => {
                cache.clear();
                tracing::debug!("[near cache manager]: destroyed {name}");
                true
            }
            None => false,
        }
    }

    /// Clear all near caches.
    pub fn clear_all(&self) {
        for cache in self.list() {
            cache.clear();
        }
    }

    /// Clear and forget all near caches.
    pub fn destroy_all(&self) {
        let caches = self.caches.write().drain().collect::<Vec<_>>();
        for (_, cache) in caches {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use nearcache_common::error::ErrorKind;

    use super::*;
    use crate::{config::InMemoryFormat, eviction::EvictionPolicy};

    fn named(name: &str, max_size: usize) -> NearCacheConfig {
        NearCacheConfig {
            name: name.to_string(),
            in_memory_format: InMemoryFormat::Object,
            eviction_policy: EvictionPolicy::Lru,
            eviction_max_size: max_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_resolution() {
        let manager = NearCacheManager::<u64, u64>::new(vec![
            named("users", 1),
            named("users*", 2),
            named("users-eu*", 3),
        ])
        .unwrap();

        assert_eq!(manager.config_for("users").eviction_max_size, 1);
        assert_eq!(manager.config_for("users-us").eviction_max_size, 2);

        let config = manager.config_for("users-eu-west");
        assert_eq!(config.eviction_max_size, 3);
        assert_eq!(config.name, "users-eu-west");

        let config = manager.config_for("orders");
        assert_eq!(config.eviction_policy, EvictionPolicy::None);
        assert_eq!(config.name, "orders");
    }

    #[test]
    fn test_reject_invalid_config() {
        let res = NearCacheManager::<u64, u64>::new(vec![named("users", 0)]);
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Config);
    }

    #[test_log::test(tokio::test)]
    async fn test_lifecycle() {
        let manager = NearCacheManager::<u64, String>::new(vec![named("*", 100)]).unwrap();

        let users = manager.get_or_create("users").unwrap();
        users.set_ready(Ok(()));
        users.put(1, "alice".to_string()).unwrap();

        // Same name, same near cache.
        let again = manager.get_or_create("users").unwrap();
        assert_eq!(again.get(&1u64).await.unwrap(), Some("alice".to_string()));

        let orders = manager.get_or_create("orders").unwrap();
        orders.put(1, "book".to_string()).unwrap();
        assert_eq!(manager.list().len(), 2);

        manager.clear_all();
        assert!(users.is_empty());
        assert!(orders.is_empty());

        assert!(manager.destroy("users"));
        assert!(!manager.destroy("users"));
        assert!(manager.get("users").is_none());

        manager.destroy_all();
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_binary_format_without_codec() {
        let manager = NearCacheManager::<u64, u64>::new(vec![]).unwrap();
        assert_eq!(manager.get_or_create("users").unwrap_err().kind(), ErrorKind::Config);
        assert!(manager.get("users").is_none());
    }
}
