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

use nearcache_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::eviction::EvictionPolicy;

/// The representation values are kept in while cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InMemoryFormat {
    /// Keep the decoded value, hand out clones.
    Object,
    /// Keep the encoded bytes, decode on every read.
    #[default]
    Binary,
}

/// Configuration of a near cache.
///
/// Unknown fields are rejected when deserializing, missing fields take their defaults.
///
/// ```rust
/// # use nearcache_memory::config::NearCacheConfig;
/// let config: NearCacheConfig = serde_json::from_str(
///     r#"{ "name": "users", "eviction_policy": "LRU", "eviction_max_size": 1000 }"#,
/// )
/// .unwrap();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NearCacheConfig {
    /// Name of the near cache, or a name pattern ending with `*` when registered on a manager.
    pub name: String,
    /// Whether remote changes invalidate the cached entries.
    pub invalidate_on_change: bool,
    /// Time-to-live of a record in seconds, `0` for never.
    pub time_to_live_seconds: u64,
    /// Max idle time of a record in seconds, `0` for never.
    pub max_idle_seconds: u64,
    /// The in-memory format of cached values.
    pub in_memory_format: InMemoryFormat,
    /// The eviction policy.
    pub eviction_policy: EvictionPolicy,
    /// Maximum number of records before eviction kicks in.
    pub eviction_max_size: usize,
    /// Number of records sampled on every eviction round.
    pub eviction_sampling_count: usize,
    /// Size of the eviction candidate pool.
    pub eviction_sampling_pool_size: usize,
}

impl Default for NearCacheConfig {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            invalidate_on_change: true,
            time_to_live_seconds: 0,
            max_idle_seconds: 0,
            in_memory_format: InMemoryFormat::default(),
            eviction_policy: EvictionPolicy::default(),
            eviction_max_size: i32::MAX as usize,
            eviction_sampling_count: 8,
            eviction_sampling_pool_size: 16,
        }
    }
}

impl NearCacheConfig {
    /// Name of the default configuration.
    pub const DEFAULT_NAME: &'static str = "default";

    /// Check the configuration, fatal at construction if it fails.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("name", "\"\"", "near cache name must not be empty"));
        }
        if self.eviction_policy != EvictionPolicy::None && self.eviction_max_size == 0 {
            return Err(Error::config(
                "eviction_max_size",
                self.eviction_max_size,
                "eviction max size must be positive",
            )
            .with_context("eviction_policy", self.eviction_policy));
        }
        if self.eviction_sampling_count == 0 {
            return Err(Error::config(
                "eviction_sampling_count",
                self.eviction_sampling_count,
                "eviction sampling count must be positive",
            ));
        }
        if self.eviction_sampling_pool_size == 0 {
            return Err(Error::config(
                "eviction_sampling_pool_size",
                self.eviction_sampling_pool_size,
                "eviction sampling pool size must be positive",
            ));
        }
        Ok(())
    }

    /// Time-to-live as a duration, `None` if records never expire by age.
    pub fn time_to_live(&self) -> Option<Duration> {
        (self.time_to_live_seconds > 0).then(|| Duration::from_secs(self.time_to_live_seconds))
    }

    /// Max idle time as a duration, zero if records never expire by idleness.
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }

    /// Whether this configuration applies to the near cache with the given name.
    ///
    /// A configuration name ending with `*` matches every name starting with the part before it.
    pub fn matches(&self, name: &str) -> bool {
        match self.name.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => self.name == name,
        }
    }
}

#[cfg(test)]
mod tests {
    use nearcache_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = NearCacheConfig::default();
        assert_eq!(config.name, "default");
        assert!(config.invalidate_on_change);
        assert_eq!(config.in_memory_format, InMemoryFormat::Binary);
        assert_eq!(config.eviction_policy, EvictionPolicy::None);
        assert_eq!(config.eviction_max_size, i32::MAX as usize);
        assert_eq!(config.eviction_sampling_count, 8);
        assert_eq!(config.eviction_sampling_pool_size, 16);
        assert!(config.time_to_live().is_none());
        assert!(config.max_idle().is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: NearCacheConfig = serde_json::from_str(
            r#"{
                "name": "orders",
                "in_memory_format": "OBJECT",
                "eviction_policy": "LFU",
                "time_to_live_seconds": 30
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.in_memory_format, InMemoryFormat::Object);
        assert_eq!(config.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.time_to_live(), Some(Duration::from_secs(30)));
        assert_eq!(config.eviction_sampling_count, 8);
    }

    #[test]
    fn test_reject_unknown_fields() {
        let res = serde_json::from_str::<NearCacheConfig>(r#"{ "name": "orders", "evictionPolicy": "LRU" }"#);
        assert!(res.is_err());

        let res = serde_json::from_str::<NearCacheConfig>(r#"{ "eviction_policy": "MRU" }"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_validate() {
        let config = NearCacheConfig {
            eviction_policy: EvictionPolicy::Lru,
            eviction_max_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(
            err.to_string(),
            "Config error, context: { eviction_max_size: 0, eviction_policy: LRU } => eviction max size must be positive"
        );

        // Without an eviction policy the bound is never enforced.
        let config = NearCacheConfig {
            eviction_max_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = NearCacheConfig {
            eviction_sampling_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NearCacheConfig {
            name: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_matches() {
        let exact = NearCacheConfig {
            name: "users".to_string(),
            ..Default::default()
        };
        assert!(exact.matches("users"));
        assert!(!exact.matches("users-eu"));

        let wildcard = NearCacheConfig {
            name: "users*".to_string(),
            ..Default::default()
        };
        assert!(wildcard.matches("users"));
        assert!(wildcard.matches("users-eu"));
        assert!(!wildcard.matches("orders"));
    }
}
