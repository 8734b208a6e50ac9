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

use std::hash::Hash;

use equivalent::Equivalent;
use hashbrown::HashMap;

use crate::record::Record;

/// Keyed map from key to [`Record`].
///
/// The store itself is not synchronized, the owning near cache guards it with its lock. Keys are matched by their
/// logical hash and equality.
pub struct RecordStore<K, V> {
    records: HashMap<K, Record<K, V>>,
}

impl<K, V> Default for RecordStore<K, V> {
    fn default() -> Self {
        Self {
            records: HashMap::default(),
        }
    }
}

impl<K, V> RecordStore<K, V>
where
    K: Hash + Eq,
{
    /// Lookup the record by key.
    pub fn get<Q>(&self, key: &Q) -> Option<&Record<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.records.get(key)
    }

    /// Lookup the mutable record by key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut Record<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.records.get_mut(key)
    }

    /// Whether the key has a record.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.records.contains_key(key)
    }

    /// Insert or replace the record of the key, returning the replaced one.
    pub fn set(&mut self, key: K, record: Record<K, V>) -> Option<Record<K, V>> {
        self.records.insert(key, record)
    }

    /// Remove the record of the key and return it.
    pub fn take<Q>(&mut self, key: &Q) -> Option<Record<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.records.remove(key)
    }

    /// Remove the record of the key. Returns `true` if a record was removed.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.take(key).is_some()
    }

    /// Iterate over all records.
    pub fn values(&self) -> impl Iterator<Item = &Record<K, V>> {
        self.records.values()
    }

    /// Iterate over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.records.keys()
    }

    /// Iterate over all key and record pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&K, &Record<K, V>)> {
        self.records.iter()
    }

    /// Remove all records and return them.
    pub fn clear(&mut self) -> Vec<Record<K, V>> {
        self.records.drain().map(|(_, record)| record).collect()
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
