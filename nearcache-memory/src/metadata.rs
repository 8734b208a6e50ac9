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

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::stale::{MetadataSource, PartitionMetadata};

/// Invalidation metadata of a single partition as observed by this client.
#[derive(Debug, Default)]
pub struct MetadataContainer {
    sequence: AtomicI64,
    stale_sequence: AtomicI64,
    missed_sequence_count: AtomicI64,
    uuid: Mutex<Option<Uuid>>,
}

impl MetadataContainer {
    /// Latest invalidation sequence observed.
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Set the latest invalidation sequence.
    pub fn set_sequence(&self, sequence: i64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    /// Raise the sequence to `sequence` if it is greater, returning the previous one.
    pub fn raise_sequence(&self, sequence: i64) -> i64 {
        self.sequence.fetch_max(sequence, Ordering::AcqRel)
    }

    /// Records stamped with a sequence below this are stale.
    pub fn stale_sequence(&self) -> i64 {
        self.stale_sequence.load(Ordering::Acquire)
    }

    /// Raise the stale sequence to `sequence` if it is greater.
    pub fn raise_stale_sequence(&self, sequence: i64) {
        self.stale_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Count of invalidation sequences known to be missed.
    pub fn missed_sequence_count(&self) -> i64 {
        self.missed_sequence_count.load(Ordering::Acquire)
    }

    /// Add to the missed sequence count.
    pub fn increase_missed_sequence_count(&self, count: i64) {
        self.missed_sequence_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Reset the missed sequence count, returning the previous one.
    pub fn take_missed_sequence_count(&self) -> i64 {
        self.missed_sequence_count.swap(0, Ordering::AcqRel)
    }

    /// Uuid of the partition owner.
    pub fn uuid(&self) -> Option<Uuid> {
        *self.uuid.lock()
    }

    /// Set the uuid of the partition owner.
    pub fn set_uuid(&self, uuid: Uuid) {
        *self.uuid.lock() = Some(uuid);
    }

    /// Switch to a new partition owner, dropping all sequence state of the previous one.
    ///
    /// Returns `false` if `uuid` already is the owner.
    pub fn repair_uuid(&self, uuid: Uuid) -> bool {
        let mut current = self.uuid.lock();
        if *current == Some(uuid) {
            return false;
        }
        *current = Some(uuid);
        self.reset();
        true
    }

    /// Reset all sequences and the missed count.
    pub fn reset(&self) {
        self.sequence.store(0, Ordering::Release);
        self.stale_sequence.store(0, Ordering::Release);
        self.missed_sequence_count.store(0, Ordering::Release);
    }

    /// Snapshot of the container.
    pub fn snapshot(&self) -> PartitionMetadata {
        PartitionMetadata {
            uuid: self.uuid(),
            sequence: self.sequence(),
            stale_sequence: self.stale_sequence(),
        }
    }
}

/// Invalidation metadata of all partitions of one near cache.
#[derive(Debug)]
pub struct MetadataTable {
    containers: Vec<MetadataContainer>,
}

impl MetadataTable {
    /// Create a table with a container per partition.
    pub fn new(partition_count: u32) -> Self {
        Self {
            containers: (0..partition_count).map(|_| MetadataContainer::default()).collect(),
        }
    }

    /// Count of partitions.
    pub fn partition_count(&self) -> u32 {
        self.containers.len() as u32
    }

    /// Get the container of the partition.
    pub fn container(&self, partition_id: u32) -> Option<&MetadataContainer> {
        self.containers.get(partition_id as usize)
    }

    /// Iterate over the containers with their partition id.
    pub fn containers(&self) -> impl Iterator<Item = (u32, &MetadataContainer)> {
        self.containers.iter().enumerate().map(|(id, container)| (id as u32, container))
    }

    /// Advance the sequence of the partition to `next`, accounting for the sequences skipped on the way.
    ///
    /// Sequences that are not newer than the current one are ignored. A gap of `n` sequences between an invalidation
    /// event and the current sequence counts as `n - 1` missed events. A sequence learned from the periodic metadata
    /// fetch has no event of its own, so the whole gap counts as missed.
    pub fn check_or_repair_sequence(&self, partition_id: u32, next: i64, via_anti_entropy: bool) {
        let Some(container) = self.container(partition_id) else {
            tracing::warn!("[metadata]: unknown partition {partition_id}");
            return;
        };
        let current = container.raise_sequence(next);
        if current >= next {
            return;
        }
        let missed = if via_anti_entropy {
            next - current
        } else {
            next - current - 1
        };
        if missed > 0 {
            tracing::trace!("[metadata]: partition {partition_id} missed {missed} sequences ({current} => {next})");
            container.increase_missed_sequence_count(missed);
        }
    }

    /// Record the owner of the partition, resetting the partition if the owner changed.
    ///
    /// Returns `true` if the partition has been reset.
    pub fn check_or_repair_uuid(&self, partition_id: u32, uuid: Uuid) -> bool {
        let Some(container) = self.container(partition_id) else {
            tracing::warn!("[metadata]: unknown partition {partition_id}");
            return false;
        };
        let repaired = container.repair_uuid(uuid);
        if repaired {
            tracing::debug!("[metadata]: partition {partition_id} owner changed to {uuid}");
        }
        repaired
    }

    /// Initialize the sequence of the partition.
    pub fn init_sequence(&self, partition_id: u32, sequence: i64) {
        if let Some(container) = self.container(partition_id) {
            container.set_sequence(sequence);
        }
    }

    /// Initialize the owner of the partition.
    pub fn init_uuid(&self, partition_id: u32, uuid: Uuid) {
        if let Some(container) = self.container(partition_id) {
            container.set_uuid(uuid);
        }
    }

    /// Sum of the missed sequence counts of all partitions.
    pub fn missed_sequence_count(&self) -> i64 {
        self.containers.iter().map(|c| c.missed_sequence_count()).sum()
    }

    /// For every partition that missed sequences, forget the missed count and declare every record stamped before
    /// the latest known sequence stale.
    pub fn update_last_known_stale_sequences(&self) {
        for container in self.containers.iter() {
            if container.take_missed_sequence_count() != 0 {
                container.raise_stale_sequence(container.sequence());
            }
        }
    }
}

impl MetadataSource for MetadataTable {
    fn metadata(&self, partition_id: u32) -> PartitionMetadata {
        self.container(partition_id)
            .map(|container| container.snapshot())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_gap_accounting() {
        let table = MetadataTable::new(4);

        table.check_or_repair_sequence(1, 1, false);
        assert_eq!(table.container(1).unwrap().sequence(), 1);
        assert_eq!(table.missed_sequence_count(), 0);

        // 2, 3 and 4 are missed.
        table.check_or_repair_sequence(1, 5, false);
        assert_eq!(table.container(1).unwrap().sequence(), 5);
        assert_eq!(table.container(1).unwrap().missed_sequence_count(), 3);

        // Old sequences never move backwards.
        table.check_or_repair_sequence(1, 3, false);
        assert_eq!(table.container(1).unwrap().sequence(), 5);
        assert_eq!(table.missed_sequence_count(), 3);

        // Anti-entropy counts the whole gap.
        table.check_or_repair_sequence(2, 2, true);
        assert_eq!(table.container(2).unwrap().missed_sequence_count(), 2);
        assert_eq!(table.missed_sequence_count(), 5);

        // Unknown partitions are ignored.
        table.check_or_repair_sequence(9, 2, false);
        assert_eq!(table.missed_sequence_count(), 5);
    }

    #[test]
    fn test_uuid_change_resets_partition() {
        let table = MetadataTable::new(2);
        let first = Uuid::new_v4();

        assert!(table.check_or_repair_uuid(0, first));
        table.check_or_repair_sequence(0, 10, false);
        assert_eq!(table.metadata(0).sequence, 10);

        // Same owner keeps the state.
        assert!(!table.check_or_repair_uuid(0, first));
        assert_eq!(table.metadata(0).sequence, 10);
        assert_eq!(table.container(0).unwrap().missed_sequence_count(), 9);

        let second = Uuid::new_v4();
        assert!(table.check_or_repair_uuid(0, second));
        let metadata = table.metadata(0);
        assert_eq!(metadata.uuid, Some(second));
        assert_eq!(metadata.sequence, 0);
        assert_eq!(metadata.stale_sequence, 0);
        assert_eq!(table.missed_sequence_count(), 0);
    }

    #[test]
    fn test_update_last_known_stale_sequences() {
        let table = MetadataTable::new(3);
        table.check_or_repair_sequence(0, 4, false);
        table.check_or_repair_sequence(1, 1, false);
        table.check_or_repair_sequence(1, 2, false);

        table.update_last_known_stale_sequences();

        // Only the partition with missed sequences gets a new stale sequence.
        assert_eq!(table.metadata(0).stale_sequence, 4);
        assert_eq!(table.metadata(1).stale_sequence, 0);
        assert_eq!(table.missed_sequence_count(), 0);
    }

    #[test]
    fn test_metadata_of_unknown_partition() {
        let table = MetadataTable::new(1);
        assert_eq!(table.partition_count(), 1);
        assert_eq!(table.metadata(5), PartitionMetadata::default());
        assert_eq!(table.containers().count(), 1);
    }
}
