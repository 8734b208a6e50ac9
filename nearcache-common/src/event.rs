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

/// Reason of a record leaving the near cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Evicted to make room on insertion.
    Evict,
    /// Dropped after its time-to-live or max idle time passed.
    Expire,
    /// Dropped because the stale read detector no longer trusts it.
    Stale,
    /// Invalidated explicitly or by a remote invalidation event.
    Invalidate,
    /// Removed by a cache clear.
    Clear,
}

/// Trait for the customized event listener.
pub trait EventListener: Send + Sync + 'static {
    /// Associated key type.
    type Key;

    /// Called when a record leaves the near cache with the reason.
    ///
    /// The listener is called outside of the store lock.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &Self::Key) {}
}
