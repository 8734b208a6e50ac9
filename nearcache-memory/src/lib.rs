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

//! The engine of nearcache: a bounded, client-side cache of remote values with reservation based population and
//! stale read detection.

/// The near cache and its builder.
pub mod cache;
/// Near cache configuration.
pub mod config;
/// Sampling based eviction.
pub mod eviction;
/// Registry of near caches.
pub mod manager;
/// Per partition invalidation metadata.
pub mod metadata;
/// One-shot readiness signal.
pub mod ready;
/// Cached records.
pub mod record;
/// Remote invalidation handling and periodic metadata reconciliation.
pub mod repair;
/// Stale read detection.
pub mod stale;
/// Near cache statistics.
pub mod statistics;
/// Keyed record store.
pub mod store;

mod prelude;
pub use prelude::*;
