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

//! A client-side near cache.
//!
//! The near cache keeps recently read values of a remote key-value store in local memory. It is bounded by a
//! sampling based eviction policy, honors time-to-live and max idle expiry, lets concurrent populators coordinate
//! through reservations, and drops records that remote invalidations proved stale.
//!
//! ```rust
//! use nearcache::{InMemoryFormat, NearCacheBuilder, EvictionPolicy};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> nearcache::Result<()> {
//! let cache = NearCacheBuilder::<String, String>::new("users")
//!     .with_in_memory_format(InMemoryFormat::Object)
//!     .with_eviction_policy(EvictionPolicy::Lru)
//!     .with_eviction_max_size(1024)
//!     .build()?;
//! cache.set_ready(Ok(()));
//!
//! let value = cache
//!     .get_or_fetch("alice".to_string(), || async move { Ok(Some("remote value".to_string())) })
//!     .await?;
//! assert_eq!(value.as_deref(), Some("remote value"));
//! assert_eq!(cache.statistics().miss_count, 1);
//! # Ok(())
//! # }
//! ```

use nearcache_common as common;
use nearcache_memory as memory;

mod prelude;
pub use prelude::*;
