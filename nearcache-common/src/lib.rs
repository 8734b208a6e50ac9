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

//! Shared components for nearcache.

/// Assertion helpers.
pub mod assert;
/// Key and value traits, and the codec used by the binary in-memory format.
pub mod code;
/// Error type shared by all nearcache crates.
pub mod error;
/// Event listener for records leaving the near cache.
pub mod event;
