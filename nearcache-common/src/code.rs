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

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

/// Key trait for the near cache.
///
/// Keys are compared by their logical hash and equality, never by identity, so the same logical key rebuilt on the
/// other side of a (de)serialization boundary finds the same record.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + Debug> Key for T {}

/// Value trait for the near cache.
///
/// Values are handed out to callers as copies, the cache never lends out references into its store.
pub trait Value: Send + Sync + 'static + Clone {}
impl<T: Send + Sync + 'static + Clone> Value for T {}

/// Coding error.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    /// Bincode serialization or deserialization failed.
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    /// The codec does not support this kind of value.
    #[error("unsupported value type: {0}")]
    Unsupported(&'static str),
    /// Other coding error raised by a user supplied codec.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coding result.
pub type CodeResult<T> = std::result::Result<T, CodeError>;

/// The serialization service used to materialize values in the binary in-memory format.
///
/// `encode` turns a caller supplied value into its storage representation, `decode` turns the storage representation
/// back into a value for the caller.
pub trait Codec<V>: Send + Sync + 'static {
    /// Encode the value into bytes.
    fn encode(&self, value: &V) -> CodeResult<Bytes>;

    /// Decode a value from bytes.
    fn decode(&self, buf: &[u8]) -> CodeResult<V>;
}

/// [`Codec`] backed by serde and bincode.
pub struct BincodeCodec<V>(PhantomData<fn() -> V>);

impl<V> Debug for BincodeCodec<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BincodeCodec").finish()
    }
}

impl<V> Default for BincodeCodec<V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<V> Clone for BincodeCodec<V> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<V> Codec<V> for BincodeCodec<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &V) -> CodeResult<Bytes> {
        let buf = bincode::serialize(value)?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, buf: &[u8]) -> CodeResult<V> {
        Ok(bincode::deserialize(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u64,
        tags: Vec<String>,
    }

    #[test]
    fn test_bincode_codec_materializes_a_copy() {
        let codec = BincodeCodec::<Profile>::default();
        let profile = Profile {
            name: "alice".to_string(),
            visits: 42,
            tags: vec!["admin".to_string()],
        };

        let bytes = codec.encode(&profile).unwrap();
        assert!(!bytes.is_empty());

        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn test_bincode_codec_rejects_truncated_input() {
        let codec = BincodeCodec::<Profile>::default();
        let bytes = codec
            .encode(&Profile {
                name: "bob".to_string(),
                visits: 1,
                tags: vec![],
            })
            .unwrap();

        let res = codec.decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(res, Err(CodeError::Bincode(_))));
    }
}
