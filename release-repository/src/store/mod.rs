// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Key-value stores.

The descriptor cache and rendered repository files are persisted in a flat
key-value namespace. Keys are strings and values are opaque bytes. Reads return
nothing for a missing key and writes overwrite the whole value.

[MemoryStore] keeps values in process memory, [filesystem::FilesystemStore]
stores one file per key, [cloudflare::CloudflareKvStore] talks to a Cloudflare
Workers KV namespace and [s3::S3Store] uses an S3 bucket.
*/

use {
    crate::error::Result,
    async_trait::async_trait,
    std::{collections::BTreeMap, sync::Mutex},
};

#[cfg(feature = "http")]
pub mod cloudflare;
pub mod filesystem;
#[cfg(feature = "s3")]
pub mod s3;

/// A flat namespace of string keys holding byte values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Obtain the value stored under a key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value under a key, replacing any existing value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Human readable description of where values are stored.
    fn location(&self) -> String;
}

/// A [KeyValueStore] holding values in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Keys currently present.
    pub fn keys(&self) -> Vec<String> {
        self.values
            .lock()
            .expect("lock should not be poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .values
            .lock()
            .expect("lock should not be poisoned")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.values
            .lock()
            .expect("lock should not be poisoned")
            .insert(key.to_string(), value);

        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
