// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Persistent descriptor cache.

The cache is a single JSON object mapping upstream URLs to [PackageDescriptor]
records, stored under one key of a [KeyValueStore]. It is read once at the start
of a run and the whole map is written back at the end.

Loading never fails the caller: a missing key or an unreadable value is treated as
an empty cache. Saving failures are propagated.

Concurrent writers are not coordinated. The last writer wins.
*/

use {
    crate::{
        descriptor::PackageDescriptor,
        error::{RepositoryError, Result},
        store::KeyValueStore,
    },
    log::{info, warn},
    std::{collections::BTreeMap, sync::Arc},
};

/// Default store key holding the descriptor cache.
pub const DEFAULT_CACHE_KEY: &str = "PACKAGE_DESCRIPTORS";

/// Descriptors keyed by upstream URL.
pub type DescriptorMap = BTreeMap<String, PackageDescriptor>;

/// A descriptor cache persisted under a single key of a [KeyValueStore].
#[derive(Clone)]
pub struct DescriptorCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl DescriptorCache {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl ToString) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    /// The store key holding the cache.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Attempt to load the cache, reporting failures.
    ///
    /// Returns `Ok(None)` if the key is absent. Entries whose key disagrees with
    /// the URL recorded in the descriptor are dropped.
    pub async fn try_load(&self) -> Result<Option<DescriptorMap>> {
        let data = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| RepositoryError::CacheLoad(self.key.clone(), format!("{}", e)))?;

        let data = match data {
            Some(data) => data,
            None => return Ok(None),
        };

        let map: DescriptorMap = serde_json::from_slice(&data)
            .map_err(|e| RepositoryError::CacheLoad(self.key.clone(), format!("{}", e)))?;

        Ok(Some(
            map.into_iter()
                .filter(|(url, descriptor)| {
                    if url == &descriptor.url {
                        true
                    } else {
                        warn!(
                            "dropping cache entry {} recorded for {}",
                            url, descriptor.url
                        );
                        false
                    }
                })
                .collect(),
        ))
    }

    /// Load the cache.
    ///
    /// Any failure degrades to an empty map and is logged.
    pub async fn load(&self) -> DescriptorMap {
        match self.try_load().await {
            Ok(Some(map)) => {
                info!(
                    "loaded {} cached descriptors from {} key {}",
                    map.len(),
                    self.store.location(),
                    self.key
                );
                map
            }
            Ok(None) => {
                info!(
                    "no descriptor cache at {} key {}; starting empty",
                    self.store.location(),
                    self.key
                );
                DescriptorMap::new()
            }
            Err(e) => {
                warn!("{}; starting from an empty cache", e);
                DescriptorMap::new()
            }
        }
    }

    /// Write the full map, replacing the stored value.
    pub async fn save(&self, descriptors: &DescriptorMap) -> Result<()> {
        let data = serde_json::to_vec_pretty(descriptors)
            .map_err(|e| RepositoryError::CacheSave(self.key.clone(), format!("{}", e)))?;

        self.store
            .put(&self.key, data)
            .await
            .map_err(|e| RepositoryError::CacheSave(self.key.clone(), format!("{}", e)))?;

        info!(
            "saved {} descriptors to {} key {}",
            descriptors.len(),
            self.store.location(),
            self.key
        );

        Ok(())
    }
}
