// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pipeline configuration.

A single [PipelineConfig] value carries everything a run needs to know: the
vendor origin, which products and files to look at, where the descriptor cache
lives and how the rendered repository is labeled. It is deserialized from YAML
by the command line tool and passed explicitly to every entry point.

Secrets are never part of the configuration. Store credentials are resolved from
the environment when the store is opened.
*/

use {
    crate::{
        cache::DEFAULT_CACHE_KEY,
        error::{RepositoryError, Result},
        store::{filesystem::FilesystemStore, KeyValueStore, MemoryStore},
    },
    serde::{Deserialize, Serialize},
    std::{path::PathBuf, sync::Arc},
};

fn default_identifier_prefixes() -> Vec<String> {
    vec![".deb".to_string()]
}

fn default_cache_key() -> String {
    DEFAULT_CACHE_KEY.to_string()
}

fn default_api_token_env() -> String {
    "CLOUDFLARE_API_TOKEN".to_string()
}

/// Location of the key-value store holding the descriptor cache.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process memory. Nothing survives the process.
    Memory,

    /// One file per key under a directory.
    Filesystem { path: PathBuf },

    /// A Cloudflare Workers KV namespace.
    CloudflareKv {
        account_id: String,
        namespace_id: String,
        /// Name of the environment variable holding the API token.
        #[serde(default = "default_api_token_env")]
        api_token_env: String,
    },

    /// An S3 bucket, optionally under a key prefix.
    S3 {
        region: String,
        bucket: String,
        #[serde(default)]
        key_prefix: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StoreConfig {
    /// Construct the store described by this configuration.
    pub fn open(&self) -> Result<Arc<dyn KeyValueStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStore::default())),
            Self::Filesystem { path } => Ok(Arc::new(FilesystemStore::new(path))),
            #[cfg(feature = "http")]
            Self::CloudflareKv {
                account_id,
                namespace_id,
                api_token_env,
            } => Ok(Arc::new(crate::store::cloudflare::CloudflareKvStore::from_env(
                account_id,
                namespace_id,
                api_token_env,
            )?)),
            #[cfg(feature = "s3")]
            Self::S3 {
                region,
                bucket,
                key_prefix,
            } => {
                let region = region.parse::<rusoto_core::Region>().map_err(|e| {
                    RepositoryError::Config(format!("invalid S3 region {}: {}", region, e))
                })?;

                Ok(Arc::new(crate::store::s3::S3Store::new(
                    region,
                    bucket,
                    key_prefix.as_deref(),
                )))
            }
            #[allow(unreachable_patterns)]
            _ => Err(RepositoryError::Config(
                "store type not supported by this build".to_string(),
            )),
        }
    }
}

/// Labels of the rendered repository.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub codename: Option<String>,
    pub component: String,
    pub description: Option<String>,
    /// Component directory under `pool/`. Defaults to `component`.
    pub pool_component: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            origin: "Vendor".to_string(),
            label: "Vendor".to_string(),
            suite: "stable".to_string(),
            codename: None,
            component: "main".to_string(),
            description: None,
            pool_component: None,
        }
    }
}

impl RepositoryConfig {
    /// The `Codename` of the distribution. Falls back to the suite.
    pub fn codename(&self) -> &str {
        self.codename.as_deref().unwrap_or(&self.suite)
    }

    /// The component directory packages are placed under in the pool.
    pub fn pool_component(&self) -> &str {
        self.pool_component.as_deref().unwrap_or(&self.component)
    }
}

/// Configuration of a descriptor pipeline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Base URL of the vendor. Every file URL must live under it.
    pub vendor_origin: String,

    /// Products whose manifests are processed by default.
    #[serde(default)]
    pub products: Vec<String>,

    /// Case insensitive prefixes of file identifiers to select.
    #[serde(default = "default_identifier_prefixes")]
    pub identifier_prefixes: Vec<String>,

    /// URLs that are never selected.
    #[serde(default)]
    pub ignored_urls: Vec<String>,

    /// Store key holding the descriptor cache.
    #[serde(default = "default_cache_key")]
    pub cache_key: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,
}

impl PipelineConfig {
    /// Construct a configuration with defaults for everything but the origin.
    pub fn new(vendor_origin: impl ToString) -> Self {
        Self {
            vendor_origin: vendor_origin.to_string(),
            products: vec![],
            identifier_prefixes: default_identifier_prefixes(),
            ignored_urls: vec![],
            cache_key: default_cache_key(),
            store: StoreConfig::default(),
            repository: RepositoryConfig::default(),
        }
    }

    /// Verify the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let origin = url::Url::parse(&self.vendor_origin).map_err(|e| {
            RepositoryError::Config(format!(
                "vendor_origin {} is not a URL: {}",
                self.vendor_origin, e
            ))
        })?;

        if !matches!(origin.scheme(), "http" | "https") {
            return Err(RepositoryError::Config(format!(
                "vendor_origin {} is not an HTTP(S) URL",
                self.vendor_origin
            )));
        }

        if self.identifier_prefixes.is_empty() {
            return Err(RepositoryError::Config(
                "identifier_prefixes must not be empty".to_string(),
            ));
        }

        if self.cache_key.is_empty() {
            return Err(RepositoryError::Config(
                "cache_key must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
