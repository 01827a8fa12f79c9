// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Cloudflare Workers KV store.

Values are read and written through the Cloudflare REST API at
`accounts/{account}/storage/kv/namespaces/{namespace}/values/{key}` using a bearer
API token.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        store::KeyValueStore,
    },
    async_trait::async_trait,
    log::debug,
    reqwest::{Client, StatusCode},
    url::Url,
};

/// Default base URL of the Cloudflare API.
pub const CLOUDFLARE_API_URL: &str = "https://api.cloudflare.com/client/v4";

/// A [KeyValueStore] backed by a Cloudflare Workers KV namespace.
pub struct CloudflareKvStore {
    client: Client,
    api_url: Url,
    account_id: String,
    namespace_id: String,
    api_token: String,
}

impl std::fmt::Debug for CloudflareKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareKvStore")
            .field("api_url", &self.api_url.as_str())
            .field("account_id", &self.account_id)
            .field("namespace_id", &self.namespace_id)
            .finish_non_exhaustive()
    }
}

impl CloudflareKvStore {
    /// Construct an instance talking to the public Cloudflare API.
    pub fn new(
        account_id: impl ToString,
        namespace_id: impl ToString,
        api_token: impl ToString,
    ) -> Result<Self> {
        Self::new_with_api_url(CLOUDFLARE_API_URL, account_id, namespace_id, api_token)
    }

    /// Construct an instance using a custom API base URL.
    pub fn new_with_api_url(
        api_url: &str,
        account_id: impl ToString,
        namespace_id: impl ToString,
        api_token: impl ToString,
    ) -> Result<Self> {
        Ok(Self {
            client: crate::http::default_client()?,
            api_url: Url::parse(api_url)?,
            account_id: account_id.to_string(),
            namespace_id: namespace_id.to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Construct an instance reading the API token from an environment variable.
    pub fn from_env(
        account_id: impl ToString,
        namespace_id: impl ToString,
        token_env: &str,
    ) -> Result<Self> {
        let token = std::env::var(token_env)
            .map_err(|_| RepositoryError::MissingEnvironmentVariable(token_env.to_string()))?;

        Self::new(account_id, namespace_id, token)
    }

    /// Resolve the API URL of the value stored under a key.
    ///
    /// The key is percent-encoded as a single path segment.
    pub fn value_url(&self, key: &str) -> Result<Url> {
        let mut url = self.api_url.clone();

        url.path_segments_mut()
            .map_err(|_| RepositoryError::Config(format!("invalid API URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend([
                "accounts",
                self.account_id.as_str(),
                "storage",
                "kv",
                "namespaces",
                self.namespace_id.as_str(),
                "values",
                key,
            ]);

        Ok(url)
    }
}

#[async_trait]
impl KeyValueStore for CloudflareKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.value_url(key)?;
        debug!("GET {}", url);

        let res = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| RepositoryError::Store(key.to_string(), format!("{:?}", e)))?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = res
                    .bytes()
                    .await
                    .map_err(|e| RepositoryError::Store(key.to_string(), format!("{:?}", e)))?;

                Ok(Some(body.to_vec()))
            }
            status => Err(RepositoryError::Store(
                key.to_string(),
                format!("HTTP status {}", status),
            )),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let url = self.value_url(key)?;
        debug!("PUT {} ({} bytes)", url, value.len());

        let res = self
            .client
            .put(url)
            .bearer_auth(&self.api_token)
            .body(value)
            .send()
            .await
            .map_err(|e| RepositoryError::Store(key.to_string(), format!("{:?}", e)))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(RepositoryError::Store(
                key.to_string(),
                format!("HTTP status {}", res.status()),
            ))
        }
    }

    fn location(&self) -> String {
        format!("cloudflare-kv:{}/{}", self.account_id, self.namespace_id)
    }
}
