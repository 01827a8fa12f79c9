// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! S3 backed key-value store. */

use {
    crate::{
        error::{RepositoryError, Result},
        store::KeyValueStore,
    },
    async_trait::async_trait,
    rusoto_core::{ByteStream, Client, Region, RusotoError},
    rusoto_s3::{GetObjectError, GetObjectRequest, PutObjectRequest, S3Client, S3},
    tokio::io::AsyncReadExt,
};

/// Compute the S3 key name for a store key given an optional key prefix.
pub fn prefixed_key(key_prefix: Option<&str>, key: &str) -> String {
    if let Some(prefix) = key_prefix {
        format!("{}/{}", prefix, key.trim_matches('/'))
    } else {
        key.trim_matches('/').to_string()
    }
}

/// A [KeyValueStore] storing values as objects in an S3 bucket.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    key_prefix: Option<String>,
}

impl S3Store {
    /// Create a new store bound to a named bucket with optional key prefix.
    ///
    /// This will construct a default AWS [Client].
    pub fn new(region: Region, bucket: impl ToString, key_prefix: Option<&str>) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.to_string(),
            key_prefix: key_prefix
                .map(|x| x.trim_matches('/').to_string())
                .filter(|x| !x.is_empty()),
        }
    }

    /// Create a new store with an explicit AWS [Client].
    pub fn new_with_client(
        client: Client,
        region: Region,
        bucket: impl ToString,
        key_prefix: Option<&str>,
    ) -> Self {
        Self {
            client: S3Client::new_with_client(client, region),
            bucket: bucket.to_string(),
            key_prefix: key_prefix
                .map(|x| x.trim_matches('/').to_string())
                .filter(|x| !x.is_empty()),
        }
    }

    /// Compute the S3 key name of a store key.
    pub fn path_to_key(&self, key: &str) -> String {
        prefixed_key(self.key_prefix.as_deref(), key)
    }
}

#[async_trait]
impl KeyValueStore for S3Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: self.path_to_key(key),
            ..Default::default()
        };

        match self.client.get_object(req).await {
            Ok(output) => {
                let mut data = vec![];

                if let Some(body) = output.body {
                    body.into_async_read()
                        .read_to_end(&mut data)
                        .await
                        .map_err(|e| RepositoryError::Store(key.to_string(), format!("{}", e)))?;
                }

                Ok(Some(data))
            }
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => Ok(None),
            Err(e) => Err(RepositoryError::Store(
                key.to_string(),
                format!("S3 error: {:?}", e),
            )),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let req = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: self.path_to_key(key),
            content_length: Some(value.len() as i64),
            body: Some(ByteStream::from(value)),
            ..Default::default()
        };

        self.client
            .put_object(req)
            .await
            .map_err(|e| RepositoryError::Store(key.to_string(), format!("S3 error: {:?}", e)))?;

        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key_prefix.as_deref().unwrap_or(""))
    }
}
