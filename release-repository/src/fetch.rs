// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generic content fetching.

[ContentFetcher] abstracts how bytes behind an absolute URL are obtained. Release
manifests and upstream package files are both retrieved through it, which allows
the whole pipeline to run against [StaticFetcher] in tests.
*/

use {
    crate::error::{RepositoryError, Result},
    async_trait::async_trait,
    futures::{AsyncRead, AsyncReadExt},
    std::{
        collections::HashMap,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    },
};

/// Generic mechanism for obtaining content at a given URL.
///
/// Implementations only need to implement `get_url()`.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Get the content of an absolute URL as an async reader.
    ///
    /// Errors must be reported as [RepositoryError::HttpStatus] when the remote end
    /// answered with a non-success status and [RepositoryError::HttpTransport] when
    /// the request could not be performed.
    async fn get_url(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Fetch the full content of a URL into memory.
    async fn get_url_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut reader = self.get_url(url).await?;

        let mut data = vec![];
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| RepositoryError::ContentIo(url.to_string(), e))?;

        Ok(data)
    }
}

/// A [ContentFetcher] serving content registered in memory.
///
/// Requests for unknown URLs fail with a 404 [RepositoryError::HttpStatus]. Every
/// request is counted, which lets callers assert how much network traffic an
/// operation would have caused.
#[derive(Default)]
pub struct StaticFetcher {
    content: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    request_count: AtomicUsize,
}

impl StaticFetcher {
    /// Register content for a URL, replacing any existing registration.
    pub fn insert(&self, url: impl ToString, data: impl Into<Vec<u8>>) {
        self.content
            .lock()
            .expect("lock should not be poisoned")
            .insert(url.to_string(), data.into());
    }

    /// Total number of requests issued against this instance.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Number of requests issued for a specific URL.
    pub fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .iter()
            .filter(|x| x.as_str() == url)
            .count()
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn get_url(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .push(url.to_string());

        let data = self
            .content
            .lock()
            .expect("lock should not be poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| RepositoryError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })?;

        Ok(Box::pin(futures::io::Cursor::new(data)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn static_fetcher() -> Result<()> {
        let fetcher = StaticFetcher::default();
        fetcher.insert("https://example.com/a", b"hello".to_vec());

        assert_eq!(fetcher.get_url_bytes("https://example.com/a").await?, b"hello");
        assert!(matches!(
            fetcher.get_url_bytes("https://example.com/b").await,
            Err(RepositoryError::HttpStatus { status: 404, .. })
        ));

        assert_eq!(fetcher.request_count(), 2);
        assert_eq!(fetcher.requests_for("https://example.com/a"), 1);

        Ok(())
    }
}
