// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP content fetching.

This module provides a [ContentFetcher] backed by `reqwest`. Response bodies are
streamed rather than buffered so callers can digest content as it arrives.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        fetch::ContentFetcher,
    },
    async_trait::async_trait,
    futures::{stream::TryStreamExt, AsyncRead},
    log::debug,
    reqwest::Client,
    std::{pin::Pin, time::Duration},
};

/// How long establishing a connection may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a whole request, body included, may take.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Construct a [Client] with the default timeouts.
pub fn default_client() -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()?)
}

/// Issue a GET request and obtain the response body as a stream.
///
/// Non-success status codes are turned into [RepositoryError::HttpStatus].
pub(crate) async fn fetch_url(
    client: &Client,
    url: &str,
) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
    debug!("GET {}", url);

    let res = client
        .get(url)
        .send()
        .await
        .map_err(|e| RepositoryError::HttpTransport {
            url: url.to_string(),
            cause: format!("error sending HTTP request: {:?}", e),
        })?;

    let status = res.status();
    if !status.is_success() {
        return Err(RepositoryError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    std::io::ErrorKind::TimedOut
                } else {
                    std::io::ErrorKind::Other
                };
                std::io::Error::new(kind, format!("{:?}", e))
            })
            .into_async_read(),
    ))
}

/// Fetches content over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Construct an instance using a client with the default timeouts.
    pub fn new() -> Result<Self> {
        Ok(Self::new_client(default_client()?))
    }

    /// Construct an instance using the given [Client].
    pub fn new_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn get_url(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        fetch_url(&self.client, url).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_download_failure() -> Result<()> {
        let fetcher = HttpFetcher::new()?;

        let err = match fetcher.get_url("http://127.0.0.1:9/app.deb").await {
            Ok(_) => panic!("request to a closed port should fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), crate::error::ErrorKind::Download);

        Ok(())
    }
}
