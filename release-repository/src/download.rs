// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Streaming download and digesting of upstream files.

A file is read from the network exactly once. Every chunk is fed into the
digesters and, when the caller also needs to inspect the archive, appended to an
in-memory buffer so the bytes can be handed to an archive inspector without a
second download.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        fetch::ContentFetcher,
        io::DigestingReader,
    },
    bytes::Bytes,
    futures::AsyncReadExt,
};

const READ_BUFFER_SIZE: usize = 65536;

/// Digests and size of a downloaded file.
#[derive(Clone, Debug)]
pub struct FileDigests {
    /// Lower-case hex MD5.
    pub md5: String,
    /// Lower-case hex SHA-256.
    pub sha256: String,
    /// Lower-case hex SHA-512.
    pub sha512: String,
    /// Number of bytes read.
    pub size: u64,
    /// The raw content, if it was requested.
    pub data: Option<Bytes>,
}

/// Download a URL and compute its digests.
///
/// When `capture` is true the full content is retained in [FileDigests::data].
///
/// An empty response body is an error: a published file always has content.
pub async fn compute_digests(
    fetcher: &(impl ContentFetcher + ?Sized),
    url: &str,
    capture: bool,
) -> Result<FileDigests> {
    let reader = fetcher.get_url(url).await?;
    let mut reader = DigestingReader::new(reader);

    let mut captured = vec![];
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let size = reader
            .read(&mut buf[..])
            .await
            .map_err(|e| RepositoryError::ContentIo(url.to_string(), e))?;

        if size == 0 {
            break;
        }

        if capture {
            captured.extend_from_slice(&buf[0..size]);
        }
    }

    let (_, size, digests) = reader.finish();

    if size == 0 {
        return Err(RepositoryError::EmptyContent(url.to_string()));
    }

    Ok(FileDigests {
        md5: digests.md5.digest_hex(),
        sha256: digests.sha256.digest_hex(),
        sha512: digests.sha512.digest_hex(),
        size,
        data: if capture {
            Some(Bytes::from(captured))
        } else {
            None
        },
    })
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::ErrorKind, fetch::StaticFetcher, io::digest_data},
    };

    const URL: &str = "https://vendor.example/app_1.0.0_amd64.deb";

    #[tokio::test]
    async fn digests_match_reference() -> Result<()> {
        let data = (0..300_000u32).map(|x| (x % 13) as u8).collect::<Vec<_>>();
        let fetcher = StaticFetcher::default();
        fetcher.insert(URL, data.clone());

        let reference = digest_data(&data);

        let digests = compute_digests(&fetcher, URL, false).await?;
        assert_eq!(digests.size, data.len() as u64);
        assert_eq!(digests.sha512, reference.sha512.digest_hex());
        assert_eq!(digests.sha256, reference.sha256.digest_hex());
        assert_eq!(digests.md5, reference.md5.digest_hex());
        assert!(digests.data.is_none());

        let digests = compute_digests(&fetcher, URL, true).await?;
        assert_eq!(digests.data.as_deref(), Some(data.as_slice()));
        assert_eq!(fetcher.requests_for(URL), 2);

        Ok(())
    }

    #[tokio::test]
    async fn missing_and_empty() {
        let fetcher = StaticFetcher::default();
        fetcher.insert(URL, vec![]);

        let err = compute_digests(&fetcher, URL, false).await.unwrap_err();
        assert!(matches!(err, RepositoryError::EmptyContent(_)));
        assert_eq!(err.kind(), ErrorKind::Download);

        let err = compute_digests(&fetcher, "https://vendor.example/missing.deb", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::HttpStatus { status: 404, .. }));
    }
}
