// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Coarse classification of a [RepositoryError].
///
/// Batch runs use this to decide whether an error is isolated to a single file
/// or fatal to the whole run, and to group failures in reports.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// The release manifest could not be fetched or failed validation.
    Manifest,
    /// A file could not be downloaded.
    Download,
    /// Embedded package metadata could not be extracted.
    Extraction,
    /// A computed digest disagreed with the vendor-declared digest.
    Validation,
    /// The descriptor cache could not be read.
    CacheLoad,
    /// The descriptor cache could not be written.
    CacheSave,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Manifest => "manifest",
            Self::Download => "download",
            Self::Extraction => "extraction",
            Self::Validation => "validation",
            Self::CacheLoad => "cache-load",
            Self::CacheSave => "cache-save",
            Self::Other => "other",
        })
    }
}

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0:?}")]
    Join(#[from] tokio::task::JoinError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("error fetching release manifest {0}: {1}")]
    ManifestFetch(String, Box<RepositoryError>),

    #[error("invalid release manifest {0}: {1}")]
    ManifestValidation(String, String),

    #[error("HTTP request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("HTTP transport error for {url}: {cause}")]
    HttpTransport { url: String, cause: String },

    #[error("I/O error reading {0}: {1:?}")]
    ContentIo(String, std::io::Error),

    #[error("no content received from {0}")]
    EmptyContent(String),

    #[error("archive inspection failed: {0}")]
    Extraction(String),

    #[error("unknown compression in deb archive member: {0}")]
    DebUnknownCompression(String),

    #[error("digest mismatch for {url}: expected {expected}, computed {computed}")]
    DigestMismatch {
        url: String,
        expected: String,
        computed: String,
    },

    #[error("error reading descriptor cache from key {0}: {1}")]
    CacheLoad(String, String),

    #[error("error writing descriptor cache to key {0}: {1}")]
    CacheSave(String, String),

    #[error("key-value store error on key {0}: {1}")]
    Store(String, String),

    #[error("proxy path {path} maps to both {existing} and {url}")]
    ProxyPathConflict {
        path: String,
        existing: String,
        url: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("environment variable {0} is not defined")]
    MissingEnvironmentVariable(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("{0}")]
    Other(String),
}

impl RepositoryError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ManifestFetch(..) | Self::ManifestValidation(..) => ErrorKind::Manifest,
            #[cfg(feature = "http")]
            Self::Http(_) => ErrorKind::Download,
            Self::HttpStatus { .. }
            | Self::HttpTransport { .. }
            | Self::ContentIo(..)
            | Self::EmptyContent(_) => ErrorKind::Download,
            Self::Extraction(_) | Self::DebUnknownCompression(_) => ErrorKind::Extraction,
            Self::DigestMismatch { .. } => ErrorKind::Validation,
            Self::CacheLoad(..) => ErrorKind::CacheLoad,
            Self::CacheSave(..) => ErrorKind::CacheSave,
            _ => ErrorKind::Other,
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_classification() {
        let e = RepositoryError::DigestMismatch {
            url: "https://example.com/a.deb".into(),
            expected: "aa".into(),
            computed: "bb".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(format!("{}", e).contains("expected aa, computed bb"));

        let e = RepositoryError::HttpStatus {
            url: "https://example.com/a.deb".into(),
            status: 404,
        };
        assert_eq!(e.kind(), ErrorKind::Download);

        let e = RepositoryError::ManifestFetch(
            "https://example.com/version.json".into(),
            Box::new(e),
        );
        assert_eq!(e.kind(), ErrorKind::Manifest);

        assert_eq!(
            RepositoryError::Extraction("boom".into()).kind(),
            ErrorKind::Extraction
        );
        assert_eq!(ErrorKind::CacheSave.to_string(), "cache-save");
    }
}
