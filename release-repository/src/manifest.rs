// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Vendor release manifests.

A vendor publishes one JSON document per product at
`<origin>/download/<product>/linux/version.json` listing its releases and the
files belonging to each release. Manifests are fetched fresh on every run and
validated as a whole: a single bad file reference invalidates the document.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        fetch::ContentFetcher,
    },
    log::{debug, info},
    serde::{Deserialize, Serialize},
};

/// Maturity of a release.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseCategory {
    #[serde(alias = "EarlyAccess", alias = "earlyAccess", alias = "early_access")]
    EarlyAccess,
    #[serde(alias = "Alpha")]
    Alpha,
    #[serde(alias = "Beta")]
    Beta,
    #[serde(alias = "Stable")]
    Stable,
}

impl std::fmt::Display for ReleaseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::EarlyAccess => "early-access",
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Stable => "stable",
        })
    }
}

/// A reference to a single file of a release.
///
/// The URL is the identity of the file everywhere downstream.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Type tag of the file, e.g. `.deb`.
    pub identifier: String,
    /// Absolute URL of the file.
    pub url: String,
    /// Vendor-declared SHA-512 of the file content, in hex.
    #[serde(alias = "vendorSha512")]
    pub sha512: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

/// A release of a product.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub version: String,
    pub category: ReleaseCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub files: Vec<FileRef>,
}

/// A vendor release manifest.
///
/// Release order is whatever the vendor emitted. Nothing here relies on it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    #[serde(default)]
    pub releases: Vec<Release>,
}

impl ReleaseManifest {
    /// Parse a manifest from JSON without validating it.
    pub fn from_json_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Iterate over every file reference across all releases.
    pub fn iter_files(&self) -> impl Iterator<Item = (&Release, &FileRef)> {
        self.releases
            .iter()
            .flat_map(|release| release.files.iter().map(move |file| (release, file)))
    }

    /// Validate the manifest against the vendor origin it was served from.
    ///
    /// The manifest must have at least one release and every file must have a
    /// non-empty identifier, a well-formed URL rooted at `origin` and a 128
    /// character hex SHA-512.
    pub fn validate(&self, origin: &str) -> std::result::Result<(), String> {
        if self.releases.is_empty() {
            return Err("manifest contains no releases".to_string());
        }

        for (release, file) in self.iter_files() {
            if file.identifier.is_empty() {
                return Err(format!(
                    "release {} has a file with an empty identifier ({})",
                    release.version, file.url
                ));
            }

            url::Url::parse(&file.url).map_err(|e| {
                format!(
                    "release {} has malformed URL {}: {}",
                    release.version, file.url, e
                )
            })?;

            if !is_rooted_at(&file.url, origin) {
                return Err(format!(
                    "release {} has URL {} outside of vendor origin {}",
                    release.version, file.url, origin
                ));
            }

            if file.sha512.len() != 128 || !file.sha512.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!(
                    "release {} has invalid SHA-512 for {}: {}",
                    release.version, file.url, file.sha512
                ));
            }
        }

        Ok(())
    }
}

/// Whether `url` lives under `origin`.
///
/// Host boundaries are respected: `https://vendor.example.evil` is not rooted at
/// `https://vendor.example`.
pub fn is_rooted_at(url: &str, origin: &str) -> bool {
    let origin = origin.trim_end_matches('/');

    match url.strip_prefix(origin) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Resolve the URL of the manifest for a product.
pub fn manifest_url(origin: &str, product: &str) -> String {
    format!(
        "{}/download/{}/linux/version.json",
        origin.trim_end_matches('/'),
        product
    )
}

/// Fetch and validate the release manifest of a product.
///
/// Every failure, including transport errors, is reported as a manifest error.
pub async fn fetch_manifest(
    fetcher: &(impl ContentFetcher + ?Sized),
    origin: &str,
    product: &str,
) -> Result<ReleaseManifest> {
    let url = manifest_url(origin, product);
    debug!("fetching release manifest {}", url);

    let data = fetcher
        .get_url_bytes(&url)
        .await
        .map_err(|e| RepositoryError::ManifestFetch(url.clone(), Box::new(e)))?;

    let manifest = ReleaseManifest::from_json_slice(&data)
        .map_err(|e| RepositoryError::ManifestValidation(url.clone(), format!("{}", e)))?;

    manifest
        .validate(origin)
        .map_err(|msg| RepositoryError::ManifestValidation(url.clone(), msg))?;

    info!(
        "loaded manifest for {}: {} releases, {} files",
        product,
        manifest.releases.len(),
        manifest.iter_files().count()
    );

    Ok(manifest)
}
