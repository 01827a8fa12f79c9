// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package descriptors.

A [PackageDescriptor] is the validated, enriched record for one upstream file:
its digests, its size and the metadata embedded in its control paragraph. It is
keyed by the upstream URL everywhere.

[build_descriptor()] is the only place vendor-declared and computed integrity data
are reconciled.
*/

use {
    crate::{
        download::{compute_digests, FileDigests},
        error::{RepositoryError, Result},
        fetch::ContentFetcher,
        inspect::{extract_control_fields, ArchiveInspector, ControlFields},
        manifest::FileRef,
    },
    chrono::{DateTime, Utc},
    log::{debug, warn},
    serde::{Deserialize, Serialize},
};

/// Filename used when none can be derived from a URL.
pub const UNKNOWN_FILENAME: &str = "unknown";

/// Derive a filename from the final path segment of a URL.
///
/// Returns [UNKNOWN_FILENAME] if the URL cannot be parsed or has no final segment.
pub fn filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(|s| s.to_string()))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_FILENAME.to_string())
}

/// The validated description of an upstream package file.
///
/// Instances are immutable once built. Optional fields are omitted from the
/// serialized form when absent.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDescriptor {
    pub url: String,
    pub filename: String,
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggests: Option<String>,
    pub size: u64,
    pub md5: String,
    pub sha256: String,
    pub sha512: String,
    pub last_verified: DateTime<Utc>,
}

impl PackageDescriptor {
    /// Assemble a descriptor from its constituent parts.
    pub fn new(
        url: impl ToString,
        fields: ControlFields,
        digests: &FileDigests,
        last_verified: DateTime<Utc>,
    ) -> Self {
        let url = url.to_string();

        Self {
            filename: filename_from_url(&url),
            url,
            package: fields.package,
            version: fields.version,
            architecture: fields.architecture,
            maintainer: fields.maintainer,
            description: fields.description,
            section: fields.section,
            priority: fields.priority,
            homepage: fields.homepage,
            depends: fields.depends,
            recommends: fields.recommends,
            suggests: fields.suggests,
            size: digests.size,
            md5: digests.md5.clone(),
            sha256: digests.sha256.clone(),
            sha512: digests.sha512.clone(),
            last_verified,
        }
    }
}

/// Compare a computed SHA-512 against the vendor-declared value.
pub fn verify_sha512(url: &str, expected: &str, computed: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(computed) {
        Ok(())
    } else {
        Err(RepositoryError::DigestMismatch {
            url: url.to_string(),
            expected: expected.to_lowercase(),
            computed: computed.to_lowercase(),
        })
    }
}

/// Build a [PackageDescriptor] for an upstream file.
///
/// The file is downloaded once. The bytes feed the digesters and are retained for
/// archive inspection. The computed SHA-512 must equal the vendor-declared one or
/// [RepositoryError::DigestMismatch] is returned and no descriptor is produced.
pub async fn build_descriptor(
    fetcher: &(impl ContentFetcher + ?Sized),
    inspector: &(impl ArchiveInspector + ?Sized),
    file: &FileRef,
) -> Result<PackageDescriptor> {
    debug!("computing descriptor for {}", file.url);

    let mut digests = compute_digests(fetcher, &file.url, true).await?;

    if let Err(e) = verify_sha512(&file.url, &file.sha512, &digests.sha512) {
        warn!("{}", e);
        return Err(e);
    }

    let data = digests
        .data
        .take()
        .ok_or_else(|| RepositoryError::Other("downloaded content not captured".to_string()))?;

    let fields = extract_control_fields(inspector, data).await?;

    Ok(PackageDescriptor::new(&file.url, fields, &digests, Utc::now()))
}
