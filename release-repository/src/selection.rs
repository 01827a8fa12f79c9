// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release enumeration and latest-wins selection.

[select_candidates()] reduces a manifest to the file references worth describing.
[select_latest_per_package()] reduces a set of descriptors to the single newest
version of each package and architecture, which is what repository indices
advertise.
*/

use {
    crate::{descriptor::PackageDescriptor, manifest::FileRef, manifest::ReleaseManifest},
    log::warn,
    std::{
        cmp::Ordering,
        collections::{BTreeMap, HashSet},
        str::FromStr,
    },
};

/// Select file references whose identifier starts with an allowed prefix.
///
/// Prefix matching is case insensitive. URLs in `ignored_urls` are never selected.
/// Duplicate URLs across releases are only returned once.
pub fn select_candidates(
    manifest: &ReleaseManifest,
    identifier_prefixes: &[String],
    ignored_urls: &[String],
) -> Vec<FileRef> {
    let prefixes = identifier_prefixes
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<Vec<_>>();
    let ignored = ignored_urls.iter().map(|u| u.as_str()).collect::<HashSet<_>>();

    let mut seen = HashSet::new();

    manifest
        .iter_files()
        .filter_map(|(_, file)| {
            let identifier = file.identifier.to_lowercase();

            if !prefixes.iter().any(|p| identifier.starts_with(p)) {
                return None;
            }
            if ignored.contains(file.url.as_str()) {
                return None;
            }
            if !seen.insert(file.url.clone()) {
                return None;
            }

            Some(file.clone())
        })
        .collect()
}

/// A version consisting of dot-separated non-negative integers.
///
/// Comparison is numeric and component-wise. Missing trailing components compare
/// as `0`, so `1.2` and `1.2.0` are equal.
#[derive(Clone, Debug)]
pub struct DottedVersion {
    components: Vec<u64>,
}

impl DottedVersion {
    /// The numeric components of this version.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for DottedVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty version string".to_string());
        }

        let components = s
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                    Err(format!("'{}' is not a dotted-integer version", s))
                } else {
                    u64::from_str(part).map_err(|e| format!("'{}': {}", s, e))
                }
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { components })
    }
}

impl std::fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        f.write_str(&parts.join("."))
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());

        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

/// Grouping key of the latest-wins reduction.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageKey {
    pub name: String,
    pub architecture: String,
}

/// Reduce descriptors to the newest version of every package and architecture.
///
/// A candidate replaces the current winner only if its version is strictly
/// greater, so the first descriptor encountered wins a tie. Descriptors with an
/// empty package name, an empty architecture or a version that isn't a
/// dotted-integer sequence are skipped with a warning.
pub fn select_latest_per_package<'a>(
    descriptors: impl IntoIterator<Item = &'a PackageDescriptor>,
) -> BTreeMap<PackageKey, (DottedVersion, &'a PackageDescriptor)> {
    let mut selected: BTreeMap<PackageKey, (DottedVersion, &'a PackageDescriptor)> =
        BTreeMap::new();

    for descriptor in descriptors {
        if descriptor.package.is_empty() {
            warn!("skipping {}: no package name", descriptor.url);
            continue;
        }
        if descriptor.architecture.is_empty() {
            warn!("skipping {}: no architecture", descriptor.url);
            continue;
        }

        let version = match DottedVersion::from_str(&descriptor.version) {
            Ok(v) => v,
            Err(e) => {
                warn!("skipping {}: {}", descriptor.url, e);
                continue;
            }
        };

        let key = PackageKey {
            name: descriptor.package.clone(),
            architecture: descriptor.architecture.clone(),
        };

        match selected.get(&key) {
            Some((current, _)) if &version <= current => {}
            _ => {
                selected.insert(key, (version, descriptor));
            }
        }
    }

    selected
}
