// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT repository metadata rendering.

Descriptors are reduced to the newest version of each package and architecture
and turned into `Packages` indices (plain and gzip compressed) plus a `Release`
file referencing them.

Package files are never mirrored. Each package is advertised under a proxy path
in the pool which a serving layer resolves to the upstream URL through
[ProxyPathIndex]. Proxy paths only depend on descriptor fields, so they stay
stable when upstream URLs gain or lose query parameters.
*/

pub mod packages;
pub mod release;

pub use {
    packages::{packages_paragraph, render_packages},
    release::{ReleaseBuilder, DATE_FORMAT},
};

use {
    crate::{
        config::RepositoryConfig,
        descriptor::PackageDescriptor,
        error::{RepositoryError, Result},
        selection::select_latest_per_package,
    },
    chrono::{DateTime, Utc},
    log::debug,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, io::Write},
};

/// Architecture of packages installable on every architecture.
pub const ARCHITECTURE_ALL: &str = "all";

/// Describes the layout of the `pool` part of the repository.
#[derive(Clone, Copy, Debug)]
pub enum PoolLayout {
    /// File paths are `pool/<component>/<name_prefix>/<package>/<filename>`.
    ///
    /// This is the layout used by the Debian distribution. Packages beginning with
    /// `lib` use the first 4 characters as prefix. Everything else uses the first
    /// character.
    ComponentThenNamePrefix,
}

impl Default for PoolLayout {
    fn default() -> Self {
        Self::ComponentThenNamePrefix
    }
}

impl PoolLayout {
    /// Compute the path to a file given its package name and filename.
    pub fn path(&self, component: &str, package: &str, filename: &str) -> String {
        match self {
            Self::ComponentThenNamePrefix => {
                let prefix_len = if package.starts_with("lib") && package.chars().count() > 3 {
                    4
                } else {
                    1
                };
                let prefix = package.chars().take(prefix_len).collect::<String>();

                format!("pool/{}/{}/{}/{}", component, prefix, package, filename)
            }
        }
    }
}

/// Maps pool proxy paths to upstream download URLs.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProxyPathIndex {
    paths: BTreeMap<String, String>,
}

impl ProxyPathIndex {
    /// Register the proxy path of an upstream URL.
    ///
    /// Registering the same path again is only allowed for the same URL.
    pub fn insert(&mut self, path: impl ToString, url: impl ToString) -> Result<()> {
        let path = path.to_string();
        let url = url.to_string();

        match self.paths.get(&path) {
            Some(existing) if existing != &url => Err(RepositoryError::ProxyPathConflict {
                path,
                existing: existing.clone(),
                url,
            }),
            Some(_) => Ok(()),
            None => {
                self.paths.insert(path, url);
                Ok(())
            }
        }
    }

    /// Resolve the upstream URL of a proxy path.
    ///
    /// A leading `/` on the requested path is ignored.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.paths
            .get(path.trim_start_matches('/'))
            .map(|x| x.as_str())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A rendered repository file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedFile {
    /// Path relative to the repository root.
    pub path: String,
    pub data: Vec<u8>,
}

/// The rendered metadata of a repository.
#[derive(Clone, Debug, Default)]
pub struct RenderedRepository {
    pub files: Vec<RenderedFile>,
    pub proxy_paths: ProxyPathIndex,
}

impl RenderedRepository {
    /// Find a rendered file by its repository relative path.
    pub fn file(&self, path: &str) -> Option<&RenderedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// The rendered `Release` file.
    pub fn release(&self) -> Option<&RenderedFile> {
        self.files.iter().find(|f| f.path.ends_with("/Release"))
    }
}

/// The filename a package is advertised under in the pool.
///
/// Upstream filenames are not unique across architectures, so the name is
/// derived from `<package>_<version>_<architecture>` like Debian does.
pub fn pool_filename(descriptor: &PackageDescriptor) -> String {
    format!(
        "{}_{}_{}.deb",
        descriptor.package, descriptor.version, descriptor.architecture
    )
}

/// Gzip compress data.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = libflate::gzip::Encoder::new(vec![])?;
    encoder.write_all(data)?;

    Ok(encoder.finish().into_result()?)
}

/// Render repository metadata from descriptors.
///
/// Only the newest version of every package and architecture is advertised.
/// Packages of architecture `all` are listed in the index of every other
/// architecture, or in `binary-all` if there is none.
pub fn render_repository<'a>(
    descriptors: impl IntoIterator<Item = &'a PackageDescriptor>,
    config: &RepositoryConfig,
    now: DateTime<Utc>,
) -> Result<RenderedRepository> {
    let layout = PoolLayout::default();
    let selected = select_latest_per_package(descriptors);

    let mut by_arch: BTreeMap<&str, Vec<&PackageDescriptor>> = BTreeMap::new();
    let mut arch_all = vec![];

    for (key, (_, descriptor)) in &selected {
        if key.architecture == ARCHITECTURE_ALL {
            arch_all.push(*descriptor);
        } else {
            by_arch
                .entry(key.architecture.as_str())
                .or_default()
                .push(*descriptor);
        }
    }

    if by_arch.is_empty() && !arch_all.is_empty() {
        by_arch.insert(ARCHITECTURE_ALL, vec![]);
    }

    let mut rendered = RenderedRepository::default();

    let pool_path = |d: &PackageDescriptor| {
        layout.path(config.pool_component(), &d.package, &pool_filename(d))
    };

    for (_, (_, descriptor)) in &selected {
        rendered
            .proxy_paths
            .insert(pool_path(*descriptor), &descriptor.url)?;
    }

    let mut release = ReleaseBuilder::default();
    release.set_origin(&config.origin);
    release.set_label(&config.label);
    release.set_suite(&config.suite);
    release.set_codename(config.codename());
    release.add_component(&config.component);
    release.set_date(now);
    if let Some(description) = &config.description {
        release.set_description(description);
    }

    let dist_path = format!("dists/{}", config.suite);

    for (arch, packages) in by_arch {
        release.add_architecture(arch);

        let mut packages = packages;
        if arch != ARCHITECTURE_ALL {
            packages.extend(arch_all.iter().copied());
        } else {
            packages = arch_all.clone();
        }
        packages.sort_by(|a, b| a.package.cmp(&b.package));

        let text = render_packages(
            packages
                .iter()
                .map(|d| packages_paragraph(*d, pool_path(*d))),
        )?;
        let data = text.into_bytes();
        let gz = gzip(&data)?;

        let relative = format!("{}/binary-{}/Packages", config.component, arch);
        debug!("rendered {} ({} packages)", relative, packages.len());

        release.add_index(&relative, &data);
        release.add_index(format!("{}.gz", relative), &gz);

        rendered.files.push(RenderedFile {
            path: format!("{}/{}", dist_path, relative),
            data,
        });
        rendered.files.push(RenderedFile {
            path: format!("{}/{}.gz", dist_path, relative),
            data: gz,
        });
    }

    rendered.files.push(RenderedFile {
        path: format!("{}/Release", dist_path),
        data: release.render().into_bytes(),
    });

    Ok(rendered)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{control::ControlFile, download::FileDigests, inspect::ControlFields},
        chrono::TimeZone,
        std::io::Read,
    };

    fn descriptor(package: &str, version: &str, arch: &str) -> PackageDescriptor {
        descriptor_at(
            format!(
                "https://vendor.example/{}_{}_{}.deb?token=abc",
                package, version, arch
            ),
            package,
            version,
            arch,
        )
    }

    fn descriptor_at(url: String, package: &str, version: &str, arch: &str) -> PackageDescriptor {
        PackageDescriptor::new(
            url,
            ControlFields {
                package: package.into(),
                version: version.into(),
                architecture: arch.into(),
                maintainer: "Vendor <support@vendor.example>".into(),
                description: Some(format!("The {} package", package)),
                ..Default::default()
            },
            &FileDigests {
                md5: "1".repeat(32),
                sha256: "2".repeat(64),
                sha512: "3".repeat(128),
                size: 100,
                data: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn pool_paths() {
        let layout = PoolLayout::default();

        assert_eq!(
            layout.path("main", "app", "app_1.9.1_amd64.deb"),
            "pool/main/a/app/app_1.9.1_amd64.deb"
        );
        assert_eq!(
            layout.path("main", "libfoo", "libfoo_1.0_amd64.deb"),
            "pool/main/libf/libfoo/libfoo_1.0_amd64.deb"
        );
        assert_eq!(layout.path("main", "lib", "lib.deb"), "pool/main/l/lib/lib.deb");
    }

    #[test]
    fn gzip_roundtrip() -> Result<()> {
        let compressed = gzip(b"Package: app\n")?;

        let mut decoder = libflate::gzip::Decoder::new(compressed.as_slice())?;
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        assert_eq!(text, "Package: app\n");

        Ok(())
    }

    #[test]
    fn render() -> Result<()> {
        let descriptors = vec![
            descriptor("app", "1.9.1", "amd64"),
            descriptor("app", "1.10.0", "amd64"),
            descriptor("app", "1.2.9", "amd64"),
            descriptor("app", "1.10.0", "arm64"),
            descriptor("data", "3.0", "all"),
            descriptor("broken", "latest", "amd64"),
        ];

        let config = RepositoryConfig::default();
        let now = Utc.with_ymd_and_hms(2022, 3, 1, 0, 0, 0).unwrap();
        let rendered = render_repository(&descriptors, &config, now)?;

        let paths = rendered
            .files
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "dists/stable/main/binary-amd64/Packages",
                "dists/stable/main/binary-amd64/Packages.gz",
                "dists/stable/main/binary-arm64/Packages",
                "dists/stable/main/binary-arm64/Packages.gz",
                "dists/stable/Release",
            ]
        );

        let amd64 = rendered
            .file("dists/stable/main/binary-amd64/Packages")
            .unwrap();
        let cf = ControlFile::parse_str(&String::from_utf8_lossy(&amd64.data))?;
        let packages = cf.paragraphs().collect::<Vec<_>>();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].field_str("Package"), Some("app"));
        assert_eq!(packages[0].field_str("Version"), Some("1.10.0"));
        assert_eq!(
            packages[0].field_str("Filename"),
            Some("pool/main/a/app/app_1.10.0_amd64.deb")
        );
        assert_eq!(packages[1].field_str("Package"), Some("data"));

        assert_eq!(
            rendered
                .proxy_paths
                .resolve("/pool/main/a/app/app_1.10.0_amd64.deb"),
            Some("https://vendor.example/app_1.10.0_amd64.deb?token=abc")
        );
        assert_eq!(rendered.proxy_paths.len(), 3);

        let release = String::from_utf8_lossy(&rendered.release().unwrap().data).to_string();
        assert!(release.contains("Architectures: amd64 arm64\n"));
        assert!(release.contains("Components: main\n"));
        assert!(release.contains("Date: Tue, 01 Mar 2022 00:00:00 +0000\n"));
        assert!(release.contains(" main/binary-arm64/Packages.gz\n"));

        let packages_digest = crate::io::digest_data(&amd64.data).sha256.digest_hex();
        assert!(release.contains(&packages_digest));

        Ok(())
    }

    #[test]
    fn proxy_path_conflicts() -> Result<()> {
        let mut index = ProxyPathIndex::default();

        index.insert("pool/main/a/app/app.deb", "https://vendor.example/amd64/app.deb")?;
        index.insert("pool/main/a/app/app.deb", "https://vendor.example/amd64/app.deb")?;
        assert_eq!(index.len(), 1);

        let err = index
            .insert("pool/main/a/app/app.deb", "https://vendor.example/arm64/app.deb")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ProxyPathConflict { .. }));
        assert_eq!(
            index.resolve("pool/main/a/app/app.deb"),
            Some("https://vendor.example/amd64/app.deb")
        );

        Ok(())
    }

    #[test]
    fn same_upstream_filename_per_arch() -> Result<()> {
        let descriptors = vec![
            descriptor_at(
                "https://vendor.example/amd64/app.deb".into(),
                "app",
                "2.0",
                "amd64",
            ),
            descriptor_at(
                "https://vendor.example/arm64/app.deb".into(),
                "app",
                "2.0",
                "arm64",
            ),
        ];
        assert_eq!(descriptors[0].filename, descriptors[1].filename);

        let rendered =
            render_repository(&descriptors, &RepositoryConfig::default(), Utc::now())?;
        assert_eq!(rendered.proxy_paths.len(), 2);

        let mut filenames = vec![];
        for arch in ["amd64", "arm64"] {
            let packages = rendered
                .file(&format!("dists/stable/main/binary-{}/Packages", arch))
                .unwrap();
            let cf = ControlFile::parse_str(&String::from_utf8_lossy(&packages.data))?;
            let paragraph = cf.paragraphs().next().unwrap();
            let filename = paragraph.field_str("Filename").unwrap().to_string();

            assert_eq!(
                rendered.proxy_paths.resolve(&filename),
                Some(format!("https://vendor.example/{}/app.deb", arch).as_str())
            );
            filenames.push(filename);
        }

        assert_eq!(
            filenames,
            vec![
                "pool/main/a/app/app_2.0_amd64.deb",
                "pool/main/a/app/app_2.0_arm64.deb"
            ]
        );

        Ok(())
    }

    #[test]
    fn render_skips_missing_architecture() -> Result<()> {
        let descriptors = vec![descriptor("app", "2.0", ""), descriptor("app", "1.0", "amd64")];
        let rendered =
            render_repository(&descriptors, &RepositoryConfig::default(), Utc::now())?;

        assert!(rendered.files.iter().all(|f| !f.path.contains("binary-/")));
        assert_eq!(rendered.proxy_paths.len(), 1);

        let release = String::from_utf8_lossy(&rendered.release().unwrap().data).to_string();
        assert!(release.contains("Architectures: amd64\n"));

        Ok(())
    }

    #[test]
    fn render_only_arch_all() -> Result<()> {
        let descriptors = vec![descriptor("data", "3.0", "all")];
        let rendered =
            render_repository(&descriptors, &RepositoryConfig::default(), Utc::now())?;

        assert!(rendered
            .file("dists/stable/main/binary-all/Packages")
            .is_some());

        Ok(())
    }
}
