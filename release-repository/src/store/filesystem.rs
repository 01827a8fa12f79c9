// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem backed key-value store. */

use {
    crate::{
        error::{RepositoryError, Result},
        store::KeyValueStore,
    },
    async_trait::async_trait,
    std::path::{Component, Path, PathBuf},
};

/// A [KeyValueStore] storing each key as a file under a root directory.
///
/// Keys containing `/` map to nested directories. Keys that would escape the root
/// directory are rejected.
#[derive(Clone, Debug)]
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// The directory is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Resolve the filesystem path of a key.
    pub fn key_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_matches('/'));

        if key.trim_matches('/').is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RepositoryError::Store(
                key.to_string(),
                "key is not a plain relative path".to_string(),
            ));
        }

        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl KeyValueStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;

        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Store(
                key.to_string(),
                format!("reading {}: {}", path.display(), e),
            )),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.key_path(key)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepositoryError::Store(key.to_string(), format!("{}: {}", parent.display(), e))
            })?;
        }

        std::fs::write(&path, value).map_err(|e| {
            RepositoryError::Store(key.to_string(), format!("{}: {}", path.display(), e))
        })
    }

    fn location(&self) -> String {
        format!("{}", self.root_dir.display())
    }
}
