// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Extraction of control metadata embedded in `.deb` archives.

A `.deb` file is an `ar` archive containing a `debian-binary` member, a
`control.tar[.<compression>]` member and a `data.tar[.<compression>]` member.
The `control` file in the control tarball is a single control paragraph
describing the binary package.

Obtaining that paragraph is abstracted by [ArchiveInspector]. The production
implementations are [DpkgDebInspector], which shells out to `dpkg-deb`, and
[NativeDebInspector], which reads the archive in-process.
[StaticArchiveInspector] serves canned paragraphs and exists for testing.

[extract_control_fields()] combines an inspector with [parse_control_fields()]
to produce [ControlFields].
*/

use {
    crate::{
        error::{RepositoryError, Result},
        io::digest_data,
    },
    async_trait::async_trait,
    bytes::Bytes,
    log::debug,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        collections::{BTreeMap, HashMap},
        io::{Read, Write},
        path::PathBuf,
        sync::Mutex,
    },
};

static FIELD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:]+):\s*(.+)$").expect("regex should compile"));

/// Control fields extracted from a binary package.
///
/// `package`, `version`, `architecture` and `maintainer` are always present but are
/// empty when the control paragraph lacks them. Other fields are [None] when absent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlFields {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: String,
    pub description: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
    pub homepage: Option<String>,
    pub depends: Option<String>,
    pub recommends: Option<String>,
    pub suggests: Option<String>,
}

impl ControlFields {
    /// Construct an instance from a map of lower-cased field names to values.
    pub fn from_field_map(mut fields: BTreeMap<String, String>) -> Self {
        let mut required = |name: &str| fields.remove(name).unwrap_or_default();

        let package = required("package");
        let version = required("version");
        let architecture = required("architecture");
        let maintainer = required("maintainer");

        Self {
            package,
            version,
            architecture,
            maintainer,
            description: fields.remove("description"),
            section: fields.remove("section"),
            priority: fields.remove("priority"),
            homepage: fields.remove("homepage"),
            depends: fields.remove("depends"),
            recommends: fields.remove("recommends"),
            suggests: fields.remove("suggests"),
        }
    }
}

/// Parse `Key: Value` lines of a control paragraph into a field map.
///
/// Keys are lower-cased and values trimmed. Lines not matching `^([^:]+):\s*(.+)$`
/// are skipped, as are indented continuation lines, which are not field lines. If a
/// field occurs multiple times the last value wins.
pub fn parse_control_field_map(text: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }

        if let Some(caps) = FIELD_LINE.captures(line) {
            let value = caps[2].trim();
            if value.is_empty() {
                continue;
            }

            fields.insert(caps[1].trim().to_lowercase(), value.to_string());
        }
    }

    fields
}

/// Parse a control paragraph into [ControlFields].
pub fn parse_control_fields(text: &str) -> ControlFields {
    ControlFields::from_field_map(parse_control_field_map(text))
}

/// Obtains the control paragraph of a binary package archive.
#[async_trait]
pub trait ArchiveInspector: Send + Sync {
    /// Obtain the control paragraph text of the archive whose full content is `data`.
    ///
    /// Implementations must fail with [RepositoryError::Extraction] (or another
    /// extraction-classified error) when the archive cannot be inspected.
    async fn control_stanza(&self, data: Bytes) -> Result<String>;
}

/// Extract [ControlFields] from the content of a `.deb` archive.
pub async fn extract_control_fields(
    inspector: &(impl ArchiveInspector + ?Sized),
    data: Bytes,
) -> Result<ControlFields> {
    let text = inspector.control_stanza(data).await?;

    Ok(parse_control_fields(&text))
}

/// An [ArchiveInspector] running `dpkg-deb --field`.
///
/// The archive content is written to a temporary file that is removed when
/// inspection finishes, regardless of outcome. Temporary files go to the system
/// temporary directory unless [Self::with_temp_dir()] says otherwise.
#[derive(Clone, Debug)]
pub struct DpkgDebInspector {
    program: PathBuf,
    temp_dir: Option<PathBuf>,
}

impl Default for DpkgDebInspector {
    fn default() -> Self {
        Self::new("dpkg-deb")
    }
}

impl DpkgDebInspector {
    /// Construct an instance invoking a specific `dpkg-deb` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            temp_dir: None,
        }
    }

    /// Create temporary archive files in the given directory.
    pub fn with_temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    fn run(program: PathBuf, temp_dir: Option<PathBuf>, data: Bytes) -> Result<String> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("release-repository-").suffix(".deb");

        let mut temp = match &temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| RepositoryError::Extraction(format!("creating temp file: {}", e)))?;

        temp.write_all(&data)
            .and_then(|_| temp.flush())
            .map_err(|e| RepositoryError::Extraction(format!("writing temp file: {}", e)))?;

        debug!(
            "running {} --field {}",
            program.display(),
            temp.path().display()
        );

        let output = duct::cmd(
            program.as_path(),
            vec!["--field".into(), temp.path().as_os_str().to_owned()],
        )
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|e| RepositoryError::Extraction(format!("running {}: {}", program.display(), e)))?;

        if !output.status.success() {
            return Err(RepositoryError::Extraction(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            RepositoryError::Extraction(format!(
                "{} emitted non UTF-8 output: {}",
                program.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl ArchiveInspector for DpkgDebInspector {
    async fn control_stanza(&self, data: Bytes) -> Result<String> {
        let program = self.program.clone();
        let temp_dir = self.temp_dir.clone();

        tokio::task::spawn_blocking(move || Self::run(program, temp_dir, data)).await?
    }
}

/// An [ArchiveInspector] reading `.deb` archives in-process.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeDebInspector;

impl NativeDebInspector {
    /// Resolve the `control` file content from `.deb` archive data.
    pub fn read_control(data: &[u8]) -> Result<String> {
        let mut archive = ar::Archive::new(std::io::Cursor::new(data));

        while let Some(entry) = archive.next_entry() {
            let entry =
                entry.map_err(|e| RepositoryError::Extraction(format!("reading ar archive: {}", e)))?;

            let name = String::from_utf8_lossy(entry.header().identifier()).to_string();

            if let Some(suffix) = name.strip_prefix("control.tar") {
                let reader: Box<dyn Read + '_> = match suffix {
                    "" => Box::new(entry),
                    ".gz" => Box::new(libflate::gzip::Decoder::new(entry).map_err(|e| {
                        RepositoryError::Extraction(format!("reading gzip header: {}", e))
                    })?),
                    ".xz" => Box::new(xz2::read::XzDecoder::new(entry)),
                    ".zst" => Box::new(zstd::stream::read::Decoder::new(entry).map_err(|e| {
                        RepositoryError::Extraction(format!("initializing zstd decoder: {}", e))
                    })?),
                    _ => return Err(RepositoryError::DebUnknownCompression(name)),
                };

                return Self::read_control_tar(reader);
            }
        }

        Err(RepositoryError::Extraction(
            "control.tar member not found in archive".to_string(),
        ))
    }

    fn read_control_tar(reader: impl Read) -> Result<String> {
        let mut archive = tar::Archive::new(reader);

        let entries = archive
            .entries()
            .map_err(|e| RepositoryError::Extraction(format!("reading control tar: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| RepositoryError::Extraction(format!("reading control tar: {}", e)))?;

            let path = entry
                .path()
                .map_err(|e| RepositoryError::Extraction(format!("reading control tar: {}", e)))?
                .to_path_buf();
            let path = path.strip_prefix("./").unwrap_or(&path);

            if path.as_os_str() == "control" {
                let mut text = String::new();
                entry.read_to_string(&mut text).map_err(|e| {
                    RepositoryError::Extraction(format!("reading control file: {}", e))
                })?;

                return Ok(text);
            }
        }

        Err(RepositoryError::Extraction(
            "control file not found in control.tar".to_string(),
        ))
    }
}

#[async_trait]
impl ArchiveInspector for NativeDebInspector {
    async fn control_stanza(&self, data: Bytes) -> Result<String> {
        tokio::task::spawn_blocking(move || Self::read_control(&data)).await?
    }
}

/// An [ArchiveInspector] serving control paragraphs registered in memory.
///
/// Paragraphs are keyed by the SHA-256 of the archive content. Unknown content
/// fails like a broken archive would.
#[derive(Default)]
pub struct StaticArchiveInspector {
    stanzas: Mutex<HashMap<String, String>>,
}

impl StaticArchiveInspector {
    /// Register the control paragraph for archive content.
    pub fn insert(&self, data: &[u8], stanza: impl ToString) {
        self.stanzas
            .lock()
            .expect("lock should not be poisoned")
            .insert(digest_data(data).sha256.digest_hex(), stanza.to_string());
    }
}

#[async_trait]
impl ArchiveInspector for StaticArchiveInspector {
    async fn control_stanza(&self, data: Bytes) -> Result<String> {
        let key = digest_data(&data).sha256.digest_hex();

        self.stanzas
            .lock()
            .expect("lock should not be poisoned")
            .get(&key)
            .cloned()
            .ok_or_else(|| RepositoryError::Extraction(format!("no control data for content {}", key)))
    }
}
