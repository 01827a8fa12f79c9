// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing of `Release` files.

Signing is delegated to an external service. [ReleaseSigner] produces the
clearsigned `InRelease` and the detached `Release.gpg` from `Release` text.
[GpgSigner] runs `gpg` against a key in a keyring.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        render::{RenderedFile, RenderedRepository},
    },
    async_trait::async_trait,
    log::debug,
    std::{ffi::OsString, path::PathBuf},
};

/// Produces OpenPGP signatures over `Release` text.
#[async_trait]
pub trait ReleaseSigner: Send + Sync {
    /// Produce a cleartext signed document embedding `text`.
    async fn clearsign(&self, text: &str) -> Result<String>;

    /// Produce an ASCII armored detached signature of `text`.
    async fn detach_sign(&self, text: &str) -> Result<String>;
}

/// A [ReleaseSigner] invoking `gpg`.
#[derive(Clone, Debug)]
pub struct GpgSigner {
    program: PathBuf,
    key_id: String,
    homedir: Option<PathBuf>,
}

impl GpgSigner {
    /// Construct an instance signing with the given key.
    pub fn new(key_id: impl ToString) -> Self {
        Self {
            program: PathBuf::from("gpg"),
            key_id: key_id.to_string(),
            homedir: None,
        }
    }

    /// Use a specific GnuPG home directory.
    pub fn with_homedir(mut self, path: impl Into<PathBuf>) -> Self {
        self.homedir = Some(path.into());
        self
    }

    /// Use a specific `gpg` executable.
    pub fn with_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.program = path.into();
        self
    }

    fn run(&self, mode: &'static str, text: String) -> Result<String> {
        let td = tempfile::Builder::new()
            .prefix("release-repository-sign-")
            .tempdir()
            .map_err(|e| RepositoryError::Signing(format!("creating temp directory: {}", e)))?;

        let input = td.path().join("Release");
        let output = td.path().join("Release.asc");

        std::fs::write(&input, text.as_bytes())
            .map_err(|e| RepositoryError::Signing(format!("writing {}: {}", input.display(), e)))?;

        let mut args: Vec<OsString> = vec!["--batch".into(), "--yes".into()];
        if let Some(homedir) = &self.homedir {
            args.push("--homedir".into());
            args.push(homedir.into());
        }
        args.extend([
            "--local-user".into(),
            self.key_id.as_str().into(),
            "--armor".into(),
            mode.into(),
            "--output".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ]);

        debug!("running {} {}", self.program.display(), mode);

        let res = duct::cmd(self.program.as_path(), args)
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| {
                RepositoryError::Signing(format!("running {}: {}", self.program.display(), e))
            })?;

        if !res.status.success() {
            return Err(RepositoryError::Signing(format!(
                "{} {} exited with {}: {}",
                self.program.display(),
                mode,
                res.status,
                String::from_utf8_lossy(&res.stderr).trim()
            )));
        }

        std::fs::read_to_string(&output)
            .map_err(|e| RepositoryError::Signing(format!("reading {}: {}", output.display(), e)))
    }
}

#[async_trait]
impl ReleaseSigner for GpgSigner {
    async fn clearsign(&self, text: &str) -> Result<String> {
        let signer = self.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || signer.run("--clearsign", text)).await?
    }

    async fn detach_sign(&self, text: &str) -> Result<String> {
        let signer = self.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || signer.run("--detach-sign", text)).await?
    }
}

/// Add `InRelease` and `Release.gpg` next to the `Release` file of a rendered repository.
pub async fn sign_repository(
    rendered: &mut RenderedRepository,
    signer: &(impl ReleaseSigner + ?Sized),
) -> Result<()> {
    let release = rendered
        .release()
        .ok_or_else(|| RepositoryError::Signing("no Release file rendered".to_string()))?
        .clone();

    let text = String::from_utf8_lossy(&release.data).to_string();
    let dir = release.path.trim_end_matches("Release");

    let inrelease = signer.clearsign(&text).await?;
    let detached = signer.detach_sign(&text).await?;

    rendered.files.push(RenderedFile {
        path: format!("{}InRelease", dir),
        data: inrelease.into_bytes(),
    });
    rendered.files.push(RenderedFile {
        path: format!("{}Release.gpg", dir),
        data: detached.into_bytes(),
    });

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{config::RepositoryConfig, descriptor::PackageDescriptor},
        chrono::Utc,
    };

    struct FakeSigner;

    #[async_trait]
    impl ReleaseSigner for FakeSigner {
        async fn clearsign(&self, text: &str) -> Result<String> {
            Ok(format!("-----BEGIN PGP SIGNED MESSAGE-----\n\n{}", text))
        }

        async fn detach_sign(&self, text: &str) -> Result<String> {
            Ok(format!("signature over {} bytes", text.len()))
        }
    }

    #[tokio::test]
    async fn sign_rendered() -> Result<()> {
        let mut rendered = crate::render::render_repository(
            std::iter::empty::<&PackageDescriptor>(),
            &RepositoryConfig::default(),
            Utc::now(),
        )?;

        sign_repository(&mut rendered, &FakeSigner).await?;

        let inrelease = rendered.file("dists/stable/InRelease").unwrap();
        assert!(String::from_utf8_lossy(&inrelease.data).contains("Suite: stable"));
        assert!(rendered.file("dists/stable/Release.gpg").is_some());

        Ok(())
    }

    #[tokio::test]
    async fn missing_gpg() {
        let signer = GpgSigner::new("ABCDEF").with_program("/nonexistent/release-repository-gpg");

        assert!(matches!(
            signer.clearsign("Origin: x\n").await,
            Err(RepositoryError::Signing(_))
        ));
    }
}
