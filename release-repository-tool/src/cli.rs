// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{info, warn, LevelFilter},
    release_repository::{
        cache::DescriptorCache,
        config::PipelineConfig,
        error::RepositoryError,
        http::HttpFetcher,
        inspect::{ArchiveInspector, DpkgDebInspector, NativeDebInspector},
        pipeline::{
            DescriptorPipeline, PipelineEvent, RunOptions, RunReport, DEFAULT_FILE_TIMEOUT,
            DEFAULT_MAX_PARALLEL_IO,
        },
        render::render_repository,
        signing::{sign_repository, GpgSigner},
    },
    std::{
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
        time::Duration,
    },
    thiserror::Error,
};

const CONFIG_ABOUT: &str = "\
YAML Configuration

Commands operating on a repository read a YAML file describing the vendor,
the products to process, where descriptors are cached and how the rendered
repository is labeled.

vendor_origin (required) (string)
   Base URL of the vendor. Release manifests are fetched from
   `<vendor_origin>/download/<product>/linux/version.json` and every file
   listed in a manifest must live under this URL.

products (optional) (list[string])
   Products processed when none are given on the command line.

identifier_prefixes (optional) (list[string])
   Case insensitive prefixes of manifest file identifiers to process.
   Defaults to `[\".deb\"]`.

ignored_urls (optional) (list[string])
   File URLs that are never processed, even when their identifier matches.

cache_key (optional) (string)
   Store key holding the descriptor cache. Defaults to `PACKAGE_DESCRIPTORS`.

store (optional) (mapping)
   Where the descriptor cache lives. The `type` key selects the backend:

   type: memory
      Process memory. Nothing is persisted. This is the default.

   type: filesystem
      path (required): directory holding one file per key.

   type: cloudflare_kv
      account_id (required): Cloudflare account ID.
      namespace_id (required): Workers KV namespace ID.
      api_token_env (optional): name of the environment variable holding
         the API token. Defaults to `CLOUDFLARE_API_TOKEN`.

   type: s3
      region (required): AWS region name.
      bucket (required): bucket name.
      key_prefix (optional): prefix of object keys.

      AWS credentials are resolved from `~/.aws/config` and `AWS_*`
      environment variables as is typical for AWS clients.

repository (optional) (mapping)
   Labels of the rendered repository: `origin`, `label`, `suite` (default
   `stable`), `codename` (defaults to the suite), `component` (default
   `main`), `description` and `pool_component` (defaults to the component).
";

const UPDATE_ABOUT: &str = "\
Update the descriptor cache from vendor release manifests.

The release manifest of every product is fetched and validated. Files whose
identifier matches a configured prefix are downloaded, their SHA-512 is
compared against the vendor-declared value and the control metadata embedded
in the package is extracted.

Files already present in the descriptor cache are not downloaded again unless
`--no-cache` is given.

A file failing to download, to validate or to be inspected does not stop the
run. Failures are listed at the end and the process exits successfully. A
manifest that cannot be loaded or a cache that cannot be written makes the
process exit with an error.
";

const RENDER_ABOUT: &str = "\
Render repository metadata from the descriptor cache.

The newest version of every package and architecture is written to
`dists/<suite>/<component>/binary-<arch>/Packages[.gz]` and a `Release` file is
produced. With `--gpg-key`, `InRelease` and `Release.gpg` are produced as well.

Rendered files are written under `--dest` and, with `--publish`, to the
configured store using their repository relative path as key. The mapping of
pool paths to upstream URLs is written to `proxy-paths.json`.
";

#[derive(Debug, Error)]
pub enum RrtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Repository(#[from] RepositoryError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0:?}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, RrtError>;

fn config_arg<'help>() -> Arg<'help> {
    Arg::new("config")
        .long("config")
        .takes_value(true)
        .required(true)
        .allow_invalid_utf8(true)
        .help("Path to a YAML file defining the pipeline configuration")
}

fn load_config(args: &ArgMatches) -> Result<PipelineConfig> {
    let path = args
        .value_of_os("config")
        .expect("config argument is required");

    let f = std::fs::File::open(path)?;
    let config: PipelineConfig = serde_yaml::from_reader(f)?;
    config.validate()?;

    Ok(config)
}

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get().min(DEFAULT_MAX_PARALLEL_IO));
    let default_file_timeout = format!("{}", DEFAULT_FILE_TIMEOUT.as_secs());

    let app = Command::new("Release Repository Tool")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Republish vendor releases as APT repositories")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("update")
            .about("Update the descriptor cache from vendor release manifests")
            .long_about(UPDATE_ABOUT)
            .arg(config_arg())
            .arg(
                Arg::new("product")
                    .multiple_values(true)
                    .help("Products to process. Defaults to the configured products"),
            )
            .arg(
                Arg::new("no-upload")
                    .long("no-upload")
                    .help("Compute descriptors without writing the cache back"),
            )
            .arg(
                Arg::new("use-cache")
                    .long("use-cache")
                    .help("Reuse cached descriptors (the default)"),
            )
            .arg(
                Arg::new("no-cache")
                    .long("no-cache")
                    .conflicts_with("use-cache")
                    .help("Rebuild descriptors for every file, ignoring cached ones"),
            )
            .arg(
                Arg::new("inspector")
                    .long("inspector")
                    .takes_value(true)
                    .possible_values(["dpkg", "native"])
                    .default_value("dpkg")
                    .help("How control metadata is extracted from packages"),
            )
            .arg(
                Arg::new("max-parallel-io")
                    .long("max-parallel-io")
                    .takes_value(true)
                    .default_value(&default_threads)
                    .help("Maximum number of files downloaded concurrently"),
            )
            .arg(
                Arg::new("file-timeout")
                    .long("file-timeout")
                    .takes_value(true)
                    .default_value(&default_file_timeout)
                    .help("Seconds processing a single file may take before it is failed"),
            ),
    );

    let app = app.subcommand(
        Command::new("render")
            .about("Render repository metadata from the descriptor cache")
            .long_about(RENDER_ABOUT)
            .arg(config_arg())
            .arg(
                Arg::new("dest")
                    .long("dest")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Directory to write rendered files to"),
            )
            .arg(
                Arg::new("publish")
                    .long("publish")
                    .help("Write rendered files to the configured store"),
            )
            .arg(
                Arg::new("gpg-key")
                    .long("gpg-key")
                    .takes_value(true)
                    .help("ID of the GnuPG key to sign the Release file with"),
            )
            .arg(
                Arg::new("gpg-homedir")
                    .long("gpg-homedir")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .requires("gpg-key")
                    .help("GnuPG home directory holding the signing key"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("config-help").about("Print documentation about the YAML configuration"),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();

    match matches.subcommand() {
        Some(("update", args)) => command_update(args).await,
        Some(("render", args)) => command_render(args).await,
        Some(("config-help", _)) => {
            println!("{}", CONFIG_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(RrtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

async fn command_update(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let max_parallel_io = args.value_of_t::<usize>("max-parallel-io")?;
    let file_timeout = Duration::from_secs(args.value_of_t::<u64>("file-timeout")?);

    let inspector: Arc<dyn ArchiveInspector> = match args.value_of("inspector") {
        Some("native") => Arc::new(NativeDebInspector),
        _ => Arc::new(DpkgDebInspector::default()),
    };

    let options = RunOptions {
        products: args
            .values_of("product")
            .map(|values| values.map(|x| x.to_string()).collect())
            .unwrap_or_default(),
        use_cache: !args.is_present("no-cache"),
        upload: !args.is_present("no-upload"),
        max_parallel_io,
        file_timeout,
    };

    let store = config.store.open()?;

    let pipeline = DescriptorPipeline::new(config, Arc::new(HttpFetcher::new()?), inspector, store);

    update_descriptors(pipeline, &options).await?;

    Ok(())
}

/// Run the pipeline with a progress bar and print the run summary.
///
/// Files that failed are part of the summary and don't make this fail. Failing
/// to load a manifest or to write the cache does.
async fn update_descriptors(
    mut pipeline: DescriptorPipeline,
    options: &RunOptions,
) -> Result<RunReport> {
    let pb = Arc::new(Mutex::new(None));
    let pb_cb = pb.clone();

    pipeline.set_progress_callback(move |event| match event {
        PipelineEvent::DescriptorsToCompute(total) if total > 0 => {
            pb_cb
                .lock()
                .expect("lock should not be poisoned")
                .replace(pbr::ProgressBar::new(total as u64));
        }
        PipelineEvent::DescriptorComputed(_) | PipelineEvent::DescriptorFailed(..) => {
            let mut guard = pb_cb.lock().expect("lock should not be poisoned");
            if let Some(bar) = guard.as_mut() {
                bar.inc();
            }
        }
        PipelineEvent::ManifestLoaded(..) | PipelineEvent::CacheSaved(_) => {
            info!("{}", event);
        }
        _ => {}
    });

    let report = pipeline.run(options).await;

    if let Some(mut bar) = pb.lock().expect("lock should not be poisoned").take() {
        bar.finish();
    }

    let report = report?;

    println!();
    print!("{}", report.summary());

    report.ensure_persisted()?;

    Ok(report)
}

fn write_file(dest: &Path, path: &str, data: &[u8]) -> Result<()> {
    let dest_path = dest.join(path);

    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&dest_path, data)?;
    info!("wrote {} bytes to {}", data.len(), dest_path.display());

    Ok(())
}

async fn command_render(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;

    let dest = args.value_of_os("dest").map(PathBuf::from);
    let publish = args.is_present("publish");

    if dest.is_none() && !publish {
        return Err(RrtError::Usage(
            "at least one of --dest or --publish is required".to_string(),
        ));
    }

    let store = config.store.open()?;
    let cache = DescriptorCache::new(store.clone(), &config.cache_key);

    let descriptors = match cache.try_load().await? {
        Some(descriptors) => descriptors,
        None => {
            warn!("descriptor cache {} is empty", cache.key());
            Default::default()
        }
    };

    let mut rendered =
        render_repository(descriptors.values(), &config.repository, chrono::Utc::now())?;

    if let Some(key_id) = args.value_of("gpg-key") {
        let mut signer = GpgSigner::new(key_id);
        if let Some(homedir) = args.value_of_os("gpg-homedir") {
            signer = signer.with_homedir(homedir);
        }

        sign_repository(&mut rendered, &signer).await?;
    }

    let proxy_paths = serde_json::to_vec_pretty(&rendered.proxy_paths)?;

    if let Some(dest) = &dest {
        for file in &rendered.files {
            write_file(dest, &file.path, &file.data)?;
        }
        write_file(dest, "proxy-paths.json", &proxy_paths)?;
    }

    if publish {
        for file in &rendered.files {
            store.put(&file.path, file.data.clone()).await?;
            info!("published {} to {}", file.path, store.location());
        }
        store.put("proxy-paths.json", proxy_paths).await?;
    }

    println!(
        "rendered {} files advertising {} packages",
        rendered.files.len(),
        rendered.proxy_paths.len()
    );

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        async_trait::async_trait,
        release_repository::{
            error::ErrorKind,
            fetch::StaticFetcher,
            inspect::StaticArchiveInspector,
            io::digest_data,
            manifest::manifest_url,
            store::{KeyValueStore, MemoryStore},
        },
    };

    const ORIGIN: &str = "https://vendor.example";

    /// Store accepting reads but refusing every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> release_repository::error::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn put(&self, key: &str, _value: Vec<u8>) -> release_repository::error::Result<()> {
            Err(RepositoryError::Store(key.to_string(), "read-only".into()))
        }

        fn location(&self) -> String {
            "read-only".into()
        }
    }

    /// A vendor publishing one valid package and one whose digest is wrong.
    fn vendor() -> (Arc<StaticFetcher>, Arc<StaticArchiveInspector>) {
        let fetcher = Arc::new(StaticFetcher::default());
        let inspector = Arc::new(StaticArchiveInspector::default());

        let good_url = format!("{}/app_1.0_amd64.deb", ORIGIN);
        let bad_url = format!("{}/app_1.1_amd64.deb", ORIGIN);

        let good = b"good package".to_vec();
        inspector.insert(
            &good,
            "Package: app\nVersion: 1.0\nArchitecture: amd64\nMaintainer: Vendor\n",
        );
        fetcher.insert(&good_url, good.clone());
        fetcher.insert(&bad_url, b"tampered package".to_vec());

        let manifest = serde_json::json!({
            "releases": [{
                "version": "1.1",
                "category": "stable",
                "files": [
                    {
                        "identifier": ".deb",
                        "url": good_url,
                        "vendorSha512": digest_data(&good).sha512.digest_hex(),
                    },
                    {
                        "identifier": ".deb",
                        "url": bad_url,
                        "vendorSha512": "0".repeat(128),
                    },
                ],
            }]
        });
        fetcher.insert(manifest_url(ORIGIN, "app"), manifest.to_string());

        (fetcher, inspector)
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::new(ORIGIN);
        config.products = vec!["app".to_string()];
        config
    }

    #[tokio::test]
    async fn update_file_failures_succeed() -> Result<()> {
        let (fetcher, inspector) = vendor();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(config(), fetcher, inspector, store.clone());
        let report = update_descriptors(pipeline, &RunOptions::default()).await?;

        assert_eq!(report.computed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);
        assert_eq!(store.keys(), vec!["PACKAGE_DESCRIPTORS".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn update_save_failure_fails() {
        let (fetcher, inspector) = vendor();

        let pipeline = DescriptorPipeline::new(config(), fetcher, inspector, Arc::new(ReadOnlyStore));

        match update_descriptors(pipeline, &RunOptions::default()).await {
            Err(RrtError::Repository(e)) => assert_eq!(e.kind(), ErrorKind::CacheSave),
            res => panic!("expected cache save error; got {:?}", res),
        }
    }

    #[tokio::test]
    async fn update_manifest_failure_fails() {
        let (_, inspector) = vendor();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(
            config(),
            Arc::new(StaticFetcher::default()),
            inspector,
            store.clone(),
        );

        match update_descriptors(pipeline, &RunOptions::default()).await {
            Err(RrtError::Repository(e)) => assert_eq!(e.kind(), ErrorKind::Manifest),
            res => panic!("expected manifest error; got {:?}", res),
        }
        assert!(store.keys().is_empty());
    }

    #[test]
    fn write_nested_file() -> Result<()> {
        let td = tempfile::tempdir()?;

        write_file(td.path(), "dists/stable/main/binary-amd64/Packages", b"Package: app\n")?;

        assert_eq!(
            std::fs::read(td.path().join("dists/stable/main/binary-amd64/Packages"))?,
            b"Package: app\n"
        );

        Ok(())
    }
}
