// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Batch descriptor pipeline.

A run loads the descriptor cache, fetches the release manifest of every requested
product, selects candidate files, reuses cached descriptors where possible and
builds the remaining ones with bounded parallelism. Per-file failures are
collected and never abort the run. The whole working map is written back to the
cache at the end.

Manifest failures abort the run. A failed cache write does not discard the
computed results: it is recorded in the [RunReport] and surfaced by
[RunReport::ensure_persisted()].
*/

use {
    crate::{
        cache::{DescriptorCache, DescriptorMap},
        config::PipelineConfig,
        descriptor::{build_descriptor, filename_from_url},
        error::{ErrorKind, RepositoryError, Result},
        fetch::ContentFetcher,
        inspect::ArchiveInspector,
        manifest::{fetch_manifest, FileRef},
        selection::select_candidates,
        store::KeyValueStore,
    },
    futures::StreamExt,
    log::{error, info, warn},
    std::{collections::HashSet, fmt::Write, sync::Arc, time::Duration},
};

/// Default number of files downloaded concurrently.
pub const DEFAULT_MAX_PARALLEL_IO: usize = 4;

/// Default time budget for building a single descriptor.
pub const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Parameters of a single run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Products to process. Empty means the products of the configuration.
    pub products: Vec<String>,
    /// Whether cached descriptors are reused instead of being rebuilt.
    pub use_cache: bool,
    /// Whether the working map is written back to the store.
    pub upload: bool,
    /// Maximum number of files processed concurrently.
    pub max_parallel_io: usize,
    /// How long building one descriptor may take before it counts as a
    /// download failure.
    pub file_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            products: vec![],
            use_cache: true,
            upload: true,
            max_parallel_io: DEFAULT_MAX_PARALLEL_IO,
            file_timeout: DEFAULT_FILE_TIMEOUT,
        }
    }
}

/// Progress of a pipeline run.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A cache holding this many descriptors was loaded.
    CacheLoaded(usize),

    /// The manifest of a product yielded this many candidate files.
    ManifestLoaded(String, usize),

    /// A descriptor for a URL was taken from the cache.
    DescriptorReused(String),

    /// This many files need to be downloaded.
    DescriptorsToCompute(usize),

    /// A descriptor for a URL was built.
    DescriptorComputed(String),

    /// Building the descriptor for a URL failed.
    DescriptorFailed(String, ErrorKind),

    /// The cache was written with this many descriptors.
    CacheSaved(usize),
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheLoaded(count) => write!(f, "loaded {} cached descriptors", count),
            Self::ManifestLoaded(product, count) => {
                write!(f, "manifest of {} has {} candidate files", product, count)
            }
            Self::DescriptorReused(url) => write!(f, "reusing cached descriptor for {}", url),
            Self::DescriptorsToCompute(count) => {
                write!(f, "{} descriptors will be computed", count)
            }
            Self::DescriptorComputed(url) => write!(f, "computed descriptor for {}", url),
            Self::DescriptorFailed(url, kind) => {
                write!(f, "{} error computing descriptor for {}", kind, url)
            }
            Self::CacheSaved(count) => write!(f, "saved {} descriptors to cache", count),
        }
    }
}

/// A file whose descriptor could not be built.
#[derive(Debug)]
pub struct FileFailure {
    pub filename: String,
    pub url: String,
    pub kind: ErrorKind,
    pub error: RepositoryError,
}

/// Outcome of writing the cache back to the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Persistence {
    /// The full map was written.
    Saved,
    /// Writing was not requested.
    Skipped,
    /// Writing failed for the given reason.
    Failed(String),
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct RunReport {
    /// The working map: previously cached descriptors plus newly built ones.
    pub descriptors: DescriptorMap,
    /// Number of candidate files served from the cache.
    pub reused: usize,
    /// Number of descriptors built during the run.
    pub computed: usize,
    /// Files that failed, ordered by URL.
    pub failures: Vec<FileFailure>,
    pub persistence: Persistence,
    pub cache_key: String,
}

impl RunReport {
    /// Turn a failed cache write into an error.
    pub fn ensure_persisted(&self) -> Result<()> {
        match &self.persistence {
            Persistence::Failed(cause) => Err(RepositoryError::CacheSave(
                self.cache_key.clone(),
                cause.clone(),
            )),
            Persistence::Saved | Persistence::Skipped => Ok(()),
        }
    }

    /// Human readable triage summary of the run.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(s, "reused from cache: {}", self.reused);
        let _ = writeln!(s, "newly computed: {}", self.computed);
        let _ = writeln!(s, "failed: {}", self.failures.len());

        for failure in &self.failures {
            let _ = writeln!(
                s,
                "  {} ({}): {}: {}",
                failure.filename, failure.url, failure.kind, failure.error
            );
        }

        let _ = match &self.persistence {
            Persistence::Saved => writeln!(
                s,
                "cache: saved {} descriptors to {}",
                self.descriptors.len(),
                self.cache_key
            ),
            Persistence::Skipped => writeln!(
                s,
                "cache: not written; {} descriptors exist locally only",
                self.descriptors.len()
            ),
            Persistence::Failed(cause) => writeln!(
                s,
                "cache: SAVE FAILED ({}); {} descriptors were computed but not persisted",
                cause,
                self.descriptors.len()
            ),
        };

        s
    }
}

type ProgressCallback = Box<dyn Fn(PipelineEvent) + Send + Sync>;

/// Turns vendor manifests into a persisted set of package descriptors.
pub struct DescriptorPipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn ContentFetcher>,
    inspector: Arc<dyn ArchiveInspector>,
    cache: DescriptorCache,
    progress_cb: Option<ProgressCallback>,
}

impl DescriptorPipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn ContentFetcher>,
        inspector: Arc<dyn ArchiveInspector>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = DescriptorCache::new(store, &config.cache_key);

        Self {
            config,
            fetcher,
            inspector,
            cache,
            progress_cb: None,
        }
    }

    /// Register a function receiving [PipelineEvent]s.
    pub fn set_progress_callback(&mut self, cb: impl Fn(PipelineEvent) + Send + Sync + 'static) {
        self.progress_cb = Some(Box::new(cb));
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(cb) = &self.progress_cb {
            cb(event);
        }
    }

    /// Fetch manifests and select the candidate files of the given products.
    ///
    /// Candidates are deduplicated by URL across products.
    pub async fn resolve_candidates(&self, products: &[String]) -> Result<Vec<FileRef>> {
        let mut seen = HashSet::new();
        let mut candidates = vec![];

        for product in products {
            let manifest =
                fetch_manifest(self.fetcher.as_ref(), &self.config.vendor_origin, product).await?;

            let selected = select_candidates(
                &manifest,
                &self.config.identifier_prefixes,
                &self.config.ignored_urls,
            );
            self.emit(PipelineEvent::ManifestLoaded(
                product.clone(),
                selected.len(),
            ));

            candidates.extend(
                selected
                    .into_iter()
                    .filter(|file| seen.insert(file.url.clone())),
            );
        }

        Ok(candidates)
    }

    /// Perform a run.
    ///
    /// Errors are only returned for failures fatal to the whole run. Everything
    /// else is reported in the returned [RunReport].
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let products = if options.products.is_empty() {
            self.config.products.clone()
        } else {
            options.products.clone()
        };

        if products.is_empty() {
            return Err(RepositoryError::Config("no products to process".to_string()));
        }

        let mut descriptors = self.cache.load().await;
        self.emit(PipelineEvent::CacheLoaded(descriptors.len()));

        let candidates = self.resolve_candidates(&products).await?;

        let (reuse, build): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|file| options.use_cache && descriptors.contains_key(&file.url));

        for file in &reuse {
            self.emit(PipelineEvent::DescriptorReused(file.url.clone()));
        }

        info!(
            "{} candidate files: {} cached, {} to compute",
            reuse.len() + build.len(),
            reuse.len(),
            build.len()
        );
        self.emit(PipelineEvent::DescriptorsToCompute(build.len()));

        let fetcher = self.fetcher.as_ref();
        let inspector = self.inspector.as_ref();

        let timeout = options.file_timeout;

        let fs = build.into_iter().map(|file| async move {
            let res =
                match tokio::time::timeout(timeout, build_descriptor(fetcher, inspector, &file))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => Err(RepositoryError::HttpTransport {
                        url: file.url.clone(),
                        cause: format!("no complete response within {:?}", timeout),
                    }),
                };
            (file, res)
        });

        let mut results =
            futures::stream::iter(fs).buffer_unordered(options.max_parallel_io.max(1));

        let mut computed = 0;
        let mut failures = vec![];

        while let Some((file, res)) = results.next().await {
            match res {
                Ok(descriptor) => {
                    info!("computed descriptor for {}", descriptor.url);
                    self.emit(PipelineEvent::DescriptorComputed(descriptor.url.clone()));
                    descriptors.insert(descriptor.url.clone(), descriptor);
                    computed += 1;
                }
                Err(e) => {
                    let kind = e.kind();
                    warn!("{} error for {}: {}", kind, file.url, e);
                    self.emit(PipelineEvent::DescriptorFailed(file.url.clone(), kind));

                    // Content at the URL no longer matches what the vendor declares.
                    if kind == ErrorKind::Validation && descriptors.remove(&file.url).is_some() {
                        warn!("evicted cached descriptor for {}", file.url);
                    }

                    failures.push(FileFailure {
                        filename: filename_from_url(&file.url),
                        url: file.url,
                        kind,
                        error: e,
                    });
                }
            }
        }

        failures.sort_by(|a, b| a.url.cmp(&b.url));

        let persistence = if options.upload {
            match self.cache.save(&descriptors).await {
                Ok(()) => {
                    self.emit(PipelineEvent::CacheSaved(descriptors.len()));
                    Persistence::Saved
                }
                Err(e) => {
                    error!("{}", e);
                    Persistence::Failed(match e {
                        RepositoryError::CacheSave(_, cause) => cause,
                        e => format!("{}", e),
                    })
                }
            }
        } else {
            info!("skipping cache write-back");
            Persistence::Skipped
        };

        Ok(RunReport {
            descriptors,
            reused: reuse.len(),
            computed,
            failures,
            persistence,
            cache_key: self.cache.key().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            fetch::StaticFetcher,
            inspect::{
                test::{build_deb, APP_CONTROL},
                NativeDebInspector, StaticArchiveInspector,
            },
            io::digest_data,
            manifest::manifest_url,
            store::MemoryStore,
        },
        async_trait::async_trait,
        chrono::Utc,
        futures::AsyncRead,
        std::{
            pin::Pin,
            sync::Mutex,
            task::{Context, Poll},
        },
    };

    const ORIGIN: &str = "https://vendor.example";
    const APP_URL: &str = "https://vendor.example/app_1.9.1_amd64.deb";

    fn manifest_json(files: &[(&str, String)]) -> String {
        let files = files
            .iter()
            .map(|(url, sha512)| {
                serde_json::json!({
                    "identifier": ".deb",
                    "url": url,
                    "vendorSha512": sha512,
                })
            })
            .collect::<Vec<_>>();

        serde_json::json!({
            "releases": [{
                "version": "1.9.1",
                "category": "stable",
                "releaseDate": "2022-03-01",
                "files": files,
            }]
        })
        .to_string()
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::new(ORIGIN);
        config.products = vec!["app".to_string()];
        config
    }

    struct RejectingStore;

    #[async_trait]
    impl KeyValueStore for RejectingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn put(&self, key: &str, _value: Vec<u8>) -> Result<()> {
            Err(RepositoryError::Store(key.to_string(), "quota exceeded".into()))
        }

        fn location(&self) -> String {
            "rejecting".into()
        }
    }

    /// A body that never yields any data.
    struct StalledBody;

    impl AsyncRead for StalledBody {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut [u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }
    }

    /// Serves from a [StaticFetcher] except for one URL whose body stalls.
    struct StallingFetcher {
        inner: Arc<StaticFetcher>,
        stalled_url: String,
    }

    #[async_trait]
    impl ContentFetcher for StallingFetcher {
        async fn get_url(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
            if url == self.stalled_url {
                Ok(Box::pin(StalledBody))
            } else {
                self.inner.get_url(url).await
            }
        }
    }

    fn app_fixture() -> (Arc<StaticFetcher>, String) {
        let deb = build_deb(APP_CONTROL, "gz");
        let sha512 = digest_data(&deb).sha512.digest_hex();

        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.insert(APP_URL, deb);
        fetcher.insert(
            manifest_url(ORIGIN, "app"),
            manifest_json(&[(APP_URL, sha512.to_uppercase())]),
        );

        (fetcher, sha512)
    }

    #[tokio::test]
    async fn end_to_end() -> Result<()> {
        let (fetcher, sha512) = app_fixture();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher.clone(),
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        let before = Utc::now();
        let report = pipeline.run(&RunOptions::default()).await?;
        let after = Utc::now();

        assert_eq!(report.computed, 1);
        assert_eq!(report.reused, 0);
        assert!(report.failures.is_empty());
        assert_eq!(report.persistence, Persistence::Saved);
        report.ensure_persisted()?;

        let cached = DescriptorCache::new(store, "PACKAGE_DESCRIPTORS").load().await;
        assert_eq!(cached.len(), 1);

        let descriptor = &cached[APP_URL];
        assert_eq!(descriptor.filename, "app_1.9.1_amd64.deb");
        assert_eq!(descriptor.package, "app");
        assert_eq!(descriptor.version, "1.9.1");
        assert!(descriptor.sha512.eq_ignore_ascii_case(&sha512));
        assert!(descriptor.last_verified >= before && descriptor.last_verified <= after);

        let summary = report.summary();
        assert!(summary.contains("reused from cache: 0"));
        assert!(summary.contains("newly computed: 1"));
        assert!(summary.contains("failed: 0"));

        Ok(())
    }

    #[tokio::test]
    async fn warm_cache_is_idempotent() -> Result<()> {
        let (fetcher, _) = app_fixture();
        let store = Arc::new(MemoryStore::default());

        let events = Arc::new(Mutex::new(vec![]));
        let mut pipeline = DescriptorPipeline::new(
            config(),
            fetcher.clone(),
            Arc::new(NativeDebInspector),
            store.clone(),
        );
        let events_cb = events.clone();
        pipeline.set_progress_callback(move |event| {
            events_cb.lock().unwrap().push(event.to_string());
        });

        let first = pipeline.run(&RunOptions::default()).await?;
        let first_blob = store.get("PACKAGE_DESCRIPTORS").await?;
        let requests_after_first = fetcher.request_count();

        let second = pipeline.run(&RunOptions::default()).await?;
        let second_blob = store.get("PACKAGE_DESCRIPTORS").await?;

        assert_eq!(second.reused, 1);
        assert_eq!(second.computed, 0);
        assert_eq!(first.descriptors, second.descriptors);
        assert_eq!(first_blob, second_blob);

        // Only the manifest was fetched again.
        assert_eq!(fetcher.request_count(), requests_after_first + 1);
        assert_eq!(fetcher.requests_for(APP_URL), 1);

        let events = events.lock().unwrap();
        assert!(events.contains(&format!("reusing cached descriptor for {}", APP_URL)));

        Ok(())
    }

    #[tokio::test]
    async fn force_rebuild() -> Result<()> {
        let (fetcher, _) = app_fixture();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher.clone(),
            Arc::new(NativeDebInspector),
            store,
        );

        pipeline.run(&RunOptions::default()).await?;

        let report = pipeline
            .run(&RunOptions {
                use_cache: false,
                ..Default::default()
            })
            .await?;

        assert_eq!(report.reused, 0);
        assert_eq!(report.computed, 1);
        assert_eq!(fetcher.requests_for(APP_URL), 2);

        Ok(())
    }

    #[tokio::test]
    async fn partial_failure_isolated() -> Result<()> {
        let fetcher = Arc::new(StaticFetcher::default());
        let inspector = Arc::new(StaticArchiveInspector::default());

        let mut files = vec![];
        for i in 1..=5 {
            let url = format!("{}/tool{}_1.0.{}_amd64.deb", ORIGIN, i, i);
            let data = format!("package payload {}", i).into_bytes();
            inspector.insert(
                &data,
                format!(
                    "Package: tool{}\nVersion: 1.0.{}\nArchitecture: amd64\nMaintainer: Vendor\n",
                    i, i
                ),
            );

            let sha512 = if i == 3 {
                "f".repeat(128)
            } else {
                digest_data(&data).sha512.digest_hex()
            };

            fetcher.insert(&url, data);
            files.push((url, sha512));
        }

        let manifest_files = files
            .iter()
            .map(|(url, sha512)| (url.as_str(), sha512.clone()))
            .collect::<Vec<_>>();
        fetcher.insert(manifest_url(ORIGIN, "app"), manifest_json(&manifest_files));

        let store = Arc::new(MemoryStore::default());
        let pipeline =
            DescriptorPipeline::new(config(), fetcher.clone(), inspector, store.clone());

        let report = pipeline
            .run(&RunOptions {
                max_parallel_io: 2,
                ..Default::default()
            })
            .await?;

        assert_eq!(report.computed, 4);
        assert_eq!(report.failures.len(), 1);

        let failure = &report.failures[0];
        assert_eq!(failure.url, files[2].0);
        assert_eq!(failure.filename, "tool3_1.0.3_amd64.deb");
        assert_eq!(failure.kind, ErrorKind::Validation);
        let message = format!("{}", failure.error);
        assert!(message.contains(&"f".repeat(128)));
        assert!(message.contains(&digest_data(b"package payload 3").sha512.digest_hex()));

        let cached = DescriptorCache::new(store, "PACKAGE_DESCRIPTORS").load().await;
        assert_eq!(cached.len(), 4);
        assert!(!cached.contains_key(&files[2].0));

        assert!(report.summary().contains("failed: 1"));
        assert!(report.summary().contains("tool3_1.0.3_amd64.deb"));

        Ok(())
    }

    #[tokio::test]
    async fn mismatch_is_never_cached() -> Result<()> {
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.insert(APP_URL, build_deb(APP_CONTROL, "xz"));
        fetcher.insert(
            manifest_url(ORIGIN, "app"),
            manifest_json(&[(APP_URL, "0".repeat(128))]),
        );

        let store = Arc::new(MemoryStore::default());
        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher,
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        let report = pipeline.run(&RunOptions::default()).await?;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);
        assert!(report.descriptors.is_empty());

        let cached = DescriptorCache::new(store, "PACKAGE_DESCRIPTORS").load().await;
        assert!(cached.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn save_failure_is_reported() -> Result<()> {
        let (fetcher, _) = app_fixture();

        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher,
            Arc::new(NativeDebInspector),
            Arc::new(RejectingStore),
        );

        let report = pipeline.run(&RunOptions::default()).await?;
        assert_eq!(report.computed, 1);
        assert_eq!(report.descriptors.len(), 1);
        assert!(matches!(report.persistence, Persistence::Failed(_)));
        assert_eq!(
            report.ensure_persisted().unwrap_err().kind(),
            ErrorKind::CacheSave
        );
        assert!(report.summary().contains("SAVE FAILED"));

        Ok(())
    }

    #[tokio::test]
    async fn no_upload_skips_save() -> Result<()> {
        let (fetcher, _) = app_fixture();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher,
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        let report = pipeline
            .run(&RunOptions {
                upload: false,
                ..Default::default()
            })
            .await?;

        assert_eq!(report.persistence, Persistence::Skipped);
        assert_eq!(report.descriptors.len(), 1);
        assert!(store.keys().is_empty());
        report.ensure_persisted()?;

        Ok(())
    }

    #[tokio::test]
    async fn stalled_download_times_out() -> Result<()> {
        let (fetcher, sha512) = app_fixture();

        let stalled_url = format!("{}/stalled_1.0_amd64.deb", ORIGIN);
        fetcher.insert(
            manifest_url(ORIGIN, "app"),
            manifest_json(&[(APP_URL, sha512), (stalled_url.as_str(), "a".repeat(128))]),
        );

        let store = Arc::new(MemoryStore::default());
        let pipeline = DescriptorPipeline::new(
            config(),
            Arc::new(StallingFetcher {
                inner: fetcher,
                stalled_url: stalled_url.clone(),
            }),
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        let report = pipeline
            .run(&RunOptions {
                file_timeout: Duration::from_millis(200),
                ..Default::default()
            })
            .await?;

        assert_eq!(report.computed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].url, stalled_url);
        assert_eq!(report.failures[0].kind, ErrorKind::Download);
        assert_eq!(report.persistence, Persistence::Saved);

        let cached = DescriptorCache::new(store, "PACKAGE_DESCRIPTORS").load().await;
        assert!(cached.contains_key(APP_URL));
        assert!(!cached.contains_key(&stalled_url));

        Ok(())
    }

    #[tokio::test]
    async fn rebuild_evicts_changed_content() -> Result<()> {
        let (fetcher, _) = app_fixture();
        let store = Arc::new(MemoryStore::default());

        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher.clone(),
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        pipeline.run(&RunOptions::default()).await?;
        let cache = DescriptorCache::new(store.clone(), "PACKAGE_DESCRIPTORS");
        assert!(cache.load().await.contains_key(APP_URL));

        // The vendor now declares a digest the content no longer matches.
        fetcher.insert(
            manifest_url(ORIGIN, "app"),
            manifest_json(&[(APP_URL, "b".repeat(128))]),
        );

        // Reusing the cache trusts the earlier validation.
        let report = pipeline.run(&RunOptions::default()).await?;
        assert_eq!(report.reused, 1);
        assert!(report.descriptors.contains_key(APP_URL));

        let report = pipeline
            .run(&RunOptions {
                use_cache: false,
                ..Default::default()
            })
            .await?;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);
        assert!(!report.descriptors.contains_key(APP_URL));
        assert!(!cache.load().await.contains_key(APP_URL));

        Ok(())
    }

    #[tokio::test]
    async fn manifest_failure_is_fatal() -> Result<()> {
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.insert(
            manifest_url(ORIGIN, "app"),
            manifest_json(&[("https://elsewhere.example/app.deb", "a".repeat(128))]),
        );

        let store = Arc::new(MemoryStore::default());
        let pipeline = DescriptorPipeline::new(
            config(),
            fetcher.clone(),
            Arc::new(NativeDebInspector),
            store.clone(),
        );

        let err = pipeline.run(&RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);
        assert!(store.keys().is_empty());

        let err = pipeline
            .run(&RunOptions {
                products: vec!["missing".into()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Manifest);

        Ok(())
    }
}
