//! End-to-end `build` pipeline: prompt → domains → search → per-image work → dataset.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, Span, debug, info, instrument, warn};
use uuid::Uuid;

use imageset_crawler::{ContextScraper, DiskImageFetcher, HtmlContextScraper, ImageFetcher};
use imageset_llm::{CaptionAnnotator, DomainExpander, LlmDomainExpander, VisionCaptionAnnotator};
use imageset_search::{ImageSearchClient, SerpApiSearchClient};
use imageset_shared::{
    BuildConfig, Dataset, DatasetError, DomainSpec, ImageRecord, Result, SearchHit,
};

use crate::assembler::persist_dataset;
use crate::pool::WorkerPool;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Outcome of a completed build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub run_id: Uuid,
    /// Queries sent to the search provider.
    pub queries: usize,
    /// Queries whose search failed and contributed nothing.
    pub failed_queries: usize,
    /// Search hits across all queries.
    pub hits: usize,
    /// Images kept in the dataset.
    pub images: usize,
    pub metadata_path: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the prompt has been expanded.
    fn domains_expanded(&self, domains: &[DomainSpec]);
    /// Called after a query's search returned.
    fn query_searched(&self, domain: &str, query: &str, hits: usize);
    /// Called when a query's search failed; the build continues.
    fn query_failed(&self, query: &str, error: &str);
    /// Called after every hit of a query went through the per-image pipeline.
    fn images_processed(&self, query: &str, kept: usize, hits: usize);
    /// Called when the build completes.
    fn done(&self, summary: &BuildSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn domains_expanded(&self, _domains: &[DomainSpec]) {}
    fn query_searched(&self, _domain: &str, _query: &str, _hits: usize) {}
    fn query_failed(&self, _query: &str, _error: &str) {}
    fn images_processed(&self, _query: &str, _kept: usize, _hits: usize) {}
    fn done(&self, _summary: &BuildSummary) {}
}

// ---------------------------------------------------------------------------
// DatasetBuilder
// ---------------------------------------------------------------------------

/// The pipeline stages a builder drives.
#[derive(Clone)]
pub struct Services {
    pub expander: Arc<dyn DomainExpander>,
    pub search: Arc<dyn ImageSearchClient>,
    pub scraper: Arc<dyn ContextScraper>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub annotator: Arc<dyn CaptionAnnotator>,
}

impl Services {
    /// Production implementations: OpenAI-compatible LLM, SerpApi, HTTP scraping
    /// and on-disk image storage under `config.images_dir()`.
    pub fn from_config(config: &BuildConfig) -> Result<Self> {
        Ok(Self {
            expander: Arc::new(LlmDomainExpander::new(&config.llm)?),
            search: Arc::new(SerpApiSearchClient::new(&config.search)?),
            scraper: Arc::new(HtmlContextScraper::new(&config.http)?),
            fetcher: Arc::new(DiskImageFetcher::new(config.images_dir(), &config.http)?),
            annotator: Arc::new(VisionCaptionAnnotator::new(&config.llm, &config.http)?),
        })
    }
}

/// Builds image datasets from prompts.
pub struct DatasetBuilder {
    config: BuildConfig,
    services: Services,
}

#[derive(Debug, Default)]
struct BuildStats {
    queries: usize,
    failed_queries: usize,
    hits: usize,
}

impl DatasetBuilder {
    pub fn new(config: BuildConfig, services: Services) -> Self {
        Self { config, services }
    }

    /// Wire the production services for `config`.
    pub fn from_config(config: BuildConfig) -> Result<Self> {
        let services = Services::from_config(&config)?;
        Ok(Self::new(config, services))
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run the full pipeline for `prompt` and persist the result.
    ///
    /// 1. Expand the prompt into domains and queries (failure aborts the build)
    /// 2. Search each query in order; a failed search skips that query
    /// 3. Fan the hits of each query out to a worker pool
    /// 4. Assemble, validate and write `metadata.json`
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn build(&self, prompt: &str, progress: &dyn ProgressReporter) -> Result<Dataset> {
        let start = Instant::now();
        let run_id = Uuid::now_v7();
        Span::current().record("run_id", tracing::field::display(run_id));

        if prompt.trim().is_empty() {
            return Err(DatasetError::validation("prompt must not be empty"));
        }

        info!(
            prompt = %prompt,
            workers = self.config.max_concurrent_downloads,
            max_images = self.config.search.max_results,
            "starting dataset build"
        );

        // --- Phase 1: Expand prompt ---
        progress.phase("Analyzing prompt");
        let domains = self.services.expander.expand(prompt).await?;
        progress.domains_expanded(&domains);

        // --- Phase 2: Search and process hits ---
        let mut stats = BuildStats::default();
        let mut images: Vec<ImageRecord> = Vec::new();

        for spec in &domains {
            for query in &spec.queries {
                stats.queries += 1;
                progress.phase(&format!("Searching \"{query}\""));

                let hits = match self.services.search.search(query).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!(domain = %spec.domain, query = %query, error = %e, "search failed, skipping query");
                        stats.failed_queries += 1;
                        progress.query_failed(query, &e.to_string());
                        continue;
                    }
                };

                let hit_count = hits.len();
                stats.hits += hit_count;
                progress.query_searched(&spec.domain, query, hit_count);

                let kept = self.process_hits(hits, &spec.domain).await;
                debug!(query = %query, hits = hit_count, kept = kept.len(), "query processed");
                progress.images_processed(query, kept.len(), hit_count);
                images.extend(kept);
            }
        }

        // --- Phase 3: Assemble and persist ---
        progress.phase("Writing metadata");
        let dataset = Dataset::assemble(prompt, &domains, images);
        let metadata_path = persist_dataset(&self.config.output_root, &dataset)?;

        let summary = BuildSummary {
            run_id,
            queries: stats.queries,
            failed_queries: stats.failed_queries,
            hits: stats.hits,
            images: dataset.images().len(),
            metadata_path,
            elapsed: start.elapsed(),
        };
        progress.done(&summary);

        info!(
            domains = dataset.metadata().domains.len(),
            queries = summary.queries,
            failed_queries = summary.failed_queries,
            hits = summary.hits,
            images = summary.images,
            elapsed_ms = summary.elapsed.as_millis(),
            "dataset build complete"
        );

        Ok(dataset)
    }

    /// Run the per-image pipeline over one query's hits.
    async fn process_hits(&self, hits: Vec<SearchHit>, domain: &str) -> Vec<ImageRecord> {
        let pool = WorkerPool::new(self.config.max_concurrent_downloads);
        let services = self.services.clone();
        let domain: Arc<str> = Arc::from(domain);
        let span = Span::current();

        pool.run(hits, move |hit| {
            let services = services.clone();
            let domain = Arc::clone(&domain);
            async move { process_hit(&services, hit, &domain).await }.instrument(span.clone())
        })
        .await
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Scrape context, then download, then caption. `None` when the download failed.
#[instrument(skip_all, fields(url = %hit.image_url))]
async fn process_hit(services: &Services, hit: SearchHit, domain: &str) -> Option<ImageRecord> {
    let context = services.scraper.extract_context(&hit.source_page_url).await;
    let record = ImageRecord::new(&hit, domain, context);

    let Some(local_path) = services.fetcher.fetch_and_store(&hit.image_url).await else {
        debug!("image dropped");
        return None;
    };

    let caption = services.annotator.caption(&hit.image_url, &record.context).await;
    Some(record.with_local_path(local_path).with_caption(caption))
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use imageset_shared::{AppConfig, BuildOverrides};

    use super::*;

    // -- Fakes --------------------------------------------------------------

    struct FakeExpander(std::result::Result<Vec<DomainSpec>, String>);

    #[async_trait]
    impl DomainExpander for FakeExpander {
        async fn expand(&self, _prompt: &str) -> Result<Vec<DomainSpec>> {
            self.0.clone().map_err(DatasetError::analysis)
        }
    }

    #[derive(Default)]
    struct FakeSearch {
        hits: HashMap<String, Vec<SearchHit>>,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageSearchClient for FakeSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
            self.calls.lock().unwrap().push(query.to_string());
            if self.failing.contains(query) {
                return Err(DatasetError::search(format!("provider rejected '{query}'")));
            }
            Ok(self.hits.get(query).cloned().unwrap_or_default())
        }
    }

    struct FakeScraper;

    #[async_trait]
    impl ContextScraper for FakeScraper {
        async fn extract_context(&self, url: &Url) -> String {
            format!("context of {}", url.path())
        }
    }

    struct FakeFetcher {
        dir: PathBuf,
        failing: HashSet<Url>,
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch_and_store(&self, image_url: &Url) -> Option<PathBuf> {
            if self.failing.contains(image_url) {
                return None;
            }
            Some(self.dir.join(imageset_crawler::file_name_for(image_url)))
        }
    }

    #[derive(Default)]
    struct FakeAnnotator {
        failing: HashSet<Url>,
    }

    #[async_trait]
    impl CaptionAnnotator for FakeAnnotator {
        async fn caption(&self, image_url: &Url, context: &str) -> String {
            if self.failing.contains(image_url) {
                return String::new();
            }
            format!("{} ({context})", image_url.path())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase:{name}"));
        }
        fn domains_expanded(&self, domains: &[DomainSpec]) {
            self.events.lock().unwrap().push(format!("domains:{}", domains.len()));
        }
        fn query_searched(&self, _domain: &str, query: &str, hits: usize) {
            self.events.lock().unwrap().push(format!("searched:{query}:{hits}"));
        }
        fn query_failed(&self, query: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("failed:{query}"));
        }
        fn images_processed(&self, query: &str, kept: usize, hits: usize) {
            self.events.lock().unwrap().push(format!("processed:{query}:{kept}/{hits}"));
        }
        fn done(&self, summary: &BuildSummary) {
            self.events.lock().unwrap().push(format!("done:{}", summary.images));
        }
    }

    // -- Helpers ------------------------------------------------------------

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("imageset-pipeline-test-{}", Uuid::now_v7()))
    }

    fn config(root: &Path, workers: usize) -> BuildConfig {
        let overrides = BuildOverrides {
            output_dir: Some(root.to_path_buf()),
            max_concurrent_downloads: Some(workers),
            ..Default::default()
        };
        BuildConfig::resolve_with_env(&AppConfig::default(), &overrides, |_| {
            Some("test-key".to_string())
        })
        .unwrap()
    }

    fn hit(name: &str) -> SearchHit {
        SearchHit {
            image_url: Url::parse(&format!("https://img.example.com/{name}.png")).unwrap(),
            source_page_url: Url::parse(&format!("https://pages.example.com/{name}")).unwrap(),
        }
    }

    fn services(
        root: &Path,
        domains: Vec<DomainSpec>,
        search: FakeSearch,
        fetch_failures: &[&SearchHit],
        caption_failures: &[&SearchHit],
    ) -> Services {
        Services {
            expander: Arc::new(FakeExpander(Ok(domains))),
            search: Arc::new(search),
            scraper: Arc::new(FakeScraper),
            fetcher: Arc::new(FakeFetcher {
                dir: root.join("images"),
                failing: fetch_failures.iter().map(|h| h.image_url.clone()).collect(),
            }),
            annotator: Arc::new(FakeAnnotator {
                failing: caption_failures.iter().map(|h| h.image_url.clone()).collect(),
            }),
        }
    }

    // -- Tests --------------------------------------------------------------

    #[tokio::test]
    async fn solar_panel_end_to_end() {
        let root = temp_root();
        let (a, b) = (hit("a"), hit("b"));
        let search = FakeSearch {
            hits: HashMap::from([("solar panel types".to_string(), vec![a.clone(), b.clone()])]),
            ..Default::default()
        };
        let domains = vec![DomainSpec::new("solar-energy", vec!["solar panel types".into()])];
        let builder = DatasetBuilder::new(config(&root, 5), services(&root, domains, search, &[&b], &[]));

        let dataset = builder.build("solar panel types", &SilentProgress).await.unwrap();

        assert_eq!(dataset.metadata().total_images, 1);
        assert_eq!(dataset.metadata().domains, vec!["solar-energy".to_string()]);
        assert_eq!(dataset.metadata().prompt, "solar panel types");

        let record = &dataset.images()[0];
        assert_eq!(record.image_url, a.image_url);
        assert_eq!(record.domain, "solar-energy");
        assert_eq!(record.context, "context of /a");
        assert!(record.local_path.is_some());
        assert!(!record.caption.as_deref().unwrap_or_default().is_empty());

        let persisted = crate::assembler::load_dataset(&root).unwrap();
        assert_eq!(persisted, dataset);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_caption_keeps_record_with_empty_caption() {
        let root = temp_root();
        let a = hit("a");
        let search = FakeSearch {
            hits: HashMap::from([("q".to_string(), vec![a.clone()])]),
            ..Default::default()
        };
        let domains = vec![DomainSpec::new("d", vec!["q".into()])];
        let builder = DatasetBuilder::new(config(&root, 2), services(&root, domains, search, &[], &[&a]));

        let dataset = builder.build("p", &SilentProgress).await.unwrap();
        assert_eq!(dataset.images().len(), 1);
        assert_eq!(dataset.images()[0].caption.as_deref(), Some(""));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn domains_listed_even_without_images() {
        let root = temp_root();
        let search = FakeSearch {
            hits: HashMap::from([("cats".to_string(), vec![hit("cat")])]),
            failing: HashSet::from(["dogs".to_string()]),
            ..Default::default()
        };
        let domains = vec![
            DomainSpec::new("felines", vec!["cats".into()]),
            DomainSpec::new("canines", vec!["dogs".into()]),
            DomainSpec::new("birds", vec!["nothing here".into()]),
        ];
        let builder = DatasetBuilder::new(config(&root, 3), services(&root, domains, search, &[], &[]));

        let progress = RecordingProgress::default();
        let dataset = builder.build("pets", &progress).await.unwrap();

        assert_eq!(dataset.metadata().domains, vec!["felines", "canines", "birds"]);
        assert_eq!(dataset.metadata().total_images, 1);
        assert!(dataset.images().iter().all(|r| r.domain == "felines"));

        let events = progress.events.lock().unwrap().clone();
        assert!(events.contains(&"failed:dogs".to_string()));
        assert!(events.contains(&"searched:nothing here:0".to_string()));
        assert!(events.contains(&"processed:cats:1/1".to_string()));
        assert_eq!(events.last().unwrap(), "done:1");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn queries_searched_in_input_order() {
        let root = temp_root();
        let search = Arc::new(FakeSearch::default());
        let domains = vec![
            DomainSpec::new("one", vec!["q1".into(), "q2".into()]),
            DomainSpec::new("two", vec!["q3".into()]),
        ];
        let mut svc = services(&root, domains, FakeSearch::default(), &[], &[]);
        svc.search = search.clone();

        let builder = DatasetBuilder::new(config(&root, 1), svc);
        builder.build("p", &SilentProgress).await.unwrap();

        assert_eq!(*search.calls.lock().unwrap(), vec!["q1", "q2", "q3"]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn expansion_failure_writes_nothing() {
        let root = temp_root();
        let search = Arc::new(FakeSearch::default());
        let mut svc = services(&root, vec![], FakeSearch::default(), &[], &[]);
        svc.expander = Arc::new(FakeExpander(Err("model unavailable".into())));
        svc.search = search.clone();

        let builder = DatasetBuilder::new(config(&root, 5), svc);
        let err = builder.build("anything", &SilentProgress).await.unwrap_err();

        assert!(matches!(err, DatasetError::Analysis(_)));
        assert!(!root.join("metadata.json").exists());
        assert!(search.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_rejected() {
        let root = temp_root();
        let builder = DatasetBuilder::new(
            config(&root, 5),
            services(&root, vec![], FakeSearch::default(), &[], &[]),
        );
        let err = builder.build("  ", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, DatasetError::Validation { .. }));
        assert!(!root.join("metadata.json").exists());
    }

    #[tokio::test]
    async fn worker_count_does_not_change_result() {
        let hits: Vec<SearchHit> = (0..12).map(|n| hit(&format!("img{n}"))).collect();
        let dropped: Vec<&SearchHit> = hits.iter().step_by(4).collect();
        let domains = vec![DomainSpec::new("d", vec!["q".into()])];

        let mut outcomes = Vec::new();
        for workers in [1, 5] {
            let root = temp_root();
            let search = FakeSearch {
                hits: HashMap::from([("q".to_string(), hits.clone())]),
                ..Default::default()
            };
            let builder = DatasetBuilder::new(
                config(&root, workers),
                services(&root, domains.clone(), search, &dropped, &[]),
            );
            let dataset = builder.build("p", &SilentProgress).await.unwrap();

            let mut records: Vec<(String, Option<String>)> = dataset
                .images()
                .iter()
                .map(|r| (r.image_url.to_string(), r.caption.clone()))
                .collect();
            records.sort();
            outcomes.push((dataset.metadata().total_images, records));

            let _ = std::fs::remove_dir_all(&root);
        }

        assert_eq!(outcomes[0].0, 9);
        assert_eq!(outcomes[0], outcomes[1]);
    }
}
