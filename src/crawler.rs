//! Worklist-driven crawl scheduler.
//!
//! One crawler instance owns all run state. Workers perform only the HTTP
//! fetch (plus the 304-against-missing-file repair); every disk write, graph
//! mutation, and enqueue happens on the scheduler task when a worker's
//! result is joined, so no two components ever race on shared state.

use crate::config::{Config, MirrorConfig};
use crate::extractor::{self, ExtractedLinks};
use crate::gc::{self, GcStats};
use crate::link_graph::{GraphError, GraphNode, LinkGraph};
use crate::network::{self, FetchError, FetchOutcome, HttpClient};
use crate::seeder::SitemapSeeder;
use crate::url_policy::PathPolicy;
use crate::validator_cache::{CacheError, ValidatorCache};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::task::JoinSet;
use url::Url;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] FetchError),

    #[error("validator cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("link graph error: {0}")]
    Graph(#[from] GraphError),
}

/// One failed fetch, kept for the end-of-run report.
#[derive(Debug, Clone)]
pub struct CrawlError {
    pub url: String,
    /// HTTP status, or 0 for a transport-level failure.
    pub status: u16,
    pub referrer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for CrawlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, &self.referrer) {
            (0, Some(r)) => write!(f, "{} (transport error, linked from {})", self.url, r),
            (0, None) => write!(f, "{} (transport error)", self.url),
            (s, Some(r)) => write!(f, "{} ({}, linked from {})", self.url, s, r),
            (s, None) => write!(f, "{} ({})", self.url, s),
        }
    }
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    /// URLs whose fetch attempt completed, any outcome.
    pub crawled: usize,
    /// Bodies written (or elided as identical feeds) this run.
    pub written: usize,
    /// 304 responses carried forward.
    pub unchanged: usize,
    pub errors: Vec<CrawlError>,
    pub disk_errors: usize,
    pub gc: GcStats,
}

impl CrawlReport {
    /// A run fails on any disk write error, or on remaining crawl errors
    /// when the caller asked for that.
    pub fn failed(&self, fail_on_error: bool) -> bool {
        self.disk_errors > 0 || (fail_on_error && !self.errors.is_empty())
    }
}

/// Result a worker hands back to the scheduler.
struct WorkItem {
    url: String,
    referrer: Option<String>,
    outcome: FetchOutcome,
}

fn last_build_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<lastBuildDate>.*?</lastBuildDate>").expect("valid regex")
    })
}

/// RSS endpoints re-render `<lastBuildDate>` on every request.
fn is_feed(url: &str) -> bool {
    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
    path.contains("/rss/") || path.ends_with("/rss")
}

fn blank_last_build_date(body: &str) -> String {
    last_build_date_re()
        .replace_all(body, "<lastBuildDate></lastBuildDate>")
        .into_owned()
}

/// True when old and new feed bodies differ only in their build timestamp.
fn feed_unchanged(old: &[u8], new: &[u8]) -> bool {
    blank_last_build_date(&String::from_utf8_lossy(old))
        == blank_last_build_date(&String::from_utf8_lossy(new))
}

fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

pub struct Crawler {
    config: MirrorConfig,
    policy: PathPolicy,
    http: HttpClient,
    cache: Arc<Mutex<ValidatorCache>>,
    old_graph: LinkGraph,
    new_graph: LinkGraph,

    queued: VecDeque<(String, Option<String>)>,
    /// Everything ever enqueued; enforces at-most-once fetch per URL.
    seen: HashSet<String>,
    /// Authoritative entry set, retained as the GC seed.
    entries: HashSet<String>,

    errors: Vec<CrawlError>,
    disk_errors: usize,
    written: usize,
    unchanged: usize,
    crawled: usize,
}

impl Crawler {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        std::fs::create_dir_all(&config.dest)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        let policy = PathPolicy::new(
            config.origin.clone(),
            config.raw_prefixes.clone(),
            config.ignored_paths.clone(),
        );

        let cache = Arc::new(Mutex::new(ValidatorCache::load(
            &config.cache_dir.join(Config::VALIDATOR_MANIFEST),
        )));
        let graph_path = config.cache_dir.join(Config::GRAPH_MANIFEST);
        let old_graph = LinkGraph::load(&graph_path);
        let new_graph = LinkGraph::empty(&graph_path);

        let http = HttpClient::new(
            &config.user_agent,
            Config::REQUEST_TIMEOUT_SECS,
            Arc::clone(&cache),
        )?;

        Ok(Self {
            config,
            policy,
            http,
            cache,
            old_graph,
            new_graph,
            queued: VecDeque::new(),
            seen: HashSet::new(),
            entries: HashSet::new(),
            errors: Vec::new(),
            disk_errors: 0,
            written: 0,
            unchanged: 0,
            crawled: 0,
        })
    }

    /// Run the full mirror: seed, crawl to quiescence, GC, persist caches.
    pub async fn run(mut self) -> Result<CrawlReport, MirrorError> {
        self.seed().await;
        self.crawl_loop().await;

        tracing::info!(
            "crawl settled: {} fetched, {} unchanged, {} errors",
            self.written,
            self.unchanged,
            self.errors.len()
        );

        let stats = gc::collect(
            &self.config.dest,
            &self.policy,
            &self.new_graph,
            &self.entries,
        );

        {
            let mut cache = self.cache.lock();
            let expired = cache.expire(Config::VALIDATOR_RETENTION_DAYS);
            if expired > 0 {
                tracing::info!("expired {} stale validator entries", expired);
            }
            cache.save()?;
        }
        self.new_graph.save()?;

        Ok(CrawlReport {
            crawled: self.crawled,
            written: self.written,
            unchanged: self.unchanged,
            errors: self.errors,
            disk_errors: self.disk_errors,
            gc: stats,
        })
    }

    /// Register the entry seed: root, explicit assets, sitemap contents.
    async fn seed(&mut self) {
        let root = self.policy.normalize(&self.config.origin);
        self.register_entry(root);

        for asset in self.config.extra_assets.clone() {
            if let Some(url) = self
                .config
                .origin
                .join(&asset)
                .ok()
                .and_then(|u| self.policy.normalize_str(u.as_str()))
            {
                self.register_entry(url);
            }
        }

        let sitemap_entries = SitemapSeeder::new(&self.http, &self.policy).seed().await;
        tracing::info!("seeded {} URLs from sitemap", sitemap_entries.len());
        for url in sitemap_entries {
            self.register_entry(url);
        }
    }

    fn register_entry(&mut self, url: String) {
        self.entries.insert(url.clone());
        self.enqueue(url, None);
    }

    fn enqueue(&mut self, url: String, referrer: Option<String>) {
        if self.seen.insert(url.clone()) {
            self.queued.push_back((url, referrer));
        }
    }

    /// Drain the worklist with at most `concurrency` fetches in flight.
    async fn crawl_loop(&mut self) {
        let mut inflight: JoinSet<WorkItem> = JoinSet::new();

        loop {
            while inflight.len() < self.config.concurrency {
                let Some((url, referrer)) = self.queued.pop_front() else {
                    break;
                };
                let Some(out_path) = self
                    .policy
                    .url_to_path(&url)
                    .map(|rel| self.config.dest.join(rel))
                else {
                    continue;
                };

                let http = self.http.clone();
                inflight.spawn(fetch_worker(http, url, referrer, out_path));
            }

            match inflight.join_next().await {
                Some(Ok(item)) => {
                    self.crawled += 1;
                    self.process(item).await;
                }
                Some(Err(e)) => {
                    tracing::warn!("fetch task aborted: {}", e);
                }
                None => {
                    if self.queued.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    async fn process(&mut self, item: WorkItem) {
        match item.outcome {
            FetchOutcome::NotModified => {
                self.unchanged += 1;
                self.carry_forward(&item.url);
            }
            FetchOutcome::Fetched {
                body, content_type, ..
            } => {
                self.handle_fetched(item.url, body, content_type).await;
            }
            FetchOutcome::Gone => {
                if self
                    .config
                    .not_found_allowlist
                    .iter()
                    .any(|pat| item.url.contains(pat.as_str()))
                {
                    tracing::debug!("allowlisted 404: {}", item.url);
                } else {
                    self.record_error(item.url, 404, item.referrer);
                }
            }
            FetchOutcome::HttpError(status) => {
                self.record_error(item.url, status, item.referrer);
            }
            FetchOutcome::Transport(reason) => {
                tracing::warn!("transport failure for {}: {}", item.url, reason);
                self.record_error(item.url, 0, item.referrer);
            }
        }
    }

    /// A 304 keeps last run's node and re-walks its children, so unchanged
    /// subtrees stay connected without transferring a byte.
    fn carry_forward(&mut self, url: &str) {
        let Some(node) = self.old_graph.node(url).cloned() else {
            return;
        };
        for target in node.links.iter().chain(node.resources.iter()) {
            self.enqueue(target.clone(), Some(url.to_string()));
        }
        self.new_graph.insert(node);
    }

    async fn handle_fetched(&mut self, url: String, body: Vec<u8>, content_type: Option<String>) {
        let Some(rel) = self.policy.url_to_path(&url) else {
            return;
        };
        let out_path = self.config.dest.join(rel);

        self.write_body(&url, &out_path, &body).await;

        self.cache
            .lock()
            .update(&url, None, None, Some(sha256_hex(&body)));

        let ct = content_type.as_deref().map(|s| s.to_ascii_lowercase());
        let ct = ct.as_deref();
        if network::is_binary(ct, &url) {
            return;
        }

        let Ok(base) = Url::parse(&url) else { return };
        let text = String::from_utf8_lossy(&body);

        if is_css(ct, &url) {
            let resources = extractor::extract_css(&text, &base, &self.policy);
            self.record_node(url, ExtractedLinks {
                links: Vec::new(),
                resources,
            });
        } else if is_html(ct, &url) {
            let extracted = extractor::extract_html(&text, &base, &self.policy);
            self.record_node(url, extracted);
        } else if extractor::looks_like_sitemap(&body) {
            // URLs listed by a sitemap are entry seeds, not graph edges.
            // Sub-sitemaps become entries too: their mirrored files must
            // survive GC, and fetching them flattens their own contents.
            for loc in extractor::sitemap_locs(&body) {
                if let Some(normalized) = self.policy.normalize_str(&loc) {
                    self.register_entry(normalized);
                }
            }
        }
    }

    async fn write_body(&mut self, url: &str, out_path: &PathBuf, body: &[u8]) {
        // Feeds whose only change is the build timestamp keep their old file.
        if is_feed(url) {
            if let Ok(existing) = tokio::fs::read(out_path).await {
                if feed_unchanged(&existing, body) {
                    tracing::debug!("feed unchanged after blanking, keeping {}", out_path.display());
                    self.written += 1;
                    return;
                }
            }
        }

        let result = async {
            if let Some(parent) = out_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(out_path, body).await
        }
        .await;

        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                tracing::error!("failed to write {}: {}", out_path.display(), e);
                self.disk_errors += 1;
            }
        }
    }

    fn record_node(&mut self, url: String, extracted: ExtractedLinks) {
        for target in extracted.links.iter().chain(extracted.resources.iter()) {
            self.enqueue(target.clone(), Some(url.clone()));
        }
        self.new_graph
            .insert(GraphNode::new(url, extracted.links, extracted.resources));
    }

    fn record_error(&mut self, url: String, status: u16, referrer: Option<String>) {
        self.errors.push(CrawlError {
            url,
            status,
            referrer,
            timestamp: Utc::now(),
        });
    }
}

/// Fetch one URL. On a 304 whose file is gone from disk, the validator entry
/// is stale: drop it and retry once unconditionally, then report that result
/// as if it were the first response.
async fn fetch_worker(
    http: HttpClient,
    url: String,
    referrer: Option<String>,
    out_path: PathBuf,
) -> WorkItem {
    let mut outcome = http.fetch(&url).await;

    if matches!(outcome, FetchOutcome::NotModified) {
        let on_disk = tokio::fs::try_exists(&out_path).await.unwrap_or(false);
        if !on_disk {
            tracing::info!("304 for {} but {} is missing, refetching", url, out_path.display());
            http.forget(&url);
            outcome = http.fetch_unconditional(&url).await;
        }
    }

    WorkItem {
        url,
        referrer,
        outcome,
    }
}

fn is_css(content_type: Option<&str>, url: &str) -> bool {
    if content_type.is_some_and(|ct| ct.contains("text/css")) {
        return true;
    }
    Url::parse(url)
        .map(|u| u.path().ends_with(".css"))
        .unwrap_or(false)
}

fn is_html(content_type: Option<&str>, url: &str) -> bool {
    if let Some(ct) = content_type {
        return ct.contains("text/html") || ct.contains("application/xhtml");
    }
    // No content type: fall back to the URL shape.
    Url::parse(url)
        .map(|u| {
            let path = u.path();
            path.ends_with('/') || path.ends_with(".html")
        })
        .unwrap_or(false)
}

/// Convenience entry point used by `main` and the integration tests.
pub async fn run_mirror(config: MirrorConfig) -> Result<CrawlReport, MirrorError> {
    Crawler::new(config)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_feed() {
        assert!(is_feed("https://blog.example.com/rss/"));
        assert!(is_feed("https://blog.example.com/tags/news/rss"));
        assert!(is_feed("https://blog.example.com/rss/feed.xml"));
        assert!(!is_feed("https://blog.example.com/press/"));
    }

    #[test]
    fn test_blank_last_build_date() {
        let feed = "<rss><channel><lastBuildDate>Tue, 07 May 2024 10:00:00 GMT</lastBuildDate></channel></rss>";
        assert_eq!(
            blank_last_build_date(feed),
            "<rss><channel><lastBuildDate></lastBuildDate></channel></rss>"
        );
    }

    #[test]
    fn test_feed_unchanged_ignores_build_date_only() {
        let a = b"<rss><lastBuildDate>Mon, 01 Jan 2024 00:00:00 GMT</lastBuildDate><item>x</item></rss>";
        let b = b"<rss><lastBuildDate>Tue, 02 Jan 2024 00:00:00 GMT</lastBuildDate><item>x</item></rss>";
        let c = b"<rss><lastBuildDate>Tue, 02 Jan 2024 00:00:00 GMT</lastBuildDate><item>y</item></rss>";
        assert!(feed_unchanged(a, b));
        assert!(!feed_unchanged(a, c));
    }

    #[test]
    fn test_content_type_routing() {
        assert!(is_css(Some("text/css; charset=utf-8"), "https://x.example/a"));
        assert!(is_css(None, "https://x.example/style.css"));
        assert!(is_html(Some("text/html"), "https://x.example/a.pdf"));
        assert!(is_html(None, "https://x.example/about/"));
        assert!(!is_html(Some("application/xml"), "https://x.example/about/"));
    }

    #[test]
    fn test_error_display() {
        let e = CrawlError {
            url: "https://blog.example.com/x/".to_string(),
            status: 404,
            referrer: Some("https://blog.example.com/".to_string()),
            timestamp: Utc::now(),
        };
        assert_eq!(
            e.to_string(),
            "https://blog.example.com/x/ (404, linked from https://blog.example.com/)"
        );
    }
}
