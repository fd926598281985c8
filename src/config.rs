use std::path::PathBuf;
use url::Url;

pub struct Config;

impl Config {
    pub const DEFAULT_CONCURRENCY: usize = 10;
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    pub const CACHE_DIR: &'static str = ".gssg-cache";
    pub const VALIDATOR_MANIFEST: &'static str = "manifest.json";
    pub const GRAPH_MANIFEST: &'static str = "graph.json";

    pub const VALIDATOR_RETENTION_DAYS: i64 = 30;
    pub const PREVIEW_PORT: u16 = 8080;
}

/// Runtime settings for one mirror run, assembled from the CLI by `main`.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Source origin; every crawled URL lives under it.
    pub origin: Url,
    /// Recorded for the post-processors that rewrite text files after the run.
    pub production_domain: Option<Url>,
    /// Output root for the mirrored tree.
    pub dest: PathBuf,
    /// Directory holding the two JSON manifests.
    pub cache_dir: PathBuf,
    /// In-flight fetch cap.
    pub concurrency: usize,
    /// Path prefixes whose files are saved verbatim, without index.html synthesis.
    pub raw_prefixes: Vec<String>,
    /// Relative paths under dest that the GC must never consider for deletion.
    pub ignored_paths: Vec<String>,
    /// Assets fetched every run even when nothing links to them.
    pub extra_assets: Vec<String>,
    /// Substring patterns for 404s that are expected and not reported.
    pub not_found_allowlist: Vec<String>,
    pub user_agent: String,
    pub fail_on_error: bool,
}

impl MirrorConfig {
    pub fn new(origin: Url, dest: PathBuf) -> Self {
        Self {
            origin,
            production_domain: None,
            dest,
            cache_dir: PathBuf::from(Config::CACHE_DIR),
            concurrency: Config::DEFAULT_CONCURRENCY,
            raw_prefixes: vec![
                "content/files/".to_string(),
                "content/media/".to_string(),
                "content/images/".to_string(),
            ],
            // CNAME and 404.html are produced by the deploy scripts, not the origin.
            ignored_paths: vec!["CNAME".to_string(), "404.html".to_string()],
            extra_assets: vec![
                "robots.txt".to_string(),
                "favicon.ico".to_string(),
                "sitemap.xml".to_string(),
            ],
            not_found_allowlist: Vec::new(),
            user_agent: format!("gssg/{}", env!("CARGO_PKG_VERSION")),
            fail_on_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MirrorConfig::new(
            Url::parse("https://blog.example.com").unwrap(),
            PathBuf::from("static"),
        );
        assert_eq!(cfg.concurrency, Config::DEFAULT_CONCURRENCY);
        assert!(cfg.raw_prefixes.iter().any(|p| p == "content/media/"));
        assert!(cfg.ignored_paths.contains(&"CNAME".to_string()));
    }
}
