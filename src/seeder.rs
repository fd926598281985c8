//! Entry-seed construction from the origin's sitemap.
//!
//! The seed set anchors both the crawl worklist and the GC's reachability
//! walk, so a page listed in the sitemap survives even while nothing links
//! to it.

use crate::extractor;
use crate::network::{FetchOutcome, HttpClient};
use crate::url_policy::PathPolicy;
use std::collections::HashSet;

pub struct SitemapSeeder<'a> {
    http: &'a HttpClient,
    policy: &'a PathPolicy,
}

impl<'a> SitemapSeeder<'a> {
    pub fn new(http: &'a HttpClient, policy: &'a PathPolicy) -> Self {
        Self { http, policy }
    }

    /// Fetch `<origin>/sitemap.xml` and flatten any `sitemap-*` children.
    ///
    /// Returns normalized same-origin page URLs. A missing or broken sitemap
    /// yields an empty seed list; that only narrows the entry set, it never
    /// fails the run.
    pub async fn seed(&self) -> Vec<String> {
        let root = match self.policy.origin().join("/sitemap.xml") {
            Ok(u) => u.to_string(),
            Err(_) => return Vec::new(),
        };

        let mut pending = vec![root];
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_locs: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        while let Some(sitemap_url) = pending.pop() {
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }

            // Unconditional GET: seeding always needs a body, a 304 would
            // leave the entry set empty.
            let body = match self.http.fetch_unconditional(&sitemap_url).await {
                FetchOutcome::Fetched { body, .. } => body,
                other => {
                    tracing::debug!("no sitemap at {}: {:?}", sitemap_url, other);
                    continue;
                }
            };

            let locs = extractor::sitemap_locs(&body);
            tracing::info!("sitemap {}: {} locs", sitemap_url, locs.len());

            for loc in locs {
                if extractor::is_sub_sitemap(&loc) {
                    pending.push(loc);
                } else if let Some(normalized) = self.policy.normalize_str(&loc) {
                    if seen_locs.insert(normalized.clone()) {
                        entries.push(normalized);
                    }
                }
            }
        }

        entries
    }
}
