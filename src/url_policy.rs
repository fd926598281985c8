//! Bidirectional mapping between origin URLs and on-disk relative paths.
//!
//! `url_to_path` is total over normalized same-origin URLs; `path_to_url` is
//! partial and rejects files the policy does not own (hidden files, ignored
//! paths, extensionless files outside the raw subtrees).

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use url::Url;

/// Filenames carrying an encoded `?v=` token: `<stem>.<hextoken>.<ext>`.
fn versioned_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)\.([0-9a-f]+)\.([A-Za-z0-9]+)$").expect("valid regex"))
}

#[derive(Debug, Clone)]
pub struct PathPolicy {
    origin: Url,
    raw_prefixes: Vec<String>,
    ignored_paths: Vec<String>,
}

impl PathPolicy {
    pub fn new(origin: Url, raw_prefixes: Vec<String>, ignored_paths: Vec<String>) -> Self {
        Self {
            origin,
            raw_prefixes,
            ignored_paths,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Origin as a string without the trailing slash, for joining paths onto.
    fn origin_base(&self) -> &str {
        self.origin.as_str().trim_end_matches('/')
    }

    fn is_raw(&self, rel_path: &str) -> bool {
        let rel = rel_path.trim_start_matches('/');
        self.raw_prefixes.iter().any(|p| rel.starts_with(p.as_str()))
    }

    pub fn same_origin(&self, u: &Url) -> bool {
        u.origin() == self.origin.origin()
    }

    /// Canonical string key for a URL.
    ///
    /// Fragment dropped, `/index.html` folded to `/`, and extensionless paths
    /// outside the raw subtrees gain a trailing slash. Query preserved.
    pub fn normalize(&self, u: &Url) -> String {
        let mut u = u.clone();
        u.set_fragment(None);

        let mut path = u.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if path.ends_with("/index.html") {
            path.truncate(path.len() - "index.html".len());
        }
        if !path.ends_with('/') {
            let last = path.rsplit('/').next().unwrap_or("");
            if !last.contains('.') && !self.is_raw(&path) {
                path.push('/');
            }
        }
        u.set_path(&path);
        u.to_string()
    }

    /// Parse, check origin, and normalize in one step.
    pub fn normalize_str(&self, raw: &str) -> Option<String> {
        let u = Url::parse(raw).ok()?;
        if !self.same_origin(&u) {
            return None;
        }
        Some(self.normalize(&u))
    }

    /// Map a same-origin URL to its relative output path.
    ///
    /// Returns `None` for cross-origin or unparseable input.
    pub fn url_to_path(&self, url: &str) -> Option<PathBuf> {
        let u = Url::parse(url).ok()?;
        if !self.same_origin(&u) {
            return None;
        }

        let version_token = u
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned());

        let mut rel = u.path().trim_start_matches('/').to_string();
        if rel.is_empty() {
            rel.push_str("index.html");
        } else if rel.ends_with('/') {
            rel.push_str("index.html");
        } else {
            let last = rel.rsplit('/').next().unwrap_or("");
            if !last.contains('.') && !self.is_raw(&rel) {
                rel.push_str("/index.html");
            }
        }

        // `?v=<token>` moves into the filename: style.css?v=abc -> style.abc.css
        if let Some(token) = version_token {
            if let Some(dot) = rel.rfind('.') {
                rel.insert_str(dot, &format!(".{}", token));
            }
        }

        Some(PathBuf::from(rel))
    }

    /// Inverse mapping from a relative on-disk path back to its URL.
    ///
    /// `None` means the file is outside the policy and must be left alone:
    /// hidden files, caller-ignored paths, and extensionless files that no
    /// URL maps onto.
    pub fn path_to_url(&self, rel: &Path) -> Option<String> {
        let rel_str = rel.to_str()?;
        if rel_str.is_empty() {
            return None;
        }

        // Hidden files and directories are never ours.
        if rel_str.split('/').any(|c| c.starts_with('.')) {
            return None;
        }

        for ignored in &self.ignored_paths {
            let ig = ignored.trim_end_matches('/');
            if rel_str == ig || rel_str.starts_with(&format!("{}/", ig)) {
                return None;
            }
        }

        let fname = rel.file_name()?.to_str()?;
        let parent = rel
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty());

        if fname == "index.html" {
            return Some(match parent {
                Some(p) => format!("{}/{}/", self.origin_base(), p),
                None => format!("{}/", self.origin_base()),
            });
        }

        if self.is_raw(rel_str) {
            return Some(format!("{}/{}", self.origin_base(), rel_str));
        }

        if let Some(caps) = versioned_re().captures(fname) {
            let stem = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let token = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let ext = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            let file = format!("{}.{}?v={}", stem, ext, token);
            return Some(match parent {
                Some(p) => format!("{}/{}/{}", self.origin_base(), p, file),
                None => format!("{}/{}", self.origin_base(), file),
            });
        }

        if fname.contains('.') {
            return Some(format!("{}/{}", self.origin_base(), rel_str));
        }

        // An extensionless file outside the raw subtrees has no URL.
        None
    }
}
