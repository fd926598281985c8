//! Persisted content-link graph.
//!
//! Nodes are parsed documents; edges are the hyperlinks and subresource
//! references found in their bodies. Edge targets may name URLs that have no
//! node of their own (leaf assets). Each run builds a fresh graph and the old
//! one is only consulted to carry 304-unchanged nodes forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const GRAPH_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graph serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub url: String,
    /// Hyperlink targets, deduplicated, in document order.
    pub links: Vec<String>,
    /// Subresource targets, deduplicated, in document order.
    pub resources: Vec<String>,
    pub parsed_at: DateTime<Utc>,
}

impl GraphNode {
    pub fn new(url: String, links: Vec<String>, resources: Vec<String>) -> Self {
        Self {
            url,
            links,
            resources,
            parsed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphManifest {
    version: u32,
    last_updated: DateTime<Utc>,
    nodes: BTreeMap<String, GraphNode>,
}

#[derive(Debug)]
pub struct LinkGraph {
    path: PathBuf,
    nodes: BTreeMap<String, GraphNode>,
}

impl LinkGraph {
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            nodes: BTreeMap::new(),
        }
    }

    /// Load the manifest; a missing, unreadable, or wrong-version file yields
    /// an empty graph and the run rebuilds it from scratch.
    pub fn load(path: &Path) -> Self {
        let nodes = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<GraphManifest>(&raw).ok())
            .filter(|m| m.version == GRAPH_SCHEMA_VERSION)
            .map(|m| m.nodes)
            .unwrap_or_default();

        Self {
            path: path.to_path_buf(),
            nodes,
        }
    }

    pub fn node(&self, url: &str) -> Option<&GraphNode> {
        self.nodes.get(url)
    }

    /// Insert or replace the node for a URL.
    pub fn insert(&mut self, node: GraphNode) {
        self.nodes.insert(node.url.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// BFS over `links ∪ resources` from the seed set.
    ///
    /// Every seed is reachable by definition, whether or not it has a node:
    /// a sitemap entry whose fetch failed this run must still anchor its
    /// subtree instead of letting the GC take it.
    pub fn reachable(&self, seeds: &HashSet<String>) -> HashSet<String> {
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for seed in seeds {
            if reachable.insert(seed.clone()) {
                queue.push_back(seed);
            }
        }

        while let Some(url) = queue.pop_front() {
            if let Some(node) = self.nodes.get(url) {
                for target in node.links.iter().chain(node.resources.iter()) {
                    if reachable.insert(target.clone()) {
                        queue.push_back(target);
                    }
                }
            }
        }

        reachable
    }

    /// Write the manifest atomically (temp file + rename).
    pub fn save(&self) -> Result<(), GraphError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let manifest = GraphManifest {
            version: GRAPH_SCHEMA_VERSION,
            last_updated: Utc::now(),
            nodes: self.nodes.clone(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
