//! Reachability garbage collector for the output tree.
//!
//! Runs strictly after the crawl loop: computes the URLs reachable from the
//! entry seeds through the freshly built graph, maps every on-disk file back
//! to its URL, and deletes the unreachable ones. Files the path policy
//! rejects (hidden, ignored, outside the policy) are never touched.

use crate::link_graph::LinkGraph;
use crate::url_policy::PathPolicy;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, PartialEq)]
pub struct GcStats {
    pub scanned: usize,
    pub deleted_files: usize,
    pub deleted_dirs: usize,
    /// Deletions that failed; logged, never fatal.
    pub failures: usize,
}

/// Delete files under `root` whose URL is not reachable from `entries`.
pub fn collect(
    root: &Path,
    policy: &PathPolicy,
    graph: &LinkGraph,
    entries: &HashSet<String>,
) -> GcStats {
    let reachable = graph.reachable(entries);
    let mut stats = GcStats::default();

    let mut files = Vec::new();
    if let Err(e) = walk_files(root, root, &mut files) {
        tracing::warn!("gc: cannot enumerate {}: {}", root.display(), e);
        return stats;
    }

    for rel in files {
        stats.scanned += 1;

        let url = match policy.path_to_url(&rel) {
            Some(u) => u,
            None => continue,
        };
        if reachable.contains(&url) {
            continue;
        }

        let abs = root.join(&rel);
        tracing::info!("gc: deleting {} ({})", rel.display(), url);
        match fs::remove_file(&abs) {
            Ok(()) => {
                stats.deleted_files += 1;
                stats.deleted_dirs += prune_empty_dirs(root, abs.parent());
            }
            Err(e) => {
                tracing::warn!("gc: failed to delete {}: {}", abs.display(), e);
                stats.failures += 1;
            }
        }
    }

    stats
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

/// Remove directories emptied by a deletion, walking upward and stopping
/// at (and excluding) the output root.
fn prune_empty_dirs(root: &Path, start: Option<&Path>) -> usize {
    let mut removed = 0;
    let mut current = start;

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = match fs::read_dir(dir) {
            Ok(mut it) => it.next().is_none(),
            Err(_) => break,
        };
        if !is_empty || fs::remove_dir(dir).is_err() {
            break;
        }
        removed += 1;
        current = dir.parent();
    }

    removed
}
