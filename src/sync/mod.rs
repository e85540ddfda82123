pub mod layout;
mod pull;
mod push;
mod resolve;

use crate::baseline::BaselineStore;
use crate::classify::{classify_changes, decide_direction, SyncDirection};
use crate::config::{Config, TreeConfig};
use crate::error::{Result, SyncError};
use crate::local::{LocalItem, Scanner, DEFAULT_MAX_FILE_SIZE};
use crate::remote::{Document, RemoteStore};
use crate::render::render_document;
use crate::writer::AtomicWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub use resolve::ResolveOutcome;

/// Per-pass context threaded through every step.
pub struct SyncContext<'a> {
    pub root: &'a Path,
    pub anchor_id: &'a str,
    pub space_key: &'a str,
    pub staging_dir: &'a Path,
}

impl SyncContext<'_> {
    /// Path relative to the tree root, for log lines.
    pub fn rel<'p>(&self, path: &'p Path) -> std::path::Display<'p> {
        path.strip_prefix(self.root).unwrap_or(path).display()
    }

    fn writer(&self) -> AtomicWriter {
        AtomicWriter::new(self.root, self.staging_dir)
    }
}

/// A document changed on both sides since its baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub document_id: String,
    pub title: String,
    pub local_path: PathBuf,
    pub remote_rendered_content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPassResult {
    pub anchor_id: String,
    pub direction: SyncDirection,
    pub pushed_count: usize,
    pub pulled_count: usize,
    pub deleted_count: usize,
    /// Documents left alone because they still carry conflict markers.
    pub skipped_count: usize,
    /// Remote writes that were rejected.
    pub failed_count: usize,
    pub conflicts: Vec<Conflict>,
}

impl SyncPassResult {
    fn new(anchor_id: &str, direction: SyncDirection) -> Self {
        Self {
            anchor_id: anchor_id.to_string(),
            direction,
            pushed_count: 0,
            pulled_count: 0,
            deleted_count: 0,
            skipped_count: 0,
            failed_count: 0,
            conflicts: Vec::new(),
        }
    }

    /// Nothing left for a later pass or a human to deal with.
    pub fn is_clean(&self) -> bool {
        self.skipped_count == 0 && self.failed_count == 0 && self.conflicts.is_empty()
    }
}

/// Runs pull, push and bidirectional passes for configured trees.
pub struct SyncOrchestrator<'a, R: RemoteStore + ?Sized> {
    remote: &'a R,
    baseline: &'a BaselineStore,
    max_file_size: u64,
}

impl<'a, R: RemoteStore + ?Sized> SyncOrchestrator<'a, R> {
    pub fn new(remote: &'a R, baseline: &'a BaselineStore) -> Self {
        Self {
            remote,
            baseline,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    /// One pass per configured tree, in order. The first fatal error stops the run.
    pub fn sync_all(&self, config: &Config, last_sync: Option<DateTime<Utc>>) -> Result<Vec<SyncPassResult>> {
        let mut results = Vec::with_capacity(config.trees.len());
        for tree in &config.trees {
            let staging = tree.staging_dir(config);
            results.push(self.sync_tree(tree, &staging, last_sync)?);
        }
        Ok(results)
    }

    pub fn sync_tree(
        &self,
        tree: &TreeConfig,
        staging_dir: &Path,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<SyncPassResult> {
        std::fs::create_dir_all(&tree.local_root)
            .map_err(|e| SyncError::storage("create local root", &tree.local_root, e))?;

        let ctx = SyncContext {
            root: &tree.local_root,
            anchor_id: &tree.anchor_id,
            space_key: &tree.space_key,
            staging_dir,
        };

        let remote_tree = self
            .remote
            .fetch_tree(&tree.anchor_id, &tree.space_key, tree.max_nodes, &tree.exclude)?;
        let local_items = self.scanner(&ctx).scan()?;

        let direction = decide_direction(
            local_items.is_empty(),
            remote_tree.children.is_empty(),
            tree.force_mode(),
        );
        tracing::info!(
            "Syncing {} ({} local, {} remote): {}",
            tree.local_root.display(),
            local_items.len(),
            remote_tree.descendants().len(),
            direction
        );

        let mut result = SyncPassResult::new(&tree.anchor_id, direction);
        match direction {
            SyncDirection::Pull => self.pull(&ctx, &remote_tree, &local_items, None, &mut result)?,
            SyncDirection::Push => self.push(&ctx, &local_items, None, &mut result)?,
            SyncDirection::Bidirectional => {
                self.bidirectional(&ctx, &remote_tree, &local_items, last_sync, &mut result)?
            }
        }

        tracing::info!(
            "Pass complete for {}: {} pushed, {} pulled, {} deleted, {} skipped, {} failed, {} conflict(s)",
            tree.anchor_id,
            result.pushed_count,
            result.pulled_count,
            result.deleted_count,
            result.skipped_count,
            result.failed_count,
            result.conflicts.len()
        );
        Ok(result)
    }

    fn scanner(&self, ctx: &SyncContext) -> Scanner {
        Scanner::new(ctx.root).with_max_file_size(self.max_file_size)
    }

    fn bidirectional(
        &self,
        ctx: &SyncContext,
        remote_tree: &Document,
        local_items: &[LocalItem],
        last_sync: Option<DateTime<Utc>>,
        result: &mut SyncPassResult,
    ) -> Result<()> {
        let remote_docs = remote_tree.descendants();
        let changes = classify_changes(local_items, &remote_docs, last_sync, self.baseline)?;
        let conflicts = changes.conflicts();
        tracing::debug!(
            "{} local change(s), {} remote change(s), {} new local page(s), {} in conflict",
            changes.local_modified.len(),
            changes.remote_modified.len(),
            changes.new_local,
            conflicts.len()
        );

        self.push(ctx, local_items, Some(&changes.local_only()), result)?;
        self.pull(ctx, remote_tree, local_items, Some(&changes.remote_only()), result)?;

        for id in &conflicts {
            let (Some(item), Some(doc)) = (
                local_items.iter().find(|i| i.document_id.as_deref() == Some(id.as_str())),
                remote_tree.find(id),
            ) else {
                continue;
            };

            // Both sides made the same edit.
            if item.content == doc.content {
                self.baseline.update(id, &doc.content)?;
                continue;
            }

            tracing::warn!("Conflict: {} ({}) changed locally and remotely", ctx.rel(&item.path), id);
            result.conflicts.push(Conflict {
                document_id: id.clone(),
                title: doc.title.clone(),
                local_path: item.path.clone(),
                remote_rendered_content: render_document(doc),
            });
        }
        Ok(())
    }
}

/// Ids selected by an optional filter.
fn in_scope(scope: Option<&BTreeSet<String>>, id: &str) -> bool {
    scope.map_or(true, |ids| ids.contains(id))
}
