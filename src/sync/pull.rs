use super::layout::{plan_layout, PlannedPage};
use super::{in_scope, SyncContext, SyncOrchestrator, SyncPassResult};
use crate::error::Result;
use crate::local::{read_limited, LocalItem, PAGE_EXT};
use crate::remote::{Document, RemoteStore};
use crate::render::render_document;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

impl<R: RemoteStore + ?Sized> SyncOrchestrator<'_, R> {
    /// Materialize the remote tree locally.
    ///
    /// With `only`, just those ids are written, at their current local path
    /// when they have one. Without it the whole tree is written and local
    /// pages whose document vanished or moved are deleted.
    pub(super) fn pull(
        &self,
        ctx: &SyncContext,
        remote_tree: &Document,
        local_items: &[LocalItem],
        only: Option<&BTreeSet<String>>,
        result: &mut SyncPassResult,
    ) -> Result<()> {
        let plan = plan_layout(ctx.root, remote_tree)?;
        let existing: HashMap<&str, &LocalItem> = local_items
            .iter()
            .filter_map(|item| item.document_id.as_deref().map(|id| (id, item)))
            .collect();

        let mut writes: Vec<(PathBuf, String)> = Vec::new();
        let mut pulled: Vec<&Document> = Vec::new();
        for page in &plan {
            let id = page.doc.id.as_str();
            if !in_scope(only, id) {
                continue;
            }

            let path = match (only, existing.get(id)) {
                (Some(_), Some(item)) => item.path.clone(),
                (Some(_), None) if occupied_by_other(local_items, &page.path, id) => {
                    with_id_suffix(&page.path, id)
                }
                _ => page.path.clone(),
            };
            let rendered = render_document(page.doc);
            if self.on_disk(&path).as_deref() == Some(rendered.as_str()) {
                tracing::debug!("Unchanged: {}", ctx.rel(&path));
            } else {
                tracing::debug!("Pull: {} ({})", ctx.rel(&path), id);
                writes.push((path, rendered));
            }
            pulled.push(page.doc);
        }

        ctx.writer().write_batch(&writes)?;
        result.pulled_count += writes.len();

        for doc in pulled {
            if self.baseline.get(&doc.id)?.as_deref() != Some(doc.content.as_str()) {
                self.baseline.update(&doc.id, &doc.content)?;
            }
        }

        if only.is_none() {
            self.delete_stale(ctx, &plan, local_items, result)?;
        }
        Ok(())
    }

    fn on_disk(&self, path: &Path) -> Option<String> {
        read_limited(path, self.max_file_size).ok().map(|(raw, _)| raw)
    }

    fn delete_stale(
        &self,
        ctx: &SyncContext,
        plan: &[PlannedPage<'_>],
        local_items: &[LocalItem],
        result: &mut SyncPassResult,
    ) -> Result<()> {
        let planned_paths: HashSet<&Path> = plan.iter().map(|p| p.path.as_path()).collect();
        let planned_ids: HashMap<&str, &Path> = plan
            .iter()
            .map(|p| (p.doc.id.as_str(), p.path.as_path()))
            .collect();

        let writer = ctx.writer();
        let mut gone = Vec::new();
        for item in local_items {
            let Some(id) = item.document_id.as_deref() else {
                continue;
            };
            // A planned path was just rewritten with its new owner.
            if planned_paths.contains(item.path.as_path()) {
                continue;
            }

            match planned_ids.get(id) {
                Some(_) => tracing::debug!("Moved: {} ({})", ctx.rel(&item.path), id),
                None => {
                    tracing::debug!("Deleted remotely: {} ({})", ctx.rel(&item.path), id);
                    gone.push(id);
                }
            }
            writer.remove_file(&item.path)?;
            result.deleted_count += 1;
        }

        if result.deleted_count > 0 {
            let pruned = writer.prune_empty_dirs()?;
            tracing::debug!("Pruned {} empty director(ies)", pruned);
        }
        for id in gone {
            self.baseline.delete(id)?;
        }
        Ok(())
    }
}

fn occupied_by_other(local_items: &[LocalItem], path: &Path, id: &str) -> bool {
    local_items
        .iter()
        .any(|item| item.path == path && item.document_id.as_deref() != Some(id))
}

fn with_id_suffix(path: &Path, id: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{}-{}.{}", stem, id, PAGE_EXT))
}
