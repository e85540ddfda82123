use super::layout::{local_hierarchy, LocalNode};
use super::{in_scope, SyncContext, SyncOrchestrator, SyncPassResult};
use crate::error::Result;
use crate::local::LocalItem;
use crate::merge::has_conflict_markers;
use crate::remote::RemoteStore;
use crate::render::render_local;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Local writes and baselines produced by creating remote pages.
#[derive(Default)]
struct Created {
    write_back: Vec<(PathBuf, String)>,
    baselines: Vec<(String, String)>,
}

impl<R: RemoteStore + ?Sized> SyncOrchestrator<'_, R> {
    /// Send local pages to the remote store, parents before children.
    ///
    /// Pages without an id are created. Pages with an id are updated when
    /// their body differs from the baseline; with `scope`, only the ids it
    /// holds are considered. New ids are written back into the local files.
    pub(super) fn push(
        &self,
        ctx: &SyncContext,
        local_items: &[LocalItem],
        scope: Option<&BTreeSet<String>>,
        result: &mut SyncPassResult,
    ) -> Result<()> {
        let nodes = local_hierarchy(ctx.root, local_items)?;

        let mut remote_ids: HashMap<&Path, Option<String>> = HashMap::new();
        let mut created = Created::default();
        for node in &nodes {
            let parent_id = match node.parent_key() {
                None => Some(ctx.anchor_id.to_string()),
                Some(key) => remote_ids.get(key).cloned().flatten(),
            };
            let id = self.push_node(ctx, node, parent_id.as_deref(), scope, &mut created, result)?;
            remote_ids.insert(node.key.as_path(), id);
        }

        // The remote pages exist now; record them even if the files cannot be updated.
        let recorded = created
            .baselines
            .iter()
            .try_for_each(|(id, content)| self.baseline.update(id, content))
            .and_then(|()| ctx.writer().write_batch(&created.write_back));
        if recorded.is_err() {
            for ((path, _), (id, _)) in created.write_back.iter().zip(&created.baselines) {
                tracing::error!(
                    "Created {} as {} but could not record the id; add `id: {}` to its front matter",
                    ctx.rel(path),
                    id,
                    id
                );
            }
        }
        recorded
    }

    /// Returns the remote id children of this node attach to, if any.
    fn push_node(
        &self,
        ctx: &SyncContext,
        node: &LocalNode,
        parent_id: Option<&str>,
        scope: Option<&BTreeSet<String>>,
        created: &mut Created,
        result: &mut SyncPassResult,
    ) -> Result<Option<String>> {
        let content = node.item.map(|i| i.content.as_str()).unwrap_or_default();
        let known_id = node.item.and_then(|i| i.document_id.clone());

        // Descendants of a page with a known id are still visited.
        if has_conflict_markers(content) {
            tracing::warn!("Skipping {}: unresolved conflict markers", ctx.rel(&node.path));
            result.skipped_count += 1;
            return Ok(known_id);
        }

        if let Some(id) = known_id {
            if in_scope(scope, &id) {
                self.push_update(ctx, node, &id, content, result)?;
            }
            return Ok(Some(id));
        }

        let Some(parent_id) = parent_id else {
            tracing::warn!("Skipping {}: parent page is not on the remote", ctx.rel(&node.path));
            result.skipped_count += 1;
            return Ok(None);
        };

        let title = node.title();
        let outcome = self
            .remote
            .create_document(ctx.space_key, &title, content, Some(parent_id));
        match outcome.id.filter(|_| outcome.success) {
            Some(id) => {
                tracing::debug!("Created {} as {}", ctx.rel(&node.path), id);
                result.pushed_count += 1;
                created
                    .write_back
                    .push((node.path.clone(), render_local(Some(&id), &title, content)));
                created.baselines.push((id.clone(), content.to_string()));
                Ok(Some(id))
            }
            None => {
                tracing::warn!(
                    "Failed to create {}: {}",
                    ctx.rel(&node.path),
                    outcome.error.as_deref().unwrap_or("no id returned")
                );
                result.failed_count += 1;
                Ok(None)
            }
        }
    }

    /// Update one existing page if it changed since its baseline.
    fn push_update(
        &self,
        ctx: &SyncContext,
        node: &LocalNode,
        id: &str,
        content: &str,
        result: &mut SyncPassResult,
    ) -> Result<()> {
        let baseline = self.baseline.get(id)?;
        if baseline.as_deref() == Some(content) {
            return Ok(());
        }

        let outcome = self
            .remote
            .update_document(id, content, baseline.as_deref().unwrap_or_default());
        if outcome.success {
            tracing::debug!(
                "Updated {} ({}): {} operation(s)",
                ctx.rel(&node.path),
                id,
                outcome.operations_applied
            );
            self.baseline.update(id, content)?;
            result.pushed_count += 1;
        } else {
            tracing::warn!(
                "Failed to update {} ({}): {}",
                ctx.rel(&node.path),
                id,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            result.failed_count += 1;
        }
        Ok(())
    }
}
