use super::{Conflict, SyncContext, SyncOrchestrator};
use crate::config::TreeConfig;
use crate::error::{Result, SyncError};
use crate::merge::has_conflict_markers;
use crate::remote::RemoteStore;
use crate::render::{parse_local, render_local};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default, Serialize)]
pub struct ResolveOutcome {
    /// Ids merged cleanly and written to both sides.
    pub merged: Vec<String>,
    /// Conflicts now marked up in the local file, awaiting a human.
    pub unresolved: Vec<Conflict>,
    pub failed: usize,
}

impl<R: RemoteStore + ?Sized> SyncOrchestrator<'_, R> {
    /// Three-way merge each conflict against its baseline.
    ///
    /// A clean merge is written locally, pushed and committed to the
    /// baseline. Otherwise the local file receives the conflict markers and
    /// the baseline is left alone.
    pub fn resolve_conflicts(
        &self,
        tree: &TreeConfig,
        staging_dir: &Path,
        conflicts: Vec<Conflict>,
    ) -> Result<ResolveOutcome> {
        let ctx = SyncContext {
            root: &tree.local_root,
            anchor_id: &tree.anchor_id,
            space_key: &tree.space_key,
            staging_dir,
        };
        let writer = ctx.writer();
        let scanner = self.scanner(&ctx);

        let mut outcome = ResolveOutcome::default();
        for conflict in conflicts {
            let id = conflict.document_id.as_str();
            let item = scanner.read_item(&conflict.local_path)?;

            if has_conflict_markers(&item.content) {
                tracing::info!("{} still has conflict markers; leaving it", ctx.rel(&item.path));
                outcome.unresolved.push(conflict);
                continue;
            }

            let (_, remote_body) =
                parse_local(&conflict.remote_rendered_content).map_err(|e| SyncError::Frontmatter {
                    path: conflict.local_path.clone(),
                    message: format!("remote rendering: {}", e),
                })?;
            let base = self.baseline.get(id)?.unwrap_or_default();
            let merged = self.baseline.merge(&base, &item.content, remote_body, id)?;

            writer.write_batch(&[(
                conflict.local_path.clone(),
                render_local(Some(id), &item.title, &merged.merged_content),
            )])?;

            if merged.has_conflicts {
                tracing::warn!(
                    "{} ({}): {} conflict region(s) need manual resolution",
                    ctx.rel(&item.path),
                    id,
                    merged.conflict_count
                );
                outcome.unresolved.push(conflict);
                continue;
            }

            let update = self
                .remote
                .update_document(id, &merged.merged_content, remote_body);
            if update.success {
                self.baseline.update(id, &merged.merged_content)?;
                tracing::info!("Merged {} ({})", ctx.rel(&item.path), id);
                outcome.merged.push(conflict.document_id);
            } else {
                tracing::warn!(
                    "Merged {} locally but the remote update failed: {}",
                    ctx.rel(&item.path),
                    update.error.as_deref().unwrap_or("unknown error")
                );
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }
}
