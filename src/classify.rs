use crate::error::Result;
use crate::local::LocalItem;
use crate::remote::Document;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Direction of one pass over a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Pull,
    Push,
    Bidirectional,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
            SyncDirection::Bidirectional => "bidirectional",
        })
    }
}

/// Explicit direction override. Both flags at once are rejected by config validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    #[default]
    None,
    Pull,
    Push,
}

impl ForceMode {
    pub fn from_flags(force_pull: bool, force_push: bool) -> Self {
        match (force_pull, force_push) {
            (true, _) => ForceMode::Pull,
            (false, true) => ForceMode::Push,
            (false, false) => ForceMode::None,
        }
    }
}

/// Source of baseline content, keyed by document id.
pub trait BaselineLookup {
    fn baseline(&self, document_id: &str) -> Result<Option<String>>;
}

impl<F> BaselineLookup for F
where
    F: Fn(&str) -> Result<Option<String>>,
{
    fn baseline(&self, document_id: &str) -> Result<Option<String>> {
        self(document_id)
    }
}

pub fn decide_direction(local_empty: bool, remote_empty: bool, force: ForceMode) -> SyncDirection {
    match (local_empty, remote_empty) {
        (true, false) => SyncDirection::Pull,
        (false, true) => SyncDirection::Push,
        (true, true) => SyncDirection::Pull,
        (false, false) => match force {
            ForceMode::Pull => SyncDirection::Pull,
            ForceMode::Push => SyncDirection::Push,
            ForceMode::None => SyncDirection::Bidirectional,
        },
    }
}

/// Whether a local file changed since its last sync.
///
/// Files untouched since `last_sync` are skipped without reading the
/// baseline; everything else is confirmed against it.
pub fn is_local_modified(
    item: &LocalItem,
    last_sync: Option<DateTime<Utc>>,
    baselines: &dyn BaselineLookup,
) -> Result<bool> {
    let Some(id) = item.document_id.as_deref() else {
        return Ok(true);
    };

    if let Some(last_sync) = last_sync {
        if item.modified <= SystemTime::from(last_sync) {
            return Ok(false);
        }
    }

    Ok(match baselines.baseline(id)? {
        Some(baseline) => baseline != item.content,
        None => true,
    })
}

/// Whether a remote document changed since its last sync. No timestamp shortcut.
pub fn is_remote_modified(doc: &Document, baselines: &dyn BaselineLookup) -> Result<bool> {
    Ok(match baselines.baseline(&doc.id)? {
        Some(baseline) => baseline != doc.content,
        None => true,
    })
}

/// Per-side modification sets for one tree.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub local_modified: BTreeSet<String>,
    pub remote_modified: BTreeSet<String>,
    pub new_local: usize,
}

impl ChangeSet {
    /// Ids changed on both sides; these go to the merge engine.
    pub fn conflicts(&self) -> BTreeSet<String> {
        self.local_modified
            .intersection(&self.remote_modified)
            .cloned()
            .collect()
    }

    pub fn local_only(&self) -> BTreeSet<String> {
        self.local_modified
            .difference(&self.remote_modified)
            .cloned()
            .collect()
    }

    pub fn remote_only(&self) -> BTreeSet<String> {
        self.remote_modified
            .difference(&self.local_modified)
            .cloned()
            .collect()
    }
}

pub fn classify_changes(
    local: &[LocalItem],
    remote: &[&Document],
    last_sync: Option<DateTime<Utc>>,
    baselines: &dyn BaselineLookup,
) -> Result<ChangeSet> {
    let mut changes = ChangeSet::default();

    for item in local {
        match &item.document_id {
            None => changes.new_local += 1,
            Some(id) => {
                if is_local_modified(item, last_sync, baselines)? {
                    tracing::debug!("Local change: {} ({})", item.path.display(), id);
                    changes.local_modified.insert(id.clone());
                }
            }
        }
    }

    for doc in remote {
        if is_remote_modified(doc, baselines)? {
            tracing::debug!("Remote change: {} ({})", doc.title, doc.id);
            changes.remote_modified.insert(doc.id.clone());
        }
    }

    Ok(changes)
}
