use super::{MergeOutcome, MergeStrategy, LOCAL_LABEL, REMOTE_LABEL};
use crate::baseline::git::run_with_deadline;
use crate::error::{Result, SyncError};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Classic line-based three-way merge backed by `git merge-file`.
///
/// The three versions are written to a scratch directory that is removed on
/// every exit path when the `TempDir` drops.
pub struct LineMerge {
    deadline: Duration,
    scratch_root: Option<PathBuf>,
}

impl Default for LineMerge {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            scratch_root: None,
        }
    }
}

impl LineMerge {
    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

fn tool_error(message: impl Into<String>) -> SyncError {
    SyncError::MergeTool {
        document_id: String::new(),
        message: message.into(),
    }
}

impl MergeStrategy for LineMerge {
    fn name(&self) -> &'static str {
        "line merge"
    }

    fn merge(&self, base: &str, local: &str, remote: &str) -> Result<MergeOutcome> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagesync-merge-");
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| tool_error(format!("cannot create scratch directory: {}", e)))?;

        let local_path = scratch.path().join("local");
        let base_path = scratch.path().join("base");
        let remote_path = scratch.path().join("remote");
        for (path, content) in [(&local_path, local), (&base_path, base), (&remote_path, remote)] {
            std::fs::write(path, content)
                .map_err(|e| tool_error(format!("cannot write {}: {}", path.display(), e)))?;
        }

        let mut cmd = Command::new("git");
        cmd.args(["-c", "merge.conflictStyle=merge", "merge-file", "-p", "-L", LOCAL_LABEL, "-L", "base", "-L", REMOTE_LABEL])
            .arg(&local_path)
            .arg(&base_path)
            .arg(&remote_path);

        let out = run_with_deadline(cmd, self.deadline)
            .map_err(|e| tool_error(format!("git merge-file: {}", e)))?;

        // Exit status is the number of conflicts (capped at 127); anything
        // else, including death by signal, is a tool failure.
        match out.status.code() {
            Some(0) => Ok(MergeOutcome::Clean(out.stdout)),
            Some(1..=127) => Ok(MergeOutcome::Conflicted(out.stdout)),
            _ => Err(tool_error(format!(
                "git merge-file exited with {}: {}",
                out.status,
                out.stderr.trim()
            ))),
        }
    }
}
