use crate::error::{Result, SyncError};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

const STAGE_EXT: &str = "stage";
const ORIG_EXT: &str = "orig";

/// Two-phase batch writer.
///
/// Phase 1 writes every file into a staging directory. Phase 2 renames the
/// staged files into place, parking any file it replaces next to the staged
/// copies. A failure in either phase leaves every final path as it was before
/// the batch, and the staging directory is removed on every exit path.
pub struct AtomicWriter {
    root: PathBuf,
    staging_dir: PathBuf,
}

/// One completed Phase 2 move, kept for rollback.
struct Applied {
    final_path: PathBuf,
    parked_original: Option<PathBuf>,
}

impl AtomicWriter {
    pub fn new(root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging file name derived from the whole final path; basenames collide.
    fn staging_name(final_path: &Path) -> String {
        let hash = blake3::hash(final_path.as_os_str().to_string_lossy().as_bytes());
        hex::encode(&hash.as_bytes()[..16])
    }

    /// Fail unless `path`, with symlinks resolved, lies strictly inside the root.
    pub fn ensure_within_root(&self, path: &Path) -> Result<PathBuf> {
        let traversal = || SyncError::PathTraversal {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };

        let root = self
            .root
            .canonicalize()
            .map_err(|e| SyncError::storage("resolve sync root", &self.root, e))?;
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        // Resolve the deepest existing ancestor; the rest must be plain names.
        let mut existing = absolute.as_path();
        let mut pending = Vec::new();
        loop {
            match existing.symlink_metadata() {
                Ok(_) => break,
                Err(_) => {
                    let name = existing.file_name().ok_or_else(traversal)?;
                    pending.push(name.to_os_string());
                    existing = existing.parent().ok_or_else(traversal)?;
                }
            }
        }

        let mut resolved = existing.canonicalize().map_err(|_| traversal())?;
        for name in pending.iter().rev() {
            match Path::new(name).components().next() {
                Some(Component::Normal(_)) => resolved.push(name),
                _ => return Err(traversal()),
            }
        }

        if resolved != root && resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(traversal())
        }
    }

    /// Write all `(path, content)` pairs, or none of them.
    ///
    /// Each final path may appear once; a batch naming one twice is rejected
    /// before anything is staged.
    pub fn write_batch(&self, files: &[(PathBuf, String)]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let mut targets = Vec::with_capacity(files.len());
        let mut seen = HashSet::with_capacity(files.len());
        for (path, content) in files {
            let target = self.ensure_within_root(path)?;
            if !seen.insert(target.clone()) {
                return Err(SyncError::DuplicateTarget { path: target });
            }
            targets.push((target, content.as_str()));
        }

        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| SyncError::storage("create staging directory", &self.staging_dir, e))?;

        let result = self
            .stage(&targets)
            .and_then(|staged| self.commit(&targets, &staged));

        self.cleanup_staging();
        if result.is_ok() {
            tracing::debug!("Committed batch of {} file(s)", targets.len());
        }
        result
    }

    fn stage(&self, targets: &[(PathBuf, &str)]) -> Result<Vec<PathBuf>> {
        let mut staged = Vec::with_capacity(targets.len());
        for (final_path, content) in targets {
            let stage_path = self
                .staging_dir
                .join(format!("{}.{}", Self::staging_name(final_path), STAGE_EXT));
            if let Err(e) = std::fs::write(&stage_path, content) {
                for written in &staged {
                    let _ = std::fs::remove_file(written);
                }
                return Err(SyncError::storage("stage file", final_path, e));
            }
            staged.push(stage_path);
        }
        Ok(staged)
    }

    fn commit(&self, targets: &[(PathBuf, &str)], staged: &[PathBuf]) -> Result<()> {
        let mut applied: Vec<Applied> = Vec::with_capacity(targets.len());

        for ((final_path, _), stage_path) in targets.iter().zip(staged) {
            match self.move_into_place(final_path, stage_path) {
                Ok(step) => applied.push(step),
                Err(e) => {
                    tracing::warn!(
                        "Batch write failed at {} after {} of {} file(s); rolling back",
                        final_path.display(),
                        applied.len(),
                        targets.len()
                    );
                    self.rollback(applied);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn move_into_place(&self, final_path: &Path, stage_path: &Path) -> Result<Applied> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage("create directory", parent, e))?;
        }

        let parked_original = if final_path.is_file() {
            let parked = self
                .staging_dir
                .join(format!("{}.{}", Self::staging_name(final_path), ORIG_EXT));
            move_file(final_path, &parked)
                .map_err(|e| SyncError::storage("set aside existing file", final_path, e))?;
            Some(parked)
        } else {
            None
        };

        if let Err(e) = move_file(stage_path, final_path) {
            if let Some(parked) = &parked_original {
                let _ = move_file(parked, final_path);
            }
            return Err(SyncError::storage("move staged file", final_path, e));
        }

        Ok(Applied {
            final_path: final_path.to_path_buf(),
            parked_original,
        })
    }

    fn rollback(&self, applied: Vec<Applied>) {
        for step in applied.into_iter().rev() {
            let restored = match &step.parked_original {
                Some(parked) => move_file(parked, &step.final_path),
                None => std::fs::remove_file(&step.final_path),
            };
            if let Err(e) = restored {
                tracing::warn!("Rollback of {} failed: {}", step.final_path.display(), e);
            }
        }
    }

    fn cleanup_staging(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staging directory {}: {}", self.staging_dir.display(), e);
            }
        }
    }

    /// Delete one file inside the root.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let target = self.ensure_within_root(path)?;
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::storage("delete file", target, e)),
        }
    }

    /// Remove directories under the root left empty after deletions.
    pub fn prune_empty_dirs(&self) -> Result<usize> {
        fn prune(dir: &Path, removed: &mut usize) -> Result<bool> {
            let entries = std::fs::read_dir(dir).map_err(|e| SyncError::ReadDirError {
                path: dir.to_path_buf(),
                source: e,
            })?;

            let mut empty = true;
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry.file_type()?.is_dir() && !hidden {
                    if prune(&path, removed)? {
                        std::fs::remove_dir(&path)
                            .map_err(|e| SyncError::storage("remove empty directory", &path, e))?;
                        *removed += 1;
                        continue;
                    }
                }
                empty = false;
            }
            Ok(empty)
        }

        let mut removed = 0;
        if self.root.is_dir() {
            prune(&self.root, &mut removed)?;
        }
        Ok(removed)
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() {
                return Err(rename_err);
            }
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn writer(temp: &TempDir) -> AtomicWriter {
        let root = temp.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        AtomicWriter::new(root, temp.path().join("staging"))
    }

    #[test]
    fn test_batch_write_creates_nested_files() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();

        w.write_batch(&[
            (root.join("a.md"), "alpha".to_string()),
            (root.join("a/b.md"), "beta".to_string()),
            (root.join("a/b/c.md"), "gamma".to_string()),
        ])
        .unwrap();

        assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(root.join("a/b/c.md")).unwrap(), "gamma");
        assert!(!temp.path().join("staging").exists());
    }

    #[test]
    fn test_same_basename_different_dirs() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();

        w.write_batch(&[
            (root.join("x/index.md"), "one".to_string()),
            (root.join("y/index.md"), "two".to_string()),
        ])
        .unwrap();

        assert_eq!(fs::read_to_string(root.join("x/index.md")).unwrap(), "one");
        assert_eq!(fs::read_to_string(root.join("y/index.md")).unwrap(), "two");
    }

    #[test]
    fn test_relative_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let escape = w.root().join("../outside.md");

        let err = w.write_batch(&[(escape, "x".to_string())]).unwrap_err();
        assert!(matches!(err, SyncError::PathTraversal { .. }));
        assert!(!temp.path().join("outside.md").exists());
    }

    #[test]
    fn test_root_itself_rejected() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        assert!(w.ensure_within_root(w.root()).is_err());
        assert!(w.ensure_within_root(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, w.root().join("link")).unwrap();

        let err = w
            .write_batch(&[(w.root().join("link/evil.md"), "x".to_string())])
            .unwrap_err();
        assert!(matches!(err, SyncError::PathTraversal { .. }));
        assert!(!outside.join("evil.md").exists());
    }

    #[test]
    fn test_commit_failure_rolls_back_whole_batch() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();

        fs::write(root.join("existing.md"), "old").unwrap();
        // A file where a directory is needed makes the third move fail.
        fs::write(root.join("blocker"), "not a dir").unwrap();

        let err = w
            .write_batch(&[
                (root.join("existing.md"), "new".to_string()),
                (root.join("fresh.md"), "fresh".to_string()),
                (root.join("blocker/child.md"), "child".to_string()),
                (root.join("later.md"), "later".to_string()),
            ])
            .unwrap_err();

        assert!(matches!(err, SyncError::Storage { .. }));
        assert!(!temp.path().join("staging").exists());
        assert_eq!(fs::read_to_string(root.join("existing.md")).unwrap(), "old");
        assert!(!root.join("fresh.md").exists());
        assert!(!root.join("later.md").exists());
        assert_eq!(fs::read_to_string(root.join("blocker")).unwrap(), "not a dir");
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();
        fs::write(root.join("a.md"), "original").unwrap();

        let err = w
            .write_batch(&[
                (root.join("a.md"), "one".to_string()),
                (root.join("b.md"), "b".to_string()),
                (root.join("./a.md"), "two".to_string()),
            ])
            .unwrap_err();

        assert!(matches!(err, SyncError::DuplicateTarget { .. }));
        assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "original");
        assert!(!root.join("b.md").exists());
        assert!(!temp.path().join("staging").exists());
    }

    #[test]
    fn test_stage_failure_leaves_targets_untouched() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();
        fs::write(root.join("a.md"), "old a").unwrap();

        // A directory squatting on the second staging name fails Phase 1 midway.
        let second = w.ensure_within_root(&root.join("b.md")).unwrap();
        let squatter = temp
            .path()
            .join("staging")
            .join(format!("{}.{}", AtomicWriter::staging_name(&second), STAGE_EXT));
        fs::create_dir_all(&squatter).unwrap();

        let err = w
            .write_batch(&[
                (root.join("a.md"), "new a".to_string()),
                (root.join("b.md"), "b".to_string()),
                (root.join("c.md"), "c".to_string()),
            ])
            .unwrap_err();

        assert!(matches!(err, SyncError::Storage { op: "stage file", .. }));
        assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "old a");
        assert!(!root.join("b.md").exists());
        assert!(!root.join("c.md").exists());
        assert!(!temp.path().join("staging").exists());
    }

    #[test]
    fn test_remove_and_prune() {
        let temp = TempDir::new().unwrap();
        let w = writer(&temp);
        let root = w.root().to_path_buf();

        w.write_batch(&[
            (root.join("keep.md"), "k".to_string()),
            (root.join("gone/deep/page.md"), "p".to_string()),
        ])
        .unwrap();

        w.remove_file(&root.join("gone/deep/page.md")).unwrap();
        let removed = w.prune_empty_dirs().unwrap();

        assert_eq!(removed, 2);
        assert!(!root.join("gone").exists());
        assert!(root.join("keep.md").exists());
        assert!(root.exists());
    }
}
