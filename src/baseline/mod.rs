pub mod git;
pub mod lock;

use crate::classify::BaselineLookup;
use crate::error::{Result, SyncError};
use crate::merge::{has_conflict_markers, MergeEngine, MergeResult};
use git::GitRepo;
use lock::{RepoLock, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_FILE_NAME: &str = ".baseline.lock";
const SNAPSHOT_EXT: &str = "txt";
const MAX_ID_LEN: usize = 32;

/// Reject anything but a short run of ASCII digits.
///
/// Ids end up in file names and git arguments, so this fails closed.
pub fn validate_document_id(id: &str) -> Result<()> {
    if !id.is_empty() && id.len() <= MAX_ID_LEN && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(SyncError::InvalidDocumentId { id: id.to_string() })
    }
}

/// Last successfully synced body of every document, one `<id>.txt` per
/// document in a git repository.
///
/// All mutations are serialized by a single repository-wide lock because
/// staging and committing touch shared repository state.
pub struct BaselineStore {
    root: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
    engine: MergeEngine,
}

impl BaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            engine: MergeEngine::default(),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.lock_timeout = timeout;
        self.poll_interval = poll;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo(&self) -> GitRepo {
        GitRepo::new(&self.root, self.lock_timeout)
    }

    fn snapshot_name(id: &str) -> String {
        format!("{}.{}", id, SNAPSHOT_EXT)
    }

    pub fn is_initialized(&self) -> bool {
        self.repo().is_repo()
    }

    /// Create the repository if needed. No-op when it already exists.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.root)
            .map_err(|e| SyncError::storage("create baseline directory", &self.root, e))?;
        let _lock = self.lock()?;
        self.ensure_repo()
    }

    fn lock(&self) -> Result<RepoLock> {
        RepoLock::acquire(
            &self.root.join(LOCK_FILE_NAME),
            self.lock_timeout,
            self.poll_interval,
        )
    }

    // Caller holds the lock.
    fn ensure_repo(&self) -> Result<()> {
        let repo = self.repo();
        if repo.is_repo() {
            return Ok(());
        }
        repo.init()?;

        let exclude = self.root.join(".git").join("info").join("exclude");
        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage("create git info directory", parent, e))?;
        }
        let mut patterns = std::fs::read_to_string(&exclude).unwrap_or_default();
        if !patterns.lines().any(|l| l == LOCK_FILE_NAME) {
            if !patterns.is_empty() && !patterns.ends_with('\n') {
                patterns.push('\n');
            }
            patterns.push_str(LOCK_FILE_NAME);
            patterns.push('\n');
            std::fs::write(&exclude, patterns)
                .map_err(|e| SyncError::storage("write git exclude", &exclude, e))?;
        }

        tracing::info!("Initialized baseline repository at {}", self.root.display());
        Ok(())
    }

    /// Record `content` as the baseline for `document_id`.
    ///
    /// Content with unresolved conflict markers is refused with a warning and
    /// leaves any existing baseline untouched.
    pub fn update(&self, document_id: &str, content: &str) -> Result<()> {
        validate_document_id(document_id)?;

        if has_conflict_markers(content) {
            tracing::warn!(
                "Refusing to store baseline for {}: content has unresolved conflict markers",
                document_id
            );
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)
            .map_err(|e| SyncError::storage("create baseline directory", &self.root, e))?;
        let _lock = self.lock()?;
        self.ensure_repo()?;

        let name = Self::snapshot_name(document_id);
        let path = self.root.join(&name);
        std::fs::write(&path, content).map_err(|e| SyncError::storage("write baseline", &path, e))?;

        let repo = self.repo();
        repo.add(&name)?;
        if !repo.has_staged_changes(&name)? {
            tracing::debug!("Baseline for {} unchanged", document_id);
            return Ok(());
        }
        repo.commit(&format!("Update baseline for {}", document_id))?;
        tracing::debug!("Committed baseline for {}", document_id);
        Ok(())
    }

    /// Stored baseline for `document_id`, or `None` before its first sync.
    pub fn get(&self, document_id: &str) -> Result<Option<String>> {
        validate_document_id(document_id)?;

        let path = self.root.join(Self::snapshot_name(document_id));
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::storage("read baseline", &path, e)),
        }
    }

    /// Drop the baseline of a document that no longer exists.
    pub fn delete(&self, document_id: &str) -> Result<()> {
        validate_document_id(document_id)?;

        let name = Self::snapshot_name(document_id);
        let path = self.root.join(&name);
        if !path.exists() {
            return Ok(());
        }

        let _lock = self.lock()?;
        std::fs::remove_file(&path).map_err(|e| SyncError::storage("remove baseline", &path, e))?;
        if self.is_initialized() {
            let repo = self.repo();
            repo.rm(&name)?;
            if repo.has_staged_changes(&name)? {
                repo.commit(&format!("Remove baseline for {}", document_id))?;
            }
        }
        Ok(())
    }

    /// Ids that currently have a stored baseline.
    pub fn ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SyncError::ReadDirError {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_document_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Three-way merge of one document's versions.
    pub fn merge(
        &self,
        baseline: &str,
        local: &str,
        remote: &str,
        document_id: &str,
    ) -> Result<MergeResult> {
        validate_document_id(document_id)?;
        self.engine.merge(baseline, local, remote, document_id)
    }

    #[cfg(test)]
    fn commit_count(&self) -> Result<usize> {
        self.repo().commit_count()
    }
}

impl BaselineLookup for BaselineStore {
    fn baseline(&self, document_id: &str) -> Result<Option<String>> {
        self.get(document_id)
    }
}
