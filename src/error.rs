use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid document id: {id:?}\nDocument ids must be 1-32 ASCII digits.")]
    InvalidDocumentId { id: String },

    #[error("Path escapes sync root: {path}\nRoot: {root}\nRefusing to write outside the configured local root.")]
    PathTraversal { path: PathBuf, root: PathBuf },

    #[error("Path written twice in one batch: {path}\nEach file may appear only once per batch.")]
    DuplicateTarget { path: PathBuf },

    #[error("File too large: {path}\nSize: {size_fmt}, limit: {limit_fmt}\nSplit the page or raise max_file_size in the config.",
        size_fmt = format_bytes(*size),
        limit_fmt = format_bytes(*limit))]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Tree too deep at {at} (limit {limit})\nFlatten the hierarchy or check for a cycle in the remote tree.")]
    TreeTooDeep { at: String, limit: usize },

    #[error("Another sync is in progress: could not lock {path} within {waited:?}\nRetry once the other process has finished.")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to {op}: {path}\nCause: {source}")]
    Storage {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory: {path}\nCause: {source}\nCheck that the directory exists and you have read permissions.")]
    ReadDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("git {op} failed in {repo}\n{message}")]
    Git {
        op: String,
        repo: PathBuf,
        message: String,
    },

    #[error("Merge tool failed for document {document_id}: {message}")]
    MergeTool { document_id: String, message: String },

    #[error("Remote {op} failed{}: {message}", id.as_deref().map(|i| format!(" for document {}", i)).unwrap_or_default())]
    Remote {
        op: &'static str,
        id: Option<String>,
        message: String,
    },

    #[error("Invalid front matter in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Errors the caller may retry later without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::LockTimeout { .. })
    }

    /// Malformed input; never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidDocumentId { .. }
                | SyncError::PathTraversal { .. }
                | SyncError::DuplicateTarget { .. }
                | SyncError::FileTooLarge { .. }
                | SyncError::TreeTooDeep { .. }
        )
    }

    pub(crate) fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Storage {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Format bytes for human-readable display in error messages
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
    }

    #[test]
    fn test_classification() {
        let timeout = SyncError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            waited: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_validation());

        let bad_id = SyncError::InvalidDocumentId {
            id: "1; rm -rf /".to_string(),
        };
        assert!(bad_id.is_validation());
        assert!(!bad_id.is_retryable());
    }

    #[test]
    fn test_remote_message_includes_id() {
        let err = SyncError::Remote {
            op: "update",
            id: Some("42".to_string()),
            message: "503".to_string(),
        };
        assert_eq!(err.to_string(), "Remote update failed for document 42: 503");
    }
}
