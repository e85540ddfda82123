use crate::error::{Result, SyncError};
use crate::render::parse_local;
use ignore::WalkBuilder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const PAGE_EXT: &str = "md";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// A page file found under the local root.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalItem {
    pub path: PathBuf,
    /// `None` until the page has been created remotely.
    pub document_id: Option<String>,
    pub title: String,
    /// Body without front matter.
    pub content: String,
    pub modified: SystemTime,
}

pub struct Scanner {
    root: PathBuf,
    max_file_size: u64,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    /// All page files under the root, sorted by path. A missing root is empty.
    pub fn scan(&self) -> Result<Vec<LocalItem>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(true) // staging area and other dot entries
            .follow_links(false)
            .build();

        let mut items = Vec::new();
        for result in walker {
            let entry = result.map_err(|e| SyncError::ReadDirError {
                path: self.root.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;

            let is_file = entry.file_type().is_some_and(|t| t.is_file());
            let is_page = entry.path().extension().and_then(|e| e.to_str()) == Some(PAGE_EXT);
            if !is_file || !is_page {
                continue;
            }

            items.push(self.read_item(entry.path())?);
        }

        items.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Found {} page file(s) under {}", items.len(), self.root.display());
        Ok(items)
    }

    pub fn read_item(&self, path: &Path) -> Result<LocalItem> {
        let (raw, modified) = read_limited(path, self.max_file_size)?;
        let (front, body) = parse_local(&raw).map_err(|e| SyncError::Frontmatter {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let title = front.title.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        Ok(LocalItem {
            path: path.to_path_buf(),
            document_id: front.id,
            title,
            content: body.to_string(),
            modified,
        })
    }
}

/// Read a UTF-8 file, refusing before loading anything past `limit` bytes.
pub fn read_limited(path: &Path, limit: u64) -> Result<(String, SystemTime)> {
    let file = std::fs::File::open(path).map_err(|e| SyncError::storage("open", path, e))?;
    let meta = file.metadata().map_err(|e| SyncError::storage("stat", path, e))?;
    if meta.len() > limit {
        return Err(SyncError::FileTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            limit,
        });
    }

    let mut raw = String::with_capacity(meta.len() as usize);
    // The file may grow between stat and read.
    file.take(limit + 1)
        .read_to_string(&mut raw)
        .map_err(|e| SyncError::storage("read", path, e))?;
    if raw.len() as u64 > limit {
        return Err(SyncError::FileTooLarge {
            path: path.to_path_buf(),
            size: raw.len() as u64,
            limit,
        });
    }

    let modified = meta.modified().map_err(|e| SyncError::storage("stat", path, e))?;
    Ok((raw, modified))
}
