use super::{CreateResult, Document, HierarchyFetch, RemoteWriter, UpdateResult};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Page {
    title: String,
    parent_id: Option<String>,
    content: String,
    space_key: String,
    last_modified: DateTime<Utc>,
    position: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pages {
    next_id: u64,
    pages: BTreeMap<String, Page>,
    #[serde(skip)]
    offline: bool,
}

/// Page store kept in memory, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Pages>,
}

impl MemoryRemote {
    /// A store holding just the anchor page.
    pub fn with_anchor(anchor_id: &str, title: &str, space_key: &str) -> Self {
        let mut pages = Pages {
            next_id: 1000,
            ..Default::default()
        };
        pages.pages.insert(
            anchor_id.to_string(),
            Page {
                title: title.to_string(),
                parent_id: None,
                content: String::new(),
                space_key: space_key.to_string(),
                last_modified: Utc::now(),
                position: 0,
            },
        );
        Self {
            inner: Mutex::new(pages),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pages> {
        // A panic while holding the lock cannot leave pages half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::storage("open remote snapshot", path, e))?;
        let pages: Pages = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            SyncError::Config(format!("Corrupted remote snapshot {}: {}", path.display(), e))
        })?;
        Ok(Self {
            inner: Mutex::new(pages),
        })
    }

    /// Save via temp file + rename.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path)
                .map_err(|e| SyncError::storage("create remote snapshot", &temp_path, e))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &*self.lock()).map_err(|e| {
                SyncError::storage("write remote snapshot", &temp_path, std::io::Error::other(e))
            })?;
        }
        std::fs::rename(&temp_path, path).map_err(|e| SyncError::storage("save remote snapshot", path, e))
    }

    /// Simulate the store being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Add a page directly, as another editor would.
    pub fn insert(&self, parent_id: &str, title: &str, content: &str) -> String {
        let mut pages = self.lock();
        let space_key = pages
            .pages
            .get(parent_id)
            .map(|p| p.space_key.clone())
            .unwrap_or_default();
        Self::insert_page(&mut pages, Some(parent_id), title, content, &space_key)
    }

    fn insert_page(pages: &mut Pages, parent_id: Option<&str>, title: &str, content: &str, space_key: &str) -> String {
        let id = pages.next_id.to_string();
        pages.next_id += 1;
        let position = pages.next_id;
        pages.pages.insert(
            id.clone(),
            Page {
                title: title.to_string(),
                parent_id: parent_id.map(str::to_string),
                content: content.to_string(),
                space_key: space_key.to_string(),
                last_modified: Utc::now(),
                position,
            },
        );
        id
    }

    pub fn set_content(&self, id: &str, content: &str) {
        if let Some(page) = self.lock().pages.get_mut(id) {
            page.content = content.to_string();
            page.last_modified = Utc::now();
        }
    }

    /// Remove a page and its subtree.
    pub fn remove(&self, id: &str) {
        let mut pages = self.lock();
        let mut doomed = vec![id.to_string()];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i].clone();
            doomed.extend(
                pages
                    .pages
                    .iter()
                    .filter(|(_, p)| p.parent_id.as_deref() == Some(parent.as_str()))
                    .map(|(id, _)| id.clone()),
            );
            i += 1;
        }
        for id in doomed {
            pages.pages.remove(&id);
        }
    }

    pub fn content(&self, id: &str) -> Option<String> {
        self.lock().pages.get(id).map(|p| p.content.clone())
    }

    pub fn find_by_title(&self, title: &str) -> Option<String> {
        self.lock()
            .pages
            .iter()
            .find(|(_, p)| p.title == title)
            .map(|(id, _)| id.clone())
    }

    pub fn parent_of(&self, id: &str) -> Option<String> {
        self.lock().pages.get(id).and_then(|p| p.parent_id.clone())
    }

    pub fn page_count(&self) -> usize {
        self.lock().pages.len()
    }

    fn build(pages: &Pages, id: &str, exclude: &[String], budget: &mut usize) -> std::result::Result<Document, ()> {
        if *budget == 0 {
            return Err(());
        }
        *budget -= 1;

        let page = &pages.pages[id];
        let mut children: Vec<(&String, &Page)> = pages
            .pages
            .iter()
            .filter(|(child_id, p)| {
                p.parent_id.as_deref() == Some(id) && !exclude.iter().any(|e| e == *child_id)
            })
            .collect();
        children.sort_by_key(|(_, p)| p.position);

        let mut doc = Document {
            id: id.to_string(),
            title: page.title.clone(),
            parent_id: page.parent_id.clone(),
            children: Vec::with_capacity(children.len()),
            content: page.content.clone(),
            space_key: page.space_key.clone(),
            last_modified: page.last_modified,
        };
        for (child_id, _) in children {
            doc.children.push(Self::build(pages, child_id, exclude, budget)?);
        }
        Ok(doc)
    }
}

impl HierarchyFetch for MemoryRemote {
    fn fetch_tree(
        &self,
        anchor_id: &str,
        space_key: &str,
        max_nodes: usize,
        exclude_ids: &[String],
    ) -> Result<Document> {
        let pages = self.lock();
        if pages.offline {
            return Err(SyncError::Remote {
                op: "fetch",
                id: Some(anchor_id.to_string()),
                message: "store unreachable".to_string(),
            });
        }
        match pages.pages.get(anchor_id) {
            Some(page) if page.space_key == space_key => {}
            _ => {
                return Err(SyncError::Remote {
                    op: "fetch",
                    id: Some(anchor_id.to_string()),
                    message: format!("no such page in space {}", space_key),
                })
            }
        }

        let mut budget = max_nodes;
        Self::build(&pages, anchor_id, exclude_ids, &mut budget).map_err(|()| SyncError::Remote {
            op: "fetch",
            id: Some(anchor_id.to_string()),
            message: format!("tree exceeds the limit of {} nodes", max_nodes),
        })
    }
}

impl RemoteWriter for MemoryRemote {
    fn create_document(
        &self,
        space_key: &str,
        title: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> CreateResult {
        let mut pages = self.lock();
        if pages.offline {
            return CreateResult {
                id: None,
                success: false,
                error: Some("store unreachable".to_string()),
            };
        }
        if let Some(parent) = parent_id {
            if !pages.pages.contains_key(parent) {
                return CreateResult {
                    id: None,
                    success: false,
                    error: Some(format!("parent {} does not exist", parent)),
                };
            }
        }

        let id = Self::insert_page(&mut pages, parent_id, title, content, space_key);
        CreateResult {
            id: Some(id),
            success: true,
            error: None,
        }
    }

    fn update_document(&self, id: &str, new_content: &str, _baseline_content: &str) -> UpdateResult {
        let mut pages = self.lock();
        if pages.offline {
            return UpdateResult {
                success: false,
                operations_applied: 0,
                error: Some("store unreachable".to_string()),
            };
        }
        match pages.pages.get_mut(id) {
            Some(page) => {
                let changed = page.content != new_content;
                if changed {
                    page.content = new_content.to_string();
                    page.last_modified = Utc::now();
                }
                UpdateResult {
                    success: true,
                    operations_applied: usize::from(changed),
                    error: None,
                }
            }
            None => UpdateResult {
                success: false,
                operations_applied: 0,
                error: Some(format!("page {} does not exist", id)),
            },
        }
    }
}
