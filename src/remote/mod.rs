pub mod memory;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryRemote;

/// One remote page with its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<Document>,
    #[serde(default)]
    pub content: String,
    pub space_key: String,
    pub last_modified: DateTime<Utc>,
}

impl Document {
    pub fn new(id: &str, title: &str, content: &str, space_key: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: None,
            children: Vec::new(),
            content: content.to_string(),
            space_key: space_key.to_string(),
            last_modified: Utc::now(),
        }
    }

    /// Every descendant, parents before children. The node itself is excluded.
    pub fn descendants(&self) -> Vec<&Document> {
        let mut out = Vec::new();
        let mut stack: Vec<&Document> = self.children.iter().rev().collect();
        while let Some(doc) = stack.pop() {
            out.push(doc);
            stack.extend(doc.children.iter().rev());
        }
        out
    }

    pub fn find(&self, id: &str) -> Option<&Document> {
        if self.id == id {
            return Some(self);
        }
        self.descendants().into_iter().find(|d| d.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    pub id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub success: bool,
    pub operations_applied: usize,
    pub error: Option<String>,
}

/// Read side of the remote page store.
///
/// The engine only sees this trait and [`RemoteWriter`]; `MemoryRemote` backs
/// the CLI snapshot mode and the tests.
pub trait HierarchyFetch {
    /// Fetch the subtree under `anchor_id`, failing when it exceeds `max_nodes`.
    fn fetch_tree(
        &self,
        anchor_id: &str,
        space_key: &str,
        max_nodes: usize,
        exclude_ids: &[String],
    ) -> Result<Document>;
}

pub trait RemoteWriter {
    fn create_document(
        &self,
        space_key: &str,
        title: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> CreateResult;

    /// `baseline_content` lets the store compute a minimal patch.
    fn update_document(&self, id: &str, new_content: &str, baseline_content: &str) -> UpdateResult;
}

/// Both halves of the remote collaborator.
pub trait RemoteStore: HierarchyFetch + RemoteWriter {}

impl<T: HierarchyFetch + RemoteWriter> RemoteStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_parent_first() {
        let mut root = Document::new("1", "Root", "", "DOC");
        let mut a = Document::new("2", "A", "", "DOC");
        a.children.push(Document::new("3", "A1", "", "DOC"));
        root.children.push(a);
        root.children.push(Document::new("4", "B", "", "DOC"));

        let ids: Vec<&str> = root.descendants().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
        assert_eq!(root.find("3").map(|d| d.title.as_str()), Some("A1"));
        assert!(root.find("9").is_none());
    }
}
