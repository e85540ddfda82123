use crate::error::{Result, SyncError};
use crate::local::{LocalItem, PAGE_EXT};
use crate::remote::Document;
use crate::render::file_stem_for;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Deepest hierarchy walked in either direction.
pub const MAX_TREE_DEPTH: usize = 32;

/// Where one remote page lives locally.
#[derive(Debug)]
pub struct PlannedPage<'a> {
    pub doc: &'a Document,
    pub path: PathBuf,
}

/// Plan a local path for every descendant of `anchor`, parents first.
///
/// Children of the anchor live at the local root. A page titled `T` is stored
/// as `T.md` and its children live in the directory `T/`.
pub fn plan_layout<'a>(root: &Path, anchor: &'a Document) -> Result<Vec<PlannedPage<'a>>> {
    let mut planned = Vec::new();
    plan_children(root, anchor, 1, &mut planned)?;
    Ok(planned)
}

fn plan_children<'a>(
    dir: &Path,
    parent: &'a Document,
    depth: usize,
    out: &mut Vec<PlannedPage<'a>>,
) -> Result<()> {
    if parent.children.is_empty() {
        return Ok(());
    }
    if depth > MAX_TREE_DEPTH {
        return Err(SyncError::TreeTooDeep {
            at: format!("{} ({})", parent.title, parent.id),
            limit: MAX_TREE_DEPTH,
        });
    }

    // Case-insensitive, so the layout also holds on case-folding filesystems.
    let mut seen: HashMap<String, usize> = HashMap::new();
    for child in &parent.children {
        *seen.entry(file_stem_for(&child.title).to_lowercase()).or_default() += 1;
    }

    for child in &parent.children {
        let mut stem = file_stem_for(&child.title);
        if seen[&stem.to_lowercase()] > 1 {
            stem = format!("{}-{}", stem, child.id);
        }

        out.push(PlannedPage {
            doc: child,
            path: dir.join(format!("{}.{}", stem, PAGE_EXT)),
        });
        plan_children(&dir.join(&stem), child, depth + 1, out)?;
    }
    Ok(())
}

/// One node of the hierarchy inferred from the local tree.
#[derive(Debug)]
pub struct LocalNode<'a> {
    /// Path relative to the root without the page extension; `a/b/C` for `a/b/C.md`.
    pub key: PathBuf,
    pub path: PathBuf,
    /// `None` for a directory with no page file of its own.
    pub item: Option<&'a LocalItem>,
}

impl LocalNode<'_> {
    pub fn parent_key(&self) -> Option<&Path> {
        self.key.parent().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn title(&self) -> String {
        match self.item {
            Some(item) => item.title.clone(),
            None => self
                .key
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Infer parent/child structure from directory nesting.
///
/// Every directory holding pages becomes a node; one without a matching
/// `<dir>.md` gets a placeholder node. Nodes are returned parents first.
pub fn local_hierarchy<'a>(root: &Path, items: &'a [LocalItem]) -> Result<Vec<LocalNode<'a>>> {
    let mut nodes: BTreeMap<PathBuf, Option<&'a LocalItem>> = BTreeMap::new();

    for item in items {
        let rel = item.path.strip_prefix(root).unwrap_or(&item.path);
        let key = rel.with_extension("");
        let depth = key.components().count();
        if depth > MAX_TREE_DEPTH {
            return Err(SyncError::TreeTooDeep {
                at: rel.display().to_string(),
                limit: MAX_TREE_DEPTH,
            });
        }

        let mut ancestor = key.parent();
        while let Some(dir) = ancestor.filter(|p| !p.as_os_str().is_empty()) {
            nodes.entry(dir.to_path_buf()).or_insert(None);
            ancestor = dir.parent();
        }
        nodes.insert(key, Some(item));
    }

    let mut ordered: Vec<LocalNode<'a>> = nodes
        .into_iter()
        .map(|(key, item)| LocalNode {
            path: match item {
                Some(item) => item.path.clone(),
                None => page_path(root, &key),
            },
            key,
            item,
        })
        .collect();
    ordered.sort_by(|a, b| {
        a.key
            .components()
            .count()
            .cmp(&b.key.components().count())
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(ordered)
}

/// `<root>/<key>.md`, keeping any dots already in the last component.
fn page_path(root: &Path, key: &Path) -> PathBuf {
    let mut name = key.as_os_str().to_os_string();
    name.push(".");
    name.push(PAGE_EXT);
    root.join(name)
}
