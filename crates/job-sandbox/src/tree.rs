//! Ordered, serializable snapshots of a directory subtree.

use crate::error::Result;
use crate::path::to_forward_slash;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Recursion stops descending past this depth; deeper directories are listed empty.
pub const MAX_TREE_DEPTH: usize = 64;

/// One entry of a tree snapshot.
///
/// Serialized with a `type` tag of `dir` or `file`, matching what the
/// browser client renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeNode {
    #[serde(rename = "dir")]
    Directory {
        name: String,
        path: String,
        children: Vec<TreeNode>,
    },
    #[serde(rename = "file")]
    File {
        name: String,
        path: String,
        size: u64,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Directory { name, .. } | Self::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Directory { path, .. } | Self::File { path, .. } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    /// Children of a directory node (empty for files).
    pub fn children(&self) -> &[TreeNode] {
        match self {
            Self::Directory { children, .. } => children,
            Self::File { .. } => &[],
        }
    }

    /// Relative paths of every file below this node, depth first.
    pub fn file_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files(&self, out: &mut Vec<String>) {
        match self {
            Self::File { path, .. } => out.push(path.clone()),
            Self::Directory { children, .. } => {
                for child in children {
                    child.collect_files(out);
                }
            }
        }
    }
}

/// Directories first, then case-insensitive by name (exact name breaks ties).
fn sibling_order(a: &TreeNode, b: &TreeNode) -> Ordering {
    b.is_dir()
        .cmp(&a.is_dir())
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.name().cmp(b.name()))
}

/// Walk `root` into a fully materialized tree.
///
/// The root node is named `/` with an empty path. Symlinks are listed but
/// never followed into, and entries that vanish mid-walk are skipped.
pub fn walk(root: &Path) -> Result<TreeNode> {
    let root = root.canonicalize()?;
    let children = walk_children(&root, &root, 0);
    Ok(TreeNode::Directory {
        name: "/".to_string(),
        path: String::new(),
        children,
    })
}

/// Async wrapper around [`walk`] for use from request handlers.
pub async fn snapshot(root: PathBuf) -> Result<TreeNode> {
    tokio::task::spawn_blocking(move || walk(&root))
        .await
        .map_err(|e| std::io::Error::other(format!("tree walk task failed: {e}")))?
}

fn walk_children(root: &Path, dir: &Path, depth: usize) -> Vec<TreeNode> {
    if depth >= MAX_TREE_DEPTH {
        if fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some()) {
            tracing::warn!(
                "Tree deeper than {} levels; omitting entries below {}",
                MAX_TREE_DEPTH,
                dir.display()
            );
        }
        return Vec::new();
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut children = Vec::new();
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::debug!("Skipping non UTF-8 entry in {}", dir.display());
            continue;
        };
        let Some(relative) = entry_path
            .strip_prefix(root)
            .ok()
            .and_then(to_forward_slash)
        else {
            continue;
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            children.push(TreeNode::Directory {
                name,
                children: walk_children(root, &entry_path, depth + 1),
                path: relative,
            });
        } else {
            // Follows symlinks for the size only; dangling links report 0
            let size = fs::metadata(&entry_path).map(|m| m.len()).unwrap_or(0);
            children.push(TreeNode::File {
                name,
                path: relative,
                size,
            });
        }
    }

    children.sort_by(sibling_order);
    children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_first_then_case_insensitive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        std::fs::write(base.join("b.txt"), "bb").unwrap();
        std::fs::create_dir(base.join("A")).unwrap();
        std::fs::write(base.join("a.txt"), "a").unwrap();

        let tree = walk(base).unwrap();
        let names: Vec<&str> = tree.children().iter().map(TreeNode::name).collect();
        assert_eq!(names, vec!["A", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_relative_paths_and_sizes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        std::fs::create_dir_all(base.join("game/scripts")).unwrap();
        std::fs::write(base.join("game/scripts/script.rpy"), "label start:").unwrap();

        let tree = walk(base).unwrap();
        assert_eq!(tree.name(), "/");
        assert_eq!(tree.path(), "");

        let game = &tree.children()[0];
        assert_eq!(game.path(), "game");
        let scripts = &game.children()[0];
        assert_eq!(scripts.path(), "game/scripts");
        match &scripts.children()[0] {
            TreeNode::File { name, path, size } => {
                assert_eq!(name, "script.rpy");
                assert_eq!(path, "game/scripts/script.rpy");
                assert_eq!(*size, 12);
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[test]
    fn test_serialized_shape() {
        let node = TreeNode::File {
            name: "x.rpy".to_string(),
            path: "x.rpy".to_string(),
            size: 3,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["size"], 3);

        let dir = TreeNode::Directory {
            name: "/".to_string(),
            path: String::new(),
            children: vec![node],
        };
        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(json["type"], "dir");
        assert_eq!(json["children"][0]["path"], "x.rpy");
    }

    #[test]
    fn test_depth_limit_omits_deeper_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        let mut deepest = base.to_path_buf();
        for _ in 0..=MAX_TREE_DEPTH {
            deepest.push("d");
        }
        std::fs::create_dir_all(&deepest).unwrap();
        std::fs::write(deepest.join("deep.txt"), "deep").unwrap();
        std::fs::write(base.join("top.txt"), "top").unwrap();

        let tree = walk(base).unwrap();
        assert_eq!(tree.file_paths(), vec!["top.txt"]);

        let mut node = &tree;
        for _ in 0..MAX_TREE_DEPTH {
            node = node
                .children()
                .iter()
                .find(|c| c.is_dir())
                .expect("directory chain up to the limit");
        }
        assert!(node.children().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_not_followed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        std::fs::create_dir(base.join("real")).unwrap();
        std::os::unix::fs::symlink(base, base.join("real/loop")).unwrap();

        let tree = walk(base).unwrap();
        let real = &tree.children()[0];
        assert_eq!(real.children().len(), 1);
        assert!(!real.children()[0].is_dir());
    }
}
