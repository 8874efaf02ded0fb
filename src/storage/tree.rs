//! Directory-tree view over flat object keys
//!
//! The bucket has no real directories; keys are `/`-joined paths like
//! `owner/book/page/img.avif`. Both planes (orchestrator task discovery and
//! the worker's boot sweep) reason about the bucket as a nested tree, so the
//! flat key listing is folded into one here. `BTreeMap` keeps every level in
//! a stable lexicographic order, which is what makes task selection
//! deterministic.

use std::collections::BTreeMap;

/// One node in the bucket tree: either a nested directory or a file leaf
/// holding the full object key.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Directory(DirectoryTree),
    File(String),
}

/// Nested directory structure built from flat object keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryTree {
    entries: BTreeMap<String, TreeNode>,
}

impl DirectoryTree {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = DirectoryTree::default();
        for key in keys {
            tree.insert_key(key.as_ref());
        }
        tree
    }

    fn insert_key(&mut self, key: &str) {
        let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = self;
        for (i, part) in parts.iter().enumerate() {
            let is_leaf = i == parts.len() - 1;
            if is_leaf {
                current
                    .entries
                    .entry(part.to_string())
                    .or_insert_with(|| TreeNode::File(key.to_string()));
            } else {
                let node = current
                    .entries
                    .entry(part.to_string())
                    .or_insert_with(|| TreeNode::Directory(DirectoryTree::default()));
                current = match node {
                    TreeNode::Directory(dir) => dir,
                    // A file key shadowing a directory prefix; skip the rest.
                    TreeNode::File(_) => return,
                };
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subdirectories in stable order.
    pub fn directories(&self) -> impl Iterator<Item = (&str, &DirectoryTree)> {
        self.entries.iter().filter_map(|(name, node)| match node {
            TreeNode::Directory(dir) => Some((name.as_str(), dir)),
            TreeNode::File(_) => None,
        })
    }

    /// File leaves in stable order, as `(name, full key)`.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(name, node)| match node {
            TreeNode::File(key) => Some((name.as_str(), key.as_str())),
            TreeNode::Directory(_) => None,
        })
    }

    pub fn contains_file(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(TreeNode::File(_)))
    }
}
