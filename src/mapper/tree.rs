//! Directory Tree Builder
//!
//! Rebuilds a folder hierarchy from a flat list of records linked by
//! `parent_uid`, so creation can be replayed parents-first.
//!
//! Roots are the records with no parent, or whose parent is not in the
//! list. Each further level is found by one linear scan over the records
//! still unplaced (O(n * depth)); folder trees are shallow. Records that no
//! root ever reaches (a parent cycle) are broken open by promoting the
//! first of them, in input order, to a root.
//!
//! Iteration only, with an explicit depth bound.

use crate::mapper::UidMapper;
use crate::record::Record;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Maximum hierarchy depth accepted
pub const TREE_DEPTH_MAX: usize = 64;

/// Tree building errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Record at this input position has no uid
    MissingUid { position: usize },
    /// Two records share a uid
    DuplicateUid(String),
    /// Hierarchy deeper than the configured bound
    DepthExceeded { uid: String, limit: usize },
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::MissingUid { position } => {
                write!(f, "Folder record at position {} has no uid", position)
            }
            TreeError::DuplicateUid(uid) => write!(f, "Duplicate folder uid {}", uid),
            TreeError::DepthExceeded { uid, limit } => {
                write!(f, "Folder {} is deeper than {} levels", uid, limit)
            }
        }
    }
}

impl std::error::Error for TreeError {}

/// One node, placed
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub record: Record,
    pub depth: usize,
    /// Parent in the source namespace; `None` for roots (including orphans
    /// and nodes promoted to break a cycle)
    pub source_parent: Option<String>,
}

impl TreeNode {
    pub fn uid(&self) -> &str {
        self.record.uid().unwrap_or_default()
    }

    /// Parent uid in the destination namespace, if the parent was created
    /// already. `None` means "create at the root".
    pub fn destination_parent(&self, mapper: &UidMapper) -> Option<String> {
        self.source_parent.as_deref().and_then(|p| mapper.get(p))
    }
}

/// A built hierarchy
#[derive(Debug, Clone, Default)]
pub struct DirectoryTree {
    nodes: Vec<TreeNode>,
    levels: Vec<Vec<usize>>,
    preorder: Vec<usize>,
}

impl DirectoryTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes grouped by depth; every parent sits one level above its child
    pub fn levels(&self) -> Vec<Vec<&TreeNode>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| &self.nodes[i]).collect())
            .collect()
    }

    /// Parent-before-child order, each subtree emitted contiguously
    pub fn preorder(&self) -> impl Iterator<Item = &TreeNode> {
        self.preorder.iter().map(move |&i| &self.nodes[i])
    }

    pub fn roots(&self) -> impl Iterator<Item = &TreeNode> {
        self.levels
            .first()
            .into_iter()
            .flatten()
            .map(move |&i| &self.nodes[i])
    }
}

/// Builds a [`DirectoryTree`] from flat records
#[derive(Debug, Clone)]
pub struct DirectoryTreeBuilder {
    depth_limit: usize,
}

impl Default for DirectoryTreeBuilder {
    fn default() -> Self {
        DirectoryTreeBuilder {
            depth_limit: TREE_DEPTH_MAX,
        }
    }
}

impl DirectoryTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = limit.max(1);
        self
    }

    pub fn build(&self, records: &[Record]) -> Result<DirectoryTree, TreeError> {
        let mut uids: HashSet<&str> = HashSet::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            let uid = record.uid().ok_or(TreeError::MissingUid { position })?;
            if !uids.insert(uid) {
                return Err(TreeError::DuplicateUid(uid.to_string()));
            }
        }

        let n = records.len();
        let mut placed = vec![false; n];
        let mut parent_of: Vec<Option<usize>> = vec![None; n];
        let mut levels: Vec<Vec<usize>> = Vec::new();

        // Level 0: no parent, or a parent missing from the listing
        let roots: Vec<usize> = (0..n)
            .filter(|&i| records[i].parent_uid().map_or(true, |p| !uids.contains(p)))
            .collect();
        for &i in &roots {
            if let Some(parent) = records[i].parent_uid() {
                warn!(
                    "Folder {} references unknown parent {}, treating as root",
                    records[i].uid().unwrap_or_default(),
                    parent
                );
            }
            placed[i] = true;
        }
        let mut frontier = roots.clone();
        if !roots.is_empty() {
            levels.push(roots);
        }

        loop {
            self.attach_levels(records, &mut frontier, &mut placed, &mut parent_of, &mut levels)?;

            // Anything left is only reachable through a cycle
            let Some(promoted) = (0..n).find(|&i| !placed[i]) else {
                break;
            };
            warn!(
                "Folder {} is part of a parent cycle, treating as root",
                records[promoted].uid().unwrap_or_default()
            );
            placed[promoted] = true;
            if levels.is_empty() {
                levels.push(Vec::new());
            }
            levels[0].push(promoted);
            frontier = vec![promoted];
        }

        let depth_of = depths(&levels, n);
        let preorder = preorder(&levels, &parent_of, n);

        let nodes: Vec<TreeNode> = records
            .iter()
            .enumerate()
            .map(|(i, record)| TreeNode {
                record: record.clone(),
                depth: depth_of[i],
                source_parent: parent_of[i].and_then(|p| records[p].uid()).map(str::to_string),
            })
            .collect();

        debug_assert_eq!(preorder.len(), n, "Invariant violated: node missing from pre-order");
        Ok(DirectoryTree {
            nodes,
            levels,
            preorder,
        })
    }

    /// Extend `levels` downward from `frontier` until no unplaced child is
    /// found. The frontier's own depth is wherever its nodes already sit.
    fn attach_levels(
        &self,
        records: &[Record],
        frontier: &mut Vec<usize>,
        placed: &mut [bool],
        parent_of: &mut [Option<usize>],
        levels: &mut Vec<Vec<usize>>,
    ) -> Result<(), TreeError> {
        let Some(&first) = frontier.first() else {
            return Ok(());
        };
        let mut depth = levels
            .iter()
            .position(|level| level.contains(&first))
            .unwrap_or(0);

        while !frontier.is_empty() {
            let by_uid: HashMap<&str, usize> = frontier
                .iter()
                .filter_map(|&i| records[i].uid().map(|uid| (uid, i)))
                .collect();

            let mut next = Vec::new();
            for (i, record) in records.iter().enumerate() {
                if placed[i] {
                    continue;
                }
                if let Some(&parent) = record.parent_uid().and_then(|p| by_uid.get(p)) {
                    placed[i] = true;
                    parent_of[i] = Some(parent);
                    next.push(i);
                }
            }

            if next.is_empty() {
                break;
            }
            depth += 1;
            if depth >= self.depth_limit {
                return Err(TreeError::DepthExceeded {
                    uid: records[next[0]].uid().unwrap_or_default().to_string(),
                    limit: self.depth_limit,
                });
            }
            if levels.len() == depth {
                levels.push(Vec::new());
            }
            levels[depth].extend(next.iter().copied());
            *frontier = next;
        }
        frontier.clear();
        Ok(())
    }
}

fn depths(levels: &[Vec<usize>], n: usize) -> Vec<usize> {
    let mut depth_of = vec![0; n];
    for (depth, level) in levels.iter().enumerate() {
        for &i in level {
            depth_of[i] = depth;
        }
    }
    depth_of
}

/// Explicit-stack pre-order walk, children in input order
fn preorder(levels: &[Vec<usize>], parent_of: &[Option<usize>], n: usize) -> Vec<usize> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, parent) in parent_of.iter().enumerate() {
        if let Some(p) = parent {
            children[*p].push(i);
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut stack: Vec<usize> = levels.first().map(|roots| roots.iter().rev().copied().collect()).unwrap_or_default();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend(children[i].iter().rev().copied());
    }
    order
}
