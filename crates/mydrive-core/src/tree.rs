//! Node arena owning the whole directory tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::node::{Directory, Node, NodeKind};
use crate::permissions::Permissions;
use crate::types::{ListingEntry, NodeId, UserId};

/// Path separator and root marker
pub const SEPARATOR: char = '/';

/// The directory tree. Directories own their children through the arena;
/// removing a directory removes everything below it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "TreeRecord", into = "TreeRecord")]
pub struct Tree {
    nodes: BTreeMap<NodeId, Node>,
    root: Option<NodeId>,
    next_id: u64,
}

/// Persisted form of the tree; a node list keeps the JSON keys plain.
#[derive(Serialize, Deserialize)]
struct TreeRecord {
    root: Option<NodeId>,
    next_id: u64,
    nodes: Vec<Node>,
}

impl From<TreeRecord> for Tree {
    fn from(record: TreeRecord) -> Self {
        Self {
            nodes: record.nodes.into_iter().map(|n| (n.id, n)).collect(),
            root: record.root,
            next_id: record.next_id,
        }
    }
}

impl From<Tree> for TreeRecord {
    fn from(tree: Tree) -> Self {
        Self {
            root: tree.root,
            next_id: tree.next_id,
            nodes: tree.nodes.into_values().collect(),
        }
    }
}

pub(crate) fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(SEPARATOR) || name.contains('\0') {
        return Err(FsError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

impl Tree {
    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    /// The root directory; missing or malformed roots are fatal corruption.
    pub fn root(&self) -> FsResult<&Node> {
        let root = self
            .root
            .and_then(|id| self.nodes.get(&id))
            .ok_or(FsError::RootDirectoryNotFound)?;
        if !root.is_directory() || root.parent.is_some() {
            return Err(FsError::RootDirectoryNotFound);
        }
        Ok(root)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| FsError::file_unknown(format!("#{id}")))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| FsError::file_unknown(format!("#{id}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Last id handed out; 0 right after a clean initialization began.
    pub fn id_counter(&self) -> u64 {
        self.next_id
    }

    fn request_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    pub(crate) fn create_root(&mut self, owner: UserId, permissions: Permissions, now: DateTime<Utc>) -> NodeId {
        let id = self.request_id();
        self.nodes.insert(
            id,
            Node {
                id,
                name: SEPARATOR.to_string(),
                owner,
                permissions,
                parent: None,
                created: now,
                modified: now,
                dirty: true,
                kind: NodeKind::Directory(Directory::default()),
            },
        );
        self.root = Some(id);
        id
    }

    /// Create `name` under the directory `parent`.
    pub(crate) fn create_child(
        &mut self,
        parent: NodeId,
        name: &str,
        owner: UserId,
        permissions: Permissions,
        kind: NodeKind,
        now: DateTime<Utc>,
    ) -> FsResult<NodeId> {
        validate_name(name)?;
        if !permissions.is_sane() {
            return Err(FsError::InvalidPermissions {
                permissions: permissions.to_string(),
            });
        }
        if self.node(parent)?.as_directory()?.contains(name) {
            return Err(FsError::FileExists {
                name: name.to_string(),
            });
        }

        let id = self.request_id();
        let parent_node = self.node_mut(parent)?;
        parent_node.as_directory_mut()?.insert(name, id)?;
        parent_node.touch(now);

        trace!(%id, %parent, name, kind = %kind.file_kind(), "node created");
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                owner,
                permissions,
                parent: Some(parent),
                created: now,
                modified: now,
                dirty: true,
                kind,
            },
        );
        Ok(id)
    }

    /// Detach `name` from `parent` and drop it with all its descendants,
    /// deepest first. Returns the removed ids in removal order.
    pub(crate) fn remove_child(&mut self, parent: NodeId, name: &str, now: DateTime<Utc>) -> FsResult<Vec<NodeId>> {
        let parent_node = self.node_mut(parent)?;
        let child = parent_node
            .as_directory_mut()?
            .remove(name)
            .ok_or_else(|| FsError::file_unknown(name))?;
        parent_node.touch(now);

        let removed = self.post_order(child);
        for id in &removed {
            self.nodes.remove(id);
        }
        trace!(%parent, name, count = removed.len(), "subtree removed");
        Ok(removed)
    }

    /// Remove every node, root last, and restart the id counter.
    pub(crate) fn clear(&mut self) -> usize {
        let mut removed = 0;
        if let Some(root) = self.root {
            for id in self.post_order(root) {
                self.nodes.remove(&id);
                removed += 1;
            }
        }
        // Anything not reachable from the root goes too.
        removed += self.nodes.len();
        self.nodes.clear();
        self.root = None;
        self.next_id = 0;
        removed
    }

    fn post_order(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(NodeKind::Directory(dir)) = self.nodes.get(&id).map(|n| &n.kind) {
                for child in dir.children() {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Absolute path of a node, rebuilt from the parent back-references.
    pub fn full_path(&self, id: NodeId) -> FsResult<String> {
        let mut segments = Vec::new();
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            if segments.len() > self.nodes.len() {
                return Err(FsError::RootDirectoryNotFound);
            }
            segments.push(current.name.as_str());
            current = self.node(parent)?;
        }
        if Some(current.id) != self.root {
            return Err(FsError::file_unknown(format!("#{id}")));
        }
        if segments.is_empty() {
            return Ok(SEPARATOR.to_string());
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push(SEPARATOR);
            path.push_str(segment);
        }
        Ok(path)
    }

    pub fn list_names(&self, dir: NodeId) -> FsResult<Vec<String>> {
        Ok(self
            .node(dir)?
            .as_directory()?
            .names()
            .map(str::to_string)
            .collect())
    }

    pub fn list_detailed(&self, dir: NodeId) -> FsResult<Vec<ListingEntry>> {
        let directory = self.node(dir)?.as_directory()?;
        directory
            .children()
            .map(|child| {
                let node = self.node(child)?;
                Ok(ListingEntry {
                    id: node.id,
                    kind: node.file_kind(),
                    name: node.name.clone(),
                    permissions: node.permissions.to_string(),
                    owner: node.owner.to_string(),
                    size: node.size(),
                    modified: node.modified,
                    link_target: node.as_link().ok().map(|l| l.target().to_string()),
                })
            })
            .collect()
    }

    pub(crate) fn clear_dirty(&mut self) {
        for node in self.nodes.values_mut() {
            node.dirty = false;
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.nodes.values().filter(|n| n.dirty).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PlainFile;
    use crate::permissions::FileMode;

    fn perms() -> Permissions {
        Permissions::new(FileMode::ALL, FileMode::new(true, false, true))
    }

    fn tree_with_root() -> (Tree, NodeId) {
        let mut tree = Tree::default();
        let root = tree.create_root(UserId::new("root"), perms(), Utc::now());
        (tree, root)
    }

    fn mkdir(tree: &mut Tree, parent: NodeId, name: &str) -> NodeId {
        tree.create_child(
            parent,
            name,
            UserId::new("root"),
            perms(),
            NodeKind::Directory(Directory::default()),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (mut tree, root) = tree_with_root();
        let a = mkdir(&mut tree, root, "a");
        let b = mkdir(&mut tree, a, "b");
        assert!(root < a && a < b);
        assert_eq!(tree.id_counter(), b.as_u64());
    }

    #[test]
    fn test_full_path() {
        let (mut tree, root) = tree_with_root();
        let home = mkdir(&mut tree, root, "home");
        let alice = mkdir(&mut tree, home, "alice");
        assert_eq!(tree.full_path(root).unwrap(), "/");
        assert_eq!(tree.full_path(alice).unwrap(), "/home/alice");
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let (mut tree, root) = tree_with_root();
        mkdir(&mut tree, root, "a");
        let dup = tree.create_child(
            root,
            "a",
            UserId::new("root"),
            perms(),
            NodeKind::PlainFile(PlainFile::default()),
            Utc::now(),
        );
        assert!(matches!(dup, Err(FsError::FileExists { .. })));
        for name in ["", ".", "..", "a/b"] {
            let res = tree.create_child(
                root,
                name,
                UserId::new("root"),
                perms(),
                NodeKind::Directory(Directory::default()),
                Utc::now(),
            );
            assert!(matches!(res, Err(FsError::InvalidName { .. })), "{name:?}");
        }
    }

    #[test]
    fn test_create_under_file_fails() {
        let (mut tree, root) = tree_with_root();
        let file = tree
            .create_child(
                root,
                "f",
                UserId::new("root"),
                perms(),
                NodeKind::PlainFile(PlainFile::default()),
                Utc::now(),
            )
            .unwrap();
        let res = tree.create_child(
            file,
            "x",
            UserId::new("root"),
            perms(),
            NodeKind::Directory(Directory::default()),
            Utc::now(),
        );
        assert!(matches!(res, Err(FsError::NotADirectory { .. })));
    }

    #[test]
    fn test_insane_permissions_rejected_at_creation() {
        let (mut tree, root) = tree_with_root();
        let inverted = Permissions::new(FileMode::NONE, FileMode::ALL);
        let res = tree.create_child(
            root,
            "x",
            UserId::new("root"),
            inverted,
            NodeKind::Directory(Directory::default()),
            Utc::now(),
        );
        assert!(matches!(res, Err(FsError::InvalidPermissions { .. })));
    }

    #[test]
    fn test_remove_is_transitive_and_bottom_up() {
        let (mut tree, root) = tree_with_root();
        let a = mkdir(&mut tree, root, "a");
        let b = mkdir(&mut tree, a, "b");
        let c = mkdir(&mut tree, b, "c");
        let sibling = mkdir(&mut tree, root, "keep");

        let removed = tree.remove_child(root, "a", Utc::now()).unwrap();
        assert_eq!(removed, vec![c, b, a]);
        assert!(tree.get(a).is_none() && tree.get(c).is_none());
        assert!(tree.get(sibling).is_some());
        assert_eq!(tree.list_names(root).unwrap(), vec!["keep"]);

        assert!(matches!(tree.remove_child(root, "a", Utc::now()), Err(FsError::FileUnknown { .. })));
    }

    #[test]
    fn test_clear_resets_counter() {
        let (mut tree, root) = tree_with_root();
        mkdir(&mut tree, root, "a");
        assert_eq!(tree.clear(), 2);
        assert!(tree.is_empty());
        assert_eq!(tree.id_counter(), 0);
        assert!(matches!(tree.root(), Err(FsError::RootDirectoryNotFound)));
    }

    #[test]
    fn test_serde_round_trip_keeps_structure() {
        let (mut tree, root) = tree_with_root();
        let a = mkdir(&mut tree, root, "a");
        mkdir(&mut tree, a, "b");
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.root_id(), Some(root));
        assert_eq!(back.list_names(a).unwrap(), vec!["b"]);
        assert_eq!(back.id_counter(), tree.id_counter());
    }
}
