//! Path resolution over the tree, following links and checking permissions
//! at every hop.

use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::permissions::{self, Action};
use crate::tree::{Tree, SEPARATOR};
use crate::types::NodeId;
use crate::user::User;

const ROOT_MARKER: &str = "/";

/// Split a path into segments after stripping one trailing separator.
///
/// Consecutive separators yield empty segments, which never match a child.
pub fn tokenize(path: &str) -> Vec<&str> {
    path.strip_suffix(SEPARATOR).unwrap_or(path).split(SEPARATOR).collect()
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Resolves paths on behalf of one requester
pub struct PathResolver<'a> {
    tree: &'a Tree,
    user: &'a User,
    max_link_depth: u32,
}

impl<'a> PathResolver<'a> {
    pub fn new(tree: &'a Tree, user: &'a User, max_link_depth: u32) -> Self {
        Self {
            tree,
            user,
            max_link_depth,
        }
    }

    /// Resolve `path`, relative paths starting at `cwd`. A link in final
    /// position is followed.
    pub fn resolve(&self, path: &str, cwd: NodeId) -> FsResult<NodeId> {
        self.resolve_at(path, cwd, 0, true)
    }

    /// Like [`resolve`](Self::resolve) but returns a final link itself.
    pub fn resolve_no_follow(&self, path: &str, cwd: NodeId) -> FsResult<NodeId> {
        self.resolve_at(path, cwd, 0, false)
    }

    /// Resolve everything but the last segment; returns the containing
    /// directory and the final name. Segments are walked exactly as
    /// [`resolve`](Self::resolve) walks them.
    pub fn resolve_parent<'p>(&self, path: &'p str, cwd: NodeId) -> FsResult<(NodeId, &'p str)> {
        let mut tokens = tokenize(path);
        let start = if is_absolute(path) {
            tokens.remove(0);
            self.tree.root()?.id()
        } else {
            cwd
        };
        let name = match tokens.pop() {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(FsError::InvalidName {
                    name: path.to_string(),
                })
            }
        };
        let parent = self.walk(start, &tokens, 0, true)?;
        self.tree.node(parent)?.as_directory()?;
        Ok((parent, name))
    }

    fn resolve_at(&self, path: &str, cwd: NodeId, depth: u32, follow_last: bool) -> FsResult<NodeId> {
        let root = self.tree.root()?.id();
        if path == ROOT_MARKER {
            return Ok(root);
        }

        let mut tokens = tokenize(path);
        let start = if is_absolute(path) {
            tokens.remove(0);
            root
        } else {
            cwd
        };
        self.walk(start, &tokens, depth, follow_last)
    }

    fn walk(&self, start: NodeId, tokens: &[&str], depth: u32, follow_last: bool) -> FsResult<NodeId> {
        let mut current = self.tree.node(start)?;
        for (i, token) in tokens.iter().enumerate() {
            let dir = current.as_directory()?;
            permissions::check(self.tree, self.user, current, Action::Read)?;

            let next = match *token {
                "." => current.id(),
                ".." => current.parent().unwrap_or_else(|| current.id()),
                name => dir.get(name).ok_or_else(|| FsError::file_unknown(name))?,
            };

            let mut node = self.tree.node(next)?;
            let is_last = i + 1 == tokens.len();
            if node.is_link() && (follow_last || !is_last) {
                node = self.tree.node(self.follow(node, depth)?)?;
            }
            current = node;
        }
        Ok(current.id())
    }

    fn follow(&self, link: &Node, depth: u32) -> FsResult<NodeId> {
        if depth >= self.max_link_depth {
            let path = self
                .tree
                .full_path(link.id())
                .unwrap_or_else(|_| link.name().to_string());
            return Err(FsError::LinkLoop { path });
        }
        permissions::check(self.tree, self.user, link, Action::Execute)?;

        let target = link.as_link()?.target();
        let base = link.parent().ok_or(FsError::RootDirectoryNotFound)?;
        trace!(link = %link.id(), link_target = target, depth, "following link");
        let resolved = self.resolve_at(target, base, depth + 1, true)?;
        permissions::check(self.tree, self.user, self.tree.node(resolved)?, Action::Read)?;
        Ok(resolved)
    }
}
