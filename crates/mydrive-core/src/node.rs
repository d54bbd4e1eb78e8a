//! Filesystem nodes: the shared attributes and the four variants.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::permissions::Permissions;
use crate::types::{FileKind, NodeId, UserId};

/// Size reported for every link
pub const LINK_SIZE: u64 = 1;

/// Children of a directory, keyed by name, kept in insertion order
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Directory {
    order: Vec<String>,
    by_name: HashMap<String, NodeId>,
}

impl Directory {
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Child names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Child ids in insertion order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().filter_map(|name| self.by_name.get(name).copied())
    }

    pub(crate) fn insert(&mut self, name: &str, id: NodeId) -> FsResult<()> {
        if self.by_name.contains_key(name) {
            return Err(FsError::FileExists {
                name: name.to_string(),
            });
        }
        self.order.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<NodeId> {
        let id = self.by_name.remove(name)?;
        self.order.retain(|n| n != name);
        Some(id)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlainFile {
    content: String,
}

impl PlainFile {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Executable node; its content is handed to the execution collaborator
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct App {
    content: String,
}

impl App {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Symbolic link; the target path is resolved on use, not at creation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    target: String,
}

impl Link {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    Directory(Directory),
    PlainFile(PlainFile),
    App(App),
    Link(Link),
}

impl NodeKind {
    pub fn file_kind(&self) -> FileKind {
        match self {
            NodeKind::Directory(_) => FileKind::Directory,
            NodeKind::PlainFile(_) => FileKind::PlainFile,
            NodeKind::App(_) => FileKind::App,
            NodeKind::Link(_) => FileKind::Link,
        }
    }
}

/// A node of the tree. Owned by the tree arena; `parent` is a plain id and
/// never keeps anything alive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) owner: UserId,
    pub(crate) permissions: Permissions,
    pub(crate) parent: Option<NodeId>,
    pub(crate) created: DateTime<Utc>,
    pub(crate) modified: DateTime<Utc>,
    pub(crate) dirty: bool,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Changed since the last committed snapshot
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn file_kind(&self) -> FileKind {
        self.kind.file_kind()
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            // Directories always report 0.
            NodeKind::Directory(_) => 0,
            NodeKind::PlainFile(file) => file.content.len() as u64,
            NodeKind::App(app) => app.content.len() as u64,
            NodeKind::Link(_) => LINK_SIZE,
        }
    }

    pub fn as_directory(&self) -> FsResult<&Directory> {
        match &self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory {
                name: self.name.clone(),
            }),
        }
    }

    pub fn as_plain_file(&self) -> FsResult<&PlainFile> {
        match &self.kind {
            NodeKind::PlainFile(file) => Ok(file),
            _ => Err(FsError::NotAPlainFile {
                name: self.name.clone(),
            }),
        }
    }

    pub fn as_app(&self) -> FsResult<&App> {
        match &self.kind {
            NodeKind::App(app) => Ok(app),
            _ => Err(FsError::NotAnApp {
                name: self.name.clone(),
            }),
        }
    }

    pub fn as_link(&self) -> FsResult<&Link> {
        match &self.kind {
            NodeKind::Link(link) => Ok(link),
            _ => Err(FsError::NotALink {
                name: self.name.clone(),
            }),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link(_))
    }

    /// Content of a file-like node (plain file or app).
    pub fn content(&self) -> FsResult<&str> {
        match &self.kind {
            NodeKind::PlainFile(file) => Ok(&file.content),
            NodeKind::App(app) => Ok(&app.content),
            _ => Err(FsError::NotAPlainFile {
                name: self.name.clone(),
            }),
        }
    }

    pub(crate) fn as_directory_mut(&mut self) -> FsResult<&mut Directory> {
        match &mut self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            _ => Err(FsError::NotADirectory {
                name: self.name.clone(),
            }),
        }
    }

    pub(crate) fn set_content(&mut self, data: &str, now: DateTime<Utc>) -> FsResult<()> {
        match &mut self.kind {
            NodeKind::PlainFile(file) => file.content = data.to_string(),
            NodeKind::App(app) => app.content = data.to_string(),
            _ => {
                return Err(FsError::NotAPlainFile {
                    name: self.name.clone(),
                })
            }
        }
        self.touch(now);
        Ok(())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.modified = now;
        self.dirty = true;
    }
}
