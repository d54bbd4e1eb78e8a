//! Owner/others permission bits and the access decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::node::Node;
use crate::tree::Tree;
use crate::user::User;

/// Action gated by the permission model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Read,
    Write,
    Execute,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Write => write!(f, "write"),
            Action::Execute => write!(f, "execute"),
        }
    }
}

/// Read/write/execute bits for one subject
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMode {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl FileMode {
    pub const NONE: FileMode = FileMode::new(false, false, false);
    pub const ALL: FileMode = FileMode::new(true, true, true);

    pub const fn new(read: bool, write: bool, exec: bool) -> Self {
        Self { read, write, exec }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Write => self.write,
            Action::Execute => self.exec,
        }
    }

    /// True if every bit set in `other` is also set here.
    pub fn covers(&self, other: &FileMode) -> bool {
        (self.read || !other.read) && (self.write || !other.write) && (self.exec || !other.exec)
    }

    fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return None;
        }
        let bit = |c: u8, expected: u8| match c {
            b'-' => Some(false),
            c if c == expected => Some(true),
            _ => None,
        };
        Some(Self {
            read: bit(bytes[0], b'r')?,
            write: bit(bytes[1], b'w')?,
            exec: bit(bytes[2], b'x')?,
        })
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.read { 'r' } else { '-' };
        let w = if self.write { 'w' } else { '-' };
        let x = if self.exec { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// Permission bits of a node: the owner's and everyone else's
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub owner: FileMode,
    pub others: FileMode,
}

impl Permissions {
    pub const fn new(owner: FileMode, others: FileMode) -> Self {
        Self { owner, others }
    }

    /// Owner at least as permissive as others. Checked when a node is
    /// created; explicit permission changes may break it later.
    pub fn is_sane(&self) -> bool {
        self.owner.covers(&self.others)
    }

    pub fn for_subject(&self, is_owner: bool) -> FileMode {
        if is_owner {
            self.owner
        } else {
            self.others
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.owner, self.others)
    }
}

impl FromStr for Permissions {
    type Err = FsError;

    /// Parses the six character form, e.g. `rwxr-x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FsError::InvalidPermissions {
            permissions: s.to_string(),
        };
        if !s.is_ascii() || s.len() != 6 {
            return Err(invalid());
        }
        let owner = FileMode::parse(&s[..3]).ok_or_else(invalid)?;
        let others = FileMode::parse(&s[3..]).ok_or_else(invalid)?;
        Ok(Self { owner, others })
    }
}

/// Access decision: root may do anything, the owner uses the owner bits,
/// everyone else uses the others bits.
pub fn allowed(user: &User, node: &Node, action: Action) -> bool {
    if user.is_root() {
        return true;
    }
    node.permissions()
        .for_subject(node.owner() == user.id())
        .allows(action)
}

/// Like [`allowed`], failing with `InsufficientPermissions` naming the node path.
pub(crate) fn check(tree: &Tree, user: &User, node: &Node, action: Action) -> FsResult<()> {
    if allowed(user, node, action) {
        return Ok(());
    }
    let path = tree
        .full_path(node.id())
        .unwrap_or_else(|_| node.name().to_string());
    debug!(user = %user.id(), %action, %path, "permission denied");
    Err(FsError::InsufficientPermissions { action, path })
}
