//! Core type definitions for MyDrive

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FsError;

/// Node identifier, unique and never reused within a filesystem lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(u64);

impl Token {
    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Registry key of a user: the username folded to lowercase
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(username: &str) -> Self {
        Self(username.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four node variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Directory,
    PlainFile,
    App,
    Link,
}

impl FileKind {
    /// Type column of a detailed listing
    pub fn type_char(&self) -> char {
        match self {
            FileKind::Directory => 'd',
            FileKind::PlainFile => '-',
            FileKind::App => 'a',
            FileKind::Link => 'l',
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Directory => write!(f, "directory"),
            FileKind::PlainFile => write!(f, "plainfile"),
            FileKind::App => write!(f, "app"),
            FileKind::Link => write!(f, "link"),
        }
    }
}

impl FromStr for FileKind {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "directory" => Ok(FileKind::Directory),
            "plainfile" => Ok(FileKind::PlainFile),
            "app" => Ok(FileKind::App),
            "link" => Ok(FileKind::Link),
            other => Err(FsError::Unsupported(format!("file type {other}"))),
        }
    }
}

/// One line of a detailed directory listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub id: NodeId,
    pub kind: FileKind,
    pub name: String,
    pub permissions: String,
    pub owner: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub link_target: Option<String>,
}

impl fmt::Display for ListingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.kind.type_char(),
            self.permissions,
            self.owner,
            self.size,
            self.id,
            self.name
        )?;
        if let Some(target) = &self.link_target {
            write!(f, "->{target}")?;
        }
        Ok(())
    }
}
