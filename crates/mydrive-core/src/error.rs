//! Error types for the MyDrive engine

use std::io;

use crate::permissions::Action;

/// Engine error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("file unknown: {name}")]
    FileUnknown { name: String },
    #[error("not a directory: {name}")]
    NotADirectory { name: String },
    #[error("not a plain file: {name}")]
    NotAPlainFile { name: String },
    #[error("not an app: {name}")]
    NotAnApp { name: String },
    #[error("not a link: {name}")]
    NotALink { name: String },
    #[error("not executable: {name}")]
    NotExecutable { name: String },
    #[error("insufficient permissions to {action} {path}")]
    InsufficientPermissions { action: Action, path: String },
    #[error("file already exists: {name}")]
    FileExists { name: String },
    #[error("name not allowed: {name:?}")]
    InvalidName { name: String },
    #[error("owner less permissive than others: {permissions}")]
    InvalidPermissions { permissions: String },
    #[error("user already exists: {username}")]
    UserExists { username: String },
    #[error("user unknown: {username}")]
    UserUnknown { username: String },
    #[error("username not allowed: {username:?}")]
    InvalidUsername { username: String },
    #[error("wrong password for user {username}")]
    WrongPassword { username: String },
    #[error("invalid token")]
    InvalidToken,
    #[error("cannot create a link without a target")]
    CreateLinkWithoutContent,
    #[error("cannot create a directory with content")]
    CreateDirectoryWithContent,
    #[error("root directory not found")]
    RootDirectoryNotFound,
    #[error("method denied: {operation}")]
    MethodDenied { operation: String },
    #[error("too many levels of links: {path}")]
    LinkLoop { path: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no unique token after {attempts} attempts")]
    TokenGeneration { attempts: u32 },
    #[error("engine lock poisoned")]
    LockPoisoned,
    #[error("store error: {0}")]
    Store(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FsError {
    pub(crate) fn file_unknown(name: impl Into<String>) -> Self {
        Self::FileUnknown { name: name.into() }
    }

    pub(crate) fn method_denied(operation: impl Into<String>) -> Self {
        Self::MethodDenied {
            operation: operation.into(),
        }
    }

    /// Whether the error reports a permission denial.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::InsufficientPermissions { .. })
    }
}

pub type FsResult<T> = Result<T, FsError>;
