//! MyDrive Core: in-memory hierarchical filesystem engine
//!
//! This crate provides a permission-checked node tree with users and token
//! sessions behind a single [`FileSystem`] service object. Persistence and
//! app execution are collaborators plugged in through [`PersistentStore`]
//! and [`AppExecutor`].

pub mod config;
pub mod error;
pub mod exec;
pub mod fs;
pub mod node;
pub mod path;
pub mod permissions;
pub mod session;
pub mod store;
pub mod tree;
pub mod types;
pub mod user;

// Re-export key types for convenience
pub use config::{FsConfig, PermissionDefaults, SessionPolicy};
pub use error::{FsError, FsResult};
pub use exec::{AppExecutor, AppInvocation, NoopExecutor};
pub use fs::{FileSystem, FileSystemBuilder, HOME_DIR};
pub use node::{App, Directory, Link, Node, NodeKind, PlainFile};
pub use permissions::{Action, FileMode, Permissions};
pub use session::{Clock, ManualClock, Session, SystemClock};
pub use store::{JsonFileStore, MemoryStore, PersistentStore, Snapshot};
pub use tree::Tree;
pub use types::*;
pub use user::{Role, User, UserRegistry, ROOT_USERNAME};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FsError::FileUnknown {
            name: "notes".to_string(),
        };
        assert_eq!(err.to_string(), "file unknown: notes");
        assert_eq!(FsError::InvalidToken.to_string(), "invalid token");
    }

    #[test]
    fn test_config_creation() {
        let config = FsConfig {
            sessions: SessionPolicy {
                ttl_secs: 60,
                max_token_attempts: 8,
            },
            max_link_depth: 4,
            ..FsConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.sessions.ttl().num_seconds(), 60);
    }
}
