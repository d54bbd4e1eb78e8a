//! App execution collaborator boundary.

use std::fmt;

use tracing::debug;

use crate::error::FsResult;
use crate::types::{NodeId, UserId};

/// One app run requested by the engine. Holds copies, not tree references,
/// so the executor runs without any engine lock held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppInvocation {
    pub app: NodeId,
    /// Absolute path of the app node
    pub path: String,
    pub owner: UserId,
    pub content: String,
}

/// Runs apps on behalf of a user and returns an opaque result
pub trait AppExecutor: Send + Sync + fmt::Debug {
    fn execute(&self, user: &UserId, app: &AppInvocation, args: &[String]) -> FsResult<String>;
}

/// Executor that runs nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl AppExecutor for NoopExecutor {
    fn execute(&self, user: &UserId, app: &AppInvocation, args: &[String]) -> FsResult<String> {
        debug!(%user, path = %app.path, args = args.len(), "noop execution");
        Ok(String::new())
    }
}
