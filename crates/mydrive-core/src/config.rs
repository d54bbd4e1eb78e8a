//! Configuration types for the MyDrive engine

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::permissions::{FileMode, Permissions};
use crate::types::FileKind;

/// Longest accepted login freshness window: one year
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Login freshness and token generation
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Freshness window, refreshed on every authenticated call
    pub ttl_secs: i64,
    pub max_token_attempts: u32,
}

impl SessionPolicy {
    /// Freshness window, clamped to `1..=MAX_TTL_SECS`
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs.clamp(1, MAX_TTL_SECS))
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl_secs: 2 * 60 * 60, // 2 hours
            max_token_attempts: 64,
        }
    }
}

/// Permission bits given to newly created nodes
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionDefaults {
    pub directory: Permissions,
    pub plain_file: Permissions,
    pub app: Permissions,
    pub link: Permissions,
}

impl PermissionDefaults {
    pub fn for_kind(&self, kind: FileKind) -> Permissions {
        match kind {
            FileKind::Directory => self.directory,
            FileKind::PlainFile => self.plain_file,
            FileKind::App => self.app,
            FileKind::Link => self.link,
        }
    }
}

impl Default for PermissionDefaults {
    fn default() -> Self {
        let read_only = FileMode::new(true, false, false);
        Self {
            directory: Permissions::new(FileMode::ALL, FileMode::new(true, false, true)),
            plain_file: Permissions::new(FileMode::new(true, true, false), read_only),
            app: Permissions::new(FileMode::ALL, read_only),
            link: Permissions::new(FileMode::ALL, read_only),
        }
    }
}

/// Main engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub sessions: SessionPolicy,
    pub permissions: PermissionDefaults,
    /// Longest chain of links followed before giving up with `LinkLoop`
    pub max_link_depth: u32,
    pub root_password: String,
    /// App creation through `create_file` is reserved; off unless enabled
    pub enable_app_creation: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            sessions: SessionPolicy::default(),
            permissions: PermissionDefaults::default(),
            max_link_depth: 16,
            root_password: "***".to_string(),
            enable_app_creation: false,
        }
    }
}

impl FsConfig {
    pub fn from_json(json: &str) -> FsResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.sessions.ttl_secs <= 0 {
            return Err(FsError::InvalidConfig("sessions.ttl_secs must be positive".into()));
        }
        if self.sessions.ttl_secs > MAX_TTL_SECS {
            return Err(FsError::InvalidConfig(format!(
                "sessions.ttl_secs must not exceed {MAX_TTL_SECS}"
            )));
        }
        if self.sessions.max_token_attempts == 0 {
            return Err(FsError::InvalidConfig(
                "sessions.max_token_attempts must be positive".into(),
            ));
        }
        if self.max_link_depth == 0 {
            return Err(FsError::InvalidConfig("max_link_depth must be positive".into()));
        }
        for kind in [FileKind::Directory, FileKind::PlainFile, FileKind::App, FileKind::Link] {
            let perms = self.permissions.for_kind(kind);
            if !perms.is_sane() {
                return Err(FsError::InvalidConfig(format!(
                    "default {kind} permissions {perms} give others more than the owner"
                )));
            }
        }
        Ok(())
    }
}
