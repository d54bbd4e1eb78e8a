//! Users, password digests and the user registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FsError, FsResult};
use crate::types::{NodeId, UserId};

/// Username of the distinguished root user
pub const ROOT_USERNAME: &str = "root";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Bypasses every permission check and owns the tree root
    Root,
    Regular,
}

/// Salted SHA-256 digest of a password
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    salt: String,
    digest: String,
}

impl PasswordHash {
    pub fn new(password: &str) -> Self {
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let digest = Self::digest(&salt, password);
        Self { salt, digest }
    }

    pub fn verify(&self, password: &str) -> bool {
        Self::digest(&self.salt, password) == self.digest
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    username: String,
    name: String,
    password: PasswordHash,
    home: Option<NodeId>,
    role: Role,
}

impl User {
    pub(crate) fn new(username: &str, name: &str, password: &str, role: Role) -> Self {
        Self {
            id: UserId::new(username),
            username: username.to_string(),
            name: name.to_string(),
            password: PasswordHash::new(password),
            home: None,
            role,
        }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Username as given at creation
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> Option<NodeId> {
        self.home
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.password.verify(password)
    }

    pub(crate) fn set_home(&mut self, home: NodeId) {
        self.home = Some(home);
    }
}

/// Usernames are non-empty ASCII alphanumerics; they also name home directories.
pub(crate) fn validate_username(username: &str) -> FsResult<()> {
    if username.is_empty() || !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(FsError::InvalidUsername {
            username: username.to_string(),
        });
    }
    Ok(())
}

/// All users, keyed case-insensitively
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserRegistry {
    users: BTreeMap<UserId, User>,
}

impl UserRegistry {
    /// Case-insensitive lookup; absence is not an error.
    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(&UserId::new(username))
    }

    pub fn by_id(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub(crate) fn by_id_mut(&mut self, id: &UserId) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.get(username).is_some()
    }

    pub fn root(&self) -> Option<&User> {
        self.users.values().find(|u| u.is_root())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub(crate) fn insert(&mut self, user: User) -> FsResult<()> {
        if self.users.contains_key(&user.id) {
            return Err(FsError::UserExists {
                username: user.username,
            });
        }
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.users.len();
        self.users.clear();
        count
    }

    /// Whether `id` is the home directory of some registered user
    pub fn is_home(&self, id: NodeId) -> bool {
        self.users.values().any(|u| u.home == Some(id))
    }
}
