//! The filesystem engine and its service operations.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::exec::{AppExecutor, AppInvocation, NoopExecutor};
use crate::node::{App, Directory, Link, Node, NodeKind, PlainFile};
use crate::path::PathResolver;
use crate::permissions::{self, Action, Permissions};
use crate::session::{Clock, Session, SessionRegistry, SystemClock};
use crate::store::{MemoryStore, PersistentStore, Snapshot};
use crate::tree::Tree;
use crate::types::{FileKind, ListingEntry, NodeId, Token, UserId};
use crate::user::{self, Role, User, ROOT_USERNAME};

/// Name of the directory under the root holding user homes
pub const HOME_DIR: &str = "home";

const ROOT_DISPLAY_NAME: &str = "Super User";

/// Builder wiring the engine to its collaborators
pub struct FileSystemBuilder {
    config: FsConfig,
    store: Option<Arc<dyn PersistentStore>>,
    executor: Option<Arc<dyn AppExecutor>>,
    clock: Option<Arc<dyn Clock>>,
}

impl FileSystemBuilder {
    pub fn new(config: FsConfig) -> Self {
        Self {
            config,
            store: None,
            executor: None,
            clock: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn AppExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Load the last committed state and initialize it. A state without a
    /// usable root directory is wiped and rebuilt.
    pub fn open(self) -> FsResult<FileSystem> {
        self.config.validate()?;
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let mut snapshot = store.load()?.unwrap_or_default();
        snapshot.tree.clear_dirty();

        let fs = FileSystem {
            config: self.config,
            state: RwLock::new(snapshot),
            sessions: Mutex::new(SessionRegistry::default()),
            store,
            executor: self.executor.unwrap_or_else(|| Arc::new(NoopExecutor)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        match fs.init() {
            Ok(()) => {}
            Err(FsError::RootDirectoryNotFound) => {
                warn!("persisted state has no root directory, resetting");
                fs.reset()?;
            }
            Err(e) => return Err(e),
        }
        Ok(fs)
    }
}

/// In-memory filesystem with users, permissions and token sessions.
///
/// Every service call takes the caller's token and works against an
/// explicit [`Session`]; the engine keeps no "current user". Mutations are
/// applied to a working copy which is committed to the store before it
/// replaces the published state, so readers never see partial changes.
///
/// Locks are always taken state first, sessions second.
pub struct FileSystem {
    config: FsConfig,
    state: RwLock<Snapshot>,
    sessions: Mutex<SessionRegistry>,
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn AppExecutor>,
    clock: Arc<dyn Clock>,
}

impl FileSystem {
    /// Engine with default collaborators, starting from a [`MemoryStore`]
    pub fn new(config: FsConfig) -> FsResult<Self> {
        FileSystemBuilder::new(config).open()
    }

    pub fn builder(config: FsConfig) -> FileSystemBuilder {
        FileSystemBuilder::new(config)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    // ---- lifecycle ----

    /// Build the minimal tree when nothing exists yet; otherwise verify the
    /// root directory.
    pub fn init(&self) -> FsResult<()> {
        {
            let state = self.read_state()?;
            if !state.tree.is_empty() {
                state.tree.root()?;
                debug!(nodes = state.tree.len(), users = state.users.len(), "existing tree verified");
                return Ok(());
            }
        }
        self.transact(|state, now| {
            if state.tree.is_empty() {
                // Users without any files left are stale; start over.
                let stale = state.users.clear();
                if stale > 0 {
                    warn!(users = stale, "users found without a tree, dropping them");
                }
                self.clean_init(state, now)
            } else {
                state.tree.root().map(|_| ())
            }
        })
    }

    /// Remove every node, user and login, then initialize from scratch.
    pub fn reset(&self) -> FsResult<()> {
        let mut state = self.write_state()?;
        self.apply(&mut state, |working, now| {
            let nodes = working.tree.clear();
            let users = working.users.clear();
            self.clean_init(working, now)?;
            info!(nodes, users, "filesystem reset");
            Ok(())
        })?;
        let logins = self.sessions()?.clear();
        debug!(logins, "logins dropped by reset");
        Ok(())
    }

    fn clean_init(&self, state: &mut Snapshot, now: DateTime<Utc>) -> FsResult<()> {
        let root_user = User::new(ROOT_USERNAME, ROOT_DISPLAY_NAME, &self.config.root_password, Role::Root);
        let root_id = root_user.id().clone();
        state.users.insert(root_user)?;

        let perms = self.config.permissions.directory;
        let root = state.tree.create_root(root_id.clone(), perms, now);
        state.tree.create_child(
            root,
            HOME_DIR,
            root_id.clone(),
            perms,
            NodeKind::Directory(Directory::default()),
            now,
        )?;
        self.create_home(state, ROOT_USERNAME, &root_id, now)?;
        info!(nodes = state.tree.len(), "clean initialization complete");
        Ok(())
    }

    fn create_home(&self, state: &mut Snapshot, username: &str, id: &UserId, now: DateTime<Utc>) -> FsResult<NodeId> {
        let home_root = Self::home_dir(&state.tree)?;
        let home = state.tree.create_child(
            home_root,
            username,
            id.clone(),
            self.config.permissions.directory,
            NodeKind::Directory(Directory::default()),
            now,
        )?;
        state
            .users
            .by_id_mut(id)
            .ok_or_else(|| FsError::UserUnknown {
                username: username.to_string(),
            })?
            .set_home(home);
        Ok(home)
    }

    fn home_dir(tree: &Tree) -> FsResult<NodeId> {
        tree.root()?
            .as_directory()?
            .get(HOME_DIR)
            .ok_or_else(|| FsError::file_unknown(HOME_DIR))
    }

    // ---- users and sessions ----

    /// Register a user together with its home directory under `/home`.
    /// Either both exist afterwards or neither does.
    pub fn create_user(&self, username: &str, name: &str, password: &str) -> FsResult<()> {
        user::validate_username(username)?;
        self.transact(|state, now| {
            let new_user = User::new(username, name, password, Role::Regular);
            let id = new_user.id().clone();
            state.users.insert(new_user)?;
            let home = self.create_home(state, username, &id, now)?;
            info!(user = %id, %home, "user created");
            Ok(())
        })
    }

    /// Authenticate and open a login positioned at the user's home.
    pub fn login(&self, username: &str, password: &str) -> FsResult<Token> {
        let state = self.read_state()?;
        let user = state.users.get(username).ok_or_else(|| FsError::UserUnknown {
            username: username.to_string(),
        })?;
        if !user.verify_password(password) {
            warn!(user = %user.id(), "login rejected: wrong password");
            return Err(FsError::WrongPassword {
                username: username.to_string(),
            });
        }
        let cwd = match user.home() {
            Some(home) => home,
            None => state.tree.root()?.id(),
        };

        let now = self.clock.now();
        let policy = &self.config.sessions;
        let mut sessions = self.sessions()?;
        sessions.cull(now);
        let token = sessions.issue(
            user.id().clone(),
            cwd,
            now,
            policy.ttl(),
            policy.max_token_attempts,
            rand::random::<u64>,
        )?;
        info!(user = %user.id(), active = sessions.len(), "login");
        Ok(token)
    }

    pub fn logout(&self, token: Token) -> FsResult<()> {
        let login = self.sessions()?.remove(token).ok_or(FsError::InvalidToken)?;
        info!(user = %login.user, "logout");
        Ok(())
    }

    /// Validate `token`, refresh it and return the session it names.
    pub fn session(&self, token: Token) -> FsResult<Session> {
        let state = self.read_state()?;
        self.touch(&state, token).map(|(session, _)| session)
    }

    pub fn active_sessions(&self) -> FsResult<usize> {
        Ok(self.sessions()?.len())
    }

    fn touch(&self, state: &Snapshot, token: Token) -> FsResult<(Session, User)> {
        let session = self
            .sessions()?
            .touch(token, self.clock.now(), self.config.sessions.ttl())?;
        let user = state
            .users
            .by_id(&session.user)
            .cloned()
            .ok_or(FsError::InvalidToken)?;
        trace!(user = %user.id(), cwd = %session.cwd, "session touched");
        Ok((session, user))
    }

    // ---- file services ----

    /// Create `name` of the given kind in the session's current directory.
    ///
    /// Links need their target as `content`; directories must get none.
    pub fn create_file(&self, token: Token, name: &str, kind: FileKind, content: &str) -> FsResult<NodeId> {
        self.transact(|state, now| {
            let (session, user) = self.touch(state, token)?;
            let node_kind = match kind {
                FileKind::Directory if !content.is_empty() => return Err(FsError::CreateDirectoryWithContent),
                FileKind::Directory => NodeKind::Directory(Directory::default()),
                FileKind::PlainFile => NodeKind::PlainFile(PlainFile::new(content)),
                FileKind::App if !self.config.enable_app_creation => {
                    return Err(FsError::Unsupported("app creation".to_string()))
                }
                FileKind::App => NodeKind::App(App::new(content)),
                FileKind::Link if content.is_empty() => return Err(FsError::CreateLinkWithoutContent),
                FileKind::Link => NodeKind::Link(Link::new(content)),
            };

            permissions::check(&state.tree, &user, state.tree.node(session.cwd)?, Action::Write)?;
            let id = state.tree.create_child(
                session.cwd,
                name,
                user.id().clone(),
                self.config.permissions.for_kind(kind),
                node_kind,
                now,
            )?;
            debug!(user = %user.id(), %id, name, %kind, "file created");
            Ok(id)
        })
    }

    pub fn read_file(&self, token: Token, path: &str) -> FsResult<String> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
        let node = state.tree.node(id)?;
        permissions::check(&state.tree, &user, node, Action::Read)?;
        Ok(node.content()?.to_string())
    }

    /// Replace the content of a plain file or app
    pub fn write_file(&self, token: Token, path: &str, content: &str) -> FsResult<()> {
        self.transact(|state, now| {
            let (session, user) = self.touch(state, token)?;
            let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
            let node = state.tree.node(id)?;
            node.content()?;
            permissions::check(&state.tree, &user, node, Action::Write)?;
            state.tree.node_mut(id)?.set_content(content, now)?;
            debug!(user = %user.id(), %id, bytes = content.len(), "file written");
            Ok(())
        })
    }

    /// Remove the node at `path` (a directory with everything below it).
    /// A final link is removed itself, not its target.
    pub fn delete_file(&self, token: Token, path: &str) -> FsResult<()> {
        self.transact(|state, now| {
            let (session, user) = self.touch(state, token)?;
            let (parent, name) = self
                .resolver(&state.tree, &user)
                .resolve_parent(path, session.cwd)?;
            let child = state
                .tree
                .node(parent)?
                .as_directory()?
                .get(name)
                .ok_or_else(|| FsError::file_unknown(name))?;

            if child == Self::home_dir(&state.tree)? || state.users.is_home(child) {
                return Err(FsError::method_denied(format!("delete {}", state.tree.full_path(child)?)));
            }
            permissions::check(&state.tree, &user, state.tree.node(parent)?, Action::Write)?;

            let removed = state.tree.remove_child(parent, name, now)?;
            debug!(user = %user.id(), name, count = removed.len(), "file deleted");
            Ok(())
        })
    }

    /// Move the session to the directory at `path`; returns its absolute path.
    pub fn change_directory(&self, token: Token, path: &str) -> FsResult<String> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
        state.tree.node(id)?.as_directory()?;
        self.sessions()?.set_cwd(token, id)?;
        state.tree.full_path(id)
    }

    pub fn current_path(&self, token: Token) -> FsResult<String> {
        let state = self.read_state()?;
        let (session, _) = self.touch(&state, token)?;
        state.tree.full_path(session.cwd)
    }

    /// Detailed listing of the current directory, one entry per line
    pub fn list_current_directory(&self, token: Token) -> FsResult<String> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        let lines: Vec<String> = Self::listing(&state.tree, &user, session.cwd)?
            .iter()
            .map(ListingEntry::to_string)
            .collect();
        Ok(lines.join("\n"))
    }

    pub fn list_directory(&self, token: Token, path: &str) -> FsResult<Vec<ListingEntry>> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
        Self::listing(&state.tree, &user, id)
    }

    /// Child names of the directory at `path`, in creation order
    pub fn list_names(&self, token: Token, path: &str) -> FsResult<Vec<String>> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
        let node = state.tree.node(id)?;
        node.as_directory()?;
        permissions::check(&state.tree, &user, node, Action::Read)?;
        state.tree.list_names(id)
    }

    fn listing(tree: &Tree, user: &User, dir: NodeId) -> FsResult<Vec<ListingEntry>> {
        let node = tree.node(dir)?;
        node.as_directory()?;
        permissions::check(tree, user, node, Action::Read)?;
        tree.list_detailed(dir)
    }

    /// Set the permission bits of the node at `path`; only its owner or
    /// root may.
    pub fn change_permissions(&self, token: Token, path: &str, permissions: Permissions) -> FsResult<()> {
        self.transact(|state, now| {
            let (session, user) = self.touch(state, token)?;
            let id = self.resolver(&state.tree, &user).resolve(path, session.cwd)?;
            let node = state.tree.node(id)?;
            if !user.is_root() && node.owner() != user.id() {
                return Err(FsError::InsufficientPermissions {
                    action: Action::Write,
                    path: state.tree.full_path(id)?,
                });
            }
            let node = state.tree.node_mut(id)?;
            node.permissions = permissions;
            node.touch(now);
            debug!(user = %user.id(), %id, %permissions, "permissions changed");
            Ok(())
        })
    }

    // ---- execution ----

    pub fn execute_file(&self, token: Token, path: &str, args: &[String]) -> FsResult<String> {
        let session = self.session(token)?;
        self.execute_file_as(path, &session.user, session.cwd, args)
    }

    /// Execute `path` as `user` from `cwd`, without a login.
    ///
    /// An app runs once with `args`. A plain file is a script: every
    /// non-blank line names a target (relative to the script's directory)
    /// and its arguments; app targets run, other targets are skipped.
    /// Outputs are joined with newlines.
    ///
    /// Scripts need both the read and the execute bit for `user`. Plain
    /// files are created without execute, so a script must first be made
    /// executable with [`change_permissions`](Self::change_permissions).
    pub fn execute_file_as(&self, path: &str, user: &UserId, cwd: NodeId, args: &[String]) -> FsResult<String> {
        // Executors run with no engine lock held and may call back in.
        let plan = {
            let state = self.read_state()?;
            let requester = state.users.by_id(user).ok_or_else(|| FsError::UserUnknown {
                username: user.to_string(),
            })?;
            self.plan_execution(&state.tree, requester, path, cwd, args)?
        };

        let mut outputs = Vec::with_capacity(plan.len());
        for (invocation, args) in &plan {
            debug!(%user, path = %invocation.path, "executing app");
            outputs.push(self.executor.execute(user, invocation, args)?);
        }
        Ok(outputs.join("\n"))
    }

    fn plan_execution(
        &self,
        tree: &Tree,
        user: &User,
        path: &str,
        cwd: NodeId,
        args: &[String],
    ) -> FsResult<Vec<(AppInvocation, Vec<String>)>> {
        let resolver = self.resolver(tree, user);
        let node = tree.node(resolver.resolve(path, cwd)?)?;
        match node.kind() {
            NodeKind::App(_) => {
                permissions::check(tree, user, node, Action::Execute)?;
                Ok(vec![(Self::invocation(tree, node)?, args.to_vec())])
            }
            NodeKind::PlainFile(script) => {
                permissions::check(tree, user, node, Action::Execute)?;
                permissions::check(tree, user, node, Action::Read)?;
                let base = node.parent().ok_or(FsError::RootDirectoryNotFound)?;

                let mut plan = Vec::new();
                for line in script.content().lines() {
                    let mut words = line.split_whitespace();
                    let Some(target) = words.next() else {
                        continue;
                    };
                    let target_node = tree.node(resolver.resolve(target, base)?)?;
                    if target_node.as_app().is_err() {
                        trace!(line_target = target, "script line skipped: not an app");
                        continue;
                    }
                    permissions::check(tree, user, target_node, Action::Execute)?;
                    plan.push((
                        Self::invocation(tree, target_node)?,
                        words.map(str::to_string).collect(),
                    ));
                }
                Ok(plan)
            }
            NodeKind::Directory(_) | NodeKind::Link(_) => Err(FsError::NotExecutable {
                name: node.name().to_string(),
            }),
        }
    }

    fn invocation(tree: &Tree, node: &Node) -> FsResult<AppInvocation> {
        Ok(AppInvocation {
            app: node.id(),
            path: tree.full_path(node.id())?,
            owner: node.owner().clone(),
            content: node.as_app()?.content().to_string(),
        })
    }

    // ---- inspection ----

    pub fn resolve(&self, token: Token, path: &str) -> FsResult<NodeId> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        self.resolver(&state.tree, &user).resolve(path, session.cwd)
    }

    pub fn resolve_no_follow(&self, token: Token, path: &str) -> FsResult<NodeId> {
        let state = self.read_state()?;
        let (session, user) = self.touch(&state, token)?;
        self.resolver(&state.tree, &user).resolve_no_follow(path, session.cwd)
    }

    pub fn full_path(&self, id: NodeId) -> FsResult<String> {
        self.read_state()?.tree.full_path(id)
    }

    pub fn node(&self, id: NodeId) -> FsResult<Option<Node>> {
        Ok(self.read_state()?.tree.get(id).cloned())
    }

    /// Copy of the published state
    pub fn snapshot(&self) -> FsResult<Snapshot> {
        Ok(self.read_state()?.clone())
    }

    pub fn root_directory(&self) -> FsResult<NodeId> {
        Ok(self.read_state()?.tree.root()?.id())
    }

    /// The `/home` directory
    pub fn home_root(&self) -> FsResult<NodeId> {
        Self::home_dir(&self.read_state()?.tree)
    }

    /// Case-insensitive user lookup
    pub fn user(&self, username: &str) -> FsResult<Option<User>> {
        Ok(self.read_state()?.users.get(username).cloned())
    }

    // ---- internals ----

    fn resolver<'a>(&self, tree: &'a Tree, user: &'a User) -> PathResolver<'a> {
        PathResolver::new(tree, user, self.config.max_link_depth)
    }

    fn read_state(&self) -> FsResult<RwLockReadGuard<'_, Snapshot>> {
        self.state.read().map_err(|_| FsError::LockPoisoned)
    }

    fn write_state(&self) -> FsResult<RwLockWriteGuard<'_, Snapshot>> {
        self.state.write().map_err(|_| FsError::LockPoisoned)
    }

    fn sessions(&self) -> FsResult<MutexGuard<'_, SessionRegistry>> {
        self.sessions.lock().map_err(|_| FsError::LockPoisoned)
    }

    fn transact<T>(&self, op: impl FnOnce(&mut Snapshot, DateTime<Utc>) -> FsResult<T>) -> FsResult<T> {
        let mut state = self.write_state()?;
        self.apply(&mut state, op)
    }

    /// Run `op` on a copy of `state`, commit the copy and publish it. Any
    /// failure leaves `state` as it was.
    ///
    /// The copy is a full clone of the snapshot, so every mutation costs
    /// O(nodes + users) regardless of how small the change is, plus
    /// whatever the store spends on its own commit.
    fn apply<T>(&self, state: &mut Snapshot, op: impl FnOnce(&mut Snapshot, DateTime<Utc>) -> FsResult<T>) -> FsResult<T> {
        let mut working = state.clone();
        let value = op(&mut working, self.clock.now())?;
        self.store.commit(&working)?;
        trace!(dirty = working.tree.dirty_count(), "snapshot committed");
        working.tree.clear_dirty();
        *state = working;
        Ok(value)
    }
}
