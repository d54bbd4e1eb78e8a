//! App and script execution through the executor collaborator.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use anyhow::Result;
use mydrive_core::{
    AppExecutor, AppInvocation, FileKind, FileSystem, FsConfig, FsError, FsResult, Token, UserId,
};

#[derive(Debug, Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<(UserId, String, Vec<String>)>>,
}

impl RecordingExecutor {
    fn calls(&self) -> Vec<(UserId, String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AppExecutor for RecordingExecutor {
    fn execute(&self, user: &UserId, app: &AppInvocation, args: &[String]) -> FsResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((user.clone(), app.path.clone(), args.to_vec()));
        Ok(format!("{}({})", app.content, args.join(",")))
    }
}

fn config() -> FsConfig {
    FsConfig {
        enable_app_creation: true,
        ..FsConfig::default()
    }
}

fn setup(executor: Arc<dyn AppExecutor>) -> Result<(FileSystem, Token)> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let fs = FileSystem::builder(config()).executor(executor).open()?;
    fs.create_user("alice", "Alice", "pw")?;
    fs.create_user("bob", "Bob", "pw")?;
    let alice = fs.login("alice", "pw")?;
    fs.create_file(alice, "hello", FileKind::App, "say-hello")?;
    fs.create_file(alice, "greet", FileKind::App, "greet")?;
    Ok((fs, alice))
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_app_runs_with_arguments() -> Result<()> {
    let executor = Arc::new(RecordingExecutor::default());
    let (fs, alice) = setup(executor.clone())?;

    let out = fs.execute_file(alice, "hello", &args(&["world"]))?;
    assert_eq!(out, "say-hello(world)");
    assert_eq!(
        executor.calls(),
        vec![(UserId::new("alice"), "/home/alice/hello".to_string(), args(&["world"]))]
    );
    Ok(())
}

#[test]
fn test_script_runs_app_lines_and_skips_the_rest() -> Result<()> {
    let executor = Arc::new(RecordingExecutor::default());
    let (fs, alice) = setup(executor.clone())?;
    fs.create_file(alice, "notes", FileKind::PlainFile, "not an app")?;
    fs.create_file(alice, "bin", FileKind::Directory, "")?;
    fs.create_file(
        alice,
        "script",
        FileKind::PlainFile,
        "hello a b\n\n   \nnotes x\nbin\n/home/alice/greet\n",
    )?;

    // Plain files are not executable by default.
    assert!(fs.execute_file(alice, "script", &[]).unwrap_err().is_permission_denied());
    fs.change_permissions(alice, "script", "rwxr--".parse()?)?;

    let out = fs.execute_file(alice, "script", &args(&["ignored"]))?;
    assert_eq!(out, "say-hello(a,b)\ngreet()");
    let paths: Vec<String> = executor.calls().into_iter().map(|(_, path, _)| path).collect();
    assert_eq!(paths, vec!["/home/alice/hello", "/home/alice/greet"]);
    Ok(())
}

#[test]
fn test_non_executable_targets() -> Result<()> {
    let executor = Arc::new(RecordingExecutor::default());
    let (fs, alice) = setup(executor.clone())?;
    fs.create_file(alice, "plain", FileKind::PlainFile, "hello")?;
    fs.create_file(alice, "link", FileKind::Link, "hello")?;

    assert!(matches!(fs.execute_file(alice, ".", &[]), Err(FsError::NotExecutable { .. })));
    assert!(matches!(
        fs.execute_file(alice, "plain", &[]),
        Err(FsError::InsufficientPermissions { .. })
    ));
    // A link runs what it points to.
    assert_eq!(fs.execute_file(alice, "link", &[])?, "say-hello()");

    let bob = fs.login("bob", "pw")?;
    assert!(fs.execute_file(bob, "/home/alice/hello", &[]).unwrap_err().is_permission_denied());
    assert_eq!(executor.calls().len(), 1);
    Ok(())
}

#[test]
fn test_trusted_execution_without_login() -> Result<()> {
    let executor = Arc::new(RecordingExecutor::default());
    let (fs, _) = setup(executor.clone())?;
    let home = fs.user("alice")?.and_then(|u| u.home()).expect("alice has a home");

    let out = fs.execute_file_as("hello", &UserId::new("alice"), home, &[])?;
    assert_eq!(out, "say-hello()");
    assert!(matches!(
        fs.execute_file_as("hello", &UserId::new("nobody"), home, &[]),
        Err(FsError::UserUnknown { .. })
    ));
    Ok(())
}

/// Executor that registers a user from inside the app run
#[derive(Debug, Default)]
struct CallbackExecutor {
    fs: OnceLock<Weak<FileSystem>>,
}

impl AppExecutor for CallbackExecutor {
    fn execute(&self, _user: &UserId, app: &AppInvocation, _args: &[String]) -> FsResult<String> {
        let fs = self
            .fs
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| FsError::Unsupported("engine gone".to_string()))?;
        fs.create_user(&app.content, "Spawned", "pw")?;
        Ok(app.content.clone())
    }
}

#[test]
fn test_executor_may_call_back_into_the_engine() -> Result<()> {
    let executor = Arc::new(CallbackExecutor::default());
    let fs = Arc::new(FileSystem::builder(config()).executor(executor.clone()).open()?);
    executor.fs.set(Arc::downgrade(&fs)).expect("set once");

    fs.create_user("alice", "Alice", "pw")?;
    let alice = fs.login("alice", "pw")?;
    fs.create_file(alice, "spawn", FileKind::App, "carol")?;

    assert_eq!(fs.execute_file(alice, "spawn", &[])?, "carol");
    assert!(fs.user("carol")?.is_some());
    Ok(())
}
