//! Independent callers against one engine.

use std::collections::HashSet;
use std::thread;

use anyhow::Result;
use mydrive_core::{FileKind, FileSystem, FsConfig, FsError, Token};

const THREADS: usize = 8;

fn setup() -> Result<FileSystem> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let fs = FileSystem::new(FsConfig::default())?;
    fs.create_user("alice", "Alice", "pw")?;
    Ok(fs)
}

#[test]
fn test_same_name_creation_has_one_winner() -> Result<()> {
    let fs = setup()?;
    let tokens = (0..THREADS)
        .map(|_| fs.login("alice", "pw"))
        .collect::<Result<Vec<Token>, FsError>>()?;

    for round in 0..4 {
        let name = format!("shared{round}");
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = tokens
                .iter()
                .map(|&token| {
                    let fs = &fs;
                    let name = name.as_str();
                    s.spawn(move || fs.create_file(token, name, FileKind::Directory, ""))
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let mut created = 0;
        for result in results {
            match result {
                Ok(Ok(_)) => created += 1,
                Ok(Err(FsError::FileExists { .. })) => {}
                Ok(Err(other)) => panic!("unexpected error: {other}"),
                Err(_) => panic!("creator thread panicked"),
            }
        }
        assert_eq!(created, 1, "{name}");
    }

    let names = fs.list_names(tokens[0], ".")?;
    let unique: HashSet<&String> = names.iter().collect();
    assert_eq!(names.len(), 4);
    assert_eq!(unique.len(), names.len());
    Ok(())
}

#[test]
fn test_concurrent_logins_get_distinct_tokens() -> Result<()> {
    let fs = setup()?;
    let per_thread = 16;
    let tokens: Vec<Token> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let fs = &fs;
                s.spawn(move || {
                    (0..per_thread)
                        .map(|_| fs.login("alice", "pw"))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("login thread panicked").expect("login failed"))
            .collect()
    });

    let unique: HashSet<Token> = tokens.iter().copied().collect();
    assert_eq!(tokens.len(), THREADS * per_thread);
    assert_eq!(unique.len(), tokens.len());
    assert_eq!(fs.active_sessions()?, tokens.len());
    Ok(())
}

#[test]
fn test_readers_never_see_partial_subtrees() -> Result<()> {
    let fs = setup()?;
    let writer = fs.login("alice", "pw")?;
    let reader = fs.login("alice", "pw")?;

    let written = thread::scope(|s| {
        let writes = s.spawn(|| {
            for i in 0..50 {
                let name = format!("d{i}");
                fs.create_file(writer, &name, FileKind::Directory, "")?;
                fs.change_directory(writer, &name)?;
                fs.create_file(writer, "inner", FileKind::PlainFile, "x")?;
                fs.change_directory(writer, "..")?;
                fs.delete_file(writer, &name)?;
            }
            Ok::<_, FsError>(())
        });
        s.spawn(|| {
            for _ in 0..200 {
                let snapshot = fs.snapshot().expect("snapshot");
                let tree = snapshot.tree();
                // Every node's parent exists and lists it.
                for node in tree.iter() {
                    if let Some(parent) = node.parent() {
                        let dir = tree
                            .get(parent)
                            .expect("parent present")
                            .as_directory()
                            .expect("parent is a directory");
                        assert_eq!(dir.get(node.name()), Some(node.id()));
                    }
                }
                let names = fs.list_names(reader, ".").expect("listing");
                let unique: HashSet<&String> = names.iter().collect();
                assert_eq!(unique.len(), names.len());
            }
        });
        writes.join()
    });

    written.expect("writer thread panicked")?;
    assert!(fs.list_names(reader, ".")?.is_empty());
    Ok(())
}
