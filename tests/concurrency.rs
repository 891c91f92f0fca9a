//! Shared-handle access from multiple OS threads. One reader-writer lock
//! guards the engine, so these tests are about the handle being safely
//! shareable and writes being visible to every later read, not about
//! parallel scaling.

use std::sync::Arc;
use std::thread;

use mvtree::{MvTree, Options};
use tempfile::tempdir;

#[test]
fn concurrent_writers_on_disjoint_keys() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(MvTree::open(dir.path().join("kv.pool"), Options::default()).unwrap());

    let mut handles = Vec::new();
    for t in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                let key = format!("writer{}-key{:03}", t, i);
                tree.put(key.as_bytes(), key.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..200 {
            let key = format!("writer{}-key{:03}", t, i);
            assert_eq!(
                tree.get(key.as_bytes()).unwrap(),
                Some(key.clone().into_bytes()),
                "lost {}",
                key
            );
        }
    }
    assert_eq!(tree.total_keys().unwrap(), 800);
}

#[test]
fn readers_run_alongside_a_writer() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(MvTree::open(dir.path().join("kv.pool"), Options::default()).unwrap());

    for i in 0..100 {
        let key = format!("stable{:03}", i);
        tree.put(key.as_bytes(), b"fixed").unwrap();
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for i in 0..500 {
                let key = format!("hot{:04}", i);
                tree.put(key.as_bytes(), key.as_bytes()).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for round in 0..200 {
                    let key = format!("stable{:03}", round % 100);
                    assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(b"fixed".to_vec()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for i in 0..500 {
        let key = format!("hot{:04}", i);
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.clone().into_bytes()));
    }
}

#[test]
fn a_returned_put_is_visible_to_every_later_get() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(MvTree::open(dir.path().join("kv.pool"), Options::default()).unwrap());

    tree.put(b"flag", b"set").unwrap();

    let observers: Vec<_> = (0..4)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || tree.get(b"flag").unwrap())
        })
        .collect();

    for observer in observers {
        assert_eq!(observer.join().unwrap(), Some(b"set".to_vec()));
    }
}
