//! Multi-leaf trees: split behavior under monotonic and shuffled insert
//! orders. The leaf split keeps 25 of the staged 49 keys in place and moves
//! 24, so ascending and descending runs over the same key set settle into
//! different leaf counts; both are pinned here because the analyzer makes
//! them observable.

use mvtree::{MvTree, Options};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::{tempdir, TempDir};

fn open_tree() -> (TempDir, MvTree) {
    let dir = tempdir().unwrap();
    let tree = MvTree::open(dir.path().join("kv.pool"), Options::default()).unwrap();
    (dir, tree)
}

fn assert_counts(tree: &MvTree, empty: usize, prealloc: usize, total: usize) {
    let analysis = tree.analyze().unwrap();
    assert_eq!(
        (analysis.leaf_empty, analysis.leaf_prealloc, analysis.leaf_total),
        (empty, prealloc, total)
    );
}

#[test]
fn ascending_inserts_settle_into_five_leaves() {
    let (_dir, tree) = open_tree();

    for i in 10000..=10144 {
        let key = i.to_string();
        tree.put(key.as_bytes(), key.as_bytes()).unwrap();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    for i in 10000..=10144 {
        let key = i.to_string();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    assert_counts(&tree, 0, 0, 5);
}

#[test]
fn descending_inserts_settle_into_six_leaves() {
    let (_dir, tree) = open_tree();

    for i in (10000..=10144).rev() {
        let key = i.to_string();
        tree.put(key.as_bytes(), key.as_bytes()).unwrap();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    for i in (10000..=10144).rev() {
        let key = i.to_string();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    assert_counts(&tree, 0, 0, 6);
}

#[test]
fn ascending_decimal_strings_settle_into_five_leaves() {
    let (_dir, tree) = open_tree();

    for i in 1..=144 {
        let key = i.to_string();
        tree.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    for i in 1..=144 {
        let key = i.to_string();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    assert_counts(&tree, 0, 0, 5);
}

#[test]
fn descending_decimal_strings_settle_into_five_leaves() {
    let (_dir, tree) = open_tree();

    for i in (1..=144).rev() {
        let key = i.to_string();
        tree.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    for i in 1..=144 {
        let key = i.to_string();
        assert_eq!(tree.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
    }
    assert_counts(&tree, 0, 0, 5);
}

#[test]
fn shuffled_inserts_stay_retrievable() {
    let (_dir, tree) = open_tree();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let mut keys: Vec<String> = (0..600).map(|i| format!("key{:05}", i)).collect();
    keys.shuffle(&mut rng);

    for key in &keys {
        tree.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    for key in &keys {
        assert_eq!(
            tree.get(key.as_bytes()).unwrap(),
            Some(key.clone().into_bytes()),
            "lost key {}",
            key
        );
    }
    assert_eq!(tree.total_keys().unwrap(), 600);
}

#[test]
fn updates_across_leaves_do_not_split() {
    let (_dir, tree) = open_tree();

    for i in 0..200 {
        tree.put(format!("key{:05}", i).as_bytes(), b"first").unwrap();
    }
    let before = tree.analyze().unwrap().leaf_total;

    for i in 0..200 {
        tree.put(format!("key{:05}", i).as_bytes(), b"second-longer-value")
            .unwrap();
    }

    assert_eq!(tree.analyze().unwrap().leaf_total, before);
    for i in 0..200 {
        assert_eq!(
            tree.get(format!("key{:05}", i).as_bytes()).unwrap(),
            Some(b"second-longer-value".to_vec())
        );
    }
}

#[test]
fn removes_interleaved_with_splits() {
    let (_dir, tree) = open_tree();

    for i in 0..300 {
        tree.put(format!("key{:05}", i).as_bytes(), format!("value{:05}", i).as_bytes())
            .unwrap();
    }
    for i in (0..300).step_by(2) {
        tree.remove(format!("key{:05}", i).as_bytes()).unwrap();
    }

    for i in 0..300 {
        let value = tree.get(format!("key{:05}", i).as_bytes()).unwrap();
        if i % 2 == 0 {
            assert_eq!(value, None, "key{:05} should be gone", i);
        } else {
            assert_eq!(value, Some(format!("value{:05}", i).into_bytes()));
        }
    }
    assert_eq!(tree.total_keys().unwrap(), 150);
}
