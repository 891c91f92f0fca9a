//! Fuzz testing for the engine's point operations.
//!
//! Runs an arbitrary Put/Get/Remove sequence against a fresh pool and
//! checks every observation against a BTreeMap model, including a final
//! full comparison through the diagnostics listing.

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use mvtree::{MvTree, Options};

#[derive(Debug, Arbitrary)]
enum Op {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Remove { key: Vec<u8> },
}

fuzz_target!(|ops: Vec<Op>| {
    let dir = tempfile::tempdir().unwrap();
    let tree = MvTree::open(dir.path().join("fuzz.pool"), Options::default()).unwrap();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Put { key, value } => {
                // pool exhaustion is an ordinary failure; mirror only
                // mutations that actually landed
                if tree.put(&key, &value).is_ok() {
                    model.insert(key, value);
                }
            }
            Op::Get { key } => {
                assert_eq!(tree.get(&key).unwrap(), model.get(&key).cloned());
            }
            Op::Remove { key } => {
                if tree.remove(&key).is_ok() {
                    model.remove(&key);
                }
            }
        }
    }

    let mut pairs = tree.list_pairs().unwrap();
    pairs.sort();
    let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
    assert_eq!(pairs, expected);
});
