//! # Hybrid B+ Tree Engine
//!
//! [`MvTree`] ties the volatile directory to the persistent heap:
//!
//! ```text
//! Get/Put/Remove
//!       │
//!       ▼
//! tree navigation (volatile inner nodes)
//!       │
//!       ▼
//! leaf descriptor ──── slot search over cached hashes + keys
//!       │
//!       ▼
//! transaction on the heap: payload alloc/free, slot rewrites,
//! list linking. Committed atomically, then mirrored into the
//! volatile descriptors
//! ```
//!
//! ## Recovery
//!
//! The persistent root holds the head of an unsorted linked list of every
//! leaf block ever allocated. Open walks the list: occupied leaves become
//! descriptors labeled by their highest key, empty leaves go to the
//! preallocation pool. The descriptors, sorted by that label, are then
//! bulk-inserted into a fresh directory using the same inner-split logic
//! the runtime path uses, so the rebuilt tree is independent of on-disk
//! slot order. Recovering a clean engine is an identity.
//!
//! ## Leaf Recycling
//!
//! Pooled leaves are already linked into the persistent list; a Put that
//! needs a leaf consumes the pool before asking the allocator, and the
//! consumed address is only popped after the transaction commits.
//!
//! ## Mutation Discipline
//!
//! Every Put and Remove runs as one heap transaction. Volatile state is
//! staged in locals and published only after commit; an abort (for
//! example, pool exhaustion) therefore leaves both halves exactly as they
//! were, and the operation surfaces as a failure the caller may retry.
//!
//! ## Locking
//!
//! One reader-writer lock guards the whole engine: Get takes it shared,
//! Put and Remove exclusive. Heap transactions serialize their commits, so
//! the coarse lock is all that is needed to keep the volatile and
//! persistent halves consistent; a Put that returned is visible to every
//! later Get.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};
use parking_lot::RwLock;
use zerocopy::IntoBytes;

use crate::config::{Options, LEAF_KEYS, LEAF_KEYS_MIDPOINT, LEAF_KEYS_UPPER};
use crate::heap::{Heap, Txn};
use crate::tree::{
    encode_slot, pearson, LeafBlock, LeafNode, Node, SlotKey, SlotPayload, LEAF_BLOCK_SIZE,
};

/// Engine identifier.
pub const ENGINE: &str = "mvtree";

/// Persistent root object: a single `head` pointer, 8 bytes.
const ROOT_OBJECT_SIZE: usize = 8;

/// Operation outcome as observed through the binding layer.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 1,
    NotFound = 2,
    Failed = -1,
}

impl Status {
    /// Status of a lookup outcome ([`MvTree::get`], [`MvTree::get_into`]):
    /// a value maps to `Ok`, an absent key to `NotFound`, any error to
    /// `Failed`.
    pub fn from_lookup<T>(result: &Result<Option<T>>) -> Self {
        match result {
            Ok(Some(_)) => Status::Ok,
            Ok(None) => Status::NotFound,
            Err(_) => Status::Failed,
        }
    }

    /// Status of a mutation outcome ([`MvTree::put`], [`MvTree::remove`]):
    /// success maps to `Ok`, a transactional abort to `Failed`.
    pub fn from_mutation<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(_) => Status::Failed,
        }
    }
}

/// Counters over the persistent leaf list, from [`MvTree::analyze`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Leaves whose slots are all vacant, pooled or not.
    pub leaf_empty: usize,
    /// Leaves currently held in the preallocation pool.
    pub leaf_prealloc: usize,
    /// Every leaf reachable from the persistent root.
    pub leaf_total: usize,
    /// Pool file backing the engine.
    pub path: PathBuf,
}

struct EngineState {
    heap: Heap,
    tree_top: Option<Node>,
    prealloc: Vec<u64>,
}

/// Persistent hybrid B+ tree key-value engine.
///
/// The handle is `Send + Sync`; clones of an `Arc<MvTree>` may issue
/// operations from any number of threads.
pub struct MvTree {
    state: RwLock<EngineState>,
}

impl MvTree {
    /// Opens the pool at `path`, creating it with `options.pool_size` bytes
    /// when absent, and rebuilds the volatile index from it.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let heap = Heap::open_or_create(path.as_ref(), options.pool_size)?;
        Self::with_heap(heap)
    }

    /// Adopts an already-constructed heap. The root reference lives in the
    /// heap header, so no separate root handle is needed.
    pub fn with_heap(mut heap: Heap) -> Result<Self> {
        let (tree_top, prealloc) = recover(&mut heap)?;
        Ok(Self {
            state: RwLock::new(EngineState {
                heap,
                tree_top,
                prealloc,
            }),
        })
    }

    /// Address of the persistent root object, stable across reopen.
    pub fn root(&self) -> u64 {
        self.state.read().heap.root()
    }

    /// Looks up `key`, returning an owned copy of its value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        Ok(state.lookup(key)?.map(<[u8]>::to_vec))
    }

    /// Copies the value for `key` into `buf`, returning the length written.
    /// Fails without writing when the value exceeds the buffer.
    pub fn get_into(&self, key: &[u8], buf: &mut [u8]) -> Result<Option<usize>> {
        let state = self.state.read();
        let value = match state.lookup(key)? {
            Some(value) => value,
            None => return Ok(None),
        };
        ensure!(
            value.len() <= buf.len(),
            "value of {} bytes exceeds the {}-byte buffer",
            value.len(),
            buf.len()
        );
        buf[..value.len()].copy_from_slice(value);
        Ok(Some(value.len()))
    }

    /// Stores `value` under `key`, replacing any prior value. On failure
    /// the engine is left exactly as if the call had not been made.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            key.len() <= u32::MAX as usize && value.len() <= u32::MAX as usize,
            "key or value exceeds the 4 GiB slot limit"
        );
        self.state.write().put(key, value)
    }

    /// Removes `key`. Removing an absent key succeeds.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.state.write().remove(key)
    }

    /// Counts empty, preallocated, and total persistent leaves.
    pub fn analyze(&self) -> Result<Analysis> {
        let state = self.state.read();
        let mut analysis = Analysis {
            leaf_empty: 0,
            leaf_prealloc: state.prealloc.len(),
            leaf_total: 0,
            path: state.heap.path().to_path_buf(),
        };
        state.walk_leaves(|_, block| {
            analysis.leaf_total += 1;
            if block.slots.iter().all(|&slot| slot == 0) {
                analysis.leaf_empty += 1;
            }
            Ok(())
        })?;
        Ok(analysis)
    }

    /// Unordered listing of every stored pair, for diagnostics.
    pub fn list_pairs(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        let mut pairs = Vec::new();
        state.walk_payloads(|payload| {
            pairs.push((payload.key().to_vec(), payload.value().to_vec()));
            Ok(())
        })?;
        Ok(pairs)
    }

    /// Unordered listing of every stored key, for diagnostics.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let state = self.state.read();
        let mut keys = Vec::new();
        state.walk_payloads(|payload| {
            keys.push(payload.key().to_vec());
            Ok(())
        })?;
        Ok(keys)
    }

    /// Number of stored keys across all persistent leaves.
    pub fn total_keys(&self) -> Result<usize> {
        let state = self.state.read();
        let mut count = 0;
        state.walk_payloads(|_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Destroys all persistent state owned by the engine: the pool and
    /// journal files are removed.
    pub fn free(self) -> Result<()> {
        let state = self.state.into_inner();
        tracing::debug!(pool = %state.heap.path().display(), "destroying engine pool");
        state.heap.destroy()
    }
}

impl EngineState {
    fn lookup(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let top = match &self.tree_top {
            Some(top) => top,
            None => return Ok(None),
        };
        let leaf = top.descend(key);
        let slot = match leaf.find_slot(pearson(key), key) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let payload_addr = self.heap.read_u64(LeafBlock::slot_addr(leaf.addr, slot))?;
        ensure!(
            payload_addr != 0,
            "slot {} of leaf {:#x} is occupied in memory but vacant in the pool",
            slot,
            leaf.addr
        );
        Ok(Some(SlotPayload::read(&self.heap, payload_addr)?.value()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = pearson(key);
        let EngineState {
            heap,
            tree_top,
            prealloc,
        } = self;

        let mut top = match tree_top.take() {
            None => {
                // First leaf of the tree: stage leaf, payload, and slot 0
                // in one transaction, then publish the descriptor.
                let (leaf_addr, reused) = {
                    let mut txn = heap.begin();
                    let (leaf_addr, reused) = stage_leaf(&mut txn, prealloc)?;
                    let payload = stage_payload(&mut txn, hash, key, value)?;
                    txn.write_u64(LeafBlock::slot_addr(leaf_addr, 0), payload)?;
                    txn.commit()?;
                    (leaf_addr, reused)
                };
                if reused {
                    prealloc.pop();
                }
                let mut node = LeafNode::empty(leaf_addr);
                node.slots[0] = Some(SlotKey {
                    hash,
                    key: key.to_vec(),
                });
                *tree_top = Some(Node::Leaf(Box::new(node)));
                return Ok(());
            }
            Some(top) => top,
        };

        let result = insert_recurse(heap, prealloc, &mut top, hash, key, value);
        match result {
            Ok(Some((split_key, sibling))) => {
                *tree_top = Some(Node::branch(split_key, top, sibling));
                Ok(())
            }
            Ok(None) => {
                *tree_top = Some(top);
                Ok(())
            }
            Err(err) => {
                *tree_top = Some(top);
                Err(err)
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        let EngineState { heap, tree_top, .. } = self;
        let top = match tree_top {
            Some(top) => top,
            None => return Ok(()),
        };
        let leaf = top.descend_mut(key);
        let slot = match leaf.find_slot(pearson(key), key) {
            Some(slot) => slot,
            None => return Ok(()),
        };

        let slot_addr = LeafBlock::slot_addr(leaf.addr, slot);
        let payload_addr = heap.read_u64(slot_addr)?;
        ensure!(
            payload_addr != 0,
            "slot {} of leaf {:#x} is occupied in memory but vacant in the pool",
            slot,
            leaf.addr
        );

        let mut txn = heap.begin();
        txn.free(payload_addr)?;
        txn.write_u64(slot_addr, 0)?;
        txn.commit()?;

        // The leaf stays in the tree and in the persistent list even when
        // this was its last key; recovery pools fully empty leaves.
        leaf.slots[slot] = None;
        Ok(())
    }

    fn walk_leaves(&self, mut visit: impl FnMut(u64, &LeafBlock) -> Result<()>) -> Result<()> {
        let root = self.heap.root();
        if root == 0 {
            return Ok(());
        }
        let mut addr = self.heap.read_u64(root)?;
        while addr != 0 {
            let block = LeafBlock::read(&self.heap, addr)?;
            visit(addr, &block)?;
            addr = block.next;
        }
        Ok(())
    }

    fn walk_payloads(&self, mut visit: impl FnMut(&SlotPayload<'_>) -> Result<()>) -> Result<()> {
        let heap = &self.heap;
        self.walk_leaves(|_, block| {
            for &payload_addr in block.slots.iter() {
                if payload_addr != 0 {
                    visit(&SlotPayload::read(heap, payload_addr)?)?;
                }
            }
            Ok(())
        })
    }
}

/// Stages a leaf block for a Put that needs one, preferring the
/// preallocation pool. A pooled leaf is already linked into the persistent
/// list; a fresh one is linked at the list head inside the transaction.
/// Returns the leaf address and whether the pool supplied it; the caller
/// pops the pool only after commit.
fn stage_leaf(txn: &mut Txn<'_>, prealloc: &[u64]) -> Result<(u64, bool)> {
    if let Some(&addr) = prealloc.last() {
        return Ok((addr, true));
    }
    let addr = txn.alloc(LEAF_BLOCK_SIZE)?;
    let root = txn.root()?;
    ensure!(root != 0, "pool has no root object");
    let head = txn.read_u64(root)?;
    let mut block = LeafBlock::zeroed();
    block.next = head;
    txn.write(addr, block.as_bytes())?;
    txn.write_u64(root, addr)?;
    Ok((addr, false))
}

/// Allocates and writes one slot payload, returning its address.
fn stage_payload(txn: &mut Txn<'_>, hash: u8, key: &[u8], value: &[u8]) -> Result<u64> {
    let bytes = encode_slot(hash, key, value);
    let addr = txn.alloc(bytes.len())?;
    txn.write(addr, &bytes)?;
    Ok(addr)
}

/// Descends to the responsible leaf and applies the Put, handing any
/// (split key, new sibling) pair back up for the parent to absorb.
fn insert_recurse(
    heap: &mut Heap,
    prealloc: &mut Vec<u64>,
    node: &mut Node,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<Option<(Vec<u8>, Node)>> {
    let inner = match node {
        Node::Leaf(leaf) => return leaf_insert(heap, prealloc, leaf, hash, key, value),
        Node::Inner(inner) => inner,
    };
    let idx = inner.child_index(key);
    match insert_recurse(heap, prealloc, &mut inner.children[idx], hash, key, value)? {
        None => Ok(None),
        Some((split_key, sibling)) => {
            inner.insert_split(split_key, sibling);
            if inner.is_overfull() {
                Ok(Some(inner.split_overflow()))
            } else {
                Ok(None)
            }
        }
    }
}

fn leaf_insert(
    heap: &mut Heap,
    prealloc: &mut Vec<u64>,
    leaf: &mut LeafNode,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<Option<(Vec<u8>, Node)>> {
    if let Some(slot) = leaf.find_slot(hash, key) {
        // Update in place: same slot, new payload, old payload freed in
        // the same transaction.
        let slot_addr = LeafBlock::slot_addr(leaf.addr, slot);
        let old_payload = heap.read_u64(slot_addr)?;
        ensure!(
            old_payload != 0,
            "slot {} of leaf {:#x} is occupied in memory but vacant in the pool",
            slot,
            leaf.addr
        );
        let mut txn = heap.begin();
        let payload = stage_payload(&mut txn, hash, key, value)?;
        txn.free(old_payload)?;
        txn.write_u64(slot_addr, payload)?;
        txn.commit()?;
        return Ok(None);
    }

    if let Some(slot) = leaf.first_empty() {
        let mut txn = heap.begin();
        let payload = stage_payload(&mut txn, hash, key, value)?;
        txn.write_u64(LeafBlock::slot_addr(leaf.addr, slot), payload)?;
        txn.commit()?;
        leaf.slots[slot] = Some(SlotKey {
            hash,
            key: key.to_vec(),
        });
        return Ok(None);
    }

    leaf_split(heap, prealloc, leaf, hash, key, value).map(Some)
}

/// One staged entry of a leaf split: an existing payload keeps its address,
/// the incoming pair gets one inside the split transaction.
struct SplitEntry {
    hash: u8,
    key: Vec<u8>,
    payload: Option<u64>,
}

/// Splits a full leaf around the incoming pair. The staged 49-key sequence
/// is sorted; positions `0..=LEAF_KEYS_MIDPOINT` stay in the existing
/// block, the rest move to the sibling, and the first key of the upper
/// half is handed to the parent. Both blocks are rewritten from scratch in
/// one transaction; the descriptors are rebuilt only after it commits.
fn leaf_split(
    heap: &mut Heap,
    prealloc: &mut Vec<u64>,
    leaf: &mut LeafNode,
    hash: u8,
    key: &[u8],
    value: &[u8],
) -> Result<(Vec<u8>, Node)> {
    let block = LeafBlock::read(heap, leaf.addr)?;

    let mut entries: Vec<SplitEntry> = Vec::with_capacity(LEAF_KEYS + 1);
    for (i, slot) in leaf.slots.iter().enumerate() {
        let slot_key = match slot {
            Some(slot_key) => slot_key,
            None => eyre::bail!("split of a leaf with vacant slots at {:#x}", leaf.addr),
        };
        ensure!(
            block.slots[i] != 0,
            "slot {} of leaf {:#x} is occupied in memory but vacant in the pool",
            i,
            leaf.addr
        );
        entries.push(SplitEntry {
            hash: slot_key.hash,
            key: slot_key.key.clone(),
            payload: Some(block.slots[i]),
        });
    }
    entries.push(SplitEntry {
        hash,
        key: key.to_vec(),
        payload: None,
    });
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    let (sibling_addr, reused) = {
        let mut txn = heap.begin();
        let (sibling_addr, reused) = stage_leaf(&mut txn, prealloc)?;
        let new_payload = stage_payload(&mut txn, hash, key, value)?;

        // Redistribute payload addresses; surviving payloads move between
        // slots without being rewritten.
        let mut lower = [0u64; LEAF_KEYS];
        let mut upper = [0u64; LEAF_KEYS];
        for (i, entry) in entries.iter().enumerate() {
            let addr = entry.payload.unwrap_or(new_payload);
            if i <= LEAF_KEYS_MIDPOINT {
                lower[i] = addr;
            } else {
                upper[i - LEAF_KEYS_UPPER] = addr;
            }
        }
        txn.write(leaf.addr, lower.as_bytes())?;
        txn.write(sibling_addr, upper.as_bytes())?;
        txn.commit()?;
        (sibling_addr, reused)
    };
    if reused {
        prealloc.pop();
    }

    let mut old_node = LeafNode::empty(leaf.addr);
    let mut sibling = LeafNode::empty(sibling_addr);
    let mut split_key = Vec::new();
    for (i, entry) in entries.into_iter().enumerate() {
        let slot_key = SlotKey {
            hash: entry.hash,
            key: entry.key,
        };
        if i <= LEAF_KEYS_MIDPOINT {
            old_node.slots[i] = Some(slot_key);
        } else {
            if i == LEAF_KEYS_UPPER {
                split_key = slot_key.key.clone();
            }
            sibling.slots[i - LEAF_KEYS_UPPER] = Some(slot_key);
        }
    }
    leaf.slots = old_node.slots;

    tracing::trace!(
        leaf = leaf.addr,
        sibling = sibling_addr,
        reused,
        "split full leaf"
    );
    Ok((split_key, Node::Leaf(Box::new(sibling))))
}

/// Rebuilds the volatile half from the persistent leaf list.
fn recover(heap: &mut Heap) -> Result<(Option<Node>, Vec<u64>)> {
    if heap.root() == 0 {
        let mut txn = heap.begin();
        let root = txn.alloc(ROOT_OBJECT_SIZE)?;
        txn.write_u64(root, 0)?;
        txn.set_root(root)?;
        txn.commit()?;
        tracing::debug!(root, "initialized persistent root");
        return Ok((None, Vec::new()));
    }

    let mut recovered: Vec<Box<LeafNode>> = Vec::new();
    let mut prealloc = Vec::new();
    let mut addr = heap.read_u64(heap.root())?;
    while addr != 0 {
        let block = LeafBlock::read(heap, addr)?;
        let node = LeafNode::load(heap, addr, &block)?;
        if node.is_empty() {
            prealloc.push(addr);
        } else {
            recovered.push(Box::new(node));
        }
        addr = block.next;
    }

    recovered.sort_by(|a, b| a.max_key().cmp(&b.max_key()));
    tracing::debug!(
        leaves = recovered.len(),
        pooled = prealloc.len(),
        "rebuilt volatile index"
    );

    let mut top: Option<Node> = None;
    for leaf in recovered {
        top = Some(match top.take() {
            None => Node::Leaf(leaf),
            Some(mut root) => match leaf.min_key().map(<[u8]>::to_vec) {
                Some(split_key) => {
                    match bulk_append(&mut root, split_key, Node::Leaf(leaf)) {
                        Some((promoted, sibling)) => Node::branch(promoted, root, sibling),
                        None => root,
                    }
                }
                // empty leaves were pooled above
                None => root,
            },
        });
    }
    Ok((top, prealloc))
}

/// Appends a recovered leaf at the right edge of the directory, splitting
/// overfull inner nodes exactly as the runtime insert path does. Leaves
/// arrive sorted, so the separator (the new leaf's lowest key) always
/// belongs after every existing separator.
fn bulk_append(node: &mut Node, split_key: Vec<u8>, leaf: Node) -> Option<(Vec<u8>, Node)> {
    let inner = match node {
        Node::Inner(inner) => inner,
        Node::Leaf(_) => return Some((split_key, leaf)),
    };
    let last = inner.children.len() - 1;
    if let Some((key, sibling)) = bulk_append(&mut inner.children[last], split_key, leaf) {
        inner.keys.push(key);
        inner.children.push(sibling);
        if inner.is_overfull() {
            return Some(inner.split_overflow());
        }
    }
    None
}
