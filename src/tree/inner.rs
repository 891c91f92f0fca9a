//! # Volatile Inner Nodes
//!
//! The directory of the tree is purely volatile: inner nodes own their
//! children and are rebuilt from the persistent leaf list on every open.
//! A node holds at most `INNER_KEYS` separator keys and one more child
//! than keys; the backing `SmallVec`s carry one extra inline slot so a
//! split can be staged in place before the node divides.
//!
//! ## Separator Invariant
//!
//! Separators are strictly increasing. For the separator at position `i`,
//! every key reachable through `children[i]` compares below it and every
//! key reachable through `children[i + 1]` compares at or above it.
//! Navigation therefore descends left of the smallest separator strictly
//! greater than the search key, or into the last child when no separator
//! is greater.
//!
//! ## Split Staging
//!
//! Inserting into a full node temporarily yields `INNER_KEYS + 1` keys and
//! `INNER_KEYS + 2` children. [`InnerNode::split_overflow`] then divides
//! the staged node: the first two keys and three children stay, the middle
//! key is promoted to the parent, and the rest move to a new sibling.

use smallvec::SmallVec;

use crate::config::{INNER_KEYS, INNER_KEYS_MIDPOINT, INNER_KEYS_UPPER};
use crate::tree::leaf::LeafNode;

/// One tree node: either a directory entry or a leaf descriptor.
#[derive(Debug)]
pub enum Node {
    Inner(Box<InnerNode>),
    Leaf(Box<LeafNode>),
}

#[derive(Debug)]
pub struct InnerNode {
    pub keys: SmallVec<[Vec<u8>; INNER_KEYS + 1]>,
    pub children: SmallVec<[Node; INNER_KEYS + 2]>,
}

impl Node {
    /// Builds the two-child root produced when the old root splits.
    pub fn branch(split_key: Vec<u8>, left: Node, right: Node) -> Node {
        let mut keys = SmallVec::new();
        keys.push(split_key);
        let mut children = SmallVec::new();
        children.push(left);
        children.push(right);
        Node::Inner(Box::new(InnerNode { keys, children }))
    }

    /// Walks to the leaf descriptor responsible for `key`.
    pub fn descend(&self, key: &[u8]) -> &LeafNode {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(leaf) => return leaf,
                Node::Inner(inner) => node = &inner.children[inner.child_index(key)],
            }
        }
    }

    pub fn descend_mut(&mut self, key: &[u8]) -> &mut LeafNode {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(leaf) => return leaf,
                Node::Inner(inner) => {
                    let idx = inner.child_index(key);
                    node = &mut inner.children[idx];
                }
            }
        }
    }
}

impl InnerNode {
    /// Index of the child to descend into for `key`: left of the smallest
    /// separator strictly greater than it.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys
            .iter()
            .position(|separator| separator.as_slice() > key)
            .unwrap_or(self.keys.len())
    }

    /// Inserts a split key at its sorted position with the new right-hand
    /// child beside it. May leave the node overfull by one.
    pub fn insert_split(&mut self, split_key: Vec<u8>, child: Node) {
        let pos = self
            .keys
            .iter()
            .position(|separator| separator.as_slice() > split_key.as_slice())
            .unwrap_or(self.keys.len());
        self.keys.insert(pos, split_key);
        self.children.insert(pos + 1, child);
    }

    pub fn is_overfull(&self) -> bool {
        self.keys.len() > INNER_KEYS
    }

    /// Divides a staged 5-key node: keys `[0, 1]` and children `[0..3]`
    /// stay, key `[2]` is promoted, keys `[3, 4]` and children `[3..6]`
    /// move to the returned sibling.
    pub fn split_overflow(&mut self) -> (Vec<u8>, Node) {
        debug_assert_eq!(self.keys.len(), INNER_KEYS + 1);
        debug_assert_eq!(self.children.len(), INNER_KEYS + 2);

        let upper_keys: SmallVec<[Vec<u8>; INNER_KEYS + 1]> =
            self.keys.drain(INNER_KEYS_UPPER..).collect();
        let upper_children: SmallVec<[Node; INNER_KEYS + 2]> =
            self.children.drain(INNER_KEYS_UPPER..).collect();

        let promoted = self
            .keys
            .pop()
            .unwrap_or_default();
        debug_assert_eq!(self.keys.len(), INNER_KEYS_MIDPOINT);

        let sibling = InnerNode {
            keys: upper_keys,
            children: upper_children,
        };
        (promoted, Node::Inner(Box::new(sibling)))
    }
}
