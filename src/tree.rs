//! The arena-backed AVL tree engine.
//!
//! This layer owns the arena, the root offset, and the recycling chain.
//! Offset zero always holds the chain anchor: a zeroed record appended on
//! the first insertion that is never part of the tree. Its `right` link
//! heads the chain of erased nodes, threaded through their `right` links
//! in LIFO order, so a freed record is handed back by the very next
//! allocation.
//!
//! Erasing never shrinks the arena; the high-water mark stands. Payload
//! types are plain copyable values, so wiping a record needs no
//! destructor call.

use std::marker::PhantomData;
use std::ptr;

use crate::arena::{Arena, ALIGN};
use crate::error::{Error, Result};
use crate::node::{Node, Tilt};
use crate::Compare;

/// Single-root AVL tree whose nodes live in one growable arena and link
/// to each other by self-relative byte offsets.
pub(crate) struct AvlTree<T, C> {
    arena: Arena,
    /// Byte offset of the root node; 0 when the tree is empty.
    root: u32,
    len: u32,
    _cmp: PhantomData<(T, C)>,
}

/// Leaf-depth summary of the live tree, gathered by [`AvlTree::depth_profile`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DepthProfile {
    pub(crate) live: u32,
    pub(crate) leaves: u32,
    pub(crate) min_leaf_depth: u32,
    pub(crate) max_leaf_depth: u32,
}

impl<T: Copy, C: Compare<T>> AvlTree<T, C> {
    pub(crate) const fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: 0,
            len: 0,
            _cmp: PhantomData,
        }
    }

    #[inline]
    fn node_size() -> u32 {
        const {
            assert!(
                std::mem::align_of::<Node<T>>() <= ALIGN as usize,
                "payload alignment exceeds the arena alignment"
            )
        };
        Node::<T>::byte_size()
    }

    /// Externally visible size of one slot, in bytes.
    #[inline]
    pub(crate) fn slot_bytes() -> u32 {
        Self::node_size()
    }

    #[inline]
    pub(crate) fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub(crate) fn arena_size(&self) -> u32 {
        self.arena.size()
    }

    #[inline]
    pub(crate) fn arena_capacity(&self) -> u32 {
        self.arena.capacity()
    }

    #[inline]
    pub(crate) fn arena_reallocs(&self) -> u32 {
        self.arena.reallocs()
    }

    /// Raw node pointer for a byte offset.
    ///
    /// # Safety
    /// `off` must lie within the arena's current length.
    #[inline]
    unsafe fn at(&self, off: u32) -> *mut Node<T> {
        debug_assert!(off + Self::node_size() <= self.arena.size());
        // SAFETY: per contract.
        unsafe { self.arena.head().add(off as usize).cast() }
    }

    #[inline]
    fn offset_of(&self, n: *mut Node<T>) -> u32 {
        (n as usize - self.arena.head() as usize) as u32
    }

    /// The recycling-chain anchor at offset zero.
    ///
    /// # Safety
    /// The arena must be non-empty (anything has ever been inserted).
    #[inline]
    unsafe fn anchor(&self) -> *mut Node<T> {
        // SAFETY: per contract.
        unsafe { self.at(0) }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Inserts `v`, returning its byte offset and whether it was new.
    /// Duplicates are rejected without allocating.
    pub(crate) fn insert(&mut self, v: T) -> Result<(u32, bool)> {
        if self.arena.size() == 0 {
            // The chain anchor is appended exactly once, before the first
            // node, and never joins the tree.
            self.arena.append_zero(Self::node_size())?;
        }

        if self.root == 0 {
            let off = self.alloc_node(v)?;
            self.root = off;
            self.len += 1;
            return Ok((off, true));
        }

        // SAFETY: `root` addresses a live node.
        unsafe {
            let (hit, side) = Node::locate::<C>(self.at(self.root), &v);
            let side = match side {
                None => return Ok((self.offset_of(hit), false)),
                Some(s) => s,
            };

            // Allocation may move the arena; carry offsets across it.
            let parent_off = self.offset_of(hit);
            let off = self.alloc_node(v)?;
            Node::attach(self.at(parent_off), self.at(off), side);

            // A rotation at the top displaces the root by at most one
            // level; the old root's parent link then names its successor.
            let up = (*self.at(self.root)).parent;
            self.root = (self.root as i64 + up as i64) as u32;

            self.len += 1;
            Ok((off, true))
        }
    }

    /// Takes a node from the recycling chain, or appends a fresh one.
    fn alloc_node(&mut self, v: T) -> Result<u32> {
        // SAFETY: the anchor exists (insert appends it first); chain
        // links address wiped records inside the arena.
        unsafe {
            let anchor = self.anchor();
            let head = (*anchor).right;
            if head != 0 {
                let n = Node::peer(anchor, head);
                debug_assert_eq!((*n).tilt, Tilt::Free);
                (*anchor).right = if (*n).right != 0 { head + (*n).right } else { 0 };
                (*n).right = 0;
                (*n).tilt = Tilt::Even;
                Node::set_payload(n, v);
                return Ok(self.offset_of(n));
            }
        }

        let off = self.arena.append_zero(Self::node_size())?;
        // SAFETY: the record at `off` was just appended, zero-filled.
        unsafe {
            let n = self.at(off);
            (*n).tilt = Tilt::Even;
            Node::set_payload(n, v);
        }
        Ok(off)
    }

    /// Erases the node matching `v`, if present.
    pub(crate) fn erase(&mut self, v: &T) -> bool {
        let off = self.find(v);
        if off == 0 {
            return false;
        }
        self.erase_found(off);
        true
    }

    /// Erases the node at a raw byte offset. Offsets that are out of
    /// range, misaligned, the anchor, or wiped records are ignored.
    pub(crate) fn erase_at(&mut self, off: u64) -> bool {
        let off = match self.live_offset(off) {
            Some(o) => o,
            None => return false,
        };
        self.erase_found(off);
        true
    }

    fn erase_found(&mut self, off: u32) {
        // SAFETY: `off` addresses a live tree node.
        unsafe {
            let n = self.at(off);
            let new_root = Node::unlink(n);
            self.root = if new_root.is_null() {
                0
            } else {
                self.offset_of(new_root)
            };
            self.len -= 1;
            self.retire(n);
        }
    }

    /// Wipes `n` and pushes it onto the recycling chain head.
    unsafe fn retire(&mut self, n: *mut Node<T>) {
        // SAFETY: `n` is a detached record inside the arena; zeroing it
        // makes its tilt read as Free.
        unsafe {
            ptr::write_bytes(n.cast::<u8>(), 0, Self::node_size() as usize);
            let anchor = self.anchor();
            if (*anchor).right != 0 {
                (*n).right = Node::delta(n, anchor) + (*anchor).right;
            }
            (*anchor).right = Node::delta(anchor, n);
        }
    }

    /// Drops all elements and releases the arena.
    pub(crate) fn clear(&mut self) {
        self.root = 0;
        self.len = 0;
        self.arena.reset();
    }

    /// Pre-sizes the arena for `count` elements plus the chain anchor.
    pub(crate) fn reserve(&mut self, count: u32) -> Result<()> {
        let total = (count as u64 + 1) * Self::node_size() as u64;
        if total > i32::MAX as u64 {
            return Err(Error::CapacityExceeded { bytes: total });
        }
        self.arena.reserve(total as u32)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Byte offset of the node matching `v`, or 0.
    pub(crate) fn find(&self, v: &T) -> u32 {
        if self.root == 0 {
            return 0;
        }
        // SAFETY: `root` addresses a live node.
        unsafe {
            let (n, side) = Node::locate::<C>(self.at(self.root), v);
            if side.is_none() {
                self.offset_of(n)
            } else {
                0
            }
        }
    }

    /// Validates a raw byte offset and returns it when it names a live
    /// node.
    pub(crate) fn live_offset(&self, off: u64) -> Option<u32> {
        if self.root == 0 {
            return None;
        }
        let ns = Self::node_size() as u64;
        if off < ns || off % ns != 0 || off + ns > self.arena.size() as u64 {
            return None;
        }
        let off = off as u32;
        // SAFETY: bounds were just checked.
        unsafe {
            if (*self.at(off)).tilt == Tilt::Free {
                return None;
            }
        }
        Some(off)
    }

    /// Payload reference for a live offset.
    ///
    /// # Safety
    /// `off` must name a live node (see [`Self::live_offset`]).
    pub(crate) unsafe fn payload_at(&self, off: u32) -> &T {
        // SAFETY: per contract.
        unsafe { Node::payload(self.at(off)) }
    }

    #[cfg(test)]
    pub(crate) fn tilt_at(&self, off: u32) -> Tilt {
        // SAFETY: test helper; offsets come from insert results.
        unsafe { (*self.at(off)).tilt }
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// In-order iterator over the whole tree.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        if self.root == 0 {
            return Iter::empty();
        }
        // SAFETY: `root` addresses a live node.
        let first = unsafe { Node::leftmost(self.at(self.root)) };
        Iter {
            cur: first,
            _marker: PhantomData,
        }
    }

    /// Iterator starting at the node with byte offset `off`, continuing
    /// in order to the end.
    pub(crate) fn iter_from(&self, off: u32) -> Iter<'_, T> {
        if off == 0 {
            return Iter::empty();
        }
        // SAFETY: callers pass offsets produced by `find`.
        let cur = unsafe { self.at(off) };
        Iter {
            cur,
            _marker: PhantomData,
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Walks the live tree and summarizes leaf depths.
    pub(crate) fn depth_profile(&self) -> DepthProfile {
        let mut profile = DepthProfile::default();
        if self.root == 0 {
            return profile;
        }
        // SAFETY: the walk follows live links only.
        unsafe {
            let mut n = Node::leftmost(self.at(self.root));
            while !n.is_null() {
                profile.live += 1;
                if (*n).left == 0 && (*n).right == 0 {
                    let d = Node::depth(n);
                    if profile.leaves == 0 {
                        profile.min_leaf_depth = d;
                        profile.max_leaf_depth = d;
                    } else {
                        profile.min_leaf_depth = profile.min_leaf_depth.min(d);
                        profile.max_leaf_depth = profile.max_leaf_depth.max(d);
                    }
                    profile.leaves += 1;
                }
                n = Node::successor(n);
            }
        }
        profile
    }

    /// Full structural validation. Panics on any violated invariant:
    /// ordering, link symmetry, AVL balance and tilt accuracy, unique
    /// root, link bounds, and recycling-chain consistency. Test tooling;
    /// cost is linear in arena size.
    pub(crate) fn check_invariants(&self) {
        let ns = Self::node_size();
        if self.len == 0 {
            assert_eq!(self.root, 0, "empty tree must have no root");
        } else {
            assert_ne!(self.root, 0, "non-empty tree must have a root");
        }
        if self.arena.size() == 0 {
            assert_eq!(self.len, 0);
            return;
        }
        assert_eq!(self.arena.size() % ns, 0, "arena length must be whole records");
        let records = self.arena.size() / ns;

        // SAFETY: every pointer below is derived from checked offsets or
        // from links validated as they are followed.
        unsafe {
            let mut live = 0;
            if self.root != 0 {
                let r = self.at(self.root);
                assert_eq!((*r).parent, 0, "root must have no parent");
                let (_, count) = self.check_subtree(r, None, None);
                live = count;
            }
            assert_eq!(live, self.len, "live node count must match len");

            let mut free = 0;
            let anchor = self.anchor();
            assert_eq!((*anchor).parent, 0, "anchor carries no tree links");
            assert_eq!((*anchor).left, 0, "anchor carries no tree links");
            let mut holder = anchor;
            let mut link = (*anchor).right;
            while link != 0 {
                let n = Node::peer(holder, link);
                let off = self.offset_of(n);
                assert!(
                    off >= ns && off % ns == 0 && off + ns <= self.arena.size(),
                    "recycling link out of bounds"
                );
                assert_eq!((*n).tilt, Tilt::Free, "chained record must be wiped");
                assert_eq!((*n).parent, 0);
                assert_eq!((*n).left, 0);
                free += 1;
                assert!(free < records, "recycling chain cycles");
                holder = n;
                link = (*n).right;
            }

            assert_eq!(
                live + free,
                records - 1,
                "every record is either live or chained"
            );
        }
    }

    /// Returns (height, node count) of the subtree at `n`, asserting
    /// every structural invariant on the way down.
    unsafe fn check_subtree(
        &self,
        n: *mut Node<T>,
        lo: Option<&T>,
        hi: Option<&T>,
    ) -> (u32, u32) {
        let ns = Self::node_size();
        let off = self.offset_of(n);
        assert!(
            off >= ns && off % ns == 0 && off + ns <= self.arena.size(),
            "node offset out of bounds"
        );
        // SAFETY: bounds just checked; children are validated recursively.
        unsafe {
            assert_ne!((*n).tilt, Tilt::Free, "tree node marked free");
            let v = Node::payload(n);
            if let Some(lo) = lo {
                assert!(C::less(lo, v), "left-bound ordering violated");
            }
            if let Some(hi) = hi {
                assert!(C::less(v, hi), "right-bound ordering violated");
            }

            let (mut hl, mut cl) = (0, 0);
            if (*n).left != 0 {
                let c = Node::peer(n, (*n).left);
                assert_eq!((*c).parent, -(*n).left, "left link asymmetric");
                let (h, cnt) = self.check_subtree(c, lo, Some(v));
                hl = h;
                cl = cnt;
            }
            let (mut hr, mut cr) = (0, 0);
            if (*n).right != 0 {
                let c = Node::peer(n, (*n).right);
                assert_eq!((*c).parent, -(*n).right, "right link asymmetric");
                let (h, cnt) = self.check_subtree(c, Some(v), hi);
                hr = h;
                cr = cnt;
            }

            assert!(hl.abs_diff(hr) <= 1, "height difference above one");
            let expected = match hl.cmp(&hr) {
                std::cmp::Ordering::Equal => Tilt::Even,
                std::cmp::Ordering::Greater => Tilt::Left,
                std::cmp::Ordering::Less => Tilt::Right,
            };
            assert_eq!((*n).tilt, expected, "tilt does not name the taller side");

            (1 + hl.max(hr), 1 + cl + cr)
        }
    }
}

impl<T: Copy, C: Compare<T>> Clone for AvlTree<T, C> {
    fn clone(&self) -> Self {
        Self {
            arena: self.arena.clone(),
            root: self.root,
            len: self.len,
            _cmp: PhantomData,
        }
    }
}

/// Borrowing in-order iterator. Any mutation of the owning set ends the
/// borrow, so an iterator can never observe a rearranged tree.
pub struct Iter<'a, T> {
    cur: *const Node<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> Iter<'a, T> {
    pub(crate) fn empty() -> Self {
        Self {
            cur: ptr::null(),
            _marker: PhantomData,
        }
    }

    /// Whether the iterator is exhausted without advancing it.
    pub fn is_end(&self) -> bool {
        self.cur.is_null()
    }
}

impl<'a, T: Copy> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.cur.is_null() {
            return None;
        }
        // SAFETY: `cur` addresses a live node for the borrow's duration;
        // successor stays on live links.
        unsafe {
            let out: &'a T = Node::payload(self.cur);
            self.cur = Node::successor(self.cur as *mut Node<T>);
            Some(out)
        }
    }
}

impl<'a, T> Clone for Iter<'a, T> {
    fn clone(&self) -> Self {
        Self {
            cur: self.cur,
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NaturalOrder;

    type Tree = AvlTree<i32, NaturalOrder>;

    fn collect(t: &Tree) -> Vec<i32> {
        t.iter().copied().collect()
    }

    /// Calls `f` with every permutation of `items`.
    fn for_each_permutation(items: &mut Vec<i32>, k: usize, f: &mut impl FnMut(&[i32])) {
        if k <= 1 {
            f(items);
            return;
        }
        for i in 0..k {
            for_each_permutation(items, k - 1, f);
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
        }
    }

    #[test]
    fn empty_tree() {
        let t = Tree::new();
        assert_eq!(t.len(), 0);
        assert_eq!(t.find(&1), 0);
        assert!(collect(&t).is_empty());
        t.check_invariants();
    }

    #[test]
    fn first_insert_lands_after_the_anchor() {
        let mut t = Tree::new();
        let (off, added) = t.insert(42).unwrap();
        assert!(added);
        assert_eq!(off, Tree::slot_bytes());
        assert_eq!(t.arena_size(), 2 * Tree::slot_bytes());
        t.check_invariants();
    }

    #[test]
    fn duplicate_insert_does_not_allocate() {
        let mut t = Tree::new();
        let (off, _) = t.insert(5).unwrap();
        let used = t.arena_size();
        let (off2, added) = t.insert(5).unwrap();
        assert!(!added);
        assert_eq!(off2, off);
        assert_eq!(t.arena_size(), used);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn root_moves_at_most_one_step_on_rotation() {
        let mut t = Tree::new();
        // Ascending chain forces a rotation at the root on the third
        // insert; the facade-visible structure must keep up.
        t.insert(1).unwrap();
        t.insert(2).unwrap();
        t.insert(3).unwrap();
        t.check_invariants();
        assert_eq!(collect(&t), vec![1, 2, 3]);
        let p = t.depth_profile();
        assert_eq!(p.live, 3);
        assert_eq!(p.max_leaf_depth, 1);
    }

    #[test]
    fn erased_records_are_recycled_lifo() {
        let mut t = Tree::new();
        let (o1, _) = t.insert(1).unwrap();
        let (o2, _) = t.insert(2).unwrap();
        let (o3, _) = t.insert(3).unwrap();

        assert!(t.erase(&2));
        assert!(t.erase(&1));
        let high_water = t.arena_size();

        // Chain is LIFO: 1's record first, then 2's.
        let (r1, _) = t.insert(10).unwrap();
        assert_eq!(r1, o1);
        let (r2, _) = t.insert(11).unwrap();
        assert_eq!(r2, o2);
        assert_eq!(t.arena_size(), high_water);

        // Chain empty again: the next insert appends.
        let (r3, _) = t.insert(12).unwrap();
        assert!(r3 > o3);
        t.check_invariants();
    }

    #[test]
    fn erase_at_rejects_dead_offsets() {
        let mut t = Tree::new();
        let ns = Tree::slot_bytes() as u64;
        assert!(!t.erase_at(ns)); // empty tree

        let (off, _) = t.insert(7).unwrap();
        assert!(!t.erase_at(0)); // the anchor
        assert!(!t.erase_at(ns + 1)); // misaligned
        assert!(!t.erase_at(ns * 100)); // out of range
        assert!(t.erase_at(off as u64));
        assert_eq!(t.len(), 0);
        assert!(!t.erase_at(off as u64)); // wiped record
        t.check_invariants();
    }

    #[test]
    fn erase_last_node_empties_the_tree_but_keeps_the_arena() {
        let mut t = Tree::new();
        t.insert(1).unwrap();
        let used = t.arena_size();
        assert!(t.erase(&1));
        assert_eq!(t.len(), 0);
        assert_eq!(t.arena_size(), used);
        assert_eq!(t.find(&1), 0);
        t.check_invariants();

        // Reuse after total teardown.
        let (off, added) = t.insert(2).unwrap();
        assert!(added);
        assert_eq!(off, Tree::slot_bytes());
        t.check_invariants();
    }

    #[test]
    fn clear_releases_the_arena() {
        let mut t = Tree::new();
        for i in 0..100 {
            t.insert(i).unwrap();
        }
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.arena_size(), 0);
        assert_eq!(t.arena_capacity(), 0);
        t.check_invariants();
        t.insert(1).unwrap();
        assert_eq!(collect(&t), vec![1]);
    }

    #[test]
    fn reserve_presizes_for_count_plus_anchor() {
        let mut t = Tree::new();
        t.reserve(100).unwrap();
        assert!(t.arena_capacity() >= 101 * Tree::slot_bytes());
        let cap = t.arena_capacity();
        for i in 0..100 {
            t.insert(i).unwrap();
        }
        assert_eq!(t.arena_capacity(), cap);
        assert_eq!(t.arena_reallocs(), 1);
    }

    #[test]
    fn iter_from_continues_in_order() {
        let mut t = Tree::new();
        for v in [5, 1, 9, 3, 7] {
            t.insert(v).unwrap();
        }
        let off = t.find(&3);
        assert_ne!(off, 0);
        let tail: Vec<i32> = t.iter_from(off).copied().collect();
        assert_eq!(tail, vec![3, 5, 7, 9]);
        assert!(t.iter_from(t.find(&4)).is_end());
    }

    #[test]
    fn every_insertion_order_of_seven_balances() {
        let mut items: Vec<i32> = (0..7).collect();
        let len = items.len();
        for_each_permutation(&mut items, len, &mut |perm| {
            let mut t = Tree::new();
            for &v in perm {
                t.insert(v).unwrap();
                t.check_invariants();
            }
            assert_eq!(collect(&t), (0..7).collect::<Vec<_>>());
        });
    }

    #[test]
    fn every_erase_from_every_insertion_order_of_six_balances() {
        let mut items: Vec<i32> = (0..6).collect();
        let len = items.len();
        for_each_permutation(&mut items, len, &mut |perm| {
            for victim in 0..6 {
                let mut t = Tree::new();
                for &v in perm {
                    t.insert(v).unwrap();
                }
                assert!(t.erase(&victim));
                t.check_invariants();
                let expect: Vec<i32> = (0..6).filter(|&v| v != victim).collect();
                assert_eq!(collect(&t), expect);
            }
        });
    }

    #[test]
    fn drain_in_every_order_of_five() {
        let mut items: Vec<i32> = (0..5).collect();
        let len = items.len();
        for_each_permutation(&mut items, len, &mut |erase_order| {
            let mut t = Tree::new();
            for v in 0..5 {
                t.insert(v).unwrap();
            }
            for (i, &v) in erase_order.iter().enumerate() {
                assert!(t.erase(&v));
                t.check_invariants();
                assert_eq!(t.len() as usize, 5 - i - 1);
            }
            assert!(collect(&t).is_empty());
        });
    }

    #[test]
    fn clone_is_independent() {
        let mut t = Tree::new();
        for v in [4, 2, 6, 1, 3] {
            t.insert(v).unwrap();
        }
        let mut c = t.clone();
        c.check_invariants();
        assert_eq!(collect(&c), collect(&t));

        c.erase(&4);
        c.check_invariants();
        assert_eq!(collect(&t), vec![1, 2, 3, 4, 6]);
        assert_eq!(collect(&c), vec![1, 2, 3, 6]);
    }
}
