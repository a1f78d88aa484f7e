//! # slotset
//!
//! An ordered set whose elements are addressable two ways: by value
//! (balanced-tree lookup) and by a stable small-integer *slot* handed out
//! at insertion, which resolves back to the element in constant time
//! until it is erased.
//!
//! ## Features
//!
//! - **Single-allocation storage**: every node lives in one contiguous,
//!   growable arena. No per-element allocation.
//! - **Relocatable by construction**: nodes link to each other with
//!   self-relative signed byte offsets, so arena growth is one bytewise
//!   copy with no pointer fix-up.
//! - **Stable handles**: a slot stays attached to its element across any
//!   number of unrelated inserts and erases; erased slots are recycled
//!   LIFO through an intrusive free chain.
//! - **AVL balance**: insert and erase are O(log n) with single-pass
//!   retracing and O(1) rotations.
//!
//! ## Example
//!
//! ```rust
//! use slotset::SlotSet;
//!
//! # fn main() -> Result<(), slotset::Error> {
//! let mut set: SlotSet<u64> = SlotSet::new();
//! let (slot, added) = set.insert(10)?;
//! assert!(added);
//! set.insert(3)?;
//!
//! // By value, like a search tree; by slot, like a vector.
//! assert_eq!(set.find_slot(&10), slot);
//! assert_eq!(set.at(slot), &10);
//!
//! // Always in order.
//! let sorted: Vec<u64> = set.iter().copied().collect();
//! assert_eq!(sorted, vec![3, 10]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Three layers, leaves first: a byte arena that only grows and
//! zero-fills, node records with the AVL link machinery, and the tree
//! engine plus recycling chain. [`SlotSet`] is the facade over all
//! three; raw byte offsets never escape it.
//!
//! A set is a single-owner value: `&mut self` for mutation, `&self` for
//! reads, no internal locking. Iterators borrow the set, so the compiler
//! rules out iteration over a tree rearranged mid-walk.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod error;
mod node;
mod tree;

pub use error::{Error, Result};
pub use tree::Iter;

use std::fmt;

use tree::AvlTree;

/// Strict "less than" used to order elements.
///
/// Must be pure and deterministic, and must define a strict weak
/// ordering; values that compare equivalent are the same element for set
/// purposes. The comparator is a compile-time parameter, so lookups
/// dispatch statically.
pub trait Compare<T> {
    /// Returns true iff `a` orders strictly before `b`.
    fn less(a: &T, b: &T) -> bool;
}

/// Orders elements by their [`Ord`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T: Ord> Compare<T> for NaturalOrder {
    #[inline]
    fn less(a: &T, b: &T) -> bool {
        a < b
    }
}

/// External handle to a live element.
///
/// Slots are always >= 1 and have no relation to the set's size; they are
/// record indexes into the backing arena (index 0 anchors the recycling
/// chain). A slot stays valid until its element is erased, after which it
/// may be reissued by a later insertion. `0` doubles as "no such element"
/// in return positions.
pub type Slot = u32;

/// Ordered set with stable slot handles, backed by one relocatable arena.
///
/// Elements must be plain copyable values ([`Copy`]): records are moved
/// bytewise when the arena grows and wiped without destructor calls when
/// erased. Duplicates (under the comparator) are rejected.
pub struct SlotSet<T: Copy, C: Compare<T> = NaturalOrder> {
    tree: AvlTree<T, C>,
}

/// Point-in-time diagnostics for a set, in the spirit of an allocator
/// report: arena usage plus the leaf-depth spread of the live tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetStats {
    /// Number of live elements.
    pub len: u32,
    /// Bytes per element record.
    pub slot_bytes: u32,
    /// Arena bytes in use (the high-water mark; erasing does not lower it).
    pub used_bytes: u32,
    /// Arena bytes allocated.
    pub capacity_bytes: u32,
    /// Times the arena has been reallocated.
    pub reallocs: u32,
    /// Number of leaf nodes.
    pub leaves: u32,
    /// Smallest distance from the root to a leaf.
    pub min_leaf_depth: u32,
    /// Largest distance from the root to a leaf.
    pub max_leaf_depth: u32,
}

impl<T: Copy, C: Compare<T>> SlotSet<T, C> {
    /// Creates an empty set. Allocates nothing until the first insert.
    pub fn new() -> Self {
        Self {
            tree: AvlTree::new(),
        }
    }

    /// Creates an empty set pre-sized for `count` elements.
    pub fn with_capacity(count: u32) -> Result<Self> {
        let mut set = Self::new();
        set.reserve(count)?;
        Ok(set)
    }

    #[inline]
    fn slot_offset(slot: Slot) -> u64 {
        slot as u64 * AvlTree::<T, C>::slot_bytes() as u64
    }

    #[inline]
    fn to_slot(off: u32) -> Slot {
        off / AvlTree::<T, C>::slot_bytes()
    }

    /// Inserts `v`, returning its slot and whether it was newly added.
    ///
    /// Re-inserting an existing value returns the slot handed out when it
    /// was first added, with `false`, and allocates nothing. On an
    /// allocation error the set is unchanged.
    pub fn insert(&mut self, v: T) -> Result<(Slot, bool)> {
        let (off, added) = self.tree.insert(v)?;
        Ok((Self::to_slot(off), added))
    }

    /// Inserts `v` and returns the set-owned element plus its slot,
    /// whether or not the value was newly added.
    pub fn insert_full(&mut self, v: T) -> Result<(&T, Slot)> {
        let (off, _) = self.tree.insert(v)?;
        // SAFETY: `off` was just returned for a live node.
        Ok((unsafe { self.tree.payload_at(off) }, Self::to_slot(off)))
    }

    /// Inserts `v` if absent and returns its slot either way.
    pub fn slot_of(&mut self, v: T) -> Result<Slot> {
        let (off, _) = self.tree.insert(v)?;
        Ok(Self::to_slot(off))
    }

    /// Removes the element equal to `v`. Returns whether anything was
    /// removed; erasing an absent value is a no-op. The freed slot goes
    /// to the head of the recycling chain.
    pub fn erase(&mut self, v: &T) -> bool {
        self.tree.erase(v)
    }

    /// Removes the element at `slot`. Slots that are out of range or not
    /// currently live are ignored and `false` is returned.
    pub fn erase_at(&mut self, slot: Slot) -> bool {
        self.tree.erase_at(Self::slot_offset(slot))
    }

    /// Iterator positioned at the element equal to `v`, continuing in
    /// order to the end; an exhausted iterator if `v` is absent.
    pub fn find(&self, v: &T) -> Iter<'_, T> {
        self.tree.iter_from(self.tree.find(v))
    }

    /// Slot of the element equal to `v`, or 0 if absent.
    pub fn find_slot(&self, v: &T) -> Slot {
        Self::to_slot(self.tree.find(v))
    }

    /// Whether an element equal to `v` is present.
    pub fn contains(&self, v: &T) -> bool {
        self.tree.find(v) != 0
    }

    /// The element at `slot`, or `None` when the slot is not live.
    pub fn get(&self, slot: Slot) -> Option<&T> {
        let off = self.tree.live_offset(Self::slot_offset(slot))?;
        // SAFETY: `live_offset` validated the slot.
        Some(unsafe { self.tree.payload_at(off) })
    }

    /// The element at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` does not name a live element.
    pub fn at(&self, slot: Slot) -> &T {
        match self.get(slot) {
            Some(v) => v,
            None => panic!("slot {slot} does not name a live element"),
        }
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.tree.len() as usize
    }

    /// Whether the set holds no elements.
    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    /// Removes all elements and releases the arena.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Grows the arena to hold at least `count` elements without further
    /// reallocation. Never shrinks.
    pub fn reserve(&mut self, count: u32) -> Result<()> {
        self.tree.reserve(count)
    }

    /// In-order iterator over all elements.
    pub fn iter(&self) -> Iter<'_, T> {
        self.tree.iter()
    }

    /// Calls `f` on every element in order.
    pub fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        for v in self.iter() {
            f(v);
        }
    }

    /// Arena and balance diagnostics.
    pub fn stats(&self) -> SetStats {
        let profile = self.tree.depth_profile();
        SetStats {
            len: self.tree.len(),
            slot_bytes: AvlTree::<T, C>::slot_bytes(),
            used_bytes: self.tree.arena_size(),
            capacity_bytes: self.tree.arena_capacity(),
            reallocs: self.tree.arena_reallocs(),
            leaves: profile.leaves,
            min_leaf_depth: profile.min_leaf_depth,
            max_leaf_depth: profile.max_leaf_depth,
        }
    }

    /// Validates every structural invariant, panicking on a violation.
    /// Debug builds only; compiles to nothing in release builds.
    pub fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        self.tree.check_invariants();
    }
}

impl<T: Copy, C: Compare<T>> Default for SlotSet<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, C: Compare<T>> Clone for SlotSet<T, C> {
    /// Cloning is a bytewise arena copy: links are self-relative, so the
    /// copied block is a fully independent set with identical slots.
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
        }
    }
}

impl<T: Copy + fmt::Debug, C: Compare<T>> fmt::Debug for SlotSet<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// SAFETY: a set exclusively owns its arena; the raw base pointer is never
// aliased outside the usual `&self`/`&mut self` discipline, so the usual
// auto-trait reasoning applies to the payloads alone.
unsafe impl<T: Copy + Send, C: Compare<T>> Send for SlotSet<T, C> {}
unsafe impl<T: Copy + Sync, C: Compare<T>> Sync for SlotSet<T, C> {}


#[cfg(test)]
mod proptests;
