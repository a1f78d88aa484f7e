//! Tree node layout and the AVL link/rebalance machinery.
//!
//! Nodes are fixed-size records embedded in the arena. Every cross-node
//! link is a signed byte distance from the holding node to the referent,
//! never an absolute address and never a distance from the arena base.
//! Dereferencing is always "this node's address plus the stored offset",
//! computed at the point of use and discarded, which is what lets the
//! whole arena relocate with a single bytewise copy.
//!
//! All functions here operate on raw node pointers. Callers guarantee the
//! pointers target live records inside one arena; nothing in this module
//! allocates or frees.

use std::mem::MaybeUninit;
use std::ptr;

use crate::Compare;

/// Signed byte distance between two nodes. Zero means "absent".
pub(crate) type Off = i32;

/// Which child of a node, or which side of a parent a node hangs on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Side {
    Left,
    Right,
}

impl Side {
    #[inline]
    pub(crate) fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Per-node balance tag.
///
/// `Free = 0` doubles as the liveness marker: a wiped (all-zero) record
/// reads as `Free`, so membership in the recycling chain never needs a
/// separate flag. Live nodes are always `Left`, `Even`, or `Right`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum Tilt {
    Free = 0,
    Left = 1,
    Even = 2,
    Right = 3,
}

impl Tilt {
    #[inline]
    pub(crate) fn of(side: Side) -> Tilt {
        match side {
            Side::Left => Tilt::Left,
            Side::Right => Tilt::Right,
        }
    }

    /// The taller side, if any. `Even` and `Free` have none.
    #[inline]
    pub(crate) fn side(self) -> Option<Side> {
        match self {
            Tilt::Left => Some(Side::Left),
            Tilt::Right => Some(Side::Right),
            _ => None,
        }
    }

    /// The taller side of a node known to be out of balance.
    #[inline]
    fn heavy_side(self) -> Side {
        debug_assert!(matches!(self, Tilt::Left | Tilt::Right));
        if self == Tilt::Left {
            Side::Left
        } else {
            Side::Right
        }
    }
}

/// A tree node as stored in the arena.
///
/// The record layout is fixed: payload first, then the three self-relative
/// links, then the tilt byte and reserved padding. Identity is the node's
/// byte offset in the arena. The payload is uninitialized for free nodes
/// (their bytes are zero, which also makes `tilt` read as [`Tilt::Free`]).
#[repr(C)]
pub(crate) struct Node<T> {
    payload: MaybeUninit<T>,
    pub(crate) parent: Off,
    pub(crate) left: Off,
    pub(crate) right: Off,
    pub(crate) tilt: Tilt,
    _reserved: [u8; 3],
}

impl<T> Node<T> {
    pub(crate) const fn byte_size() -> u32 {
        std::mem::size_of::<Self>() as u32
    }

    // ------------------------------------------------------------------
    // Link arithmetic
    // ------------------------------------------------------------------

    /// Resolves a non-zero self-relative offset from `n`.
    ///
    /// # Safety
    /// `n` and `n + d` must lie inside the same live arena allocation.
    #[inline]
    pub(crate) unsafe fn peer(n: *mut Self, d: Off) -> *mut Self {
        debug_assert!(d != 0);
        // SAFETY: caller keeps both ends inside one allocation.
        unsafe { n.cast::<u8>().offset(d as isize).cast() }
    }

    /// Signed byte distance from `from` to `to`.
    #[inline]
    pub(crate) fn delta(from: *mut Self, to: *mut Self) -> Off {
        (to as isize - from as isize) as Off
    }

    #[inline]
    unsafe fn link(n: *mut Self, s: Side) -> Off {
        // SAFETY: caller guarantees `n` is a live node.
        unsafe {
            match s {
                Side::Left => (*n).left,
                Side::Right => (*n).right,
            }
        }
    }

    #[inline]
    unsafe fn set_link(n: *mut Self, s: Side, d: Off) {
        // SAFETY: caller guarantees `n` is a live node.
        unsafe {
            match s {
                Side::Left => (*n).left = d,
                Side::Right => (*n).right = d,
            }
        }
    }

    /// Child on side `s`, or null.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    #[inline]
    pub(crate) unsafe fn child(n: *mut Self, s: Side) -> *mut Self {
        // SAFETY: per contract; a non-zero link stays inside the arena.
        unsafe {
            let d = Self::link(n, s);
            if d == 0 {
                ptr::null_mut()
            } else {
                Self::peer(n, d)
            }
        }
    }

    /// Parent node, or null for the root.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    #[inline]
    pub(crate) unsafe fn parent_of(n: *mut Self) -> *mut Self {
        // SAFETY: per contract.
        unsafe {
            let d = (*n).parent;
            if d == 0 {
                ptr::null_mut()
            } else {
                Self::peer(n, d)
            }
        }
    }

    /// Which side of its parent `n` hangs on; `None` for the root.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    #[inline]
    pub(crate) unsafe fn branch(n: *mut Self) -> Option<Side> {
        // SAFETY: per contract; parent link symmetry is a structural
        // invariant.
        unsafe {
            let up = (*n).parent;
            if up == 0 {
                return None;
            }
            let p = Self::peer(n, up);
            if (*p).left == -up {
                Some(Side::Left)
            } else {
                debug_assert_eq!((*p).right, -up);
                Some(Side::Right)
            }
        }
    }

    /// Child carrying the taller subtree of an out-of-balance node.
    #[inline]
    unsafe fn heavy(n: *mut Self) -> *mut Self {
        // SAFETY: per contract; a tilted node has a child on that side.
        unsafe { Self::child(n, (*n).tilt.heavy_side()) }
    }

    /// Walks parent links up to the root.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    pub(crate) unsafe fn root_of(mut n: *mut Self) -> *mut Self {
        // SAFETY: per contract.
        unsafe {
            while (*n).parent != 0 {
                n = Self::peer(n, (*n).parent);
            }
        }
        n
    }

    /// Number of edges between `n` and the root.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    pub(crate) unsafe fn depth(mut n: *mut Self) -> u32 {
        let mut d = 0;
        // SAFETY: per contract.
        unsafe {
            while (*n).parent != 0 {
                d += 1;
                n = Self::peer(n, (*n).parent);
            }
        }
        d
    }

    // ------------------------------------------------------------------
    // Payload access
    // ------------------------------------------------------------------

    /// # Safety
    /// `n` must be a live (non-free) node; its payload is initialized.
    /// The caller chooses a lifetime no longer than the arena's.
    #[inline]
    pub(crate) unsafe fn payload<'a>(n: *const Self) -> &'a T {
        // SAFETY: per contract.
        unsafe { (*n).payload.assume_init_ref() }
    }

    /// # Safety
    /// `n` must point at a node record; any previous payload is
    /// overwritten without being dropped.
    #[inline]
    pub(crate) unsafe fn set_payload(n: *mut Self, v: T) {
        // SAFETY: per contract.
        unsafe { (*n).payload = MaybeUninit::new(v) };
    }

    // ------------------------------------------------------------------
    // Ordered traversal
    // ------------------------------------------------------------------

    /// Smallest node of the subtree rooted at `n`.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    pub(crate) unsafe fn leftmost(mut n: *mut Self) -> *mut Self {
        // SAFETY: per contract.
        unsafe {
            while (*n).left != 0 {
                n = Self::peer(n, (*n).left);
            }
        }
        n
    }

    /// Largest node of the subtree rooted at `n`.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    unsafe fn rightmost(mut n: *mut Self) -> *mut Self {
        // SAFETY: per contract.
        unsafe {
            while (*n).right != 0 {
                n = Self::peer(n, (*n).right);
            }
        }
        n
    }

    /// In-order successor of `n`, or null past the largest node.
    ///
    /// # Safety
    /// `n` must be a live node in the arena.
    pub(crate) unsafe fn successor(n: *mut Self) -> *mut Self {
        // SAFETY: per contract.
        unsafe {
            if (*n).right != 0 {
                return Self::leftmost(Self::peer(n, (*n).right));
            }
            let mut b = Self::branch(n);
            let mut cur = n;
            loop {
                let p = Self::parent_of(cur);
                if p.is_null() {
                    return ptr::null_mut();
                }
                if b == Some(Side::Left) {
                    return p;
                }
                b = Self::branch(p);
                cur = p;
            }
        }
    }

    /// Descends from `root` looking for `v`.
    ///
    /// Returns the matching node and `None` on equality, or the last node
    /// compared and the side on which `v` belongs under it.
    ///
    /// # Safety
    /// `root` must be a live node in the arena.
    pub(crate) unsafe fn locate<C: Compare<T>>(
        root: *mut Self,
        v: &T,
    ) -> (*mut Self, Option<Side>) {
        let mut n = root;
        // SAFETY: per contract; all links stay inside the arena.
        unsafe {
            loop {
                if C::less(Self::payload(n), v) {
                    if (*n).right != 0 {
                        n = Self::peer(n, (*n).right);
                    } else {
                        return (n, Some(Side::Right));
                    }
                } else if C::less(v, Self::payload(n)) {
                    if (*n).left != 0 {
                        n = Self::peer(n, (*n).left);
                    } else {
                        return (n, Some(Side::Left));
                    }
                } else {
                    return (n, None);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Hangs `child` under `parent` on side `s` and rebalances upward.
    ///
    /// # Safety
    /// Both must be live nodes in one arena; `parent` has no child on `s`;
    /// `child` is detached with tilt `Even`.
    pub(crate) unsafe fn attach(parent: *mut Self, child: *mut Self, s: Side) {
        // SAFETY: per contract.
        unsafe {
            debug_assert_eq!(Self::link(parent, s), 0);
            debug_assert_eq!((*child).tilt, Tilt::Even);
            Self::set_link(parent, s, Self::delta(parent, child));
            (*child).parent = Self::delta(child, parent);
            Self::retrace_insert(parent, s);
        }
    }

    /// Walks up from `n` after a height increase on side `grown`,
    /// adjusting tilts and rotating once if the AVL bound breaks.
    unsafe fn retrace_insert(mut n: *mut Self, mut grown: Side) {
        // SAFETY: callers pass live nodes; every step stays on parent
        // links inside the arena.
        unsafe {
            loop {
                match (*n).tilt.side() {
                    None => {
                        // Was balanced: this subtree got taller, keep going.
                        (*n).tilt = Tilt::of(grown);
                        match Self::branch(n) {
                            Some(b) => {
                                grown = b;
                                n = Self::parent_of(n);
                            }
                            None => break,
                        }
                    }
                    Some(t) if t != grown => {
                        // Counter-tilted: now balanced, height above is
                        // unchanged.
                        (*n).tilt = Tilt::Even;
                        break;
                    }
                    Some(_) => {
                        // Already heavy on the grown side: rotate. The
                        // rotated subtree ends at its pre-insert height,
                        // so the walk stops here.
                        Self::rotate_grown(n);
                        break;
                    }
                }
            }
        }
    }

    /// Rebalances `z` after an insertion made its heavy side taller.
    unsafe fn rotate_grown(z: *mut Self) {
        // SAFETY: `z` is live and doubly tilted; its heavy child and that
        // child's heavy child exist per the AVL invariant.
        unsafe {
            let zs = (*z).tilt.heavy_side();
            let y = Self::heavy(z);
            debug_assert!(!y.is_null());
            let ys = (*y).tilt.heavy_side();
            if ys == zs {
                Self::rotate_single(z, y, zs);
                (*z).tilt = Tilt::Even;
                (*y).tilt = Tilt::Even;
            } else {
                let x = Self::heavy(y);
                debug_assert!(!x.is_null());
                let xt = (*x).tilt;
                Self::rotate_double(z, y, x, zs);
                Self::settle_double(z, y, x, zs, xt);
            }
        }
    }

    /// Post-double-rotation tilt assignment, shared by the grow and
    /// shrink paths. `xt` is X's tilt before the rotation.
    unsafe fn settle_double(z: *mut Self, y: *mut Self, x: *mut Self, zs: Side, xt: Tilt) {
        // SAFETY: all three were just rewired and are live.
        unsafe {
            (*y).tilt = if xt == Tilt::of(zs.opposite()) {
                Tilt::of(zs)
            } else {
                Tilt::Even
            };
            (*z).tilt = if xt == Tilt::of(zs) {
                Tilt::of(zs.opposite())
            } else {
                Tilt::Even
            };
            (*x).tilt = Tilt::Even;
        }
    }

    // ------------------------------------------------------------------
    // Rotations
    // ------------------------------------------------------------------
    //
    // `rotate_single` with s = Left is the classic right rotation (and
    // mirrored for s = Right); `rotate_double` is the left-right /
    // right-left pair. Only links move here; tilt updates are the
    // caller's business since they differ between grow and shrink.

    /// Y (Z's child on `s`) takes Z's place; Z becomes Y's child on the
    /// opposite side; Y's former opposite-side subtree moves under Z.
    unsafe fn rotate_single(z: *mut Self, y: *mut Self, s: Side) {
        let o = s.opposite();
        // SAFETY: callers guarantee z is live and y is its child on `s`.
        unsafe {
            debug_assert_eq!(Self::child(z, s), y);
            if (*z).parent != 0 {
                let p = Self::parent_of(z);
                let zb = match Self::branch(z) {
                    Some(b) => b,
                    None => unreachable!(),
                };
                // Both links shift by the same distances they already
                // encode: parent chains compose additively.
                (*y).parent += (*z).parent;
                Self::set_link(p, zb, Self::link(p, zb) + Self::link(z, s));
            } else {
                (*y).parent = 0;
            }

            // Y becomes Z's parent.
            (*z).parent = Self::link(z, s);

            // Y's subtree on `o` re-hangs under Z on `s`.
            let t2 = Self::link(y, o);
            if t2 != 0 {
                Self::set_link(z, s, Self::link(z, s) + t2);
                let t2p = Self::child(z, s);
                (*t2p).parent = -Self::link(z, s);
            } else {
                Self::set_link(z, s, 0);
            }

            // Z re-hangs under Y on `o`.
            Self::set_link(y, o, -(*z).parent);
        }
    }

    /// X (Y's child toward Z) becomes the subtree root; X's children are
    /// split between Y and Z.
    unsafe fn rotate_double(z: *mut Self, y: *mut Self, x: *mut Self, s: Side) {
        let o = s.opposite();
        // SAFETY: callers guarantee z live, y = child(z, s),
        // x = child(y, o).
        unsafe {
            debug_assert_eq!(Self::child(z, s), y);
            debug_assert_eq!(Self::child(y, o), x);

            if (*z).parent != 0 {
                let p = Self::parent_of(z);
                let zb = match Self::branch(z) {
                    Some(b) => b,
                    None => unreachable!(),
                };
                Self::set_link(p, zb, Self::delta(p, x));
                (*x).parent = Self::delta(x, p);
            } else {
                (*x).parent = 0;
            }

            // Z: X becomes its parent; X's subtree on `o` re-hangs on Z's
            // side `s`.
            (*z).parent = Self::delta(z, x);
            let xo = Self::link(x, o);
            if xo != 0 {
                Self::set_link(z, s, (*z).parent + xo);
                let moved = Self::child(z, s);
                (*moved).parent = -Self::link(z, s);
            } else {
                Self::set_link(z, s, 0);
            }

            // Y: X becomes its parent; X's subtree on `s` re-hangs on Y's
            // side `o`.
            (*y).parent = Self::link(y, o);
            let xs = Self::link(x, s);
            if xs != 0 {
                Self::set_link(y, o, Self::link(y, o) + xs);
                let moved = Self::child(y, o);
                (*moved).parent = -Self::link(y, o);
            } else {
                Self::set_link(y, o, 0);
            }

            // X adopts both.
            Self::set_link(x, o, Self::delta(x, z));
            Self::set_link(x, s, Self::delta(x, y));
        }
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    /// Rebalances `z` after a removal made its light side shorter.
    ///
    /// Returns the node from which the upward walk continues, or null when
    /// the subtree height is unchanged and the walk stops.
    unsafe fn rotate_shrunk(z: *mut Self) -> *mut Self {
        // SAFETY: `z` is live and doubly tilted; the children read below
        // exist per the AVL invariant (the heavy subtree has height >= 2).
        unsafe {
            let zs = (*z).tilt.heavy_side();
            let y = Self::heavy(z);
            debug_assert!(!y.is_null());
            let yt = (*y).tilt;

            // A balanced Y is handled as the single-rotation case: the
            // result leaves Y counter-tilted and the overall height
            // unchanged, which terminates the walk. Taking the double
            // rotation instead would leave Y out of balance.
            let x = if yt == Tilt::Even {
                Self::child(y, zs)
            } else {
                Self::heavy(y)
            };
            debug_assert!(!x.is_null());

            if Self::branch(x) == Some(zs) {
                Self::rotate_single(z, y, zs);
                if yt == Tilt::Even {
                    // Z keeps its tilt; subtree height is unchanged.
                    (*y).tilt = Tilt::of(zs.opposite());
                    ptr::null_mut()
                } else {
                    (*y).tilt = Tilt::Even;
                    (*z).tilt = Tilt::Even;
                    y
                }
            } else {
                let xt = (*x).tilt;
                Self::rotate_double(z, y, x, zs);
                Self::settle_double(z, y, x, zs, xt);
                x
            }
        }
    }

    /// Walks up from `n` after a height decrease on side `shrunk`.
    unsafe fn retrace_shrunk(mut n: *mut Self, mut shrunk: Side) {
        // SAFETY: callers pass live nodes; the walk follows parent links.
        unsafe {
            loop {
                match (*n).tilt.side() {
                    None => {
                        // Was balanced: the other side is now taller, but
                        // this subtree's height is unchanged.
                        (*n).tilt = Tilt::of(shrunk.opposite());
                        break;
                    }
                    Some(t) if t == shrunk => {
                        // Lost height on the heavy side: now balanced,
                        // and one level shorter. Keep going.
                        (*n).tilt = Tilt::Even;
                    }
                    Some(_) => {
                        // Counter-tilted and now doubly out of balance.
                        n = Self::rotate_shrunk(n);
                        if n.is_null() {
                            break;
                        }
                    }
                }
                match Self::branch(n) {
                    Some(b) => {
                        shrunk = b;
                        n = Self::parent_of(n);
                    }
                    None => break,
                }
            }
        }
    }

    /// Removes `n` from the tree, rebalancing as needed.
    ///
    /// Returns the resulting root (null when the tree becomes empty).
    /// `n` is left detached with cleared links, its payload untouched.
    ///
    /// # Safety
    /// `n` must be a live tree node.
    pub(crate) unsafe fn unlink(n: *mut Self) -> *mut Self {
        // SAFETY: per contract; every pointer below derives from live
        // links.
        unsafe {
            // Two children: swap positions with an adjacent-in-order node
            // so the removal happens lower down with at most one child.
            // Positions are exchanged, never payloads, so outstanding
            // handles keep naming the same element.
            if (*n).left != 0 && (*n).right != 0 {
                let partner = if (*n).tilt == Tilt::Right {
                    Self::leftmost(Self::child(n, Side::Right))
                } else {
                    Self::rightmost(Self::child(n, Side::Left))
                };
                Self::swap_positions(n, partner);
            }

            let p = Self::parent_of(n);
            let l = Self::child(n, Side::Left);
            let r = Self::child(n, Side::Right);
            debug_assert!(l.is_null() || r.is_null());
            let survivor = if !l.is_null() { l } else { r };

            let root = if !p.is_null() {
                let side = match Self::branch(n) {
                    Some(b) => b,
                    None => unreachable!(),
                };
                if !survivor.is_null() {
                    (*survivor).parent = Self::delta(survivor, p);
                    Self::set_link(p, side, Self::delta(p, survivor));
                } else {
                    Self::set_link(p, side, 0);
                }
                Self::retrace_shrunk(p, side);
                Self::root_of(p)
            } else if !survivor.is_null() {
                (*survivor).parent = 0;
                survivor
            } else {
                ptr::null_mut()
            };

            (*n).parent = 0;
            (*n).left = 0;
            (*n).right = 0;
            root
        }
    }

    /// Exchanges the tree positions of `a` and a deeper node `b`.
    ///
    /// `a` has two children; `b` (an in-order neighbor of `a`) has at most
    /// one. Links and tilts move, payloads stay put.
    unsafe fn swap_positions(a: *mut Self, b: *mut Self) {
        // SAFETY: per the caller's structural guarantees.
        unsafe {
            if Self::child(a, Side::Left) == b {
                Self::swap_with_child(a, b, Side::Left);
            } else if Self::child(a, Side::Right) == b {
                Self::swap_with_child(a, b, Side::Right);
            } else {
                Self::swap_distant(a, b);
            }
            std::mem::swap(&mut (*a).tilt, &mut (*b).tilt);
        }
    }

    /// Swap when `b` is `a`'s immediate child on `s`. As an in-order
    /// neighbor, `b` can only have a child on `s` itself.
    unsafe fn swap_with_child(a: *mut Self, b: *mut Self, s: Side) {
        let o = s.opposite();
        // SAFETY: per the caller's structural guarantees.
        unsafe {
            let d = Self::child(a, o);
            debug_assert!(!d.is_null());
            debug_assert_eq!(Self::link(b, o), 0);

            if (*a).parent != 0 {
                let pa = Self::parent_of(a);
                let ab = match Self::branch(a) {
                    Some(x) => x,
                    None => unreachable!(),
                };
                Self::set_link(pa, ab, Self::delta(pa, b));
                (*b).parent = Self::delta(b, pa);
            } else {
                (*b).parent = 0;
            }

            // `a` drops into `b`'s old spot.
            (*a).parent = Self::link(a, s);
            let bc = Self::child(b, s);
            if !bc.is_null() {
                (*bc).parent = Self::delta(bc, a);
                Self::set_link(a, s, Self::delta(a, bc));
            } else {
                Self::set_link(a, s, 0);
            }

            // `b` takes over `a`'s other child and adopts `a` on `s`.
            (*d).parent = Self::delta(d, b);
            Self::set_link(b, s, Self::delta(b, a));
            Self::set_link(b, o, Self::delta(b, d));
            Self::set_link(a, o, 0);
        }
    }

    /// Swap when `a` and `b` are not directly linked; all link updates
    /// are independent.
    unsafe fn swap_distant(a: *mut Self, b: *mut Self) {
        // SAFETY: per the caller's structural guarantees.
        unsafe {
            let pb = Self::parent_of(b);
            let al = Self::child(a, Side::Left);
            let ar = Self::child(a, Side::Right);
            debug_assert!(!pb.is_null() && !al.is_null() && !ar.is_null());

            let bb = match Self::branch(b) {
                Some(x) => x,
                None => unreachable!(),
            };
            Self::set_link(pb, bb, Self::delta(pb, a));

            if (*a).parent != 0 {
                let pa = Self::parent_of(a);
                let ab = match Self::branch(a) {
                    Some(x) => x,
                    None => unreachable!(),
                };
                Self::set_link(pa, ab, Self::delta(pa, b));
                (*b).parent = Self::delta(b, pa);
            } else {
                (*b).parent = 0;
            }
            (*a).parent = Self::delta(a, pb);

            // Left children change owners.
            (*al).parent = Self::delta(al, b);
            let bl = Self::child(b, Side::Left);
            if !bl.is_null() {
                (*bl).parent = Self::delta(bl, a);
                Self::set_link(a, Side::Left, Self::delta(a, bl));
            } else {
                Self::set_link(a, Side::Left, 0);
            }
            Self::set_link(b, Side::Left, Self::delta(b, al));

            // Right children change owners.
            (*ar).parent = Self::delta(ar, b);
            let br = Self::child(b, Side::Right);
            if !br.is_null() {
                (*br).parent = Self::delta(br, a);
                Self::set_link(a, Side::Right, Self::delta(a, br));
            } else {
                Self::set_link(a, Side::Right, 0);
            }
            Self::set_link(b, Side::Right, Self::delta(b, ar));
        }
    }
}
