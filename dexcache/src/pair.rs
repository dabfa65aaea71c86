//! Reference pairs and the slot mapped cache built from them.
//!
//! A pair is a compressed reference plus the index that owns the slot. Both
//! halves fit in one u64, so a pair is loaded and stored as a single atomic
//! word and a reader can never see the reference of one index paired with
//! another index.
use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    HeapRef, RawRef, RootVisitor, VisitRoots,
    slot::invalid_index_for_slot,
    visitor::visit_if_non_null,
};

pub struct DexCachePair<T> {
    pub object: HeapRef<T>,
    pub index: u32,
}

impl<T> Clone for DexCachePair<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DexCachePair<T> {}

impl<T> PartialEq for DexCachePair<T> {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object && self.index == other.index
    }
}

impl<T> Eq for DexCachePair<T> {}

impl<T> std::fmt::Debug for DexCachePair<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexCachePair")
            .field("object", &self.object)
            .field("index", &self.index)
            .finish()
    }
}

impl<T> Default for DexCachePair<T> {
    fn default() -> Self {
        Self::empty(0)
    }
}

impl<T> DexCachePair<T> {
    pub fn new(object: HeapRef<T>, index: u32) -> Self {
        Self { object, index }
    }

    /// The pair an unused `slot` holds.
    pub fn empty(slot: usize) -> Self {
        Self::new(HeapRef::null(), invalid_index_for_slot(slot))
    }

    /// The object, if this pair is owned by `index`.
    #[inline]
    pub fn object_for_index(self, index: u32) -> Option<HeapRef<T>> {
        if index != self.index {
            return None;
        }
        self.object.non_null()
    }

    #[inline(always)]
    fn pack(self) -> u64 {
        ((self.index as u64) << 32) | self.object.addr() as u64
    }

    #[inline(always)]
    fn unpack(bits: u64) -> Self {
        Self::new(HeapRef::from_addr(bits as u32), (bits >> 32) as u32)
    }
}

#[repr(transparent)]
pub struct AtomicPair<T> {
    bits: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicPair<T> {
    pub fn new(pair: DexCachePair<T>) -> Self {
        Self {
            bits: AtomicU64::new(pair.pack()),
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> DexCachePair<T> {
        DexCachePair::unpack(self.bits.load(order))
    }

    #[inline(always)]
    pub fn store(&self, pair: DexCachePair<T>, order: Ordering) {
        self.bits.store(pair.pack(), order);
    }
}

/// Fixed size direct mapped cache of reference pairs. Stores always overwrite
/// (last writer wins), a lookup only hits if the owning index matches.
pub struct SlotCache<T> {
    slots: Box<[AtomicPair<T>]>,
}

impl<T> SlotCache<T> {
    /// `len == 0` allocates nothing, the kind is absent.
    pub fn new(len: usize) -> Self {
        let slots = (0..len)
            .map(|slot| AtomicPair::new(DexCachePair::empty(slot)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline(always)]
    pub fn load(&self, slot: usize, order: Ordering) -> DexCachePair<T> {
        self.slots[slot].load(order)
    }

    #[inline(always)]
    pub fn get(&self, slot: usize, index: u32, order: Ordering) -> Option<HeapRef<T>> {
        self.load(slot, order).object_for_index(index)
    }

    #[inline(always)]
    pub fn set(&self, slot: usize, index: u32, object: HeapRef<T>, order: Ordering) {
        self.slots[slot].store(DexCachePair::new(object, index), order);
    }

    /// Empties `slot` if `index` still owns it.
    ///
    /// Tolerates racing readers, not racing writers.
    pub fn clear(&self, slot: usize, index: u32) -> bool {
        let entry = &self.slots[slot];
        if entry.load(Ordering::Relaxed).index != index {
            return false;
        }
        entry.store(DexCachePair::empty(slot), Ordering::Relaxed);
        true
    }

    /// Copies every pair into `dest`, passing non-null references through
    /// `relocate`. Needs exclusive access to the cache.
    pub fn fixup_into(
        &self,
        dest: &mut [DexCachePair<T>],
        mut relocate: impl FnMut(HeapRef<T>) -> HeapRef<T>,
    ) {
        assert_eq!(dest.len(), self.len(), "fixup destination size mismatch");
        for (src, dst) in self.slots.iter().zip(dest.iter_mut()) {
            let mut pair = src.load(Ordering::Relaxed);
            if !pair.object.is_null() {
                pair.object = relocate(pair.object);
            }
            *dst = pair;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = DexCachePair<T>> + '_ {
        self.slots.iter().map(|slot| slot.load(Ordering::Relaxed))
    }
}

impl<T> VisitRoots for SlotCache<T> {
    fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        for slot in self.slots.iter() {
            let pair = slot.load(Ordering::Relaxed);
            let mut root: RawRef = pair.object.raw();
            if visit_if_non_null(visitor, &mut root) {
                // SAFETY: the visitor only relocates, the referent is still a T
                let moved = unsafe { root.cast::<T>() };
                slot.store(DexCachePair::new(moved, pair.index), Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::slot_index;

    struct Obj;

    fn obj(addr: u32) -> HeapRef<Obj> {
        HeapRef::from_addr(addr)
    }

    fn put(cache: &SlotCache<Obj>, capacity: usize, index: u32, object: HeapRef<Obj>) {
        cache.set(slot_index(index, capacity), index, object, Ordering::Relaxed);
    }

    fn lookup(cache: &SlotCache<Obj>, capacity: usize, index: u32) -> Option<HeapRef<Obj>> {
        cache.get(slot_index(index, capacity), index, Ordering::Relaxed)
    }

    #[test]
    fn pack_unpack_keeps_both_halves() {
        let pair = DexCachePair::new(obj(0xdead_beef), 0xffff_fff0);
        assert_eq!(DexCachePair::unpack(pair.pack()), pair);
    }

    #[test]
    fn fresh_cache_misses_everything() {
        let cache = SlotCache::<Obj>::new(8);
        for index in 0..32 {
            assert_eq!(lookup(&cache, 8, index), None);
        }
        assert_eq!(cache.load(0, Ordering::Relaxed).index, 1);
        assert_eq!(cache.load(5, Ordering::Relaxed).index, 0);
    }

    #[test]
    fn set_then_get_hits() {
        let cache = SlotCache::new(8);
        put(&cache, 8, 3, obj(0x10));
        assert_eq!(lookup(&cache, 8, 3), Some(obj(0x10)));
    }

    #[test]
    fn colliding_index_evicts() {
        let cache = SlotCache::new(8);
        put(&cache, 8, 3, obj(0x10));
        put(&cache, 8, 11, obj(0x20));
        assert_eq!(lookup(&cache, 8, 3), None);
        assert_eq!(lookup(&cache, 8, 11), Some(obj(0x20)));
    }

    #[test]
    fn clear_only_removes_own_entry() {
        let cache = SlotCache::new(8);
        put(&cache, 8, 3, obj(0x10));
        put(&cache, 8, 11, obj(0x20));

        assert!(!cache.clear(3, 3));
        assert_eq!(lookup(&cache, 8, 11), Some(obj(0x20)));

        assert!(cache.clear(3, 11));
        assert_eq!(lookup(&cache, 8, 11), None);
        assert_eq!(cache.load(3, Ordering::Relaxed), DexCachePair::empty(3));
    }

    #[test]
    fn clear_on_slot_zero_uses_its_sentinel() {
        let cache = SlotCache::new(4);
        put(&cache, 4, 0, obj(0x10));
        assert!(cache.clear(0, 0));
        assert_eq!(lookup(&cache, 4, 0), None);
        assert_eq!(cache.load(0, Ordering::Relaxed).index, 1);
    }

    #[test]
    fn visiting_rewrites_only_moved_roots() {
        let cache = SlotCache::new(4);
        put(&cache, 4, 1, obj(0x10));
        put(&cache, 4, 6, obj(0x20));

        let mut visited = Vec::new();
        cache.visit_roots(&mut |root: &mut RawRef| {
            visited.push(root.addr());
            if root.addr() == 0x10 {
                *root = RawRef::from_addr(0x90);
            }
        });
        visited.sort();
        assert_eq!(visited, vec![0x10, 0x20]);
        assert_eq!(lookup(&cache, 4, 1), Some(obj(0x90)));
        assert_eq!(lookup(&cache, 4, 6), Some(obj(0x20)));
    }

    #[test]
    fn fixup_relocates_and_keeps_indices() {
        let cache = SlotCache::new(4);
        put(&cache, 4, 1, obj(0x10));
        put(&cache, 4, 6, obj(0x20));

        let mut dest = vec![DexCachePair::default(); cache.len()];
        cache.fixup_into(&mut dest, |o| obj(o.addr() + 0x1000));

        for (slot, (before, after)) in cache.iter().zip(dest.iter()).enumerate() {
            assert_eq!(before.index, after.index, "slot {}", slot);
            if before.object.is_null() {
                assert!(after.object.is_null());
            } else {
                assert_eq!(after.object.addr(), before.object.addr() + 0x1000);
            }
        }
        // the source is untouched
        assert_eq!(lookup(&cache, 4, 1), Some(obj(0x10)));
    }
}
