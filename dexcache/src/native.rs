//! Native pairs: a raw pointer to runtime metadata plus its owning index.
//!
//! The pointer is not a collector root. The pair must still update as one
//! unit, so the representation depends on the target:
//! - 64 bit pointers: pointer and index packed into one 128 bit atomic
//! - 32 bit pointers: pointer and index packed into one AtomicU64
//! - anything else: every slot gets its own small lock
use std::{marker::PhantomData, ptr::NonNull};

use crate::slot::invalid_index_for_slot;

pub struct NativeDexCachePair<T> {
    pub ptr: *mut T,
    pub index: u32,
}

impl<T> Clone for NativeDexCachePair<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NativeDexCachePair<T> {}

impl<T> PartialEq for NativeDexCachePair<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.index == other.index
    }
}

impl<T> Eq for NativeDexCachePair<T> {}

impl<T> std::fmt::Debug for NativeDexCachePair<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDexCachePair")
            .field("ptr", &self.ptr)
            .field("index", &self.index)
            .finish()
    }
}

impl<T> Default for NativeDexCachePair<T> {
    fn default() -> Self {
        Self::empty(0)
    }
}

impl<T> NativeDexCachePair<T> {
    pub fn new(ptr: *mut T, index: u32) -> Self {
        Self { ptr, index }
    }

    pub fn empty(slot: usize) -> Self {
        Self::new(std::ptr::null_mut(), invalid_index_for_slot(slot))
    }

    #[inline]
    pub fn object_for_index(self, index: u32) -> Option<NonNull<T>> {
        if index != self.index {
            return None;
        }
        NonNull::new(self.ptr)
    }
}

/// Pointer in the low half, index in the high half.
#[cfg_attr(not(target_pointer_width = "64"), allow(dead_code))]
#[inline(always)]
fn pack_wide(ptr: usize, index: u32) -> u128 {
    ((index as u128) << 64) | ptr as u64 as u128
}

#[cfg_attr(not(target_pointer_width = "64"), allow(dead_code))]
#[inline(always)]
fn unpack_wide(bits: u128) -> (usize, u32) {
    (bits as u64 as usize, (bits >> 64) as u32)
}

#[cfg_attr(
    not(all(target_pointer_width = "32", target_has_atomic = "64")),
    allow(dead_code)
)]
#[inline(always)]
fn pack_narrow(ptr: usize, index: u32) -> u64 {
    ((index as u64) << 32) | ptr as u32 as u64
}

#[cfg_attr(
    not(all(target_pointer_width = "32", target_has_atomic = "64")),
    allow(dead_code)
)]
#[inline(always)]
fn unpack_narrow(bits: u64) -> (usize, u32) {
    (bits as u32 as usize, (bits >> 32) as u32)
}

#[cfg(target_pointer_width = "64")]
mod repr {
    use portable_atomic::{AtomicU128, Ordering};

    use super::{pack_wide, unpack_wide};

    pub struct RawNativeSlot(AtomicU128);

    impl RawNativeSlot {
        pub fn new(ptr: usize, index: u32) -> Self {
            Self(AtomicU128::new(pack_wide(ptr, index)))
        }

        pub fn is_lock_free() -> bool {
            AtomicU128::is_lock_free()
        }

        #[inline(always)]
        pub fn load(&self) -> (usize, u32) {
            unpack_wide(self.0.load(Ordering::Relaxed))
        }

        #[inline(always)]
        pub fn store(&self, ptr: usize, index: u32) {
            self.0.store(pack_wide(ptr, index), Ordering::Release);
        }
    }
}

#[cfg(all(target_pointer_width = "32", target_has_atomic = "64"))]
mod repr {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{pack_narrow, unpack_narrow};

    pub struct RawNativeSlot(AtomicU64);

    impl RawNativeSlot {
        pub fn new(ptr: usize, index: u32) -> Self {
            Self(AtomicU64::new(pack_narrow(ptr, index)))
        }

        pub fn is_lock_free() -> bool {
            true
        }

        #[inline(always)]
        pub fn load(&self) -> (usize, u32) {
            unpack_narrow(self.0.load(Ordering::Relaxed))
        }

        #[inline(always)]
        pub fn store(&self, ptr: usize, index: u32) {
            self.0.store(pack_narrow(ptr, index), Ordering::Release);
        }
    }
}

#[cfg(not(any(
    target_pointer_width = "64",
    all(target_pointer_width = "32", target_has_atomic = "64")
)))]
mod repr {
    use parking_lot::Mutex;

    pub struct RawNativeSlot(Mutex<(usize, u32)>);

    impl RawNativeSlot {
        pub fn new(ptr: usize, index: u32) -> Self {
            Self(Mutex::new((ptr, index)))
        }

        pub fn is_lock_free() -> bool {
            false
        }

        #[inline(always)]
        pub fn load(&self) -> (usize, u32) {
            *self.0.lock()
        }

        #[inline(always)]
        pub fn store(&self, ptr: usize, index: u32) {
            *self.0.lock() = (ptr, index);
        }
    }
}

use repr::RawNativeSlot;

/// One slot holding a native pair, never observed half written.
pub struct AtomicNativePair<T> {
    raw: RawNativeSlot,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicNativePair<T> {
    pub fn new(pair: NativeDexCachePair<T>) -> Self {
        Self {
            raw: RawNativeSlot::new(pair.ptr as usize, pair.index),
            _marker: PhantomData,
        }
    }

    /// Whether loads and stores compile to plain atomics on this target.
    pub fn is_lock_free() -> bool {
        RawNativeSlot::is_lock_free()
    }

    /// relaxed
    #[inline(always)]
    pub fn load(&self) -> NativeDexCachePair<T> {
        let (ptr, index) = self.raw.load();
        NativeDexCachePair::new(ptr as *mut T, index)
    }

    /// release
    #[inline(always)]
    pub fn store(&self, pair: NativeDexCachePair<T>) {
        self.raw.store(pair.ptr as usize, pair.index);
    }
}

/// Direct mapped cache of native pairs, last writer wins.
pub struct NativeSlotCache<T> {
    slots: Box<[AtomicNativePair<T>]>,
}

impl<T> NativeSlotCache<T> {
    pub fn new(len: usize) -> Self {
        let slots = (0..len)
            .map(|slot| AtomicNativePair::new(NativeDexCachePair::empty(slot)))
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
    pub fn load(&self, slot: usize) -> NativeDexCachePair<T> {
        self.slots[slot].load()
    }

    #[inline(always)]
    pub fn get(&self, slot: usize, index: u32) -> Option<NonNull<T>> {
        self.load(slot).object_for_index(index)
    }

    #[inline(always)]
    pub fn set(&self, slot: usize, index: u32, ptr: NonNull<T>) {
        self.slots[slot].store(NativeDexCachePair::new(ptr.as_ptr(), index));
    }

    /// Copies every pair into `dest`, relocating non-null pointers.
    pub fn fixup_into(
        &self,
        dest: &mut [NativeDexCachePair<T>],
        mut relocate: impl FnMut(NonNull<T>) -> NonNull<T>,
    ) {
        assert_eq!(dest.len(), self.len(), "fixup destination size mismatch");
        for (src, dst) in self.slots.iter().zip(dest.iter_mut()) {
            let mut pair = src.load();
            if let Some(ptr) = NonNull::new(pair.ptr) {
                pair.ptr = relocate(ptr).as_ptr();
            }
            *dst = pair;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::slot_index;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wide_packing_keeps_pointer_and_index() {
        let ptr = 0xffff_8000_1234_5678u64 as usize;
        let bits = pack_wide(ptr, u32::MAX);
        assert_eq!(bits >> 64, u32::MAX as u128);
        assert_eq!(unpack_wide(bits), (ptr, u32::MAX));
        assert_eq!(unpack_wide(pack_wide(0, 1)), (0, 1));
    }

    #[test]
    fn narrow_packing_keeps_pointer_and_index() {
        let bits = pack_narrow(0x8000_0010, 7);
        assert_eq!(bits, (7u64 << 32) | 0x8000_0010);
        assert_eq!(unpack_narrow(bits), (0x8000_0010, 7));
        assert_eq!(unpack_narrow(pack_narrow(0, 1)), (0, 1));
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[test]
    fn slots_are_lock_free_on_common_hosts() {
        assert!(AtomicNativePair::<u64>::is_lock_free());
    }

    fn leak(value: u64) -> NonNull<u64> {
        NonNull::from(Box::leak(Box::new(value)))
    }

    #[test]
    fn set_get_and_evict() {
        let cache = NativeSlotCache::<u64>::new(4);
        let a = leak(1);
        let b = leak(2);

        cache.set(slot_index(2, 4), 2, a);
        assert_eq!(cache.get(slot_index(2, 4), 2), Some(a));

        cache.set(slot_index(6, 4), 6, b);
        assert_eq!(cache.get(slot_index(2, 4), 2), None);
        assert_eq!(cache.get(slot_index(6, 4), 6), Some(b));
    }

    #[test]
    fn fresh_slots_hold_sentinels() {
        let cache = NativeSlotCache::<u64>::new(4);
        assert_eq!(cache.load(0), NativeDexCachePair::empty(0));
        assert_eq!(cache.load(3).index, 0);
        assert!(cache.load(3).ptr.is_null());
        assert_eq!(cache.get(0, 0), None);
    }

    #[test]
    fn fixup_relocates_pointers() {
        let cache = NativeSlotCache::<u64>::new(2);
        let a = leak(10);
        let moved = leak(10);
        cache.set(1, 3, a);

        let mut dest = vec![NativeDexCachePair::default(); 2];
        cache.fixup_into(&mut dest, |ptr| {
            assert_eq!(ptr, a);
            moved
        });
        assert_eq!(dest[0], NativeDexCachePair::empty(0));
        assert_eq!(dest[1], NativeDexCachePair::new(moved.as_ptr(), 3));
    }

    #[test]
    fn concurrent_writers_never_tear_pairs() {
        let cache = Arc::new(NativeSlotCache::<u64>::new(1));
        let p1 = leak(1);
        let p2 = leak(2);
        let (p1_addr, p2_addr) = (p1.as_ptr() as usize, p2.as_ptr() as usize);
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = [(p1_addr, 5u32), (p2_addr, 9u32)]
            .into_iter()
            .map(|(addr, index)| {
                let cache = cache.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let ptr = NonNull::new(addr as *mut u64).unwrap();
                    while !done.load(Ordering::Relaxed) {
                        cache.set(0, index, ptr);
                    }
                })
            })
            .collect();

        for _ in 0..100_000 {
            let pair = cache.load(0);
            let addr = pair.ptr as usize;
            let valid = (addr == p1_addr && pair.index == 5)
                || (addr == p2_addr && pair.index == 9)
                || (addr == 0 && pair.index == 1);
            assert!(valid, "torn native pair {:?}", pair);
        }
        done.store(true, Ordering::Relaxed);
        for w in writers {
            w.join().unwrap();
        }
    }
}
