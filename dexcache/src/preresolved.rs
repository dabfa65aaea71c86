//! Full width string overlay written by the ahead of time compiler.
//!
//! One entry per string index, no slot mapping. Enabling publishes the array
//! pointer and then the count. Clearing resets the pointer and then the count,
//! a reader can observe those two in any order and has to treat "count set but
//! no array" and "array present but entry null" as a plain miss.
use std::{
    ptr,
    sync::atomic::{AtomicPtr, AtomicU32, Ordering},
};

use parking_lot::Mutex;

use crate::{HeapRef, RawRef, RootVisitor, StringObject, VisitRoots, visitor::visit_if_non_null};

pub struct PreResolvedStrings {
    array: AtomicPtr<AtomicU32>,
    count: AtomicU32,
    /// number of string ids, every array has exactly this many entries
    len: u32,
    // the one array ever allocated, kept until the owner drops since a reader
    // may still hold a pointer it loaded before a clear
    storage: Mutex<Option<Box<[AtomicU32]>>>,
}

impl PreResolvedStrings {
    pub fn new(len: u32) -> Self {
        Self {
            array: AtomicPtr::new(ptr::null_mut()),
            count: AtomicU32::new(0),
            len,
            storage: Mutex::new(None),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        !self.array.load(Ordering::Acquire).is_null()
    }

    /// Publishes an all-null array. The first call allocates it, later calls
    /// null out and republish the same array, so enable/clear cycles never
    /// allocate again. A reader still holding the array across a clear sees
    /// either null or a string for the index it asked for.
    pub fn enable(&self) {
        let mut storage = self.storage.lock();
        let array = storage.get_or_insert_with(|| {
            (0..self.len).map(|_| AtomicU32::new(0)).collect()
        });
        for entry in array.iter() {
            entry.store(0, Ordering::Relaxed);
        }
        let head = array.as_ptr() as *mut AtomicU32;
        self.array.store(head, Ordering::Release);
        self.count.store(self.len, Ordering::Release);
    }

    pub fn clear(&self) {
        self.array.store(ptr::null_mut(), Ordering::Release);
        self.count.store(0, Ordering::Relaxed);
    }

    #[inline]
    fn entry(&self, index: u32) -> Option<&AtomicU32> {
        if self.count.load(Ordering::Relaxed) == 0 {
            return None;
        }
        // the count alone says nothing, a clear may have nulled the array already
        let array = self.array.load(Ordering::Acquire);
        if array.is_null() || index >= self.len {
            return None;
        }
        // SAFETY: every published array has `len` entries and lives in `storage`
        // until self is dropped
        Some(unsafe { &*array.add(index as usize) })
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<HeapRef<StringObject>> {
        let entry = self.entry(index)?;
        HeapRef::from_addr(entry.load(Ordering::Relaxed)).non_null()
    }

    /// Stores `string` directly at `index`, returns false if the overlay is off.
    pub fn set(&self, index: u32, string: HeapRef<StringObject>) -> bool {
        match self.entry(index) {
            Some(entry) => {
                entry.store(string.addr(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn current(&self) -> Option<&[AtomicU32]> {
        let array = self.array.load(Ordering::Acquire);
        if array.is_null() {
            return None;
        }
        // SAFETY: see entry()
        Some(unsafe { std::slice::from_raw_parts(array, self.len as usize) })
    }

    pub fn fixup_into(
        &self,
        dest: &mut [HeapRef<StringObject>],
        mut relocate: impl FnMut(HeapRef<StringObject>) -> HeapRef<StringObject>,
    ) {
        let Some(entries) = self.current() else {
            return;
        };
        assert_eq!(dest.len(), entries.len(), "fixup destination size mismatch");
        for (src, dst) in entries.iter().zip(dest.iter_mut()) {
            let value = HeapRef::from_addr(src.load(Ordering::Relaxed));
            *dst = if value.is_null() { value } else { relocate(value) };
        }
    }
}

impl VisitRoots for PreResolvedStrings {
    fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        let Some(entries) = self.current() else {
            return;
        };
        for entry in entries {
            let mut root = RawRef::from_addr(entry.load(Ordering::Relaxed));
            if visit_if_non_null(visitor, &mut root) {
                entry.store(root.addr(), Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for PreResolvedStrings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreResolvedStrings")
            .field("enabled", &self.is_enabled())
            .field("count", &self.count())
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(addr: u32) -> HeapRef<StringObject> {
        HeapRef::from_addr(addr)
    }

    #[test]
    fn disabled_overlay_misses() {
        let overlay = PreResolvedStrings::new(4);
        assert!(!overlay.is_enabled());
        assert_eq!(overlay.count(), 0);
        assert_eq!(overlay.get(1), None);
        assert!(!overlay.set(1, s(0x10)));
    }

    #[test]
    fn enabled_overlay_is_direct_indexed() {
        let overlay = PreResolvedStrings::new(4);
        overlay.enable();
        assert_eq!(overlay.count(), 4);
        assert_eq!(overlay.get(2), None);
        assert!(overlay.set(2, s(0x10)));
        assert!(overlay.set(3, s(0x20)));
        assert_eq!(overlay.get(2), Some(s(0x10)));
        assert_eq!(overlay.get(3), Some(s(0x20)));
    }

    #[test]
    fn clear_degrades_to_miss() {
        let overlay = PreResolvedStrings::new(4);
        overlay.enable();
        overlay.set(0, s(0x10));
        overlay.clear();
        assert_eq!(overlay.get(0), None);
        assert!(!overlay.is_enabled());

        // a count that is still visible without an array is a miss too
        overlay.count.store(4, Ordering::Relaxed);
        assert_eq!(overlay.get(0), None);
    }

    #[test]
    fn re_enable_starts_empty() {
        let overlay = PreResolvedStrings::new(2);
        overlay.enable();
        overlay.set(1, s(0x10));
        overlay.clear();
        overlay.enable();
        assert_eq!(overlay.get(1), None);
        assert!(overlay.set(0, s(0x20)));
        assert_eq!(overlay.get(0), Some(s(0x20)));
    }

    #[test]
    fn enable_clear_cycles_reuse_one_array() {
        let overlay = PreResolvedStrings::new(8);
        overlay.enable();
        let first = overlay.array.load(Ordering::Relaxed);
        for round in 0..100 {
            overlay.set(round % 8, s(0x10 + round * 8));
            overlay.clear();
            overlay.enable();
            assert_eq!(overlay.array.load(Ordering::Relaxed), first);
            assert_eq!(overlay.get(round % 8), None);
        }
        // enabling twice in a row empties the overlay as well
        overlay.set(3, s(0x10));
        overlay.enable();
        assert_eq!(overlay.get(3), None);
        assert_eq!(overlay.count(), 8);
    }

    #[test]
    fn visit_and_fixup() {
        let overlay = PreResolvedStrings::new(3);
        overlay.enable();
        overlay.set(1, s(0x10));

        let mut seen = 0;
        overlay.visit_roots(&mut |root: &mut RawRef| {
            seen += 1;
            *root = RawRef::from_addr(0x30);
        });
        assert_eq!(seen, 1);
        assert_eq!(overlay.get(1), Some(s(0x30)));

        let mut dest = vec![HeapRef::null(); 3];
        overlay.fixup_into(&mut dest, |r| s(r.addr() + 1));
        assert_eq!(dest, vec![HeapRef::null(), s(0x31), HeapRef::null()]);
    }
}
