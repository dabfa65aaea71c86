use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{HeapRef, RawRef, RootVisitor, VisitRoots, visitor::visit_if_non_null};

/// Outcome of a claim attempt.
pub enum Claim<T> {
    /// our candidate got published
    Won(HeapRef<T>),
    /// someone else got there first, this is their value
    Lost(HeapRef<T>),
}

// manual impls, derive would require T itself to be Copy/Debug/...
impl<T> Clone for Claim<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Claim<T> {}

impl<T> PartialEq for Claim<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Claim::Won(a), Claim::Won(b)) | (Claim::Lost(a), Claim::Lost(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Eq for Claim<T> {}

impl<T> std::fmt::Debug for Claim<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Claim::Won(value) => f.debug_tuple("Won").field(value).finish(),
            Claim::Lost(value) => f.debug_tuple("Lost").field(value).finish(),
        }
    }
}

impl<T> Claim<T> {
    pub fn value(self) -> HeapRef<T> {
        match self {
            Claim::Won(value) | Claim::Lost(value) => value,
        }
    }
}

/// One entry per index, no slot mapping. An entry goes from null to a value
/// exactly once (first writer wins) and never changes afterwards, except when
/// the collector moves the referent.
pub struct ClaimCache<T> {
    entries: Box<[AtomicU32]>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ClaimCache<T> {
    pub fn new(len: usize) -> Self {
        Self {
            entries: (0..len).map(|_| AtomicU32::new(0)).collect(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<HeapRef<T>> {
        HeapRef::from_addr(self.entries[index].load(Ordering::SeqCst)).non_null()
    }

    /// Publishes `candidate` unless the entry already holds a value.
    pub fn claim(&self, index: usize, candidate: HeapRef<T>) -> Claim<T> {
        debug_assert!(!candidate.is_null());
        match self.entries[index].compare_exchange(
            0,
            candidate.addr(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Claim::Won(candidate),
            Err(existing) => Claim::Lost(HeapRef::from_addr(existing)),
        }
    }

    pub fn fixup_into(
        &self,
        dest: &mut [HeapRef<T>],
        mut relocate: impl FnMut(HeapRef<T>) -> HeapRef<T>,
    ) {
        assert_eq!(dest.len(), self.len(), "fixup destination size mismatch");
        for (src, dst) in self.entries.iter().zip(dest.iter_mut()) {
            let value = HeapRef::from_addr(src.load(Ordering::Relaxed));
            *dst = if value.is_null() { value } else { relocate(value) };
        }
    }
}

impl<T> VisitRoots for ClaimCache<T> {
    fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        for entry in self.entries.iter() {
            let mut root = RawRef::from_addr(entry.load(Ordering::SeqCst));
            // a non-null entry is never claimed again, only the collector writes it
            if visit_if_non_null(visitor, &mut root) {
                entry.store(root.addr(), Ordering::Relaxed);
            }
        }
    }
}
