//! A small moving object space. Objects live behind compressed addresses,
//! evacuation moves them to fresh addresses and leaves a forwarding entry
//! behind until the collection finishes.
use std::{
    any::Any,
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::{HeapRef, RawRef, RootVisitor};

pub const OBJECT_ALIGNMENT: u32 = 8;

type Object = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct SpaceInner {
    objects: HashMap<u32, Object, ahash::RandomState>,
    forwarding: HashMap<u32, u32, ahash::RandomState>,
}

pub struct ObjectSpace {
    inner: RwLock<SpaceInner>,
    bump: AtomicU32,
    epoch: AtomicUsize,
}

impl Default for ObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectSpace {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SpaceInner::default()),
            bump: AtomicU32::new(OBJECT_ALIGNMENT),
            epoch: AtomicUsize::new(0),
        }
    }

    fn next_address(&self) -> u32 {
        let addr = self.bump.fetch_add(OBJECT_ALIGNMENT, Ordering::Relaxed);
        assert!(addr != 0 && addr < u32::MAX - OBJECT_ALIGNMENT, "object space exhausted");
        addr
    }

    pub fn allocate<T: Any + Send + Sync>(&self, value: T) -> HeapRef<T> {
        let addr = self.next_address();
        self.inner.write().objects.insert(addr, Arc::new(value));
        HeapRef::from_addr(addr)
    }

    pub fn resolve<T: Any + Send + Sync>(&self, reference: HeapRef<T>) -> Option<Arc<T>> {
        let object = self.inner.read().objects.get(&reference.addr())?.clone();
        object.downcast::<T>().ok()
    }

    pub fn contains(&self, reference: RawRef) -> bool {
        self.inner.read().objects.contains_key(&reference.addr())
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Moves a single object, callers must hold every mutator at a safepoint.
    pub fn evacuate<T>(&self, reference: HeapRef<T>) -> Option<HeapRef<T>> {
        let to = self.next_address();
        let mut inner = self.inner.write();
        let object = inner.objects.remove(&reference.addr())?;
        inner.objects.insert(to, object);
        inner.forwarding.insert(reference.addr(), to);
        log::trace!("evacuated {:#x} -> {:#x}", reference.addr(), to);
        Some(HeapRef::from_addr(to))
    }

    /// Moves every object, returns how many moved.
    pub fn evacuate_all(&self) -> usize {
        let mut inner = self.inner.write();
        let from: Vec<u32> = inner.objects.keys().copied().collect();
        for &addr in &from {
            let to = self.next_address();
            if let Some(object) = inner.objects.remove(&addr) {
                inner.objects.insert(to, object);
                inner.forwarding.insert(addr, to);
            }
        }
        log::debug!("evacuated {} objects", from.len());
        from.len()
    }

    pub fn forwarding_address(&self, reference: RawRef) -> Option<RawRef> {
        self.inner
            .read()
            .forwarding
            .get(&reference.addr())
            .map(|&to| RawRef::from_addr(to))
    }

    /// Visitor rewriting roots to the forwarding address of their referent.
    pub fn forwarder(&self) -> Forwarder<'_> {
        Forwarder {
            inner: self.inner.read(),
            forwarded: 0,
        }
    }

    /// Frees every object not in `marked`, returns how many were freed.
    pub fn sweep(&self, marked: &Marker) -> usize {
        let mut inner = self.inner.write();
        let before = inner.objects.len();
        inner
            .objects
            .retain(|addr, _| marked.is_marked(RawRef::from_addr(*addr)));
        before - inner.objects.len()
    }

    /// Drops the forwarding table and starts a new epoch.
    pub fn finish_collection(&self) {
        self.inner.write().forwarding.clear();
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ObjectSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ObjectSpace")
            .field("objects", &inner.objects.len())
            .field("forwarding", &inner.forwarding.len())
            .field("epoch", &self.epoch())
            .finish()
    }
}

pub struct Forwarder<'a> {
    inner: RwLockReadGuard<'a, SpaceInner>,
    forwarded: usize,
}

impl Forwarder<'_> {
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }
}

impl RootVisitor for Forwarder<'_> {
    fn visit_root(&mut self, root: &mut RawRef) {
        if let Some(&to) = self.inner.forwarding.get(&root.addr()) {
            *root = RawRef::from_addr(to);
            self.forwarded += 1;
        }
    }
}

/// Records every root it is shown.
#[derive(Debug, Default)]
pub struct Marker {
    marked: HashSet<RawRef, ahash::RandomState>,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_marked(&self, reference: RawRef) -> bool {
        self.marked.contains(&reference)
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }
}

impl RootVisitor for Marker {
    fn visit_root(&mut self, root: &mut RawRef) {
        self.marked.insert(*root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringObject;

    #[test]
    fn allocate_and_resolve() {
        let space = ObjectSpace::new();
        let s = space.allocate(StringObject::new("hello"));
        assert!(!s.is_null());
        assert_eq!(s.addr() % OBJECT_ALIGNMENT, 0);
        assert_eq!(&*space.resolve(s).unwrap().value, "hello");
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn resolve_with_wrong_type_fails() {
        let space = ObjectSpace::new();
        let s = space.allocate(StringObject::new("x"));
        let wrong: HeapRef<u64> = HeapRef::from_addr(s.addr());
        assert!(space.resolve(wrong).is_none());
    }

    #[test]
    fn evacuation_leaves_forwarding() {
        let space = ObjectSpace::new();
        let s = space.allocate(StringObject::new("moved"));
        let to = space.evacuate(s).unwrap();
        assert_ne!(to, s);
        assert!(space.resolve(s).is_none());
        assert_eq!(&*space.resolve(to).unwrap().value, "moved");
        assert_eq!(space.forwarding_address(s.raw()), Some(to.raw()));

        let mut root = s.raw();
        let mut forwarder = space.forwarder();
        forwarder.visit_root(&mut root);
        assert_eq!(root, to.raw());
        assert_eq!(forwarder.forwarded(), 1);
        drop(forwarder);

        space.finish_collection();
        assert_eq!(space.forwarding_address(s.raw()), None);
        assert_eq!(space.epoch(), 1);
    }

    #[test]
    fn sweep_frees_unmarked() {
        let space = ObjectSpace::new();
        let keep = space.allocate(StringObject::new("keep"));
        let _drop = space.allocate(StringObject::new("drop"));
        let mut marker = Marker::new();
        marker.visit_root(&mut keep.raw());
        assert_eq!(space.sweep(&marker), 1);
        assert!(space.contains(keep.raw()));
        assert_eq!(space.len(), 1);
    }
}
