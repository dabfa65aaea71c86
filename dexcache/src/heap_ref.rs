//! HeapRef<T>: compressed 32 bit reference into the object space, 0 is null.
//! the collector may move the referent, so a HeapRef is only stable between
//! two root visiting passes.
//!
//! RawRef: the same reference without a type, this is what root visitors see.
use std::{fmt, marker::PhantomData};

/// Untyped compressed reference
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RawRef(u32);

/// Typed compressed reference to a managed `T`
#[repr(transparent)]
pub struct HeapRef<T> {
    addr: u32,
    _marker: PhantomData<*const T>,
}

// SAFETY: a HeapRef is an address, it never dereferences anything itself
unsafe impl<T> Send for HeapRef<T> {}
// SAFETY: see above
unsafe impl<T> Sync for HeapRef<T> {}

// we need custom clone implementation as default considers "owning" T
// but this represents a reference to a T, not T itself
impl<T> Clone for HeapRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HeapRef<T> {}

impl<T> PartialEq for HeapRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T> Eq for HeapRef<T> {}

impl<T> std::hash::Hash for HeapRef<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl<T> Default for HeapRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for HeapRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "HeapRef(null)")
        } else {
            write!(f, "HeapRef({:#x})", self.addr)
        }
    }
}

impl RawRef {
    pub const NULL: RawRef = RawRef(0);

    pub const fn from_addr(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// # Safety
    /// caller must know the referent is a `T`
    pub const unsafe fn cast<T>(self) -> HeapRef<T> {
        HeapRef::from_addr(self.0)
    }
}

impl<T> HeapRef<T> {
    pub const fn null() -> Self {
        Self::from_addr(0)
    }

    pub const fn from_addr(addr: u32) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }

    pub const fn addr(self) -> u32 {
        self.addr
    }

    pub const fn is_null(self) -> bool {
        self.addr == 0
    }

    pub const fn raw(self) -> RawRef {
        RawRef(self.addr)
    }

    /// `None` for null
    pub const fn non_null(self) -> Option<Self> {
        if self.is_null() { None } else { Some(self) }
    }
}

impl<T> From<HeapRef<T>> for RawRef {
    fn from(value: HeapRef<T>) -> Self {
        value.raw()
    }
}
