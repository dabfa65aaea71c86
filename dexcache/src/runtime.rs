//! What the cache needs from the rest of the runtime: transaction state for
//! the ahead of time compiler and a write barrier.
use std::collections::HashSet;

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};

use crate::{DexCache, DexCacheId, StringIndex};

pub trait Runtime: Send + Sync {
    fn is_active_transaction(&self) -> bool;
    fn is_aot_compiler(&self) -> bool;
    fn is_method_handles_enabled(&self) -> bool;
    /// Called for every string resolved while a transaction is open, so the
    /// transaction can undo it on rollback.
    fn record_resolve_string(&self, cache: &DexCache, index: StringIndex);
}

/// Coarse, whole object barrier: the holder may now reference younger objects.
pub trait WriteBarrier: Send + Sync {
    fn for_every_field_write(&self, holder: &DexCache);
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RuntimeFlags: u8 {
        const AOT_COMPILER = 1 << 0;
        const ACTIVE_TRANSACTION = 1 << 1;
        const METHOD_HANDLES = 1 << 2;
    }
}

/// Flag based runtime with a string resolution log for transactions.
#[derive(Debug)]
pub struct SimpleRuntime {
    flags: RwLock<RuntimeFlags>,
    resolved_strings: Mutex<Vec<(DexCacheId, StringIndex)>>,
}

impl Default for SimpleRuntime {
    fn default() -> Self {
        Self::new(RuntimeFlags::METHOD_HANDLES)
    }
}

impl SimpleRuntime {
    pub fn new(flags: RuntimeFlags) -> Self {
        Self {
            flags: RwLock::new(flags),
            resolved_strings: Mutex::new(Vec::new()),
        }
    }

    pub fn aot_compiler() -> Self {
        Self::new(RuntimeFlags::AOT_COMPILER | RuntimeFlags::METHOD_HANDLES)
    }

    pub fn flags(&self) -> RuntimeFlags {
        *self.flags.read()
    }

    pub fn begin_transaction(&self) {
        let mut flags = self.flags.write();
        assert!(
            flags.contains(RuntimeFlags::AOT_COMPILER),
            "transactions only exist in the aot compiler"
        );
        assert!(
            !flags.contains(RuntimeFlags::ACTIVE_TRANSACTION),
            "nested transaction"
        );
        flags.insert(RuntimeFlags::ACTIVE_TRANSACTION);
    }

    pub fn commit(&self) {
        self.resolved_strings.lock().clear();
        self.flags.write().remove(RuntimeFlags::ACTIVE_TRANSACTION);
    }

    /// Undoes every string resolution `cache` recorded since the transaction
    /// began and closes the transaction.
    pub fn rollback(&self, cache: &DexCache) {
        let recorded: Vec<_> = {
            let mut entries = self.resolved_strings.lock();
            let (mine, rest): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|(id, _)| *id == cache.id());
            *entries = rest;
            mine
        };
        log::debug!(
            "rolling back {} string resolutions in {}",
            recorded.len(),
            cache.location_name()
        );
        // the transaction has to be closed before the cache is touched again
        self.flags.write().remove(RuntimeFlags::ACTIVE_TRANSACTION);
        for (_, index) in recorded.into_iter().rev() {
            cache.clear_string(index);
        }
    }

    pub fn recorded_strings(&self) -> usize {
        self.resolved_strings.lock().len()
    }
}

impl Runtime for SimpleRuntime {
    fn is_active_transaction(&self) -> bool {
        self.flags().contains(RuntimeFlags::ACTIVE_TRANSACTION)
    }

    fn is_aot_compiler(&self) -> bool {
        self.flags().contains(RuntimeFlags::AOT_COMPILER)
    }

    fn is_method_handles_enabled(&self) -> bool {
        self.flags().contains(RuntimeFlags::METHOD_HANDLES)
    }

    fn record_resolve_string(&self, cache: &DexCache, index: StringIndex) {
        self.resolved_strings.lock().push((cache.id(), index));
    }
}

/// Remembers every cache that was written since the last `take`.
#[derive(Debug, Default)]
pub struct RememberedSet {
    dirty: Mutex<HashSet<DexCacheId, ahash::RandomState>>,
}

impl RememberedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_remembered(&self, id: DexCacheId) -> bool {
        self.dirty.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.lock().is_empty()
    }

    /// Drains the set, the collector scans these caches next.
    pub fn take(&self) -> Vec<DexCacheId> {
        self.dirty.lock().drain().collect()
    }
}

impl WriteBarrier for RememberedSet {
    fn for_every_field_write(&self, holder: &DexCache) {
        self.dirty.lock().insert(holder.id());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBarrier;

impl WriteBarrier for NoopBarrier {
    fn for_every_field_write(&self, _holder: &DexCache) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_has_method_handles_only() {
        let runtime = SimpleRuntime::default();
        assert!(runtime.is_method_handles_enabled());
        assert!(!runtime.is_aot_compiler());
        assert!(!runtime.is_active_transaction());
    }

    #[test]
    fn transaction_flags() {
        let runtime = SimpleRuntime::aot_compiler();
        runtime.begin_transaction();
        assert!(runtime.is_active_transaction());
        runtime.commit();
        assert!(!runtime.is_active_transaction());
        assert_eq!(runtime.recorded_strings(), 0);
    }

    #[test]
    fn flags_reflect_transaction_state() {
        let runtime = SimpleRuntime::aot_compiler();
        assert_eq!(
            runtime.flags(),
            RuntimeFlags::AOT_COMPILER | RuntimeFlags::METHOD_HANDLES
        );
        runtime.begin_transaction();
        assert!(runtime.flags().contains(RuntimeFlags::ACTIVE_TRANSACTION));
        runtime.commit();
        assert!(!runtime.flags().contains(RuntimeFlags::ACTIVE_TRANSACTION));
    }

    #[test]
    #[should_panic(expected = "transactions only exist in the aot compiler")]
    fn transaction_outside_compiler_panics() {
        SimpleRuntime::default().begin_transaction();
    }
}
