use std::{
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use crate::{
    CallSite, CallSiteIndex, Class, ConfigError, DexCacheCreateInfo, DexCachePair, DexCacheSettings,
    DexFile, FieldIndex, FieldInfo, HeapRef, MethodIndex, MethodInfo, MethodType,
    NativeDexCachePair, ProtoIndex, RawRef, RootVisitor, Runtime, StringIndex, StringObject,
    TypeIndex, VisitRoots, WriteBarrier,
    call_site::ClaimCache,
    native::NativeSlotCache,
    pair::SlotCache,
    preresolved::PreResolvedStrings,
    slot::{cache_len, slot_index},
    visitor::visit_if_non_null,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DexCacheId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl DexCacheId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per dex file resolution cache.
///
/// Maps the file's symbol indices to resolved objects (strings, types,
/// method types, call sites) or to native metadata (fields, methods). All
/// reads and writes are lock free and may race with each other and with the
/// collector's root visiting. Misses are expected, the caller re-resolves and
/// publishes the result through the matching `set_*`.
pub struct DexCache {
    id: DexCacheId,
    dex_file: Arc<DexFile>,
    location: AtomicU32,
    settings: DexCacheSettings,
    strings: SlotCache<StringObject>,
    resolved_types: SlotCache<Class>,
    resolved_method_types: SlotCache<MethodType>,
    resolved_fields: NativeSlotCache<FieldInfo>,
    resolved_methods: NativeSlotCache<MethodInfo>,
    resolved_call_sites: ClaimCache<CallSite>,
    pre_resolved_strings: PreResolvedStrings,
    runtime: Arc<dyn Runtime>,
    barrier: Arc<dyn WriteBarrier>,
}

impl DexCache {
    pub fn new(
        dex_file: Arc<DexFile>,
        location: HeapRef<StringObject>,
        runtime: Arc<dyn Runtime>,
        barrier: Arc<dyn WriteBarrier>,
        info: &DexCacheCreateInfo,
    ) -> Result<Self, ConfigError> {
        let settings = DexCacheSettings::from_info(info)?;
        let strings = SlotCache::new(cache_len(
            settings.string_cache_size,
            dex_file.num_string_ids,
        ));
        let resolved_types =
            SlotCache::new(cache_len(settings.type_cache_size, dex_file.num_type_ids));
        let resolved_method_types = SlotCache::new(cache_len(
            settings.method_type_cache_size,
            dex_file.num_proto_ids,
        ));
        let resolved_fields = NativeSlotCache::new(cache_len(
            settings.field_cache_size,
            dex_file.num_field_ids,
        ));
        let resolved_methods = NativeSlotCache::new(cache_len(
            settings.method_cache_size,
            dex_file.num_method_ids,
        ));
        let resolved_call_sites = ClaimCache::new(dex_file.num_call_site_ids as usize);
        let pre_resolved_strings = PreResolvedStrings::new(dex_file.num_string_ids);

        let cache = Self {
            id: DexCacheId::next(),
            location: AtomicU32::new(location.addr()),
            strings,
            resolved_types,
            resolved_method_types,
            resolved_fields,
            resolved_methods,
            resolved_call_sites,
            pre_resolved_strings,
            settings,
            dex_file,
            runtime,
            barrier,
        };
        log::debug!(
            "created dex cache {:?} for {}: {} strings, {} types, {} method types, {} fields, {} methods, {} call sites",
            cache.id,
            cache.location_name(),
            cache.num_strings(),
            cache.num_resolved_types(),
            cache.num_resolved_method_types(),
            cache.num_resolved_fields(),
            cache.num_resolved_methods(),
            cache.num_resolved_call_sites(),
        );
        Ok(cache)
    }

    pub fn id(&self) -> DexCacheId {
        self.id
    }

    pub fn dex_file(&self) -> &DexFile {
        &self.dex_file
    }

    pub fn settings(&self) -> &DexCacheSettings {
        &self.settings
    }

    pub fn location(&self) -> HeapRef<StringObject> {
        HeapRef::from_addr(self.location.load(Ordering::Relaxed))
    }

    pub fn location_name(&self) -> &str {
        &self.dex_file.location
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn num_resolved_types(&self) -> usize {
        self.resolved_types.len()
    }

    pub fn num_resolved_method_types(&self) -> usize {
        self.resolved_method_types.len()
    }

    pub fn num_resolved_fields(&self) -> usize {
        self.resolved_fields.len()
    }

    pub fn num_resolved_methods(&self) -> usize {
        self.resolved_methods.len()
    }

    pub fn num_resolved_call_sites(&self) -> usize {
        self.resolved_call_sites.len()
    }

    pub fn num_pre_resolved_strings(&self) -> u32 {
        self.pre_resolved_strings.count()
    }

    #[inline]
    fn write_barrier(&self) {
        // TODO: mark only the written array once the barrier can take a field range
        self.barrier.for_every_field_write(self);
    }

    // strings

    #[inline]
    pub fn string_slot_index(&self, index: StringIndex) -> usize {
        debug_assert!(index.0 < self.dex_file.num_string_ids, "{} out of range", index);
        let slot = slot_index(index.0, self.settings.string_cache_size);
        debug_assert!(slot < self.num_strings());
        slot
    }

    #[inline]
    pub fn get_resolved_string(&self, index: StringIndex) -> Option<HeapRef<StringObject>> {
        if let Some(string) = self.pre_resolved_strings.get(index.0) {
            return Some(string);
        }
        self.strings
            .get(self.string_slot_index(index), index.0, Ordering::Relaxed)
    }

    pub fn set_resolved_string(&self, index: StringIndex, resolved: HeapRef<StringObject>) {
        debug_assert!(!resolved.is_null());
        self.strings.set(
            self.string_slot_index(index),
            index.0,
            resolved,
            Ordering::Relaxed,
        );
        if self.runtime.is_active_transaction() {
            debug_assert!(self.runtime.is_aot_compiler());
            self.runtime.record_resolve_string(self, index);
        }
        self.write_barrier();
    }

    /// Compiler only. The slot keeps its value if another index claimed it.
    pub fn clear_string(&self, index: StringIndex) {
        debug_assert!(self.runtime.is_aot_compiler());
        // racy, only the transactional interpreter calls this
        self.strings.clear(self.string_slot_index(index), index.0);
    }

    /// Enables the overlay with every entry null. The backing array is
    /// allocated once and reused by later calls after a clear.
    pub fn add_pre_resolved_strings_array(&self) {
        debug_assert!(self.runtime.is_aot_compiler());
        self.pre_resolved_strings.enable();
        log::debug!(
            "enabled {} pre-resolved strings for {}",
            self.dex_file.num_string_ids,
            self.location_name()
        );
    }

    pub fn has_pre_resolved_strings(&self) -> bool {
        self.pre_resolved_strings.is_enabled()
    }

    pub fn set_pre_resolved_string(&self, index: StringIndex, resolved: HeapRef<StringObject>) {
        debug_assert!(!resolved.is_null());
        debug_assert!(index.0 < self.dex_file.num_string_ids, "{} out of range", index);
        assert!(
            self.runtime.is_aot_compiler(),
            "pre-resolved strings are written by the aot compiler only"
        );
        assert!(
            !self.runtime.is_active_transaction(),
            "pre-resolved strings cannot be written inside a transaction"
        );
        let stored = self.pre_resolved_strings.set(index.0, resolved);
        assert!(stored, "pre-resolved strings are not enabled");
        self.write_barrier();
    }

    /// Readers racing with this fall back to the slot mapped strings.
    pub fn clear_pre_resolved_strings(&self) {
        self.pre_resolved_strings.clear();
        log::debug!("cleared pre-resolved strings for {}", self.location_name());
    }

    // types

    #[inline]
    pub fn type_slot_index(&self, index: TypeIndex) -> usize {
        debug_assert!(index.0 < self.dex_file.num_type_ids, "{} out of range", index);
        let slot = slot_index(index.0, self.settings.type_cache_size);
        debug_assert!(slot < self.num_resolved_types());
        slot
    }

    #[inline]
    pub fn get_resolved_type(&self, index: TypeIndex) -> Option<HeapRef<Class>> {
        // no acquire, getting at the class goes through a lock or an address
        // dependency anyway
        self.resolved_types
            .get(self.type_slot_index(index), index.0, Ordering::Relaxed)
    }

    pub fn set_resolved_type(&self, index: TypeIndex, resolved: HeapRef<Class>) {
        debug_assert!(!resolved.is_null());
        // release: a reader seeing the class must also see its statics
        self.resolved_types.set(
            self.type_slot_index(index),
            index.0,
            resolved,
            Ordering::Release,
        );
        self.write_barrier();
    }

    /// Image writer and tests only.
    pub fn clear_resolved_type(&self, index: TypeIndex) {
        debug_assert!(self.runtime.is_aot_compiler());
        self.resolved_types.clear(self.type_slot_index(index), index.0);
    }

    // method types

    #[inline]
    pub fn method_type_slot_index(&self, index: ProtoIndex) -> usize {
        debug_assert!(self.runtime.is_method_handles_enabled());
        debug_assert!(index.0 < self.dex_file.num_proto_ids, "{} out of range", index);
        let slot = slot_index(index.0, self.settings.method_type_cache_size);
        debug_assert!(slot < self.num_resolved_method_types());
        slot
    }

    #[inline]
    pub fn get_resolved_method_type(&self, index: ProtoIndex) -> Option<HeapRef<MethodType>> {
        self.resolved_method_types
            .get(self.method_type_slot_index(index), index.0, Ordering::Relaxed)
    }

    pub fn set_resolved_method_type(&self, index: ProtoIndex, resolved: HeapRef<MethodType>) {
        debug_assert!(!resolved.is_null());
        self.resolved_method_types.set(
            self.method_type_slot_index(index),
            index.0,
            resolved,
            Ordering::Relaxed,
        );
        self.write_barrier();
    }

    // call sites

    #[inline]
    pub fn get_resolved_call_site(&self, index: CallSiteIndex) -> Option<HeapRef<CallSite>> {
        debug_assert!(self.runtime.is_method_handles_enabled());
        debug_assert!(index.0 < self.dex_file.num_call_site_ids, "{} out of range", index);
        self.resolved_call_sites.get(index.0 as usize)
    }

    /// The first call site set for an index wins. Returns the winner, which
    /// is `call_site` only if this call published it.
    pub fn set_resolved_call_site(
        &self,
        index: CallSiteIndex,
        call_site: HeapRef<CallSite>,
    ) -> HeapRef<CallSite> {
        debug_assert!(self.runtime.is_method_handles_enabled());
        debug_assert!(index.0 < self.dex_file.num_call_site_ids, "{} out of range", index);
        match self.resolved_call_sites.claim(index.0 as usize, call_site) {
            crate::Claim::Won(value) => {
                self.write_barrier();
                value
            }
            crate::Claim::Lost(existing) => existing,
        }
    }

    // fields

    #[inline]
    pub fn field_slot_index(&self, index: FieldIndex) -> usize {
        debug_assert!(index.0 < self.dex_file.num_field_ids, "{} out of range", index);
        let slot = slot_index(index.0, self.settings.field_cache_size);
        debug_assert!(slot < self.num_resolved_fields());
        slot
    }

    #[inline]
    pub fn get_resolved_field(&self, index: FieldIndex) -> Option<NonNull<FieldInfo>> {
        self.resolved_fields
            .get(self.field_slot_index(index), index.0)
    }

    pub fn set_resolved_field(&self, index: FieldIndex, field: NonNull<FieldInfo>) {
        self.resolved_fields
            .set(self.field_slot_index(index), index.0, field);
        self.write_barrier();
    }

    // methods

    #[inline]
    pub fn method_slot_index(&self, index: MethodIndex) -> usize {
        debug_assert!(index.0 < self.dex_file.num_method_ids, "{} out of range", index);
        let slot = slot_index(index.0, self.settings.method_cache_size);
        debug_assert!(slot < self.num_resolved_methods());
        slot
    }

    #[inline]
    pub fn get_resolved_method(&self, index: MethodIndex) -> Option<NonNull<MethodInfo>> {
        self.resolved_methods
            .get(self.method_slot_index(index), index.0)
    }

    pub fn set_resolved_method(&self, index: MethodIndex, method: NonNull<MethodInfo>) {
        self.resolved_methods
            .set(self.method_slot_index(index), index.0, method);
        self.write_barrier();
    }

    // collector entry points

    /// Visits every reference the cache holds. The location is an ordinary
    /// field and always visited, the arrays only with `visit_native_roots`.
    ///
    /// The caller holds the mutator lock shared and the heap bitmap lock
    /// exclusively. Mutators may keep reading and writing other slots.
    pub fn visit_references(&self, visit_native_roots: bool, visitor: &mut impl RootVisitor) {
        let mut rewritten = 0usize;
        let mut counting = |root: &mut RawRef| {
            let before = *root;
            visitor.visit_root(root);
            if *root != before {
                rewritten += 1;
            }
        };

        let mut location = RawRef::from_addr(self.location.load(Ordering::Relaxed));
        if visit_if_non_null(&mut counting, &mut location) {
            self.location.store(location.addr(), Ordering::Relaxed);
        }

        if visit_native_roots {
            self.strings.visit_roots(&mut counting);
            self.resolved_types.visit_roots(&mut counting);
            self.resolved_method_types.visit_roots(&mut counting);
            self.resolved_call_sites.visit_roots(&mut counting);
            self.pre_resolved_strings.visit_roots(&mut counting);
        }
        log::trace!(
            "visited dex cache {}, {} roots moved",
            self.location_name(),
            rewritten
        );
    }

    // fixups, all of these need the cache to themselves

    pub fn fixup_strings(
        &self,
        dest: &mut [DexCachePair<StringObject>],
        relocate: impl FnMut(HeapRef<StringObject>) -> HeapRef<StringObject>,
    ) {
        self.strings.fixup_into(dest, relocate);
        log::debug!("fixed up {} strings of {}", dest.len(), self.location_name());
    }

    pub fn fixup_resolved_types(
        &self,
        dest: &mut [DexCachePair<Class>],
        relocate: impl FnMut(HeapRef<Class>) -> HeapRef<Class>,
    ) {
        self.resolved_types.fixup_into(dest, relocate);
        log::debug!("fixed up {} types of {}", dest.len(), self.location_name());
    }

    pub fn fixup_resolved_method_types(
        &self,
        dest: &mut [DexCachePair<MethodType>],
        relocate: impl FnMut(HeapRef<MethodType>) -> HeapRef<MethodType>,
    ) {
        self.resolved_method_types.fixup_into(dest, relocate);
        log::debug!(
            "fixed up {} method types of {}",
            dest.len(),
            self.location_name()
        );
    }

    pub fn fixup_resolved_call_sites(
        &self,
        dest: &mut [HeapRef<CallSite>],
        relocate: impl FnMut(HeapRef<CallSite>) -> HeapRef<CallSite>,
    ) {
        self.resolved_call_sites.fixup_into(dest, relocate);
        log::debug!(
            "fixed up {} call sites of {}",
            dest.len(),
            self.location_name()
        );
    }

    /// No-op while the overlay is disabled.
    pub fn fixup_pre_resolved_strings(
        &self,
        dest: &mut [HeapRef<StringObject>],
        relocate: impl FnMut(HeapRef<StringObject>) -> HeapRef<StringObject>,
    ) {
        self.pre_resolved_strings.fixup_into(dest, relocate);
    }

    pub fn fixup_resolved_fields(
        &self,
        dest: &mut [NativeDexCachePair<FieldInfo>],
        relocate: impl FnMut(NonNull<FieldInfo>) -> NonNull<FieldInfo>,
    ) {
        self.resolved_fields.fixup_into(dest, relocate);
        log::debug!("fixed up {} fields of {}", dest.len(), self.location_name());
    }

    pub fn fixup_resolved_methods(
        &self,
        dest: &mut [NativeDexCachePair<MethodInfo>],
        relocate: impl FnMut(NonNull<MethodInfo>) -> NonNull<MethodInfo>,
    ) {
        self.resolved_methods.fixup_into(dest, relocate);
        log::debug!("fixed up {} methods of {}", dest.len(), self.location_name());
    }
}

impl VisitRoots for DexCache {
    fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        self.visit_references(true, visitor);
    }
}

impl std::fmt::Debug for DexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexCache")
            .field("id", &self.id)
            .field("location", &self.location_name())
            .field("strings", &self.num_strings())
            .field("types", &self.num_resolved_types())
            .field("method_types", &self.num_resolved_method_types())
            .field("fields", &self.num_resolved_fields())
            .field("methods", &self.num_resolved_methods())
            .field("call_sites", &self.num_resolved_call_sites())
            .field("pre_resolved_strings", &self.pre_resolved_strings)
            .finish()
    }
}
