mod call_site;
mod dex_cache;
mod dex_file;
mod heap;
mod heap_ref;
mod mirror;
mod native;
mod pair;
mod preresolved;
mod runtime;
mod settings;
pub mod slot;
mod visitor;

pub use call_site::{Claim, ClaimCache};
pub use dex_cache::{DexCache, DexCacheId};
pub use dex_file::{CallSiteIndex, DexFile, FieldIndex, MethodIndex, ProtoIndex, StringIndex, TypeIndex};
pub use heap::{Forwarder, Marker, OBJECT_ALIGNMENT, ObjectSpace};
pub use heap_ref::{HeapRef, RawRef};
pub use mirror::*;
pub use native::{AtomicNativePair, NativeDexCachePair, NativeSlotCache};
pub use pair::{AtomicPair, DexCachePair, SlotCache};
pub use preresolved::PreResolvedStrings;
pub use runtime::{NoopBarrier, RememberedSet, Runtime, RuntimeFlags, SimpleRuntime, WriteBarrier};
pub use settings::{ConfigError, DexCacheCreateInfo, DexCacheSettings};
pub use visitor::{RootVisitor, VisitRoots};
