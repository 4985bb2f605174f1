//! The runtime context.
//!
//! [`Runtime`] owns every table for one safety mode and exposes the
//! operations instrumented code calls into. There is no hidden global state:
//! an embedding that needs a process-wide instance creates one and keeps it
//! behind its own handle, while tests create as many as they like.

use log::{debug, trace};
use serde::Serialize;
use thiserror::Error;

use crate::check::{self, CheckPolicy};
use crate::config::{ConfigError, RuntimeConfig, StackLockPolicy};
use crate::layout::{GLOBAL_KEY, Key, Lock, Metadata, MetadataLayout};
use crate::metrics::{MetricsSnapshot, RuntimeMetrics};
use crate::shadow_stack::ShadowStack;
use crate::temporal::TemporalAllocator;
use crate::trie::MetadataTrie;
use crate::va_arg::VaArgProxies;
use crate::violation::Violation;

/// Runtime construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("reservation failed: {0}")]
    Reservation(#[from] Violation),
}

/// What the runtime knows about one pointer, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Introspection {
    pub mode: &'static str,
    pub ptr: usize,
    /// The metadata as the mode stores it.
    pub metadata: Metadata,
    /// `None` without spatial metadata.
    pub in_bounds: Option<bool>,
    /// Content of the lock cell; `None` without temporal metadata or when
    /// the lock is not a lock cell.
    pub lock_holds: Option<u64>,
    /// `None` without temporal metadata.
    pub alive: Option<bool>,
    /// A shadow-stack slot of the current frame, when one was asked for.
    pub slot: Option<Metadata>,
}

impl Introspection {
    /// Dereferencing `ptr` would pass the checks the mode carries.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.in_bounds != Some(false) && self.alive != Some(false)
    }
}

pub struct Runtime<M: MetadataLayout> {
    config: RuntimeConfig,
    policy: CheckPolicy,
    trie: MetadataTrie<M>,
    shadow: ShadowStack<M>,
    va_args: VaArgProxies,
    temporal: Option<TemporalAllocator>,
    metrics: RuntimeMetrics,
}

impl<M: MetadataLayout> Runtime<M> {
    pub fn new(config: RuntimeConfig) -> Result<Self, InitError> {
        config.validate()?;
        let trie = MetadataTrie::new(config.primary_entries, config.trie_policy)?;
        let shadow = ShadowStack::new(config.shadow_stack_words)?;
        let temporal = if M::TEMPORAL {
            Some(TemporalAllocator::new(
                config.lock_entries,
                config.stack_lock_policy,
                config.stack_lock_entries,
                config.free_map.then_some(config.free_map_entries),
            )?)
        } else {
            None
        };
        debug!("runtime ready: {} mode, {config:?}", M::NAME);
        Ok(Self {
            policy: CheckPolicy::from_config(&config),
            va_args: VaArgProxies::new(config.va_arg_proxies),
            config,
            trie,
            shadow,
            temporal,
            metrics: RuntimeMetrics::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn trie(&self) -> &MetadataTrie<M> {
        &self.trie
    }

    #[must_use]
    pub fn shadow_stack(&self) -> &ShadowStack<M> {
        &self.shadow
    }

    #[must_use]
    pub fn temporal(&self) -> Option<&TemporalAllocator> {
        self.temporal.as_ref()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.secondary_tables = self.trie.installed_tables() as u64;
        snapshot
    }

    /// The lock cell that always holds key 1; 0 in spatial-only mode.
    #[must_use]
    pub fn global_lock(&self) -> Lock {
        self.temporal.as_ref().map_or(0, TemporalAllocator::global_lock)
    }

    /// Metadata that passes every check: whole address space, never freed.
    #[must_use]
    pub fn wide_metadata(&self) -> Metadata {
        let wide = Metadata::wide(self.global_lock());
        M::from_metadata(&wide).to_metadata()
    }

    // ---- metadata trie ----

    pub fn metadata_store(&mut self, addr_of_ptr: usize, meta: &Metadata) -> Result<(), Violation> {
        RuntimeMetrics::inc(&self.metrics.metadata_stores);
        self.trie.store(addr_of_ptr, M::from_metadata(meta))
    }

    #[must_use]
    pub fn metadata_load(&self, addr_of_ptr: usize) -> Metadata {
        RuntimeMetrics::inc(&self.metrics.metadata_loads);
        self.trie.load(addr_of_ptr).to_metadata()
    }

    pub fn copy_metadata(&mut self, dest: usize, src: usize, len: usize) -> Result<usize, Violation> {
        let copied = self.trie.copy_metadata(dest, src, len)?;
        if copied > 0 {
            RuntimeMetrics::inc(&self.metrics.metadata_copies);
        }
        Ok(copied)
    }

    pub fn preallocate(&mut self, addr: usize) -> Result<(), Violation> {
        self.trie.preallocate(addr)
    }

    pub fn preallocate_range(&mut self, start: usize, len: usize) -> Result<(), Violation> {
        self.trie.preallocate_range(start, len)
    }

    /// Metadata of lane `index` of a pointer vector stored at `addr_of_vector`.
    pub fn metadata_store_vector(
        &mut self,
        addr_of_vector: usize,
        index: usize,
        meta: &Metadata,
    ) -> Result<(), Violation> {
        let lane = lane_address(addr_of_vector, index)?;
        self.metadata_store(lane, meta)
    }

    pub fn metadata_load_vector(&self, addr_of_vector: usize, index: usize) -> Result<Metadata, Violation> {
        Ok(self.metadata_load(lane_address(addr_of_vector, index)?))
    }

    /// Give each string of a null-terminated string vector such as `argv` or
    /// `environ` bounds over its bytes and terminator. `strings` holds the
    /// address and length of every string in order. Returns the metadata of
    /// the vector itself, null entry included.
    ///
    /// These strings stay valid for the whole run, so they get the global key.
    pub fn register_string_vector(
        &mut self,
        vector: usize,
        strings: &[(usize, usize)],
    ) -> Result<Metadata, Violation> {
        let lock = self.global_lock();
        for (index, &(string, len)) in strings.iter().enumerate() {
            let bound = string
                .checked_add(len)
                .and_then(|end| end.checked_add(1))
                .ok_or(Violation::UntrackableAddress { addr: string })?;
            let holder = lane_address(vector, index)?;
            self.metadata_store(holder, &Metadata::new(string, bound, GLOBAL_KEY, lock))?;
        }
        let bound = lane_address(vector, strings.len() + 1)?;
        let meta = Metadata::new(vector, bound, GLOBAL_KEY, lock);
        debug!("registered {} strings at {vector:#x}", strings.len());
        Ok(M::from_metadata(&meta).to_metadata())
    }

    // ---- shadow stack ----

    pub fn allocate_frame(&mut self, slots: usize) -> Result<(), Violation> {
        self.shadow.allocate_frame(slots)?;
        RuntimeMetrics::inc(&self.metrics.frames_pushed);
        Ok(())
    }

    pub fn deallocate_frame(&mut self) -> Result<(), Violation> {
        self.shadow.deallocate_frame()
    }

    pub fn load_slot(&self, slot: usize) -> Result<Metadata, Violation> {
        Ok(self.shadow.load_slot(slot)?.to_metadata())
    }

    pub fn store_slot(&mut self, slot: usize, meta: &Metadata) -> Result<(), Violation> {
        self.shadow.store_slot(slot, M::from_metadata(meta))
    }

    pub fn propagate_slot(&mut self, from: usize, to: usize) -> Result<(), Violation> {
        self.shadow.propagate_slot(from, to)
    }

    pub fn store_return(&mut self, meta: &Metadata) -> Result<(), Violation> {
        self.store_slot(0, meta)
    }

    pub fn store_null_return(&mut self) -> Result<(), Violation> {
        self.shadow.store_null_return()
    }

    // ---- va_arg proxies ----

    /// Open a proxy over slots `first_slot..` of the current frame.
    pub fn allocate_va_arg_proxy(&mut self, first_slot: usize) -> Result<usize, Violation> {
        let span = self.shadow.slot_span(first_slot)?;
        let proxy = self.va_args.open(span)?;
        trace!("va_arg proxy {proxy} opened at word {}", span.next);
        Ok(proxy)
    }

    /// Metadata of the next variadic pointer argument.
    pub fn next_va_arg_metadata(&mut self, proxy: usize) -> Result<Metadata, Violation> {
        let span = self.va_args.span(proxy)?;
        let entry = self
            .shadow
            .read_span(span)
            .ok_or(Violation::VaArgPastFrame { proxy })?;
        self.va_args.advance(proxy, M::FIELDS)?;
        Ok(entry.to_metadata())
    }

    pub fn copy_va_arg_proxy(&mut self, proxy: usize) -> Result<usize, Violation> {
        self.va_args.duplicate(proxy)
    }

    pub fn free_va_arg_proxy(&mut self, proxy: usize) -> Result<(), Violation> {
        self.va_args.close(proxy)
    }

    /// Pass `proxy` in `slot` for a callee taking a `va_list`.
    pub fn store_proxy_slot(&mut self, slot: usize, proxy: usize) -> Result<(), Violation> {
        self.shadow.store_slot(slot, M::from_word(proxy))
    }

    pub fn load_proxy_slot(&self, slot: usize) -> Result<usize, Violation> {
        Ok(self.shadow.load_slot(slot)?.first_word())
    }

    /// Attach `proxy` to the `va_list` object at `addr_of_va_list`.
    pub fn proxy_metadata_store(&mut self, addr_of_va_list: usize, proxy: usize) -> Result<(), Violation> {
        RuntimeMetrics::inc(&self.metrics.metadata_stores);
        self.trie.store(addr_of_va_list, M::from_word(proxy))
    }

    /// Proxy attached at `addr_of_va_list`; 0 when there is none.
    #[must_use]
    pub fn proxy_metadata_load(&self, addr_of_va_list: usize) -> usize {
        RuntimeMetrics::inc(&self.metrics.metadata_loads);
        self.trie.load(addr_of_va_list).first_word()
    }

    // ---- temporal allocator ----

    /// Register a heap object at `ptr`. Returns `(0, 0)` in spatial-only mode.
    pub fn allocate(&mut self, ptr: usize) -> Result<(Key, Lock), Violation> {
        self.trie.preallocate(ptr)?;
        RuntimeMetrics::inc(&self.metrics.heap_allocations);
        match self.temporal.as_mut() {
            Some(temporal) => temporal.allocate(ptr),
            None => Ok((0, 0)),
        }
    }

    /// Full metadata for a fresh heap object of `size` bytes at `ptr`.
    pub fn allocate_object(&mut self, ptr: usize, size: usize) -> Result<Metadata, Violation> {
        let (key, lock) = self.allocate(ptr)?;
        let bound = ptr
            .checked_add(size)
            .ok_or(Violation::UntrackableAddress { addr: ptr })?;
        Ok(M::from_metadata(&Metadata::new(ptr, bound, key, lock)).to_metadata())
    }

    pub fn deallocate(&mut self, ptr: usize, key: Key, lock: Lock) -> Result<(), Violation> {
        if let Some(temporal) = self.temporal.as_mut() {
            temporal.deallocate(ptr, key, lock)?;
        }
        RuntimeMetrics::inc(&self.metrics.heap_deallocations);
        Ok(())
    }

    /// Keep a live allocation's identity while it moves from `old` to `new`.
    pub fn relocate(&mut self, old: usize, new: usize, key: Key) -> Result<(), Violation> {
        match self.temporal.as_mut() {
            Some(temporal) => temporal.relocate(old, new, key),
            None => Ok(()),
        }
    }

    /// Key and lock for the stack objects of one call.
    pub fn stack_allocate(&mut self) -> Result<(Key, Lock), Violation> {
        RuntimeMetrics::inc(&self.metrics.stack_allocations);
        match self.temporal.as_mut() {
            Some(temporal) => temporal.stack_allocate(),
            None => Ok((0, 0)),
        }
    }

    pub fn stack_deallocate(&mut self, key: Key) -> Result<(), Violation> {
        if let Some(temporal) = self.temporal.as_mut() {
            temporal.stack_deallocate(key)?;
        }
        RuntimeMetrics::inc(&self.metrics.stack_deallocations);
        Ok(())
    }

    #[must_use]
    pub fn stack_lock_policy(&self) -> StackLockPolicy {
        self.config.stack_lock_policy
    }

    // ---- checks ----

    pub fn check_spatial(&self, ptr: usize, width: usize, base: usize, bound: usize) -> Result<(), Violation> {
        RuntimeMetrics::inc(&self.metrics.checks);
        check::spatial_check(ptr, width, base, bound, self.policy)
    }

    pub fn check_temporal(&self, key: Key, lock: Lock) -> Result<(), Violation> {
        RuntimeMetrics::inc(&self.metrics.checks);
        if lock == 0 && self.policy.ignore_missing_metadata {
            return Ok(());
        }
        match self.temporal.as_ref() {
            Some(temporal) => temporal.check(key, lock),
            None => Ok(()),
        }
    }

    /// Every check the mode carries, for an access of `width` bytes at `ptr`.
    pub fn check_dereference(&self, ptr: usize, width: usize, meta: &Metadata) -> Result<(), Violation> {
        if M::SPATIAL {
            self.check_spatial(ptr, width, meta.base, meta.bound)?;
        }
        if M::TEMPORAL {
            self.check_temporal(meta.key, meta.lock)?;
        }
        Ok(())
    }

    /// Check a dereference of `ptr`, whose value was loaded from `witness`.
    pub fn check_dereference_via(&self, witness: usize, ptr: usize, width: usize) -> Result<(), Violation> {
        let meta = self.metadata_load(witness);
        self.check_dereference(ptr, width, &meta)
    }

    pub fn check_call(&self, ptr: usize, meta: &Metadata) -> Result<(), Violation> {
        RuntimeMetrics::inc(&self.metrics.checks);
        if M::SPATIAL {
            check::call_check(ptr, meta.base, meta.bound, self.policy)?;
        }
        Ok(())
    }

    /// Bulk copy of `len` bytes: both sides must be in bounds and alive.
    pub fn memcopy_check(
        &self,
        dest: usize,
        src: usize,
        len: usize,
        dest_meta: &Metadata,
        src_meta: &Metadata,
    ) -> Result<(), Violation> {
        self.check_dereference(dest, len, dest_meta)?;
        self.check_dereference(src, len, src_meta)
    }

    /// Bulk fill of `len` bytes at `dest`.
    pub fn memset_check(&self, dest: usize, len: usize, meta: &Metadata) -> Result<(), Violation> {
        self.check_dereference(dest, len, meta)
    }

    /// Describe `ptr` under `meta` without counting a check. `slot` adds the
    /// content of that slot of the current frame.
    #[must_use]
    pub fn introspect(&self, ptr: usize, meta: &Metadata, slot: Option<usize>) -> Introspection {
        let metadata = M::from_metadata(meta).to_metadata();
        let in_bounds = M::SPATIAL.then(|| {
            check::spatial_check(ptr, 1, metadata.base, metadata.bound, self.policy).is_ok()
        });
        let lock_holds = self
            .temporal
            .as_ref()
            .and_then(|temporal| temporal.observe(metadata.key, metadata.lock).ok());
        let alive = M::TEMPORAL.then_some(lock_holds == Some(metadata.key));
        Introspection {
            mode: M::NAME,
            ptr,
            metadata,
            in_bounds,
            lock_holds,
            alive,
            slot: slot.and_then(|s| self.shadow.load_slot(s).ok()).map(|e| e.to_metadata()),
        }
    }
}

/// Address of element `index` of a pointer array at `base`.
fn lane_address(base: usize, index: usize) -> Result<usize, Violation> {
    index
        .checked_mul(size_of::<usize>())
        .and_then(|offset| base.checked_add(offset))
        .ok_or(Violation::UntrackableAddress { addr: base })
}

impl<M: MetadataLayout> std::fmt::Debug for Runtime<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("mode", &M::NAME)
            .field("trie", &self.trie)
            .field("shadow", &self.shadow)
            .field("va_args", &self.va_args.live())
            .field("temporal", &self.temporal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::layout::{GLOBAL_KEY, Spatial, SpatialTemporal, Temporal, WIDE_UPPER};

    fn full() -> Runtime<SpatialTemporal> {
        Runtime::new(RuntimeConfig::compact()).expect("runtime")
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = RuntimeConfig {
            lock_entries: 0,
            ..RuntimeConfig::compact()
        };
        assert_eq!(
            Runtime::<SpatialTemporal>::new(cfg).unwrap_err(),
            InitError::Config(ConfigError::ZeroCapacity {
                field: "lock_entries"
            })
        );
    }

    #[test]
    fn allocate_store_check_free() {
        let mut rt = full();
        let meta = rt.allocate_object(0x10_0000, 8).expect("allocate");
        rt.metadata_store(0x20_0000, &meta).expect("store");
        rt.check_dereference_via(0x20_0000, 0x10_0007, 1)
            .expect("in bounds");
        assert!(matches!(
            rt.check_dereference_via(0x20_0000, 0x10_0008, 1),
            Err(Violation::OutOfBounds { .. })
        ));
        rt.deallocate(0x10_0000, meta.key, meta.lock).expect("free");
        assert!(matches!(
            rt.check_dereference_via(0x20_0000, 0x10_0000, 1),
            Err(Violation::KeyMismatch { .. })
        ));
    }

    #[test]
    fn spatial_mode_skips_temporal_state() {
        let mut rt = Runtime::<Spatial>::new(RuntimeConfig::compact()).expect("runtime");
        assert!(rt.temporal().is_none());
        assert_eq!(rt.global_lock(), 0);
        let meta = rt.allocate_object(0x1000, 16).expect("allocate");
        assert_eq!(meta, Metadata::bounds(0x1000, 0x1010));
        rt.metadata_store(0x8000, &Metadata::new(0x1000, 0x1010, 5, 0x77))
            .expect("store");
        assert_eq!(rt.metadata_load(0x8000), Metadata::bounds(0x1000, 0x1010));
        rt.deallocate(0x1000, 0, 0).expect("noop");
    }

    #[test]
    fn temporal_mode_ignores_bounds() {
        let mut rt = Runtime::<Temporal>::new(RuntimeConfig::compact()).expect("runtime");
        let meta = rt.allocate_object(0x1000, 8).expect("allocate");
        assert_eq!((meta.base, meta.bound), (0, 0));
        rt.check_dereference(0xFFFF_0000, 64, &meta)
            .expect("no spatial check");
        rt.check_call(0x1234, &meta).expect("no call check");
    }

    #[test]
    fn wide_metadata_passes_everything() {
        let rt = full();
        let wide = rt.wide_metadata();
        assert_eq!(wide.bound, WIDE_UPPER);
        assert_eq!(wide.key, GLOBAL_KEY);
        rt.check_dereference(0x7fff_1234, 8, &wide).expect("wide");
    }

    #[test]
    fn missing_metadata_policy() {
        let strict = full();
        assert!(strict.check_dereference(0x1000, 4, &Metadata::UNKNOWN).is_err());

        let lenient = Runtime::<SpatialTemporal>::new(RuntimeConfig {
            ignore_missing_metadata: true,
            ..RuntimeConfig::compact()
        })
        .expect("runtime");
        lenient
            .check_dereference(0x1000, 4, &Metadata::UNKNOWN)
            .expect("ignored");
    }

    #[test]
    fn metrics_track_operations() {
        let mut rt = full();
        rt.allocate_object(0x1000, 8).expect("allocate");
        rt.metadata_store(0x2000, &Metadata::bounds(0x1000, 0x1008))
            .expect("store");
        let _ = rt.metadata_load(0x2000);
        rt.copy_metadata(0x3000, 0x2000, 8).expect("copy");
        rt.allocate_frame(1).expect("frame");
        let m = rt.metrics();
        assert_eq!(m.heap_allocations, 1);
        assert_eq!(m.metadata_stores, 1);
        assert_eq!(m.metadata_loads, 1);
        assert_eq!(m.metadata_copies, 1);
        assert_eq!(m.frames_pushed, 1);
        assert_eq!(m.secondary_tables, 1);
    }

    #[test]
    fn memcopy_check_covers_both_sides() {
        let mut rt = full();
        let dst = rt.allocate_object(0x1000, 16).expect("dst");
        let src = rt.allocate_object(0x2000, 8).expect("src");
        rt.memcopy_check(0x1000, 0x2000, 8, &dst, &src).expect("fits");
        assert!(matches!(
            rt.memcopy_check(0x1000, 0x2000, 16, &dst, &src),
            Err(Violation::OutOfBounds { ptr: 0x2000, .. })
        ));
        rt.memset_check(0x1000, 16, &dst).expect("fits");
        rt.deallocate(0x1000, dst.key, dst.lock).expect("free");
        assert!(matches!(
            rt.memset_check(0x1000, 1, &dst),
            Err(Violation::KeyMismatch { .. })
        ));
    }

    #[test]
    fn va_arg_proxy_walks_variadic_slots() {
        let mut rt = full();
        let lock = rt.global_lock();
        // Return slot, one named pointer, two variadic pointers.
        rt.allocate_frame(4).expect("frame");
        rt.store_slot(2, &Metadata::new(0x1000, 0x1010, GLOBAL_KEY, lock))
            .expect("store");
        rt.store_slot(3, &Metadata::new(0x2000, 0x2008, GLOBAL_KEY, lock))
            .expect("store");

        let proxy = rt.allocate_va_arg_proxy(2).expect("va_start");
        assert_eq!(rt.next_va_arg_metadata(proxy).map(|m| m.base), Ok(0x1000));
        let copy = rt.copy_va_arg_proxy(proxy).expect("va_copy");
        assert_eq!(rt.next_va_arg_metadata(proxy).map(|m| m.bound), Ok(0x2008));
        assert_eq!(
            rt.next_va_arg_metadata(proxy),
            Err(Violation::VaArgPastFrame { proxy })
        );
        assert_eq!(rt.next_va_arg_metadata(copy).map(|m| m.base), Ok(0x2000));

        rt.free_va_arg_proxy(proxy).expect("va_end");
        rt.free_va_arg_proxy(copy).expect("va_end");
        assert_eq!(
            rt.next_va_arg_metadata(copy),
            Err(Violation::UnknownVaArgProxy { proxy: copy })
        );
        rt.deallocate_frame().expect("pop");
    }

    #[test]
    fn proxies_travel_through_slots_and_trie() {
        let mut rt = Runtime::<Temporal>::new(RuntimeConfig::compact()).expect("runtime");
        rt.allocate_frame(2).expect("frame");
        let proxy = rt.allocate_va_arg_proxy(2).expect("no variadic pointers");

        rt.proxy_metadata_store(0x6000, proxy).expect("store");
        assert_eq!(rt.proxy_metadata_load(0x6000), proxy);
        assert_eq!(rt.proxy_metadata_load(0x6008), 0);

        rt.store_proxy_slot(1, proxy).expect("pass to callee");
        assert_eq!(rt.load_proxy_slot(1), Ok(proxy));
        assert_eq!(rt.load_slot(1).map(|m| m.lock), Ok(0));
        assert_eq!(
            rt.next_va_arg_metadata(proxy),
            Err(Violation::VaArgPastFrame { proxy })
        );
    }

    #[test]
    fn vector_lanes_are_consecutive_words() {
        let mut rt = full();
        let meta = Metadata::new(0x1000, 0x1040, GLOBAL_KEY, rt.global_lock());
        rt.metadata_store_vector(0x9000, 3, &meta).expect("lane 3");
        assert_eq!(rt.metadata_load(0x9018), meta);
        assert_eq!(rt.metadata_load_vector(0x9000, 3), Ok(meta));
        assert_eq!(rt.metadata_load_vector(0x9000, 2), Ok(Metadata::UNKNOWN));
        assert_eq!(
            rt.metadata_load_vector(usize::MAX - 8, 2),
            Err(Violation::UntrackableAddress {
                addr: usize::MAX - 8
            })
        );
    }

    #[test]
    fn string_vectors_get_global_bounds() {
        let mut rt = full();
        let strings = [(0x4000, 5), (0x4010, 0)];
        let vector = rt
            .register_string_vector(0x8000, &strings)
            .expect("register");
        assert_eq!((vector.base, vector.bound), (0x8000, 0x8018));
        assert_eq!(vector.key, GLOBAL_KEY);

        let first = rt.metadata_load(0x8000);
        assert_eq!((first.base, first.bound), (0x4000, 0x4006));
        rt.check_dereference(0x4005, 1, &first).expect("terminator");
        let empty = rt.metadata_load(0x8008);
        assert_eq!((empty.base, empty.bound), (0x4010, 0x4011));
        rt.check_dereference(0x8010, 8, &vector).expect("null entry");
    }

    #[test]
    fn introspection_reports_without_counting() {
        let mut rt = full();
        let meta = rt.allocate_object(0x1000, 8).expect("allocate");
        let live = rt.introspect(0x1004, &meta, None);
        assert_eq!(live.in_bounds, Some(true));
        assert_eq!(live.alive, Some(true));
        assert!(live.is_valid());

        rt.deallocate(0x1000, meta.key, meta.lock).expect("free");
        let dead = rt.introspect(0x1008, &meta, Some(0));
        assert_eq!(dead.in_bounds, Some(false));
        assert_eq!(dead.alive, Some(false));
        assert_eq!(dead.slot, None);
        assert!(!dead.is_valid());
        assert_eq!(rt.metrics().checks, 0);

        let spatial = Runtime::<Spatial>::new(RuntimeConfig::compact()).expect("runtime");
        let report = spatial.introspect(0x10, &Metadata::bounds(0, 0x20), None);
        assert_eq!((report.alive, report.lock_holds), (None, None));
        assert_eq!(report.mode, "spatial");
    }
}
