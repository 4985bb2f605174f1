//! ABI layer for the metadata trie: pointer stores/loads, block copies and
//! secondary-table pre-allocation.

use std::ffi::{c_int, c_void};

use crate::state::{read_runtime, with_runtime};
use crate::util::{addr, as_ptr, metadata, slot_index, write_out};

/// Initialise the runtime ahead of the first instrumented call.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_init() {
    let _ = crate::state::try_global_runtime();
}

// ---------------------------------------------------------------------------
// metadata store / load
// ---------------------------------------------------------------------------

/// Record the metadata of the pointer stored at `addr_of_ptr`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_store(
    addr_of_ptr: *const c_void,
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
) {
    let meta = metadata(base, bound, key, lock);
    with_runtime(|rt| rt.metadata_store(addr(addr_of_ptr), &meta));
}

/// Read the metadata of the pointer stored at `addr_of_ptr`. Null output
/// pointers are skipped.
///
/// # Safety
///
/// Every non-null output pointer must be valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_metadata_load(
    addr_of_ptr: *const c_void,
    base_out: *mut *mut c_void,
    bound_out: *mut *mut c_void,
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
) {
    let meta = read_runtime(|rt| rt.metadata_load(addr(addr_of_ptr)));
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(base_out, as_ptr(meta.base));
        write_out(bound_out, as_ptr(meta.bound));
        write_out(key_out, meta.key);
        write_out(lock_out, as_ptr(meta.lock));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_load_base(addr_of_ptr: *const c_void) -> *mut c_void {
    as_ptr(read_runtime(|rt| rt.metadata_load(addr(addr_of_ptr)).base))
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_load_bound(addr_of_ptr: *const c_void) -> *mut c_void {
    as_ptr(read_runtime(|rt| rt.metadata_load(addr(addr_of_ptr)).bound))
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_load_key(addr_of_ptr: *const c_void) -> u64 {
    read_runtime(|rt| rt.metadata_load(addr(addr_of_ptr)).key)
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_load_lock(addr_of_ptr: *const c_void) -> *mut c_void {
    as_ptr(read_runtime(|rt| rt.metadata_load(addr(addr_of_ptr)).lock))
}

// ---------------------------------------------------------------------------
// pointer vectors
// ---------------------------------------------------------------------------

/// Record the metadata of lane `index` of the pointer vector stored at
/// `addr_of_vector`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_metadata_store_vector(
    addr_of_vector: *const c_void,
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
    index: c_int,
) {
    let meta = metadata(base, bound, key, lock);
    with_runtime(|rt| rt.metadata_store_vector(addr(addr_of_vector), slot_index(index), &meta));
}

/// Read the metadata of lane `index`. Null output pointers are skipped.
///
/// # Safety
///
/// Every non-null output pointer must be valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_metadata_load_vector(
    addr_of_vector: *const c_void,
    base_out: *mut *mut c_void,
    bound_out: *mut *mut c_void,
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
    index: c_int,
) {
    let meta = with_runtime(|rt| rt.metadata_load_vector(addr(addr_of_vector), slot_index(index)));
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(base_out, as_ptr(meta.base));
        write_out(bound_out, as_ptr(meta.bound));
        write_out(key_out, meta.key);
        write_out(lock_out, as_ptr(meta.lock));
    }
}

// ---------------------------------------------------------------------------
// block copies
// ---------------------------------------------------------------------------

/// Move trie entries along with `size` bytes copied from `src` to `dest`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_copy_metadata(dest: *mut c_void, src: *const c_void, size: usize) {
    with_runtime(|rt| rt.copy_metadata(addr(dest), addr(src), size).map(drop));
}

// ---------------------------------------------------------------------------
// pre-allocation
// ---------------------------------------------------------------------------

/// Install the secondary tables around `addr_of_ptr` (eager policy only).
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_allocation_secondary_trie_allocate(addr_of_ptr: *const c_void) {
    with_runtime(|rt| rt.preallocate(addr(addr_of_ptr)));
}

/// Install every secondary table `[start, start + size)` touches (eager policy only).
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_allocation_secondary_trie_allocate_range(
    start: *const c_void,
    size: usize,
) {
    with_runtime(|rt| rt.preallocate_range(addr(start), size));
}
