//! ABI layer for dereference, call and bulk-operation checks.
//!
//! A failing check is reported through the configured violation policy and
//! returns normally only when that policy is non-fatal.

use std::ffi::{c_int, c_void};

use ptrmeta_membrane::check::shrink_bounds;

use crate::state::{read_runtime, with_runtime};
use crate::util::{addr, as_ptr, metadata, write_out};

// ---------------------------------------------------------------------------
// spatial
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_spatial_load_dereference_check(
    base: *const c_void,
    bound: *const c_void,
    ptr: *const c_void,
    size_of_type: usize,
) {
    with_runtime(|rt| rt.check_spatial(addr(ptr), size_of_type, addr(base), addr(bound)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_spatial_store_dereference_check(
    base: *const c_void,
    bound: *const c_void,
    ptr: *const c_void,
    size_of_type: usize,
) {
    with_runtime(|rt| rt.check_spatial(addr(ptr), size_of_type, addr(base), addr(bound)));
}

/// A function pointer is valid only with `base == bound == ptr`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_spatial_call_dereference_check(
    base: *const c_void,
    bound: *const c_void,
    ptr: *const c_void,
) {
    let meta = metadata(base, bound, 0, std::ptr::null());
    with_runtime(|rt| rt.check_call(addr(ptr), &meta));
}

// ---------------------------------------------------------------------------
// temporal
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_temporal_load_dereference_check(lock: *const c_void, key: u64) {
    with_runtime(|rt| rt.check_temporal(key, addr(lock)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_temporal_store_dereference_check(lock: *const c_void, key: u64) {
    with_runtime(|rt| rt.check_temporal(key, addr(lock)));
}

// ---------------------------------------------------------------------------
// bulk operations
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn __ptrmeta_memcopy_check(
    dest: *const c_void,
    src: *const c_void,
    size: usize,
    dest_base: *const c_void,
    dest_bound: *const c_void,
    src_base: *const c_void,
    src_bound: *const c_void,
    dest_key: u64,
    dest_lock: *const c_void,
    src_key: u64,
    src_lock: *const c_void,
) {
    let dest_meta = metadata(dest_base, dest_bound, dest_key, dest_lock);
    let src_meta = metadata(src_base, src_bound, src_key, src_lock);
    with_runtime(|rt| rt.memcopy_check(addr(dest), addr(src), size, &dest_meta, &src_meta));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_memset_check(
    dest: *const c_void,
    size: usize,
    dest_base: *const c_void,
    dest_bound: *const c_void,
    dest_key: u64,
    dest_lock: *const c_void,
) {
    let meta = metadata(dest_base, dest_bound, dest_key, dest_lock);
    with_runtime(|rt| rt.memset_check(addr(dest), size, &meta));
}

/// Intersect `[new_base, new_bound)` with `[old_base, old_bound)`.
///
/// # Safety
///
/// `base_out` and `bound_out` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_shrink_bounds(
    new_base: *const c_void,
    new_bound: *const c_void,
    old_base: *const c_void,
    old_bound: *const c_void,
    base_out: *mut *mut c_void,
    bound_out: *mut *mut c_void,
) {
    let (base, bound) = shrink_bounds(
        (addr(new_base), addr(new_bound)),
        (addr(old_base), addr(old_bound)),
    );
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(base_out, as_ptr(base));
        write_out(bound_out, as_ptr(bound));
    }
}

// ---------------------------------------------------------------------------
// introspection
// ---------------------------------------------------------------------------

/// Log what the runtime knows about `ptr` under the given metadata, plus
/// slot `arg_no` of the current frame when `arg_no` is not negative.
/// Returns 1 when a dereference of `ptr` would pass its checks.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_introspect_metadata(
    ptr: *const c_void,
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
    arg_no: c_int,
) -> c_int {
    let meta = metadata(base, bound, key, lock);
    let slot = usize::try_from(arg_no).ok();
    let valid = read_runtime(|rt| {
        let report = rt.introspect(addr(ptr), &meta, slot);
        log::info!("ptrmeta introspect: {report:?}");
        report.is_valid()
    });
    c_int::from(valid)
}
