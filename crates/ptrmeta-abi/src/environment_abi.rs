//! ABI layer for the program's startup vectors.
//!
//! `argv` and `environ` are built by the loader, so no instrumented store
//! ever records their metadata. The startup code registers them once; the
//! environment wrappers register `environ` again after every change, since
//! libc may move the vector or add strings to it.

use std::ffi::{c_char, c_int, c_void};

use crate::state::with_runtime;
use crate::util::{as_ptr, write_out};

unsafe extern "C" {
    static environ: *const *const c_char;
}

/// Address and length of every string in a null-terminated vector, reading
/// at most `limit` entries.
///
/// # Safety
///
/// `vector` must be null or point to an array of C strings terminated by a
/// null entry or holding at least `limit` entries.
unsafe fn strings_of(vector: *const *const c_char, limit: usize) -> Vec<(usize, usize)> {
    let mut strings = Vec::new();
    if vector.is_null() {
        return strings;
    }
    for i in 0..limit {
        // SAFETY: `i` is below the terminator or `limit`.
        let string = unsafe { *vector.add(i) };
        if string.is_null() {
            break;
        }
        // SAFETY: every entry before the terminator is a C string.
        strings.push((string as usize, unsafe { libc::strlen(string) }));
    }
    strings
}

/// Register bounds for every string in `environ`, and for the vector itself
/// at the address of `environ`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_update_environment_metadata() {
    // SAFETY: reads the pointer libc maintains; environment changes are not
    // synchronised by libc either.
    let (holder, vector) = unsafe { (&raw const environ as usize, environ) };
    if vector.is_null() {
        return;
    }
    // SAFETY: libc keeps `environ` null-terminated.
    let strings = unsafe { strings_of(vector, usize::MAX) };
    with_runtime(|rt| {
        let meta = rt.register_string_vector(vector as usize, &strings)?;
        rt.metadata_store(holder, &meta)
    });
}

/// Register bounds for `argv` and its `argc` strings, and write the metadata
/// of `argv` itself. Null output pointers are skipped.
///
/// # Safety
///
/// `argv` must hold `argc` C strings followed by a null entry. Every
/// non-null output pointer must be valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_update_argv_metadata(
    argc: c_int,
    argv: *const *const c_char,
    base_out: *mut *mut c_void,
    bound_out: *mut *mut c_void,
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
) {
    let count = usize::try_from(argc).unwrap_or(0);
    // SAFETY: forwarded caller contract.
    let strings = unsafe { strings_of(argv, count) };
    let meta = with_runtime(|rt| rt.register_string_vector(argv as usize, &strings));
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(base_out, as_ptr(meta.base));
        write_out(bound_out, as_ptr(meta.bound));
        write_out(key_out, meta.key);
        write_out(lock_out, as_ptr(meta.lock));
    }
}

// ---------------------------------------------------------------------------
// environment wrappers
// ---------------------------------------------------------------------------

/// # Safety
///
/// Same contract as `setenv(3)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_setenv(
    name: *const c_char,
    value: *const c_char,
    overwrite: c_int,
) -> c_int {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::setenv(name, value, overwrite) };
    __ptrmeta_update_environment_metadata();
    ret
}

/// # Safety
///
/// Same contract as `unsetenv(3)`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_unsetenv(name: *const c_char) -> c_int {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::unsetenv(name) };
    __ptrmeta_update_environment_metadata();
    ret
}

/// # Safety
///
/// Same contract as `putenv(3)`: `string` becomes part of the environment.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_putenv(string: *mut c_char) -> c_int {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::putenv(string) };
    __ptrmeta_update_environment_metadata();
    ret
}
