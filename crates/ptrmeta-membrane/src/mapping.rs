//! Fixed-capacity tables backed by anonymous private mappings.
//!
//! Every large structure in the runtime (primary table, secondary tables,
//! lock arenas, free map, shadow stack) is reserved once with
//! `MAP_NORESERVE`, so physical memory only grows with the pages that are
//! actually touched. The kernel hands out zero-filled pages, which is why
//! element types must be [`Zeroable`]: a fresh table reads as all-zero
//! without an explicit initialisation pass.

#![allow(unsafe_code)]

use std::io;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use bytemuck::Zeroable;

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE;

/// A zero-initialised, fixed-length array living in its own mapping.
pub struct MappedTable<T: Zeroable + Copy> {
    ptr: NonNull<T>,
    len: usize,
    _owns: PhantomData<T>,
}

// SAFETY: the mapping is exclusively owned by this value; moving it to another
// thread moves sole access with it.
unsafe impl<T: Zeroable + Copy + Send> Send for MappedTable<T> {}

impl<T: Zeroable + Copy> MappedTable<T> {
    /// Reserve `len` zeroed elements.
    ///
    /// Fails with the OS error if the reservation is refused, and with
    /// `InvalidInput` for a zero length or a byte size that overflows.
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to map an empty table",
            ));
        }
        let bytes = len.checked_mul(size_of::<T>()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "table size overflows usize")
        })?;

        // SAFETY: anonymous mapping with no fd and no fixed address; the
        // result is checked against MAP_FAILED before use.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(raw.cast::<T>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(Self {
            ptr,
            len,
            _owns: PhantomData,
        })
    }

    /// Address of the first element.
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Returns the element index backing `addr` if `addr` is an element-aligned
    /// address inside this table.
    #[must_use]
    pub fn index_of(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base_addr())?;
        if offset % size_of::<T>() != 0 {
            return None;
        }
        let idx = offset / size_of::<T>();
        (idx < self.len).then_some(idx)
    }

    /// Address of element `idx`.
    #[must_use]
    pub fn addr_of(&self, idx: usize) -> usize {
        debug_assert!(idx < self.len);
        self.base_addr() + idx * size_of::<T>()
    }
}

impl<T: Zeroable + Copy> Deref for MappedTable<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: `ptr` covers `len` initialised (zero or written) elements for
        // as long as `self` is alive; T: Zeroable makes the zero pages valid.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Zeroable + Copy> DerefMut for MappedTable<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as in `deref`; `&mut self` guarantees unique access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Zeroable + Copy> Drop for MappedTable<T> {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in `new` with exactly this length and
        // is released once. A failing munmap leaves nothing to recover.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len * size_of::<T>());
        }
    }
}

impl<T: Zeroable + Copy> std::fmt::Debug for MappedTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedTable")
            .field("base", &format_args!("{:#x}", self.base_addr()))
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_reads_zero() {
        let table = MappedTable::<u64>::new(1 << 20).expect("map 8MB");
        assert_eq!(table.len(), 1 << 20);
        assert_eq!(table[0], 0);
        assert_eq!(table[(1 << 20) - 1], 0);
    }

    #[test]
    fn writes_are_visible() {
        let mut table = MappedTable::<u64>::new(16).expect("map");
        table[3] = 0xDEAD;
        assert_eq!(table[3], 0xDEAD);
        assert!(table.iter().enumerate().all(|(i, &v)| i == 3 || v == 0));
    }

    #[test]
    fn empty_table_rejected() {
        let err = MappedTable::<u64>::new(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn overflowing_size_rejected() {
        let err = MappedTable::<u64>::new(usize::MAX).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn index_of_maps_addresses_back_to_elements() {
        let table = MappedTable::<u64>::new(8).expect("map");
        let base = table.base_addr();
        assert_eq!(table.index_of(base), Some(0));
        assert_eq!(table.index_of(base + 8 * 7), Some(7));
        assert_eq!(table.index_of(base + 8 * 8), None);
        assert_eq!(table.index_of(base + 4), None);
        assert_eq!(table.index_of(base.wrapping_sub(8)), None);
        assert_eq!(table.addr_of(2), base + 16);
    }
}
