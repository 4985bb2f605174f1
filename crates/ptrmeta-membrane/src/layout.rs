//! Per-mode metadata layouts.
//!
//! The safety mode is chosen at build time by picking one of three entry
//! layouts. Each layout is a `#[repr(C)]` plain-old-data struct holding only
//! the fields its mode needs, so a trie entry or shadow-stack slot is exactly
//! as wide as the configured mode requires.
//!
//! All layouts convert to and from [`Metadata`], a uniform four-field view
//! used at the API boundary. Fields a layout does not carry read as zero.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

const _: () = assert!(
    size_of::<usize>() == 8,
    "the runtime tracks metadata at 8-byte granularity and requires 64-bit pointers"
);

/// Allocation identity. Zero never identifies a live object.
pub type Key = u64;

/// Address of a lock cell. Zero means "no lock".
pub type Lock = usize;

/// Key paired with the global lock: objects that are never deallocated.
pub const GLOBAL_KEY: Key = 1;

/// First key handed out to tracked heap and stack objects.
pub const FIRST_KEY: Key = 2;

/// Upper bound used for wide ("unknown provenance") metadata.
pub const WIDE_UPPER: usize = usize::MAX >> 1;

/// Mode-independent view of one pointer's metadata.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Metadata {
    /// Lowest valid address.
    pub base: usize,
    /// One past the highest valid address.
    pub bound: usize,
    /// Allocation key captured when the pointer was created.
    pub key: Key,
    /// Lock cell whose content must equal `key` while the object lives.
    pub lock: Lock,
}

impl Metadata {
    /// All-zero metadata: nothing is known about the pointer.
    pub const UNKNOWN: Self = Self {
        base: 0,
        bound: 0,
        key: 0,
        lock: 0,
    };

    /// Spatial-only metadata.
    #[must_use]
    pub const fn bounds(base: usize, bound: usize) -> Self {
        Self {
            base,
            bound,
            key: 0,
            lock: 0,
        }
    }

    /// Full metadata.
    #[must_use]
    pub const fn new(base: usize, bound: usize, key: Key, lock: Lock) -> Self {
        Self {
            base,
            bound,
            key,
            lock,
        }
    }

    /// Metadata that permits every access through `global_lock`.
    #[must_use]
    pub const fn wide(global_lock: Lock) -> Self {
        Self {
            base: 0,
            bound: WIDE_UPPER,
            key: GLOBAL_KEY,
            lock: global_lock,
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

/// Entry layout of one safety mode.
pub trait MetadataLayout: Pod + Default + PartialEq + std::fmt::Debug + Send + 'static {
    /// Mode carries base/bound.
    const SPATIAL: bool;
    /// Mode carries key/lock.
    const TEMPORAL: bool;
    /// Number of machine words one entry occupies.
    const FIELDS: usize = size_of::<Self>() / size_of::<usize>();
    /// Human-readable mode name.
    const NAME: &'static str;

    fn from_metadata(meta: &Metadata) -> Self;

    fn to_metadata(&self) -> Metadata;

    /// Entry carrying `word` in its first field and zero elsewhere. Handles
    /// such as `va_list` proxies travel through trie entries and
    /// shadow-stack slots this way.
    fn from_word(word: usize) -> Self {
        let mut entry = Self::zeroed();
        bytemuck::cast_slice_mut::<Self, usize>(std::slice::from_mut(&mut entry))[0] = word;
        entry
    }

    fn first_word(&self) -> usize {
        bytemuck::cast_slice::<Self, usize>(std::slice::from_ref(self))[0]
    }
}

/// Spatial safety: `[base, bound)` only.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Spatial {
    pub base: usize,
    pub bound: usize,
}

/// Temporal safety: key and lock only.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Temporal {
    pub key: Key,
    pub lock: Lock,
}

/// Full safety: bounds plus key and lock.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SpatialTemporal {
    pub base: usize,
    pub bound: usize,
    pub key: Key,
    pub lock: Lock,
}

impl MetadataLayout for Spatial {
    const SPATIAL: bool = true;
    const TEMPORAL: bool = false;
    const NAME: &'static str = "spatial";

    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            base: meta.base,
            bound: meta.bound,
        }
    }

    fn to_metadata(&self) -> Metadata {
        Metadata::bounds(self.base, self.bound)
    }
}

impl MetadataLayout for Temporal {
    const SPATIAL: bool = false;
    const TEMPORAL: bool = true;
    const NAME: &'static str = "temporal";

    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            key: meta.key,
            lock: meta.lock,
        }
    }

    fn to_metadata(&self) -> Metadata {
        Metadata::new(0, 0, self.key, self.lock)
    }
}

impl MetadataLayout for SpatialTemporal {
    const SPATIAL: bool = true;
    const TEMPORAL: bool = true;
    const NAME: &'static str = "spatial+temporal";

    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            base: meta.base,
            bound: meta.bound,
            key: meta.key,
            lock: meta.lock,
        }
    }

    fn to_metadata(&self) -> Metadata {
        Metadata::new(self.base, self.bound, self.key, self.lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_widths_match_mode() {
        assert_eq!(Spatial::FIELDS, 2);
        assert_eq!(Temporal::FIELDS, 2);
        assert_eq!(SpatialTemporal::FIELDS, 4);
        assert_eq!(size_of::<SpatialTemporal>(), 32);
    }

    #[test]
    fn zeroed_entries_are_unknown() {
        assert!(Spatial::zeroed().to_metadata().is_unknown());
        assert!(Temporal::zeroed().to_metadata().is_unknown());
        assert!(SpatialTemporal::zeroed().to_metadata().is_unknown());
    }

    #[test]
    fn layouts_drop_fields_they_do_not_carry() {
        let meta = Metadata::new(0x1000, 0x1010, 7, 0x5000);
        assert_eq!(
            Spatial::from_metadata(&meta).to_metadata(),
            Metadata::bounds(0x1000, 0x1010)
        );
        assert_eq!(
            Temporal::from_metadata(&meta).to_metadata(),
            Metadata::new(0, 0, 7, 0x5000)
        );
        assert_eq!(SpatialTemporal::from_metadata(&meta).to_metadata(), meta);
    }

    #[test]
    fn word_entries_fill_the_first_field() {
        assert_eq!(Spatial::from_word(7), Spatial { base: 7, bound: 0 });
        assert_eq!(Temporal::from_word(7), Temporal { key: 7, lock: 0 });
        let entry = SpatialTemporal::from_word(0x40);
        assert_eq!(entry.first_word(), 0x40);
        assert_eq!((entry.bound, entry.key, entry.lock), (0, 0, 0));
    }

    #[test]
    fn wide_metadata_uses_global_key() {
        let wide = Metadata::wide(0xABC0);
        assert_eq!(wide.base, 0);
        assert_eq!(wide.bound, WIDE_UPPER);
        assert_eq!(wide.key, GLOBAL_KEY);
        assert_eq!(wide.lock, 0xABC0);
    }
}
