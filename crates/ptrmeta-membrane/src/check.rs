//! Spatial checks.
//!
//! Pure functions over bounds; the temporal half lives on
//! [`TemporalAllocator::check`](crate::temporal::TemporalAllocator::check)
//! because it needs the lock arenas.

use crate::config::RuntimeConfig;
use crate::violation::Violation;

/// Leniency switches shared by all checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckPolicy {
    /// A null base (spatial) or null lock (temporal) passes.
    pub ignore_missing_metadata: bool,
    /// Zero-byte accesses pass the spatial check.
    pub allow_zero_width_access: bool,
}

impl CheckPolicy {
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            ignore_missing_metadata: config.ignore_missing_metadata,
            allow_zero_width_access: config.allow_zero_width_access,
        }
    }
}

/// An access of `width` bytes at `ptr` must lie inside `[base, bound)`.
#[inline]
pub fn spatial_check(
    ptr: usize,
    width: usize,
    base: usize,
    bound: usize,
    policy: CheckPolicy,
) -> Result<(), Violation> {
    let in_bounds = ptr >= base && ptr.checked_add(width).is_some_and(|end| end <= bound);
    if in_bounds
        || (policy.ignore_missing_metadata && base == 0)
        || (policy.allow_zero_width_access && width == 0)
    {
        return Ok(());
    }
    Err(Violation::OutOfBounds {
        ptr,
        base,
        bound,
        width,
    })
}

/// A function pointer is only callable through metadata created for exactly
/// that function: `base == bound == ptr`.
#[inline]
pub fn call_check(ptr: usize, base: usize, bound: usize, policy: CheckPolicy) -> Result<(), Violation> {
    if (base == bound && ptr == base) || (policy.ignore_missing_metadata && base == 0) {
        return Ok(());
    }
    Err(Violation::InvalidCallTarget { ptr, base, bound })
}

/// Intersection of two bound pairs.
#[must_use]
pub fn shrink_bounds(new: (usize, usize), old: (usize, usize)) -> (usize, usize) {
    (new.0.max(old.0), new.1.min(old.1))
}
