//! Runtime configuration.
//!
//! Capacities and policies are fixed when a [`Runtime`](crate::Runtime) is
//! created; no table resizes afterwards. Defaults follow the cargo features
//! the crate was built with:
//! - `preallocate-trie`: eager secondary-table installation around allocations
//! - `constant-stack-lock`: all stack objects share the global lock
//! - `ignore-missing-metadata`: null base / null lock passes checks
//! - `continue-on-violation`: report and count instead of terminating
//!
//! The violation policy may additionally be overridden at startup through
//! the `PTRMETA_ON_VIOLATION` environment variable:
//! - `abort`: print diagnostic and backtrace, then exit
//! - `continue`: print a one-line message and keep running
//! - `silent`: only count

use std::sync::OnceLock;

use serde::Serialize;
use thiserror::Error;

/// Bits of address covered by one primary-table slot.
pub const PRIMARY_SHIFT: u32 = 25;
/// Entries in one secondary table (one per 8-byte word of a primary segment).
pub const SECONDARY_ENTRIES: usize = 1 << (PRIMARY_SHIFT - 3);
/// Mask applied to `addr >> 3` to get the secondary index.
pub const SECONDARY_MASK: usize = SECONDARY_ENTRIES - 1;

/// Upper limit on lock arena cells: free-list links are 32-bit indices.
pub const MAX_LOCK_ENTRIES: usize = u32::MAX as usize;

/// When secondary tables are installed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriePolicy {
    /// Install on first store or copy into a segment.
    #[default]
    Lazy,
    /// Additionally install around every heap allocation.
    Eager,
}

/// How stack objects get their lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StackLockPolicy {
    /// A fresh lock cell per call frame, released LIFO on return.
    #[default]
    PerCall,
    /// Every stack object uses key 1 and the global lock. Never invalidated.
    Shared,
}

/// What happens after a violation has been detected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViolationPolicy {
    /// Diagnostic, backtrace, exit.
    #[default]
    Abort,
    /// One-line message, counted, execution continues.
    Continue,
    /// Counted only.
    Silent,
}

impl ViolationPolicy {
    /// Build-time default.
    #[must_use]
    pub const fn build_default() -> Self {
        if cfg!(feature = "continue-on-violation") {
            Self::Continue
        } else {
            Self::Abort
        }
    }

    /// Parse from string (case-insensitive). Unknown input yields the build default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fatal" | "exit" => Self::Abort,
            "continue" | "warn" | "report" => Self::Continue,
            "silent" | "count" | "quiet" => Self::Silent,
            _ => Self::build_default(),
        }
    }

    /// Returns true if detection terminates the process.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Abort)
    }
}

static GLOBAL_POLICY: OnceLock<ViolationPolicy> = OnceLock::new();

/// Get the configured violation policy (reads env var on first call, caches thereafter).
#[must_use]
pub fn violation_policy() -> ViolationPolicy {
    *GLOBAL_POLICY.get_or_init(|| {
        std::env::var("PTRMETA_ON_VIOLATION")
            .map(|v| ViolationPolicy::from_str_loose(&v))
            .unwrap_or_else(|_| ViolationPolicy::build_default())
    })
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be non-zero")]
    ZeroCapacity { field: &'static str },
    #[error("{field} = {value} is below the minimum of {min}")]
    TooSmall {
        field: &'static str,
        value: usize,
        min: usize,
    },
    #[error("{field} = {value} exceeds the limit of {max}")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },
}

/// Capacities and policies for one runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Primary table slots. The default covers 2^48 bytes of address space.
    pub primary_entries: usize,
    /// Shadow stack capacity in machine words.
    pub shadow_stack_words: usize,
    /// Heap lock cells.
    pub lock_entries: usize,
    /// Stack lock cells (per-call policy only).
    pub stack_lock_entries: usize,
    /// Free-map capacity.
    pub free_map_entries: usize,
    /// Live `va_list` proxies.
    pub va_arg_proxies: usize,
    pub trie_policy: TriePolicy,
    pub stack_lock_policy: StackLockPolicy,
    /// Validate deallocations against the free map.
    pub free_map: bool,
    /// A null base or null lock passes the corresponding check.
    pub ignore_missing_metadata: bool,
    /// Zero-byte accesses pass the spatial check regardless of bounds.
    pub allow_zero_width_access: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            primary_entries: 1 << 23,
            shadow_stack_words: 128 * 32,
            lock_entries: 1 << 26,
            stack_lock_entries: 1 << 16,
            free_map_entries: 1 << 25,
            va_arg_proxies: 1 << 10,
            trie_policy: if cfg!(feature = "preallocate-trie") {
                TriePolicy::Eager
            } else {
                TriePolicy::Lazy
            },
            stack_lock_policy: if cfg!(feature = "constant-stack-lock") {
                StackLockPolicy::Shared
            } else {
                StackLockPolicy::PerCall
            },
            free_map: true,
            ignore_missing_metadata: cfg!(feature = "ignore-missing-metadata"),
            allow_zero_width_access: false,
        }
    }
}

impl RuntimeConfig {
    /// Small capacities suited to unit tests and fuzzing.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            primary_entries: 1 << 23,
            shadow_stack_words: 1024,
            lock_entries: 1 << 12,
            stack_lock_entries: 256,
            free_map_entries: 1 << 12,
            va_arg_proxies: 16,
            ..Self::default()
        }
    }

    /// Check every capacity is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("primary_entries", self.primary_entries),
            ("shadow_stack_words", self.shadow_stack_words),
            ("lock_entries", self.lock_entries),
            ("stack_lock_entries", self.stack_lock_entries),
            ("free_map_entries", self.free_map_entries),
            ("va_arg_proxies", self.va_arg_proxies),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity { field });
            }
        }
        for (field, value) in [
            ("lock_entries", self.lock_entries),
            ("stack_lock_entries", self.stack_lock_entries),
        ] {
            if value >= MAX_LOCK_ENTRIES {
                return Err(ConfigError::TooLarge {
                    field,
                    value,
                    max: MAX_LOCK_ENTRIES - 1,
                });
            }
        }
        // Root frame header needs two words.
        if self.shadow_stack_words < 2 {
            return Err(ConfigError::TooSmall {
                field: "shadow_stack_words",
                value: self.shadow_stack_words,
                min: 2,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_violation_policies() {
        assert_eq!(ViolationPolicy::from_str_loose("abort"), ViolationPolicy::Abort);
        assert_eq!(ViolationPolicy::from_str_loose("ABORT"), ViolationPolicy::Abort);
        assert_eq!(
            ViolationPolicy::from_str_loose(" continue "),
            ViolationPolicy::Continue
        );
        assert_eq!(ViolationPolicy::from_str_loose("warn"), ViolationPolicy::Continue);
        assert_eq!(ViolationPolicy::from_str_loose("silent"), ViolationPolicy::Silent);
        assert_eq!(ViolationPolicy::from_str_loose("count"), ViolationPolicy::Silent);
        assert_eq!(
            ViolationPolicy::from_str_loose("bogus"),
            ViolationPolicy::build_default()
        );
    }

    #[test]
    fn only_abort_is_fatal() {
        assert!(ViolationPolicy::Abort.is_fatal());
        assert!(!ViolationPolicy::Continue.is_fatal());
        assert!(!ViolationPolicy::Silent.is_fatal());
    }

    #[test]
    fn geometry_covers_a_primary_segment() {
        assert_eq!(SECONDARY_ENTRIES, 1 << 22);
        assert_eq!(SECONDARY_ENTRIES * 8, 1 << PRIMARY_SHIFT);
        assert_eq!(SECONDARY_MASK, (1 << 22) - 1);
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(RuntimeConfig::default().validate(), Ok(()));
        assert_eq!(RuntimeConfig::compact().validate(), Ok(()));
        assert!(RuntimeConfig::default().free_map);
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = RuntimeConfig {
            free_map_entries: 0,
            ..RuntimeConfig::compact()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroCapacity {
                field: "free_map_entries"
            })
        );
    }

    #[test]
    fn oversized_lock_arena_rejected() {
        let cfg = RuntimeConfig {
            lock_entries: MAX_LOCK_ENTRIES,
            ..RuntimeConfig::compact()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooLarge {
                field: "lock_entries",
                ..
            })
        ));
    }

    #[test]
    fn tiny_shadow_stack_rejected() {
        let cfg = RuntimeConfig {
            shadow_stack_words: 1,
            ..RuntimeConfig::compact()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooSmall { min: 2, .. })
        ));
    }
}
