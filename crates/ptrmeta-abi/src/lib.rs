//! # ptrmeta-abi
//!
//! `extern "C"` boundary consumed by instrumented programs.
//!
//! This crate produces a `cdylib` (`libptrmeta.so`) exporting the
//! `__ptrmeta_*` entry points a memory-safety instrumentation pass emits
//! calls to. Every entry point forwards to the single process-wide
//! [`Runtime`](ptrmeta_membrane::Runtime) owned by [`state`]; violations
//! are handed to the membrane's reporting path, which terminates the
//! process unless a non-fatal policy is configured.
//!
//! # Architecture
//!
//! ```text
//! instrumented code -> ABI entry (this crate) -> Runtime<Mode> -> report on violation
//! ```
//!
//! All pointer-metadata entry points take the full `(base, bound, key, lock)`
//! set regardless of mode; fields the mode does not carry are ignored on
//! input and read back as zero.

#[cfg(not(any(
    all(feature = "spatial", not(feature = "temporal"), not(feature = "spatial-temporal")),
    all(not(feature = "spatial"), feature = "temporal", not(feature = "spatial-temporal")),
    all(not(feature = "spatial"), not(feature = "temporal"), feature = "spatial-temporal"),
)))]
compile_error!(
    "enable exactly one of the features `spatial`, `temporal`, `spatial-temporal` \
     (use --no-default-features to replace the default)"
);

/// Entry layout selected at build time.
#[cfg(feature = "spatial")]
pub type Mode = ptrmeta_membrane::Spatial;
#[cfg(feature = "temporal")]
pub type Mode = ptrmeta_membrane::Temporal;
#[cfg(feature = "spatial-temporal")]
pub type Mode = ptrmeta_membrane::SpatialTemporal;

pub mod state;

pub mod check_abi;
pub mod environment_abi;
pub mod malloc_abi;
pub mod shadow_stack_abi;
pub mod temporal_abi;
pub mod trie_abi;
pub mod va_arg_abi;

mod util;
