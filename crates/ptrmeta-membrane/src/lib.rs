//! Pointer-metadata runtime for compiler-inserted memory-safety checks.
//!
//! Instrumented code calls into this crate at every pointer-producing
//! allocation, pointer load/store, call boundary and dereference. The
//! runtime keeps per-pointer metadata (bounds and/or an allocation key and
//! lock) and validates accesses against it.
//!
//! # Architecture
//!
//! - **Layouts** (`layout`): per-mode entry structs, chosen at build time
//! - **Mapped tables** (`mapping`): zero-filled fixed arrays over anonymous mappings
//! - **Metadata trie** (`trie`): two-level address → metadata map
//! - **Propagation** (`propagate`): moves trie entries along with copied bytes
//! - **Temporal allocator** (`temporal`): keys, lock cells, stack locks
//! - **Free map** (`free_map`): double-free / invalid-free detection
//! - **Shadow stack** (`shadow_stack`): metadata for arguments and return values
//! - **Variadic proxies** (`va_arg`): cursors over variadic pointer arguments
//! - **Checks** (`check`): spatial and call-target checks
//! - **Runtime** (`runtime`): composes all of the above into one context
//! - **Configuration** (`config`), **violations** (`violation`),
//!   **reporting** (`report`), **metrics** (`metrics`)

#![deny(unsafe_code)]

pub mod check;
pub mod config;
pub mod free_map;
pub mod layout;
pub mod mapping;
pub mod metrics;
pub mod propagate;
pub mod report;
pub mod runtime;
pub mod shadow_stack;
pub mod temporal;
pub mod trie;
pub mod va_arg;
pub mod violation;

pub use config::{RuntimeConfig, StackLockPolicy, TriePolicy, ViolationPolicy};
pub use layout::{Key, Lock, Metadata, MetadataLayout, Spatial, SpatialTemporal, Temporal};
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use runtime::{InitError, Introspection, Runtime};
pub use violation::{Resource, Violation, ViolationKind};
