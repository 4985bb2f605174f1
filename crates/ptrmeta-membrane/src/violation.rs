//! Detected violations.
//!
//! Every runtime operation returns `Result<_, Violation>`. Nothing in this
//! crate terminates the process; the embedding layer decides what to do with
//! an error (see [`report`](crate::report)).

use serde::Serialize;
use thiserror::Error;

use crate::layout::{Key, Lock};

/// Fixed-capacity structure that ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Resource {
    PrimaryTable,
    SecondaryTable,
    ShadowStack,
    LockArena,
    StackLockArena,
    FreeMap,
    VaArgProxies,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PrimaryTable => "primary table",
            Self::SecondaryTable => "secondary table",
            Self::ShadowStack => "shadow stack",
            Self::LockArena => "lock arena",
            Self::StackLockArena => "stack lock arena",
            Self::FreeMap => "free map",
            Self::VaArgProxies => "va_arg proxy table",
        };
        f.write_str(name)
    }
}

/// Coarse classification used for reporting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViolationKind {
    Spatial,
    Temporal,
    Resource,
    Protocol,
}

impl ViolationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spatial => "spatial",
            Self::Temporal => "temporal",
            Self::Resource => "resource",
            Self::Protocol => "protocol",
        }
    }
}

/// A memory-safety or runtime-protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error(
        "out-of-bounds access: ptr={ptr:#x} width={width} outside [{base:#x}, {bound:#x})"
    )]
    OutOfBounds {
        ptr: usize,
        base: usize,
        bound: usize,
        width: usize,
    },

    #[error("invalid call target: ptr={ptr:#x} base={base:#x} bound={bound:#x}")]
    InvalidCallTarget { ptr: usize, base: usize, bound: usize },

    #[error("use after free: key={key} lock={lock:#x} holds {observed}")]
    KeyMismatch { key: Key, lock: Lock, observed: u64 },

    #[error("lock {lock:#x} (key={key}) is not a lock cell")]
    UnknownLock { key: Key, lock: Lock },

    #[error("{0} exhausted")]
    Exhausted(Resource),

    #[error("free of untracked pointer {ptr:#x} (key={key}): double free or invalid free")]
    InvalidFree { ptr: usize, key: Key },

    #[error("shadow stack underflow: no frame to pop")]
    ShadowStackUnderflow,

    #[error("shadow stack slot {slot} outside the current frame of {slots} slots")]
    SlotOutsideFrame { slot: usize, slots: usize },

    #[error("stack lock released out of order: releasing key {key}, top holds {observed}")]
    StackLockOrder { key: Key, observed: u64 },

    #[error("address {addr:#x} is outside the trackable range")]
    UntrackableAddress { addr: usize },

    #[error("{proxy:#x} is not a live va_arg proxy")]
    UnknownVaArgProxy { proxy: usize },

    #[error("va_arg proxy {proxy:#x} read past the pointer arguments of its frame")]
    VaArgPastFrame { proxy: usize },
}

impl Violation {
    #[must_use]
    pub const fn kind(&self) -> ViolationKind {
        match self {
            Self::OutOfBounds { .. } | Self::InvalidCallTarget { .. } => ViolationKind::Spatial,
            Self::KeyMismatch { .. } | Self::UnknownLock { .. } => ViolationKind::Temporal,
            Self::Exhausted(_) => ViolationKind::Resource,
            Self::InvalidFree { .. }
            | Self::ShadowStackUnderflow
            | Self::SlotOutsideFrame { .. }
            | Self::StackLockOrder { .. }
            | Self::UntrackableAddress { .. }
            | Self::UnknownVaArgProxy { .. }
            | Self::VaArgPastFrame { .. } => ViolationKind::Protocol,
        }
    }
}
