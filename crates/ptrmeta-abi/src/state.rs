//! Global runtime for the ABI layer.
//!
//! Holds the singleton [`Runtime`] used by every `__ptrmeta_*` entry point,
//! so that metadata stored by one call is visible to checks made by another.
//!
//! Uses a manual atomic init state machine instead of `OnceLock` so that a
//! reentrant call made while the runtime is being built (e.g. from a logger
//! or allocator hook) falls through instead of deadlocking.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

use parking_lot::Mutex;
use ptrmeta_membrane::metrics::global_metrics;
use ptrmeta_membrane::{
    InitError, Runtime, RuntimeConfig, RuntimeMetrics, Violation, ViolationPolicy, report,
};

use crate::Mode;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

static RUNTIME_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static RUNTIME_PTR: AtomicPtr<Mutex<Runtime<Mode>>> = AtomicPtr::new(std::ptr::null_mut());
static SKIP_WARNED: AtomicBool = AtomicBool::new(false);

fn init_logging() {
    let env = env_logger::Env::new()
        .filter("PTRMETA_LOG")
        .write_style("PTRMETA_LOG_STYLE");
    // Another logger may already be installed by the host program.
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn build_runtime() -> Mutex<Runtime<Mode>> {
    match Runtime::new(RuntimeConfig::default()) {
        Ok(runtime) => Mutex::new(runtime),
        Err(err) => {
            // Without tables there is nothing to continue with, whatever the policy.
            if let InitError::Reservation(violation) = &err {
                report::raise_with(violation, ViolationPolicy::Abort);
            }
            eprintln!("ptrmeta: {err}");
            std::process::exit(report::exit_code())
        }
    }
}

/// Global runtime instance.
///
/// Returns `None` during initialization (reentrant guard).
pub fn try_global_runtime() -> Option<&'static Mutex<Runtime<Mode>>> {
    let state = RUNTIME_STATE.load(Ordering::Acquire);

    if state == STATE_READY {
        // SAFETY: once READY, RUNTIME_PTR is valid and never changes.
        let ptr = RUNTIME_PTR.load(Ordering::Acquire);
        return Some(unsafe { &*ptr });
    }

    if state == STATE_INITIALIZING {
        return None;
    }

    if RUNTIME_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return if RUNTIME_STATE.load(Ordering::Acquire) == STATE_READY {
            let ptr = RUNTIME_PTR.load(Ordering::Acquire);
            Some(unsafe { &*ptr })
        } else {
            None
        };
    }

    init_logging();
    // Leaked: the runtime lives until process exit.
    let ptr = Box::into_raw(Box::new(build_runtime()));
    RUNTIME_PTR.store(ptr, Ordering::Release);
    RUNTIME_STATE.store(STATE_READY, Ordering::Release);
    log::debug!("ptrmeta runtime initialised");

    Some(unsafe { &*ptr })
}

/// Account for an entry point that found no runtime to run against.
///
/// Counted in `skipped_during_init`; the first occurrence is also logged.
fn skipped<R: Default>() -> R {
    RuntimeMetrics::inc(&global_metrics().skipped_during_init);
    if !SKIP_WARNED.swap(true, Ordering::Relaxed) {
        log::warn!("ptrmeta: entry point called while the runtime is initialising; check skipped");
    }
    R::default()
}

/// Run `op` against the global runtime.
///
/// A violation is reported according to the configured policy; if that
/// policy lets execution continue, `R::default()` is returned. The runtime
/// lock is released before reporting.
pub(crate) fn with_runtime<R: Default>(
    op: impl FnOnce(&mut Runtime<Mode>) -> Result<R, Violation>,
) -> R {
    let Some(runtime) = try_global_runtime() else {
        return skipped();
    };
    let result = op(&mut runtime.lock());
    match result {
        Ok(value) => value,
        Err(violation) => {
            report::raise(&violation);
            R::default()
        }
    }
}

/// Run an infallible read against the global runtime.
pub(crate) fn read_runtime<R: Default>(op: impl FnOnce(&Runtime<Mode>) -> R) -> R {
    try_global_runtime().map_or_else(skipped, |runtime| op(&runtime.lock()))
}
