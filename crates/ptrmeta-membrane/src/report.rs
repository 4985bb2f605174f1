//! Violation reporting.
//!
//! The embedding layer hands every [`Violation`] to [`raise`], which acts on
//! the configured [`ViolationPolicy`]:
//! - `Abort`: banner, violation, executable and backtrace to stderr, then
//!   exit with [`exit_code`]
//! - `Continue`: a one-line `FATAL:` message, counted
//! - `Silent`: counted only

use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::OnceLock;

use crate::config::{ViolationPolicy, violation_policy};
use crate::metrics::global_metrics;
use crate::violation::Violation;

/// Exit status used when `PTRMETA_EXIT_CODE` is unset or invalid.
pub const DEFAULT_EXIT_CODE: i32 = 73;

const BANNER: &str = "=================== ptrmeta: memory safety violation ===================";

static EXIT_CODE: OnceLock<i32> = OnceLock::new();

/// Exit status for fatal violations (reads env var on first call, caches thereafter).
#[must_use]
pub fn exit_code() -> i32 {
    *EXIT_CODE.get_or_init(|| parse_exit_code(std::env::var("PTRMETA_EXIT_CODE").ok().as_deref()))
}

fn parse_exit_code(raw: Option<&str>) -> i32 {
    raw.and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_EXIT_CODE)
}

/// Full diagnostic text for a fatal violation.
#[must_use]
pub fn render_report(violation: &Violation, executable: &str, backtrace: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out, "kind:       {}", violation.kind().as_str());
    let _ = writeln!(out, "violation:  {violation}");
    let _ = writeln!(out, "executable: {executable}");
    let _ = writeln!(out, "backtrace:");
    for line in backtrace.lines() {
        let _ = writeln!(out, "  {line}");
    }
    let _ = writeln!(out, "{}", "=".repeat(BANNER.len()));
    out
}

/// One-line message used under the `Continue` policy.
#[must_use]
pub fn render_line(violation: &Violation) -> String {
    format!("FATAL: ({}) {violation}", violation.kind().as_str())
}

fn executable_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "<unknown>".to_string())
}

/// Act on `violation` according to the process-wide policy.
///
/// Returns only if the policy is not fatal.
pub fn raise(violation: &Violation) {
    raise_with(violation, violation_policy());
}

/// Act on `violation` according to `policy`.
pub fn raise_with(violation: &Violation, policy: ViolationPolicy) {
    match policy {
        ViolationPolicy::Abort => {
            let backtrace = Backtrace::force_capture().to_string();
            let report = render_report(violation, &executable_name(), &backtrace);
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.write_all(report.as_bytes());
            let _ = stderr.flush();
            std::process::exit(exit_code());
        }
        ViolationPolicy::Continue => {
            log::warn!("{violation}");
            eprintln!("{}", render_line(violation));
            global_metrics().record_suppressed(violation.kind());
        }
        ViolationPolicy::Silent => {
            global_metrics().record_suppressed(violation.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RuntimeMetrics;
    use crate::violation::Resource;

    #[test]
    fn exit_code_parsing() {
        assert_eq!(parse_exit_code(None), DEFAULT_EXIT_CODE);
        assert_eq!(parse_exit_code(Some("12")), 12);
        assert_eq!(parse_exit_code(Some(" 3 ")), 3);
        assert_eq!(parse_exit_code(Some("nope")), DEFAULT_EXIT_CODE);
    }

    #[test]
    fn report_contains_violation_and_backtrace() {
        let v = Violation::OutOfBounds {
            ptr: 0x1008,
            base: 0x1000,
            bound: 0x1008,
            width: 1,
        };
        let text = render_report(&v, "demo", "0: frame_a\n1: frame_b");
        assert!(text.starts_with(BANNER));
        assert!(text.contains("kind:       spatial"));
        assert!(text.contains("ptr=0x1008"));
        assert!(text.contains("executable: demo"));
        assert!(text.contains("  1: frame_b"));
    }

    #[test]
    fn one_line_message() {
        let v = Violation::Exhausted(Resource::LockArena);
        assert_eq!(render_line(&v), "FATAL: (resource) lock arena exhausted");
    }

    #[test]
    fn silent_policy_only_counts() {
        let before = RuntimeMetrics::get(&global_metrics().resource_violations);
        raise_with(
            &Violation::Exhausted(Resource::FreeMap),
            ViolationPolicy::Silent,
        );
        let after = RuntimeMetrics::get(&global_metrics().resource_violations);
        assert!(after > before);
    }
}
