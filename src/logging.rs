//! Runtime active/no-op logger dispatch keyed on `ADMIN_MODE` (spec §9
//! "Logger dispatch"). When the admin UI renders to stdout, stderr diagnostics
//! must not leak into its terminal rendering — but the choice is a per-call
//! check, not a load-time binding, so code that spawns before the env is
//! read still honors the switch.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static ADMIN_MODE: OnceLock<AtomicBool> = OnceLock::new();

fn admin_mode_cell() -> &'static AtomicBool {
    ADMIN_MODE.get_or_init(|| {
        let enabled = std::env::var("ADMIN_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        AtomicBool::new(enabled)
    })
}

/// True when diagnostics must be suppressed because the admin UI owns stdout/stderr.
pub fn is_admin_mode() -> bool {
    admin_mode_cell().load(Ordering::Relaxed)
}

/// Log at `info` level unless admin mode is active.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if !$crate::logging::is_admin_mode() {
            tracing::info!($($arg)*);
        }
    };
}

/// Log at `warn` level unless admin mode is active.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if !$crate::logging::is_admin_mode() {
            tracing::warn!($($arg)*);
        }
    };
}

/// Log at `error` level unless admin mode is active.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if !$crate::logging::is_admin_mode() {
            tracing::error!($($arg)*);
        }
    };
}

/// Build the `tracing-subscriber` layer: stderr, no ANSI, env-filtered.
/// Installed regardless of `ADMIN_MODE` — the per-call macros above are
/// what actually gate output in admin mode, since the subscriber itself is
/// bound once at startup and swapping writers afterward is not supported.
pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_non_admin_when_unset() {
        // SAFETY: test-only; not exercised concurrently with other env-reading tests in this module.
        unsafe { std::env::remove_var("ADMIN_MODE") };
        // admin_mode_cell() is a OnceLock seeded at first call in the process;
        // this only asserts the parse logic, not process-wide state.
        let enabled = std::env::var("ADMIN_MODE")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        assert!(!enabled);
    }
}
