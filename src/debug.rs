use tracing_subscriber::{
    fmt::{format::FmtSpan, layer},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter directives for this crate, e.g. `mssqlcursor=trace`.
pub const LOG_ENV: &str = "MSSQLCURSOR_LOG";

/// Set to `1` or `true` to force debug-level output for this crate.
pub const DEBUG_ENV: &str = "MSSQLCURSOR_DEBUG";

/// Whether debug mode was requested through [`DEBUG_ENV`].
pub fn debug_requested() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn filter() -> EnvFilter {
    if debug_requested() {
        return EnvFilter::new("mssqlcursor=debug");
    }
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "warn".into())
}

/// Sets up a tracing subscriber for applications that do not install their own.
///
/// Returns `false` when a global subscriber was already set.
pub fn init() -> bool {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let installed = tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing initialized");
    }
    installed
}
