//! Tracing setup for nwave-des.
//!
//! Structured logging with `feature`, `step_id`, and `phase` fields.
//! Hook subcommands run with the compact format so their stdout JSON
//! stays machine-readable; diagnostics go to stderr.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the tracing subscriber.
///
/// Verbose mode adds targets and span-close events; both modes write to
/// stderr and honour `RUST_LOG`.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("nwave_des=debug,des_audit=debug,des_utils=debug,info")
            } else {
                EnvFilter::try_new("nwave_des=info,des_audit=info,des_utils=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Create a span for step execution with structured fields.
pub fn step_span(feature: &str, step_id: &str) -> tracing::Span {
    tracing::span!(
        tracing::Level::INFO,
        "step_execution",
        feature = %feature,
        step_id = %step_id,
    )
}
