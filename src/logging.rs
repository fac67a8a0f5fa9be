//! Logging setup for programs that embed the control plane
//!
//! The library itself only emits `tracing` events. Binaries and demos call
//! `init_logging` once to install a subscriber:
//! - `RUST_LOG` wins when set
//! - otherwise the given default filter is used
//! - `json = true` switches to one JSON object per line (for log shippers)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "info,cgplane=debug";

/// Install a global tracing subscriber
///
/// # Example
/// ```ignore
/// cgplane::logging::init_logging(None, false)?;
/// ```
pub fn init_logging(
    default_filter: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))?;

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?;
    }

    tracing::debug!(json, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
