//! Logging and observability
//!
//! Structured logging via `tracing`, with text or JSON output selected at
//! runtime. All log output goes to stderr so stdout stays reserved for
//! command replies.
//!
//! Environment variables:
//! * `BOSUN_LOG` — filter directives (falls back to `RUST_LOG`, then `info`)
//! * `BOSUN_LOG_FORMAT` — `json` for structured output, anything else for text

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// `format` overrides `BOSUN_LOG_FORMAT` when given (`"json"` or `"text"`).
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = env_filter();

        let env_format = std::env::var("BOSUN_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("logging initialized with format: {}", effective_format);
    });

    Ok(())
}

fn env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("BOSUN_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check if logging has been initialized (useful in tests).
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_multiple_calls_safe() {
        assert!(init(None).is_ok());
        assert!(init(Some("json")).is_ok());
        assert!(init(Some("text")).is_ok());
        assert!(is_initialized());
    }

    #[test]
    fn test_env_filter_fallback() {
        std::env::set_var("BOSUN_LOG", "not a valid $$ spec");
        let _filter = env_filter();
        std::env::remove_var("BOSUN_LOG");
    }
}
