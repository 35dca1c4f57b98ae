//! Logging infrastructure for Proofmark
//!
//! Subscriber setup for the binary and the signing audit log.

pub mod audit;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use audit::{AuditLogger, Outcome, SigningEvent};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level`; `json` switches to JSON lines.
pub fn init(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proofmark={},info", log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
