use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g.
/// `"trojan_ingress=info"`) is applied. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logger(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(true)
                .compact(),
        )
        .try_init();
}

pub mod log {
    pub use tracing::{debug, error, info, trace, warn};

    /// Record an authentication outcome.
    pub fn authentication(peer: &str, success: bool) {
        if success {
            info!(peer = peer, "authentication successful");
        } else {
            warn!(peer = peer, "authentication failed");
        }
    }

    /// Record a protocol rejection diverted to the fallback path.
    ///
    /// Rejections are deliberate anti-probing behavior, so they log at warn
    /// level at most, never as errors.
    pub fn rejection(peer: &str, reason: &str) {
        warn!(peer = peer, reason = reason, "request rejected");
    }
}
