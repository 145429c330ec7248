//! aeoscan - answer-engine readiness scanner.
//!
//! Audits how well a site's pages can be consumed by answer engines:
//! discovers URLs, fetches and (when needed) renders them, extracts
//! structured signals, and clusters pages by template.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if aeoscan::cli::is_verbose() {
        "aeoscan=info"
    } else {
        "aeoscan=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    aeoscan::cli::run().await
}
