use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `log_format` is `compact` or `json`;
/// `RUST_LOG` overrides the default filter.
pub fn init_telemetry(
    log_format: &str,
    environment: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = log_format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secstore=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().compact()))
        .try_init()?;

    tracing::info!(log_format = %log_format, environment = %environment, "Tracing initialized");
    Ok(())
}
