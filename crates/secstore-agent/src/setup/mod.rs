//! Application setup and initialization
//!
//! Startup order: validate configuration and host tools, install tracing,
//! read the upload key, wire services, open the listen port in the
//! firewall, build routes.

pub mod routes;
pub mod server;
pub mod services;
pub mod validation;

use crate::state::AppState;
use anyhow::{Context, Result};
use secstore_core::Config;
use secstore_infra::{CommandRunner, FirewallHelper, RuleChange, SystemCommandRunner};
use secstore_storage::DefaultStorageProvider;
use std::sync::Arc;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    validation::validate_config(&config).context("Configuration validation failed")?;

    secstore_infra::init_telemetry(config.log_format(), config.environment())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!("Configuration loaded and validated successfully");

    let upload_key = validation::read_upload_key(config.upload_key_file())?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);

    if config.firewall_manage() {
        open_listen_port(&config, runner.clone()).await?;
    }

    let state = services::build_state(
        &config,
        runner,
        Arc::new(DefaultStorageProvider),
        &upload_key,
    )?;

    let router = routes::setup_routes(state.clone());

    Ok((state, router))
}

/// Ensure the firewall accepts TCP traffic on the listen port.
pub async fn open_listen_port(config: &Config, runner: Arc<dyn CommandRunner>) -> Result<()> {
    let helper = FirewallHelper::new(config.iptables_binary(), runner);
    let rule = listen_port_rule(config.server_port());
    let change = helper
        .ensure_rule(config.firewall_chain(), &rule)
        .await
        .with_context(|| format!("Failed to open port {} in the firewall", config.server_port()))?;

    match change {
        RuleChange::Inserted => {
            tracing::info!(chain = %config.firewall_chain(), rule = %rule, "Firewall rule inserted")
        }
        RuleChange::AlreadyPresent => {
            tracing::debug!(chain = %config.firewall_chain(), rule = %rule, "Firewall rule present")
        }
    }
    Ok(())
}

fn listen_port_rule(port: u16) -> String {
    format!("-p tcp --dport {} -j ACCEPT", port)
}
