use secstore_core::Config;

// mimalloc keeps fragmentation low under long-running multi-GiB transfers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = secstore_agent::setup::initialize_app(config).await?;

    secstore_agent::setup::server::start_server(state, router).await?;

    Ok(())
}
