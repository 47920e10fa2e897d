//! Crash Round Server
//!
//! Runs the round engine and the websocket gateway in one process.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crash_round::{
    DeterministicRng, GatewayServer, HttpApi, RoundEngine, ServerConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();

    info!("Crash Round Server v{}", VERSION);
    info!("API: {}", config.api_url);
    info!(
        "Timings: betting {:?}, lock {:?}, tick {:?}, crashed {:?}",
        config.engine.timings.betting,
        config.engine.timings.lock_bets,
        config.engine.timings.tick,
        config.engine.timings.crashed
    );
    info!(
        "Initial settings: mode={} max_number={} history={}",
        config.engine.initial_settings.mode,
        config.engine.initial_settings.max_number,
        config.engine.history_capacity
    );

    let api = Arc::new(HttpApi::new(&config.api_url, config.http_timeout).context("failed to build HTTP client")?);

    let (rng, seed) = DeterministicRng::from_entropy();
    info!("RNG seed: {}", hex::encode(seed.to_be_bytes()));

    let engine = RoundEngine::new(config.engine.clone(), api.clone(), rng);
    let handle = engine.handle();
    let engine_task = engine.spawn();

    let gateway = Arc::new(GatewayServer::new(config.gateway.clone(), handle, api));
    let server = gateway.clone();
    let mut gateway_task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut gateway_task => {
            engine_task.abort();
            result.context("gateway task failed")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
        }
    }

    gateway.shutdown();
    let _ = gateway_task.await;
    engine_task.abort();

    Ok(())
}
