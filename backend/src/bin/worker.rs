//! Standalone task worker.
//!
//! Runs the worker init hooks (which install telemetry), answers a `ping`
//! as a start-up self check, then serves the in-process queue until
//! interrupted.

use color_eyre::eyre::{Context, Result, eyre};
use tracing::info;

use scaffold::config::Settings;
use scaffold::ioc::Container;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let settings = Settings::load(env!("CARGO_BIN_NAME")).wrap_err("failed to load settings")?;
    let mut container = Container::build(settings)
        .await
        .wrap_err("failed to build the application container")?;
    let worker = container
        .take_worker()
        .ok_or_else(|| eyre!("task worker already taken"))?;
    let mut running = tokio::spawn(worker.run());

    let pong = container.tasks().ping().await.wrap_err("worker self check failed")?;
    info!(result = %pong.result, "worker ready");

    tokio::select! {
        outcome = &mut running => {
            outcome.wrap_err("task worker panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("failed to listen for shutdown")?;
            info!("shutdown requested");
            running.abort();
        }
    }
    Ok(())
}
