//! HTTP server entry-point.
//!
//! Loads settings, builds the container and serves the API. The task worker
//! runs in the same process and drains the queue the container hands out.

use actix_web::HttpServer;
use color_eyre::eyre::{Context, Result};
use tracing::{error, info, warn};

use scaffold::config::Settings;
use scaffold::ioc::Container;
use scaffold::telemetry::TelemetryConfigurator;

const SERVICE_NAME: &str = "http-server";

#[actix_web::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let settings = Settings::load(env!("CARGO_BIN_NAME")).wrap_err("failed to load settings")?;
    let environment = settings.app.environment()?;
    if let Err(err) =
        TelemetryConfigurator::new().configure(SERVICE_NAME, settings.app.version(), environment)
    {
        warn!(error = %err, "tracing init failed");
    }

    let bind_address = settings.http.bind_address().to_owned();
    let mut container = Container::build(settings)
        .await
        .wrap_err("failed to build the application container")?;
    if let Some(worker) = container.take_worker() {
        actix_web::rt::spawn(async move {
            if let Err(err) = worker.run().await {
                error!(error = %err, "task worker stopped");
            }
        });
    }

    let factory = container.api_factory();
    info!(address = %bind_address, "starting HTTP server");
    HttpServer::new(move || factory.build())
        .bind(&bind_address)
        .wrap_err_with(|| format!("failed to bind {bind_address}"))?
        .run()
        .await?;
    Ok(())
}
