//! SHT4x reader - publishes sensor readings to an MQTT broker.
//!
//! Run with: `cargo run -p sht4x-service -- --config sht4x_reader.cfg`

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, reload};

use sht4x_core::DeviceReader;
use sht4x_service::{Args, BrokerClient, BrokerOptions, Config, Supervisor, SupervisorOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    // Start at info so config warnings are visible, then raise once the
    // debug setting is known
    let (filter, filter_handle) = reload::Layer::new(log_filter(false)?);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(&args);
    if config.debug {
        filter_handle.reload(log_filter(true)?)?;
    }

    let mut client = BrokerClient::new();
    let broker_options = BrokerOptions::from_config(&config.mqtt, config.debug);
    let connected = client
        .connect_or_cancel(&broker_options, &shutdown)
        .await
        .context("Failed to connect to MQTT broker")?;
    if !connected {
        return Ok(());
    }

    // A signal arriving from here on is seen by the run loop, which closes
    // everything and logs final stats
    let device = DeviceReader::new(&config.sensor.device_path);
    let supervisor = Supervisor::start(device, client, SupervisorOptions::from_config(&config))
        .await
        .context("Failed to start sensor pipeline")?;

    let stats = supervisor.run(shutdown).await?;
    info!("Exiting after {} message(s)", stats.messages);
    Ok(())
}

fn log_filter(debug: bool) -> anyhow::Result<EnvFilter> {
    let level = if debug { "debug" } else { "info" };
    Ok(EnvFilter::from_default_env()
        .add_directive(format!("sht4x_service={}", level).parse()?)
        .add_directive(format!("sht4x_core={}", level).parse()?)
        .add_directive(format!("sht4x_reader={}", level).parse()?))
}

/// Cancel `shutdown` on SIGINT (Ctrl+C) or SIGTERM.
///
/// The handlers are registered before this returns, so a signal sent at any
/// later point is never handled by the default disposition.
fn install_shutdown_handler(shutdown: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!("Error setting up signal handler: {}", e),
            }
        });
    }

    Ok(())
}
