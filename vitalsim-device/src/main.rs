//! Vitalsim Device - command line entry point
//!
//! Resolves the configuration, connects with the device certificate, then
//! publishes telemetry until the duration ends or Ctrl+C.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vitalsim_device::report;
use vitalsim_device::{
    AlertClassifier, Cli, LoopOutcome, MqttTransport, PublishLoop, ResolvedConfig, SessionManager,
    TelemetryGenerator,
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so clap sees its variables
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vitalsim_device=info")),
        )
        .init();

    let ResolvedConfig { identity, settings } = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {e}");
            std::process::exit(2);
        }
    };

    println!("{}", report::banner(&identity));
    info!("🩺 Vitalsim device {} starting...", identity.device_id());

    let tls = identity.load_tls().context("Failed to load TLS material")?;
    let transport = MqttTransport::new(&identity, tls, Arc::new(settings.reconnect));
    let session = SessionManager::new(&identity, transport, settings.connect_timeout);

    let mut inbound = session.inbound_messages();
    let printer = tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(message) => println!("{}", report::inbound_lines(&message)),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} C2D messages", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("🔄 Connecting...");
    match session.connect_until(settings.keep_alive, ctrl_c()).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("Failed to connect: {}", e);
            println!("❌ {e}");
            println!("{}", report::troubleshooting(identity.port()));
            println!("{}", report::stats_block(&session.stats()));
            printer.abort();
            std::process::exit(1);
        }
        None => {
            printer.abort();
            println!("\n🛑 Connection attempt stopped by user");
            println!("{}", report::stats_block(&session.stats()));
            return Ok(());
        }
    }
    println!("✅ Connected");

    match settings.duration {
        Some(d) => println!(
            "📡 Sending telemetry every {}s for {}s (Ctrl+C to stop)",
            settings.interval.as_secs(),
            d.as_secs()
        ),
        None => println!(
            "📡 Sending telemetry every {}s (Ctrl+C to stop)",
            settings.interval.as_secs()
        ),
    }

    let generator = TelemetryGenerator::new(settings.anomalies);
    let classifier = AlertClassifier::new(settings.thresholds);
    let mut publish_loop = PublishLoop::new(&session, generator, classifier, settings.interval)
        .with_duration(settings.duration)
        .on_tick(|tick| println!("{}", report::tick_lines(tick, Utc::now())));

    let summary = publish_loop.run(ctrl_c()).await;

    printer.abort();
    match summary.outcome {
        LoopOutcome::DurationElapsed => println!("\n⏱️  Simulation duration completed"),
        LoopOutcome::Cancelled => println!("\n🛑 Simulation stopped by user"),
        LoopOutcome::SessionLost => println!("\n❌ Connection lost and could not be re-established"),
    }
    println!("{}", report::stats_block(&session.stats()));

    if summary.outcome == LoopOutcome::SessionLost {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolves on Ctrl+C; never resolves when the signal cannot be watched.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
