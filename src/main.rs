use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sohwatch::{Service, Settings};
use sohwatch_broker::{ConsumerTransport, ProducerTransport};
use tokio::time::Interval;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sohwatch")]
#[command(about = "Station state-of-health aggregation service")]
struct Args {
    /// Path to a settings file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log filter, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Seconds between health reports in the log (0 disables them)
    #[arg(long, default_value = "30")]
    health_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;
    tracing::info!(
        brokers = %settings.bootstrap_servers(),
        stations = settings.soh.stations.len(),
        "Starting sohwatch"
    );

    let (consumer_transport, producer_transport) = transports(&settings)?;
    let service = Service::build(&settings, consumer_transport, producer_transport)?;
    let timer = service.start().await;

    let mut health = (args.health_interval > 0).then(|| {
        let period = Duration::from_secs(args.health_interval);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = next_tick(&mut health) => {
                log_health(&service);
            }
        }
    }

    tracing::info!("Shutting down");
    service.shutdown(timer).await;
    Ok(())
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_health(service: &Service) {
    let report = service.health();
    match serde_json::to_string(&report) {
        Ok(json) if report.is_healthy() => tracing::info!(health = %json, "Health report"),
        Ok(json) => tracing::warn!(health = %json, "Health report: broker clients not connected"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize health report"),
    }
}

#[cfg(feature = "kafka")]
fn transports(settings: &Settings) -> Result<(Arc<dyn ConsumerTransport>, Arc<dyn ProducerTransport>)> {
    use sohwatch_broker::kafka::KafkaTransport;

    if settings.uses_in_process_broker() {
        tracing::warn!("Using an in-process broker, nothing is read from Kafka");
        let broker = sohwatch_broker::MemoryBroker::new();
        return Ok((Arc::new(broker.clone()), Arc::new(broker)));
    }

    let kafka = KafkaTransport::builder()
        .brokers(settings.bootstrap_servers())
        .group_id(&settings.kafka.group_id)
        .client_id(&settings.kafka.client_id)
        .connection_timeout(settings.kafka.connection_timeout())
        .heartbeat_interval(settings.kafka.heartbeat_interval())
        .max_wait(settings.kafka.max_wait())
        .build();

    Ok((Arc::new(kafka.clone().build_consumer()), Arc::new(kafka.build_producer())))
}

#[cfg(not(feature = "kafka"))]
fn transports(settings: &Settings) -> Result<(Arc<dyn ConsumerTransport>, Arc<dyn ProducerTransport>)> {
    if !settings.uses_in_process_broker() {
        anyhow::bail!(
            "Brokers {} configured but sohwatch was built without the `kafka` feature; \
             rebuild with `--features kafka` or set brokers = [\"{}\"]",
            settings.bootstrap_servers(),
            sohwatch::IN_PROCESS_BROKER
        );
    }
    tracing::warn!("Built without the `kafka` feature, using an in-process broker");
    let broker = sohwatch_broker::MemoryBroker::new();
    Ok((Arc::new(broker.clone()), Arc::new(broker)))
}
