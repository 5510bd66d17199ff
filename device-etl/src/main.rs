//! Consume device telemetry from Kafka and load normalized CPU temperatures into Postgres.
use axum::{routing::get, Router};
use envconfig::Envconfig;
use etl_common::health::HealthHandle;
use etl_common::kafka::BatchConsumer;
use etl_common::metrics::{serve, setup_metrics_routes};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use device_etl::config::Config;
use device_etl::pipeline::Pipeline;
use device_etl::sink::{BatchSinkWriter, PostgresSink, WriteMode};
use device_etl::source::KafkaRecordSource;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "device telemetry etl"
}

fn start_health_liveness_server(config: &Config, liveness: HealthHandle) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        );
    let router = setup_metrics_routes(router).expect("failed to install metrics recorder");
    let bind = config.bind();

    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

async fn shutdown(stop: CancellationToken) {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully, finishing the batch in flight...");
    stop.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().expect("Invalid configuration:");

    if config.write_mode == WriteMode::Overwrite {
        warn!(
            destination = %config.destination_table,
            "write mode is overwrite: every committed batch replaces the destination contents"
        );
    }

    let sink = PostgresSink::new(
        &config.database_url,
        config.max_pg_connections,
        config.pg_acquire_timeout.0,
        config.destination_table.clone(),
    )
    .await?;
    if config.run_migrations {
        sink.run_migrations().await?;
    }

    let consumer = BatchConsumer::new(&config.kafka, &config.consumer)?;
    info!("Subscribed to topic: {}", consumer.topic());

    let liveness = HealthHandle::new("pipeline", config.liveness_deadline());
    start_health_liveness_server(&config, liveness.clone());

    let stop = CancellationToken::new();
    tokio::spawn(shutdown(stop.clone()));

    let mut pipeline = Pipeline::new(
        KafkaRecordSource::new(consumer),
        BatchSinkWriter::new(sink, config.write_mode),
        config.pipeline_options(),
        stop,
    )
    .with_liveness(liveness);

    match pipeline.run().await {
        Ok(totals) => {
            info!(
                batches_committed = totals.batches_committed,
                records_received = totals.records_received,
                records_written = totals.records_written,
                decode_failures = totals.decode_failures,
                "pipeline stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!("pipeline failed, exiting: {}", e);
            Err(e.into())
        }
    }
}
