use std::sync::Arc;

use anyhow::Result;
use smt_client::{
    domain::{IntervalRead, MeterRead},
    portal::SmtClient,
};
use smt_ingest::{
    config::AppConfig,
    metrics_server, observability,
    pipeline::ReadingSource,
    scheduler::Orchestrator,
    sinks::{MqttSink, PgTableSink},
    sources::SmtPortalSource,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing(std::env::var("SMT_LOG_LEVEL").ok().as_deref());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting SMT ingest");

    let cfg = AppConfig::load().inspect_err(|e| tracing::error!(error = %e, "invalid configuration"))?;
    tracing::debug!(?cfg, "configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr, cancel.clone())?;
    }

    let client = SmtClient::new(
        &cfg.portal.base_url,
        cfg.portal.credentials.clone(),
        cfg.portal.read.clone(),
    )?;
    let source = Arc::new(SmtPortalSource::new(client));

    // A failed first login is not fatal; the portal has frequent maintenance windows.
    if let Err(e) = source.ensure_session().await {
        tracing::warn!(error = %e, "initial portal login failed, retrying on next cycle");
    }

    let mut orchestrator = Orchestrator::new(source, cfg.schedule.clone());

    match &cfg.mqtt {
        Some(mqtt_cfg) => {
            tracing::info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, topic = %mqtt_cfg.topic, "MQTT publishing enabled");
            let sink = MqttSink::connect(mqtt_cfg, cfg.schedule.sink_timeout, cancel.clone());
            orchestrator = orchestrator.with_meter_sink(Arc::new(sink));
        }
        None => tracing::info!("SMT_MQTT_HOST not set, MQTT publishing disabled"),
    }

    match &cfg.database {
        Some(db_cfg) => {
            // Lazy pool: an unreachable database surfaces per cycle, not at startup.
            let pool = PgPoolOptions::new()
                .max_connections(db_cfg.max_connections)
                .acquire_timeout(cfg.schedule.sink_timeout)
                .connect_lazy(&db_cfg.url)?;

            let meter_sink = PgTableSink::<MeterRead>::new(pool.clone(), db_cfg.meter_table.clone());
            if let Err(e) = meter_sink.ensure_table().await {
                tracing::warn!(error = %e, "database not ready, table creation will be retried");
            }
            orchestrator = orchestrator.with_meter_sink(Arc::new(meter_sink));

            if cfg.schedule.interval_enabled {
                let interval_sink = PgTableSink::<IntervalRead>::new(pool, db_cfg.interval_table.clone());
                if let Err(e) = interval_sink.ensure_table().await {
                    tracing::warn!(error = %e, "database not ready, table creation will be retried");
                }
                orchestrator = orchestrator.with_interval_sink(Arc::new(interval_sink));
            }
        }
        None => tracing::info!("SMT_DB_URL not set, database writing disabled"),
    }

    if cfg.schedule.interval_enabled && cfg.database.is_none() {
        tracing::warn!("SMT_INTERVAL_ENABLED is set without SMT_DB_URL; interval reads have no sink");
    }

    Arc::new(orchestrator).run(cancel).await;

    tracing::info!("SMT ingest stopped");
    Ok(())
}
