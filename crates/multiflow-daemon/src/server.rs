//! Monitor wiring and lifecycle management

use std::sync::Arc;

use chrono::Utc;
use multiflow_monitor::{
    ArchiveSink, CsvArchive, DetectorStrategy, DispatchConfig, DistributionDrift, DynamicIqr,
    EngineStats, ForecastBounds, InfluxConfig, InfluxSink, IsolationEnsemble, KernelBoundary,
    LogMetricsSink, MetricsSink, MonitorService, MonitoringEngine, SinkDispatcher, StrategyKind,
    TimeIndex,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::source;

/// Multiflow monitor daemon
pub struct Server {
    config: DaemonConfig,
}

impl Server {
    /// Create a new server; fails on an invalid monitor configuration.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        config.monitor.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Run until the input is exhausted or a shutdown signal arrives.
    pub async fn run(self) -> DaemonResult<EngineStats> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
        self.run_until(shutdown_rx).await
    }

    /// Run with an externally driven shutdown flag.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> DaemonResult<EngineStats> {
        let monitor = &self.config.monitor;
        match monitor.detector {
            StrategyKind::ForecastBounds => {
                let detector = ForecastBounds::from_config(monitor, TimeIndex::new(Utc::now()));
                self.run_with(detector, shutdown).await
            }
            StrategyKind::IsolationEnsemble => {
                let detector = IsolationEnsemble::from_config(monitor);
                self.run_with(detector, shutdown).await
            }
            StrategyKind::KernelBoundary => {
                let detector = KernelBoundary::from_config(monitor);
                self.run_with(detector, shutdown).await
            }
            StrategyKind::DynamicIqr => {
                let detector = DynamicIqr::from_config(monitor);
                self.run_with(detector, shutdown).await
            }
            StrategyKind::DistributionDrift => {
                let detector = DistributionDrift::from_config(monitor);
                self.run_with(detector, shutdown).await
            }
        }
    }

    async fn run_with<D: DetectorStrategy>(
        &self,
        detector: D,
        shutdown: watch::Receiver<bool>,
    ) -> DaemonResult<EngineStats> {
        let monitor = &self.config.monitor;
        let engine = MonitoringEngine::from_config(detector, monitor)?;

        let (metrics, archive) = build_sinks(&self.config)?;
        info!(
            instance = %monitor.instance_name,
            topic = %monitor.stream_topic,
            detector = %monitor.detector,
            metrics = metrics.name(),
            archive = archive.name(),
            "multiflow monitor starting"
        );
        let dispatcher = SinkDispatcher::new(metrics, archive, DispatchConfig::from_config(monitor));
        let (dispatch, dispatch_task) = dispatcher.spawn();

        let (event_tx, event_rx) = mpsc::channel(self.config.source.queue_capacity.max(1));
        let source_task = tokio::spawn(source::run(self.config.source.clone(), event_tx));

        let stats = MonitorService::new(engine, dispatch).run(event_rx, shutdown).await;

        // the service has stopped reading; a source blocked on stdin would never return
        source_task.abort();
        match source_task.await {
            Ok(Err(e)) => error!(error = %e, "event source failed"),
            Err(e) if e.is_panic() => error!("event source panicked"),
            _ => {}
        }

        let delivered = dispatch_task
            .await
            .map_err(|e| DaemonError::Source(format!("sink dispatcher failed: {}", e)))?;
        info!(
            points = delivered.points_written,
            points_failed = delivered.points_failed,
            archived = delivered.records_archived,
            dropped_batches = delivered.dropped_batches,
            "multiflow monitor stopped"
        );
        Ok(stats)
    }
}

fn build_sinks(
    config: &DaemonConfig,
) -> DaemonResult<(Arc<dyn MetricsSink>, Arc<dyn ArchiveSink>)> {
    let metrics: Arc<dyn MetricsSink> = match InfluxConfig::from_monitor(&config.monitor) {
        Some(influx) => {
            info!(url = %influx.url, bucket = %config.monitor.influxdb_bucket, "writing points to InfluxDB");
            Arc::new(InfluxSink::new(influx)?)
        }
        None => {
            info!("no InfluxDB url configured, logging points instead");
            Arc::new(LogMetricsSink)
        }
    };
    let archive = CsvArchive::from_config(&config.monitor);
    info!(path = %archive.path().display(), "archiving events");
    Ok((metrics, Arc::new(archive)))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputFormat;
    use multiflow_monitor::MonitorConfig;

    #[test]
    fn test_invalid_monitor_config_rejected() {
        let config = DaemonConfig {
            monitor: MonitorConfig {
                batch_size: 1,
                ..MonitorConfig::default()
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(Server::new(config), Err(DaemonError::Monitor(_))));
    }

    #[tokio::test]
    async fn test_runs_file_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("events.csv");
        let rows: String = (0..30).map(|i| format!("{},{}\n", i % 5, 7 + i % 2)).collect();
        tokio::fs::write(&input, rows).await.unwrap();

        let mut config = DaemonConfig::default();
        config.monitor = MonitorConfig {
            initial_block_size: 10,
            update_interval: 10,
            archive_dir: dir.path().to_string_lossy().into_owned(),
            ..MonitorConfig::for_detector(StrategyKind::DynamicIqr)
        };
        config.source.input = Some(input.to_string_lossy().into_owned());
        config.source.format = InputFormat::Csv;

        let (_tx, rx) = watch::channel(false);
        let stats = Server::new(config).unwrap().run_until(rx).await.unwrap();
        assert_eq!(stats.accepted, 30);
        assert_eq!(stats.verdicts, 21);

        let archived = tokio::fs::read_to_string(dir.path().join("Received-Events.csv"))
            .await
            .unwrap();
        assert_eq!(archived.lines().count(), 22);
    }
}
