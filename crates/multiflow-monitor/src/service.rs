//! Async driver around a [`MonitoringEngine`].
//!
//! ```text
//!   events (mpsc) ──► MonitorService::run ──verdicts──► DispatchHandle
//!                           │      ▲
//!              FitRequest   ▼      │  FitOutcome
//!                      spawn_blocking worker
//! ```
//!
//! The service is the single ingestion path: it alone calls into the engine,
//! so rows keep their arrival order. Refits run on the blocking pool while
//! rows continue to be scored with the previous model. On shutdown the
//! in-flight refit is awaited and installed, any refit it triggers runs to
//! completion, and the final partial forecast horizon is scored.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::detector::DetectorStrategy;
use crate::engine::{FitOutcome, FitRequest, MonitoringEngine, Outcome};
use crate::error::{MonitorError, MonitorResult};
use crate::sink::DispatchHandle;
use crate::stats::EngineStats;

/// One record from the stream transport.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// A single comma-separated row of numbers.
    #[serde(default)]
    pub csv_data: String,
}

impl StreamEvent {
    pub fn new(csv_data: impl Into<String>) -> Self {
        Self {
            csv_data: csv_data.into(),
        }
    }

    /// Decode a JSON-encoded event, e.g. `{"csv_data": "1.0,2.5"}`.
    pub fn from_json(raw: &str) -> MonitorResult<Self> {
        serde_json::from_str(raw).map_err(|e| MonitorError::Parse {
            input: raw.to_string(),
            reason: format!("invalid event: {}", e),
        })
    }
}

pub struct MonitorService<D: DetectorStrategy> {
    engine: MonitoringEngine<D>,
    dispatch: DispatchHandle,
}

impl<D: DetectorStrategy> MonitorService<D> {
    pub fn new(engine: MonitoringEngine<D>, dispatch: DispatchHandle) -> Self {
        Self { engine, dispatch }
    }

    pub fn engine(&self) -> &MonitoringEngine<D> {
        &self.engine
    }

    /// Consume events until the stream ends or `shutdown` flips to `true`
    /// (or its sender is dropped). Returns the final engine counters.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineStats {
        let (fit_tx, mut fit_rx) = mpsc::channel::<FitOutcome<D::Model>>(1);
        let mut in_flight = false;

        info!(detector = %self.engine.kind(), "monitor service started");

        loop {
            tokio::select! {
                biased;

                Some(outcome) = fit_rx.recv(), if in_flight => {
                    let next = self.engine.install(outcome);
                    in_flight = self.forward(next, &fit_tx);
                }

                event = events.recv() => match event {
                    Some(event) => match self.engine.process(&event.csv_data) {
                        Ok(outcome) => {
                            in_flight |= self.forward(outcome, &fit_tx);
                        }
                        Err(e) => debug!(error = %e, "event skipped"),
                    },
                    None => {
                        info!("event stream ended");
                        break;
                    }
                },

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
            }
        }

        if in_flight {
            if let Some(outcome) = fit_rx.recv().await {
                let next = self.engine.install(outcome);
                self.drain(next).await;
            }
        }

        let rest = self.engine.finish();
        self.dispatch.send(rest);

        let stats = self.engine.stats().clone();
        info!(
            accepted = stats.accepted,
            rejected = stats.rejected(),
            verdicts = stats.verdicts,
            anomalies = stats.anomalies,
            fit_failures = stats.fit_failures,
            "monitor service stopped"
        );
        stats
    }

    /// Send verdicts on and start the refit, if any. Returns whether a refit
    /// is now in flight.
    fn forward(&self, outcome: Outcome<D>, fit_tx: &mpsc::Sender<FitOutcome<D::Model>>) -> bool {
        self.dispatch.send(outcome.verdicts);
        match outcome.fit {
            Some(request) => {
                let tx = fit_tx.clone();
                tokio::spawn(async move {
                    // capacity 1 and at most one request in flight, so this never waits
                    let _ = tx.send(run_fit(request).await).await;
                });
                true
            }
            None => false,
        }
    }

    /// Run refits to completion during shutdown.
    async fn drain(&mut self, mut outcome: Outcome<D>) {
        loop {
            self.dispatch.send(std::mem::take(&mut outcome.verdicts));
            match outcome.fit.take() {
                Some(request) => {
                    let fitted = run_fit(request).await;
                    outcome = self.engine.install(fitted);
                }
                None => break,
            }
        }
    }
}

/// Run a fit on the blocking pool. A panicking fit becomes a failed outcome.
async fn run_fit<D: DetectorStrategy>(request: FitRequest<D>) -> FitOutcome<D::Model> {
    let generation = request.generation();
    let kind = request.kind();
    match tokio::task::spawn_blocking(move || request.run()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(generation, error = %e, "fit task aborted");
            FitOutcome::failed(generation, MonitorError::fit(kind, format!("fit task aborted: {}", e)))
        }
    }
}
