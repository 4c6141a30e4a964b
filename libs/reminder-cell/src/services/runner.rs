// libs/reminder-cell/src/services/runner.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use shared_utils::Clock;

use crate::error::SweepError;
use crate::models::{SweepMode, SweepReport};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Upper bound on how long `stop` waits for an in-flight batch.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// One periodic job driven by the runner.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>, mode: SweepMode) -> Result<SweepReport, SweepError>;
}

/// Drives a set of sweeps on a fixed interval.
///
/// `start` runs a catch-up pass before the first interval elapses. `stop`
/// cancels the loop and waits for the batch in progress to finish, so no
/// reminder is dispatched without the chance to record its marker.
pub struct SweepRunner {
    sweeps: Arc<Vec<Arc<dyn Sweep>>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SweepRunner {
    pub fn new(sweeps: Vec<Arc<dyn Sweep>>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            sweeps: Arc::new(sweeps),
            clock,
            interval,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), SweepError> {
        if self.is_running() {
            return Err(SweepError::AlreadyRunning);
        }

        info!(
            "Starting sweep runner with {} sweep(s) every {:?}",
            self.sweeps.len(),
            self.interval
        );

        // Fresh token so the runner can be restarted after a stop
        self.cancellation_token = CancellationToken::new();

        let sweeps = Arc::clone(&self.sweeps);
        let clock = Arc::clone(&self.clock);
        let interval = self.interval;
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::sweep_loop(sweeps, clock, interval, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), SweepError> {
        if !self.is_running() {
            return Err(SweepError::NotRunning);
        }

        info!("Stopping sweep runner");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            tokio::time::timeout(STOP_TIMEOUT, handle)
                .await
                .map_err(|_| SweepError::Timeout {
                    operation: "stop sweep runner",
                    timeout_ms: STOP_TIMEOUT.as_millis() as u64,
                })?
                .map_err(|e| SweepError::Join(e.to_string()))?;
        }

        info!("Sweep runner stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Runs every sweep once at `now`, outside the background loop.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<(&'static str, Result<SweepReport, SweepError>)> {
        Self::run_batch(&self.sweeps, now, SweepMode::Regular).await
    }

    /// Runs every sweep once in catch-up mode.
    pub async fn catch_up(&self, now: DateTime<Utc>) -> Vec<(&'static str, Result<SweepReport, SweepError>)> {
        Self::run_batch(&self.sweeps, now, SweepMode::CatchUp).await
    }

    async fn sweep_loop(
        sweeps: Arc<Vec<Arc<dyn Sweep>>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        Self::run_batch(&sweeps, clock.now(), SweepMode::CatchUp).await;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the catch-up pass covered it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sweep loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    Self::run_batch(&sweeps, clock.now(), SweepMode::Regular).await;
                }
            }
        }
    }

    async fn run_batch(
        sweeps: &[Arc<dyn Sweep>],
        now: DateTime<Utc>,
        mode: SweepMode,
    ) -> Vec<(&'static str, Result<SweepReport, SweepError>)> {
        let mut results = Vec::with_capacity(sweeps.len());

        for sweep in sweeps {
            let started = Instant::now();
            let result = sweep.run(now, mode).await;
            match &result {
                Ok(report) => debug!(
                    sweep = sweep.name(),
                    %mode,
                    examined = report.examined,
                    processed = report.processed,
                    failed = report.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sweep finished"
                ),
                Err(e) => error!(error = %e, sweep = sweep.name(), %mode, "Sweep failed"),
            }
            results.push((sweep.name(), result));
        }

        results
    }
}
