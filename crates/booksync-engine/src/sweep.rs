//! Periodic retry sweep.
//!
//! Calls a sweep function (normally [`SyncOrchestrator::retry_pending`]) on
//! an interval with jitter, backing off exponentially while it keeps
//! failing. Nothing runs unless a caller spawns [`RetrySweep::run`].
//!
//! [`SyncOrchestrator::retry_pending`]: crate::orchestrator::SyncOrchestrator::retry_pending

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use booksync_core::SweepSettings;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{RetryReport, SyncOrchestrator};

/// Sweep timing.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Base interval between sweeps.
    pub interval: Duration,
    /// Jitter as a fraction of the interval (0.0-1.0).
    pub jitter_fraction: f64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::from(&SweepSettings::default())
    }
}

impl From<&SweepSettings> for SweepConfig {
    fn from(settings: &SweepSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            jitter_fraction: settings.jitter_fraction.clamp(0.0, 1.0),
            initial_backoff: Duration::from_secs(settings.initial_backoff_secs),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl SweepConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Interval plus or minus jitter.
    pub fn next_delay(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let jitter = time_jitter(base * self.jitter_fraction);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Delay after `consecutive_failures` failed sweeps, capped at `max_backoff`.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let delay = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Value in `[-range, range]` derived from the clock's sub-second part.
fn time_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let fraction = f64::from(nanos) / 1_000_000_000.0;
    (fraction * 2.0 - 1.0) * range
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepCommand {
    SweepNow,
    Pause,
    Resume,
    Stop,
}

/// Observable sweep state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepState {
    pub paused: bool,
    pub consecutive_failures: u32,
    pub sweeps: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SweepState {
    fn record_success(&mut self) {
        self.sweeps += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
    }

    fn record_failure(&mut self, error: String) {
        self.sweeps += 1;
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error);
    }
}

type SharedSweepState = Arc<RwLock<SweepState>>;

/// The sweep loop.
#[derive(Debug)]
pub struct RetrySweep {
    config: SweepConfig,
    state: SharedSweepState,
    command_tx: mpsc::Sender<SweepCommand>,
    command_rx: mpsc::Receiver<SweepCommand>,
}

impl RetrySweep {
    pub fn new(config: SweepConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            state: SharedSweepState::default(),
            command_tx,
            command_rx,
        }
    }

    pub fn handle(&self) -> SweepHandle {
        SweepHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Runs until stopped or every handle is dropped.
    ///
    /// The first sweep happens one delay after start, not immediately.
    pub async fn run<F, Fut>(self, sweep_fn: F)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let Self {
            config,
            state,
            command_tx,
            mut command_rx,
        } = self;
        // Only handles keep the channel open
        drop(command_tx);

        info!(interval_secs = config.interval.as_secs(), "Retry sweep started");

        loop {
            let delay = {
                let state = state.read().await;
                if state.consecutive_failures > 0 {
                    config.backoff_delay(state.consecutive_failures)
                } else {
                    config.next_delay()
                }
            };
            debug!(delay_ms = delay.as_millis() as u64, "Scheduling next sweep");

            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    if state.read().await.paused {
                        debug!("Retry sweep paused, skipping");
                        continue;
                    }
                    sweep(&state, &sweep_fn).await;
                }
                command = command_rx.recv() => match command {
                    Some(SweepCommand::SweepNow) => sweep(&state, &sweep_fn).await,
                    Some(SweepCommand::Pause) => {
                        info!("Retry sweep paused");
                        state.write().await.paused = true;
                    }
                    Some(SweepCommand::Resume) => {
                        info!("Retry sweep resumed");
                        state.write().await.paused = false;
                    }
                    Some(SweepCommand::Stop) | None => {
                        info!("Retry sweep stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Runs the sweep against an orchestrator. A pass with failed rows
    /// counts as a failure for backoff purposes.
    pub async fn run_with(self, orchestrator: Arc<SyncOrchestrator>) {
        self.run(move || {
            let orchestrator = orchestrator.clone();
            async move { report_outcome(orchestrator.retry_pending().await) }
        })
        .await;
    }
}

fn report_outcome(report: RetryReport) -> Result<(), String> {
    if report.failed == 0 {
        Ok(())
    } else {
        Err(format!(
            "{} of {} sync rows still failing",
            report.failed, report.attempted
        ))
    }
}

async fn sweep<F, Fut>(state: &SharedSweepState, sweep_fn: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    match sweep_fn().await {
        Ok(()) => {
            debug!("Retry sweep completed");
            state.write().await.record_success();
        }
        Err(e) => {
            warn!(error = %e, "Retry sweep incomplete");
            state.write().await.record_failure(e);
        }
    }
}

/// Sends commands to a running sweep.
#[derive(Debug, Clone)]
pub struct SweepHandle {
    command_tx: mpsc::Sender<SweepCommand>,
    state: SharedSweepState,
}

impl SweepHandle {
    async fn send(&self, command: SweepCommand) -> EngineResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EngineError::WorkerStopped)
    }

    pub async fn sweep_now(&self) -> EngineResult<()> {
        self.send(SweepCommand::SweepNow).await
    }

    pub async fn pause(&self) -> EngineResult<()> {
        self.send(SweepCommand::Pause).await
    }

    pub async fn resume(&self) -> EngineResult<()> {
        self.send(SweepCommand::Resume).await
    }

    pub async fn stop(&self) -> EngineResult<()> {
        self.send(SweepCommand::Stop).await
    }

    pub async fn state(&self) -> SweepState {
        self.state.read().await.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn config_from_settings() {
        let config = SweepConfig::from(&SweepSettings::default());
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.initial_backoff, Duration::from_secs(5));
    }

    #[test]
    fn delay_stays_within_jitter() {
        let config = SweepConfig::new(Duration::from_secs(60)).with_jitter(0.1);
        let delay = config.next_delay().as_secs_f64();
        assert!((54.0..=66.0).contains(&delay));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = SweepConfig::default().with_backoff(
            Duration::from_secs(5),
            Duration::from_secs(300),
            2.0,
        );
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(10), Duration::from_secs(300));
    }

    #[test]
    fn failed_rows_fail_the_pass() {
        assert!(report_outcome(RetryReport::default()).is_ok());
        let err = report_outcome(RetryReport {
            attempted: 3,
            succeeded: 1,
            failed: 2,
        })
        .unwrap_err();
        assert_eq!(err, "2 of 3 sync rows still failing");
    }

    #[tokio::test(start_paused = true)]
    async fn commands_drive_the_loop() {
        let sweep = RetrySweep::new(SweepConfig::new(Duration::from_secs(3600)).with_jitter(0.0));
        let handle = sweep.handle();
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let task = tokio::spawn(sweep.run(move || {
            let count = counter.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        handle.sweep_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(handle.is_paused().await);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.resume().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state().await.sweeps, 2);

        handle.stop().await.unwrap();
        task.await.unwrap();
        assert!(handle.sweep_now().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_recover() {
        let config = SweepConfig::new(Duration::from_secs(3600)).with_backoff(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
        );
        let sweep = RetrySweep::new(config);
        let handle = sweep.handle();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let task = tokio::spawn(sweep.run(move || {
            let attempts = counter.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err(format!("failure {n}")) } else { Ok(()) }
            }
        }));

        handle.sweep_now().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // 1 manual + 3 backoff retries (10ms, 20ms, 40ms), then normal interval
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let state = handle.state().await;
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());

        handle.stop().await.unwrap();
        task.await.unwrap();
    }
}
