//! Autoscale controller — measurement-driven bandwidth limits.
//!
//! Each tick stops the shaping service, measures raw throughput, feeds it
//! through the per-direction histories, renders the config template, writes
//! the result and starts the service again. Ticks never overlap: a tick that
//! arrives while another is in flight is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use qoscale_core::{AutoscalerConfig, AutoscalerOptions, ConfigError, Direction, RateLimit, Throughput};

use crate::error::{TickError, TickStage};
use crate::event::AutoscaleEvent;
use crate::history::SampleHistory;
use crate::limit::{compute_direction_limit, validate_measurement};
use crate::output::{append_json_line, write_atomic};
use crate::probe::{MeasurementError, ThroughputProbe};
use crate::render::{load_template, RenderContext, Renderer};
use crate::service::ServiceController;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 64;

/// Limits applied by a successful tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedLimits {
    pub throughput: Throughput,
    pub up: RateLimit,
    pub down: RateLimit,
}

/// Result of asking for a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied(AppliedLimits),
    /// Another tick was already in progress.
    Skipped,
}

/// Up and down histories. Never shared between directions.
struct Histories {
    up: SampleHistory,
    down: SampleHistory,
}

impl Histories {
    fn get_mut(&mut self, direction: Direction) -> &mut SampleHistory {
        match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        }
    }
}

/// Timer state. `Running` always has a spawned loop behind it.
enum LoopState {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
}

/// One line of the optional history log.
#[derive(Serialize)]
struct HistoryRecord<'a> {
    timestamp: &'a str,
    download_bps: f64,
    upload_bps: f64,
    down: &'a RateLimit,
    up: &'a RateLimit,
}

struct Inner {
    config: AutoscalerConfig,
    probe: Arc<dyn ThroughputProbe>,
    renderer: Arc<dyn Renderer>,
    service: Arc<dyn ServiceController>,
    histories: tokio::sync::Mutex<Histories>,
    /// Set while a tick is executing.
    busy: AtomicBool,
    /// Signalled whenever a tick finishes.
    idle: Notify,
    ticks: AtomicU64,
    events: broadcast::Sender<AutoscaleEvent>,
}

/// Clears `busy` when a tick ends, however it ends.
struct BusyGuard<'a> {
    inner: &'a Inner,
}

impl<'a> BusyGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { inner })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
        self.inner.idle.notify_waiters();
    }
}

/// Drives periodic autoscale ticks for one shaping service.
pub struct AutoscaleController {
    inner: Arc<Inner>,
    state: Mutex<LoopState>,
}

impl AutoscaleController {
    /// Create an idle controller. No timer is armed until [`start`](Self::start).
    pub fn new(
        config: AutoscalerConfig,
        probe: Arc<dyn ThroughputProbe>,
        renderer: Arc<dyn Renderer>,
        service: Arc<dyn ServiceController>,
    ) -> Self {
        let histories = Histories {
            up: SampleHistory::new(config.max_entries(), config.window()),
            down: SampleHistory::new(config.max_entries(), config.window()),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                probe,
                renderer,
                service,
                histories: tokio::sync::Mutex::new(histories),
                busy: AtomicBool::new(false),
                idle: Notify::new(),
                ticks: AtomicU64::new(0),
                events,
            }),
            state: Mutex::new(LoopState::Idle),
        }
    }

    /// Validate `options` and create a controller.
    pub fn from_options(
        options: AutoscalerOptions,
        probe: Arc<dyn ThroughputProbe>,
        renderer: Arc<dyn Renderer>,
        service: Arc<dyn ServiceController>,
    ) -> Result<Self, ConfigError> {
        let config = AutoscalerConfig::new(options)?;
        Ok(Self::new(config, probe, renderer, service))
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.inner.config
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AutoscaleEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the periodic timer is armed.
    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), LoopState::Running { .. })
    }

    /// Whether a tick is executing right now.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Retained samples per direction (kbit/s, oldest first).
    pub async fn history(&self, direction: Direction) -> Vec<f64> {
        let mut histories = self.inner.histories.lock().await;
        histories.get_mut(direction).entries().collect()
    }

    /// Arm the timer and run the first tick immediately.
    ///
    /// Returns once the first tick has finished. Later ticks fire every
    /// `frequency` measured from the start of the first tick; a tick that
    /// overruns delays the next one rather than overlapping it. Calling
    /// `start` on a running controller does nothing.
    ///
    /// The first tick runs on the timer task, so dropping the returned
    /// future leaves the timer armed.
    pub async fn start(&self) {
        let (first_done_tx, first_done_rx) = oneshot::channel();
        {
            let mut state = self.lock_state();
            if matches!(*state, LoopState::Running { .. }) {
                debug!("autoscaler already running");
                return;
            }

            let config = &self.inner.config;
            info!(
                frequency_secs = config.frequency().as_secs(),
                window = config.window(),
                max_entries = config.max_entries(),
                "autoscaler started"
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), shutdown_rx, first_done_tx));
            *state = LoopState::Running {
                shutdown_tx,
                handle,
            };
        }

        // Dropped without a send if stopped before the first tick began.
        let _ = first_done_rx.await;
    }

    /// Disarm the timer. A tick already in flight runs to completion.
    ///
    /// Synchronous and non-blocking; safe to call from a signal handler
    /// task. No tick starts after this returns.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), LoopState::Idle);
        if let LoopState::Running { shutdown_tx, .. } = previous {
            let _ = shutdown_tx.send(true);
            info!("autoscaler stopped");
        }
    }

    /// [`stop`](Self::stop), then wait for the timer task and any in-flight
    /// tick to finish.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), LoopState::Idle);
        if let LoopState::Running {
            shutdown_tx,
            handle,
            ..
        } = previous
        {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
            info!("autoscaler stopped");
        }
        self.wait_idle().await;
    }

    /// Run one tick now, unless one is already running.
    pub async fn autoscale_once(&self) -> Result<TickOutcome, TickError> {
        self.inner.autoscale_once().await
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AutoscaleController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timer loop: the first tick immediately, then one every `frequency`.
/// Exits when the shutdown signal fires or its sender is gone.
async fn run_loop(
    inner: Arc<Inner>,
    mut shutdown: watch::Receiver<bool>,
    first_done: oneshot::Sender<()>,
) {
    if *shutdown.borrow() {
        return;
    }

    let frequency = inner.config.frequency();
    let first = Instant::now();
    inner.run_logged().await;
    let _ = first_done.send(());

    let mut interval = tokio::time::interval_at(first + frequency, frequency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("autoscale loop shutting down");
                break;
            }
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                inner.run_logged().await;
            }
        }
    }
}

impl Inner {
    fn emit(&self, event: AutoscaleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run a tick and log its outcome. Used by the timer.
    async fn run_logged(&self) {
        match self.autoscale_once().await {
            Ok(TickOutcome::Applied(applied)) => {
                info!(
                    up = %applied.up.formatted(),
                    down = %applied.down.formatted(),
                    "limits applied"
                );
            }
            Ok(TickOutcome::Skipped) => {}
            Err(e) if e.is_persistent() => {
                error!(stage = %e.stage(), error = %e, "autoscale tick failed; this will recur until fixed");
            }
            Err(e) => {
                warn!(stage = %e.stage(), error = %e, "autoscale tick failed");
            }
        }
    }

    async fn autoscale_once(&self) -> Result<TickOutcome, TickError> {
        let Some(_guard) = BusyGuard::acquire(self) else {
            warn!("previous autoscale tick still running; skipping");
            self.emit(AutoscaleEvent::TickSkipped);
            return Ok(TickOutcome::Skipped);
        };

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tick, "autoscale tick started");
        self.emit(AutoscaleEvent::TickStarted { tick });

        match self.execute().await {
            Ok(applied) => {
                self.emit(AutoscaleEvent::TickCompleted {
                    tick,
                    up_limit: applied.up.formatted(),
                    down_limit: applied.down.formatted(),
                });
                Ok(TickOutcome::Applied(applied))
            }
            Err(e) => {
                self.emit(AutoscaleEvent::TickFailed {
                    tick,
                    stage: e.stage(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// stop → measure → compute → render → write → start.
    async fn execute(&self) -> Result<AppliedLimits, TickError> {
        // Measuring through an active shaper would record the shaped rate,
        // so a failed stop aborts before anything is measured.
        let was_active = self
            .service
            .is_active()
            .await
            .map_err(|e| TickError::service(TickStage::StopService, e))?;
        if was_active {
            self.service
                .stop()
                .await
                .map_err(|e| TickError::service(TickStage::StopService, e))?;
        }
        debug!(was_active, "shaping service stopped");
        self.emit(AutoscaleEvent::ServiceStopped { was_active });

        let applied = match self.measure_and_write().await {
            Ok(applied) => applied,
            Err(e) => {
                if was_active {
                    self.restore_service().await;
                }
                return Err(e);
            }
        };

        self.service
            .start()
            .await
            .map_err(|e| TickError::service(TickStage::StartService, e))?;
        debug!("shaping service started");
        self.emit(AutoscaleEvent::ServiceStarted);

        Ok(applied)
    }

    async fn measure_and_write(&self) -> Result<AppliedLimits, TickError> {
        let throughput = self.measure().await?;
        let (up, down) = self.compute_limits(&throughput).await?;
        self.emit(AutoscaleEvent::LimitsComputed { up, down });

        let config = &self.config;
        let context = RenderContext::new(&up, &down, Local::now(), config.template(), config.output());
        let source = load_template(config.template()).await?;
        let rendered = self.renderer.render(&source, &context)?;

        write_atomic(config.output(), &rendered).await?;
        info!(path = %config.output().display(), up = %context.up_limit(), down = %context.down_limit(), "config written");
        self.emit(AutoscaleEvent::ConfigWritten {
            path: config.output().to_path_buf(),
        });

        if let Some(log) = config.history_log() {
            let record = HistoryRecord {
                timestamp: context.timestamp(),
                download_bps: throughput.download_bps,
                upload_bps: throughput.upload_bps,
                down: &down,
                up: &up,
            };
            if let Err(e) = append_json_line(log, &record).await {
                warn!(path = %log.display(), error = %e, "failed to append history log");
                self.emit(AutoscaleEvent::HistoryLogFailed {
                    error: e.to_string(),
                });
            }
        }

        Ok(AppliedLimits { throughput, up, down })
    }

    async fn measure(&self) -> Result<Throughput, MeasurementError> {
        let timeout = self.config.measure_timeout();
        self.emit(AutoscaleEvent::MeasurementStarted);

        let result = match tokio::time::timeout(timeout, self.probe.measure(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(MeasurementError::Timeout(timeout)),
        };

        match result {
            Ok(throughput) => {
                debug!(
                    download_bps = throughput.download_bps,
                    upload_bps = throughput.upload_bps,
                    "measurement completed"
                );
                self.emit(AutoscaleEvent::MeasurementCompleted {
                    download_bps: throughput.download_bps,
                    upload_bps: throughput.upload_bps,
                });
                Ok(throughput)
            }
            Err(e) => {
                self.emit(AutoscaleEvent::MeasurementFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Both directions are validated before either history is touched.
    async fn compute_limits(&self, throughput: &Throughput) -> Result<(RateLimit, RateLimit), TickError> {
        for direction in [Direction::Up, Direction::Down] {
            validate_measurement(throughput.kbit(direction))
                .map_err(|source| TickError::Limit { direction, source })?;
        }

        let mut histories = self.histories.lock().await;
        let mut limit_for = |direction: Direction| {
            compute_direction_limit(
                throughput.kbit(direction),
                histories.get_mut(direction),
                self.config.direction(direction),
            )
            .map_err(|source| TickError::Limit { direction, source })
        };

        let up = limit_for(Direction::Up)?;
        let down = limit_for(Direction::Down)?;
        debug!(
            up_smoothed = up.smoothed,
            down_smoothed = down.smoothed,
            up_limit = up.value,
            down_limit = down.value,
            "limits computed"
        );
        Ok((up, down))
    }

    /// Bring the service back on its previous config after a failed tick.
    async fn restore_service(&self) {
        match self.service.start().await {
            Ok(()) => {
                info!("shaping service restored with previous config");
                self.emit(AutoscaleEvent::ServiceRestored);
            }
            Err(e) => {
                error!(error = %e, "failed to restore shaping service; traffic is unshaped");
                self.emit(AutoscaleEvent::ServiceRestoreFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}
