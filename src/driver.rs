//! Engine Driver: the periodic tick.
//!
//! One tick:
//! 1. make sure the output exists and try to resume it if suspended, at most
//!    once per backoff interval;
//! 2. fetch current positions (a failed fetch skips reconciliation and
//!    leaves every zone as it was);
//! 3. reconcile;
//! 4. render one tick of audio into the output.
//!
//! The driver owns the engine, so ticks never overlap. [`Driver::run`] drives
//! ticks on a tokio interval until [`ShutdownHandle::halt`] is called.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::assets::SampleSource;
use crate::engine::{Engine, EngineStatus};
use crate::error::{LocationFetchError, VoiceError};
use crate::location::LocationStore;
use crate::output::{AudioOutput, OutputState};
use crate::reconciler::TickReport;

#[derive(Debug)]
pub enum TickOutcome {
    Reconciled(TickReport),
    /// Positions could not be fetched; zone state is unchanged.
    Skipped(LocationFetchError),
    Halted,
}

/// Stops a running [`Driver::run`] loop from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn halt(&self) {
        self.tx.send_replace(true);
    }
}

pub struct Driver<L: LocationStore, O: AudioOutput, S: SampleSource> {
    engine: Engine<S>,
    store: L,
    output: O,
    interval: Duration,
    backoff: Duration,
    last_resume: Option<Instant>,
    halted: bool,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<L: LocationStore, O: AudioOutput, S: SampleSource> Driver<L, O, S> {
    pub fn new(engine: Engine<S>, store: L, output: O) -> Self {
        let config = engine.config();
        let interval = Duration::from_millis(config.tick_interval_ms);
        let backoff = Duration::from_millis(config.resume_backoff_ms);
        let (tx, _rx) = watch::channel(false);
        Driver {
            engine,
            store,
            output,
            interval,
            backoff,
            last_resume: None,
            halted: false,
            shutdown: Arc::new(tx),
        }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<S> {
        &mut self.engine
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Warm the sample cache and bring the output up.
    pub fn start(&mut self) {
        self.engine.preload();
        self.ensure_output(true);
    }

    fn sync_output_state(&mut self) -> OutputState {
        let state = self.output.state();
        self.engine.set_output_state(state);
        state
    }

    fn ensure_output(&mut self, force: bool) -> OutputState {
        let before = self.output.state();
        if before == OutputState::Uninitialized {
            self.output.create();
        }
        if self.output.state() == OutputState::Suspended {
            let now = Instant::now();
            let due = force
                || self
                    .last_resume
                    .is_none_or(|last| now.duration_since(last) >= self.backoff);
            if due {
                self.last_resume = Some(now);
                self.output.resume();
            }
        }
        let after = self.sync_output_state();
        if after != before {
            info!("event=output_state module=driver from={before} to={after}");
        }
        after
    }

    /// A user interaction happened; gesture-gated outputs may start now.
    pub fn unlock(&mut self) -> OutputState {
        let before = self.output.state();
        let after = self.output.unlock();
        self.engine.set_output_state(after);
        if after != before {
            info!("event=output_state module=driver from={before} to={after} cause=unlock");
        }
        after
    }

    /// The app came back to the foreground; resume without waiting for the
    /// backoff.
    pub fn on_foreground(&mut self) -> OutputState {
        if self.halted {
            return self.output.state();
        }
        self.ensure_output(true)
    }

    /// The platform is about to suspend audio.
    pub fn on_background(&mut self) {
        self.output.suspend();
        let state = self.sync_output_state();
        debug!("event=output_state module=driver to={state} cause=background");
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if self.halted {
            return TickOutcome::Halted;
        }
        let tick = self.engine.advance();
        self.ensure_output(false);

        let outcome = match self.store.current_positions().await {
            Ok(points) => {
                let report = self.engine.reconcile(&points);
                if !report.is_quiet() {
                    info!(
                        "event=tick module=driver tick={tick} started={:?} stopped={:?} evicted={:?} active={:?}",
                        report.started,
                        report.stopped,
                        report.evicted,
                        self.engine.active_zones()
                    );
                } else {
                    debug!("event=tick module=driver tick={tick} points={} quiet=true", points.len());
                }
                TickOutcome::Reconciled(report)
            }
            Err(e) => {
                warn!("event=location_fetch module=driver status=error tick={tick} error={e}");
                TickOutcome::Skipped(e)
            }
        };

        let frames = self.engine.config().frames_per_tick();
        self.render(frames);
        outcome
    }

    fn render(&mut self, frames: usize) {
        if frames == 0 || self.output.state() != OutputState::Running {
            return;
        }
        let block = self.engine.render(frames);
        if let Err(VoiceError::OutputUnavailable(state)) = self.output.write(&block) {
            warn!("event=output_write module=driver status=unavailable state={state}");
            self.engine.set_output_state(state);
        }
    }

    /// Stop every voice, let the fades play out and refuse further ticks.
    pub fn halt(&mut self) {
        if self.halted {
            return;
        }
        self.engine.halt();
        let tail = self.engine.tail_frames();
        self.render(tail);
        self.engine.silence_tails();
        self.halted = true;
        self.shutdown.send_replace(true);
    }

    /// Tick `count` times back to back, without waiting between ticks.
    pub async fn run_ticks(&mut self, count: u64) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..count {
            let outcome = self.tick().await;
            let halted = matches!(outcome, TickOutcome::Halted);
            outcomes.push(outcome);
            if halted {
                break;
            }
        }
        outcomes
    }

    /// Tick on the configured interval until halted through a
    /// [`ShutdownHandle`].
    pub async fn run(&mut self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "event=driver_run module=driver interval_ms={}",
            self.interval.as_millis()
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let TickOutcome::Halted = self.tick().await {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.halt();
        info!("event=driver_stop module=driver tick={}", self.engine.tick());
    }
}
