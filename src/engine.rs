//! The engine instance: zone index, zone states, voice pool and sample cache.
//!
//! All mutable state lives here and is touched from one place at a time; the
//! driver owns the engine and calls into it once per tick.

use log::info;
use serde::Serialize;

use crate::assets::{AssetCache, SampleSource};
use crate::config::{EngineConfig, MAX_FADE_SECS, SoundMode};
use crate::error::ZoneSoundError;
use crate::output::OutputState;
use crate::pool::{PoolEvent, VoiceInfo, VoicePool};
use crate::reconciler::{Reconciler, TickReport, ZoneState};
use crate::zones::{Point, ZoneIndex};

/// Read-only snapshot for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub mode: SoundMode,
    pub active_zones: Vec<usize>,
    pub live_voices: usize,
    pub output_state: OutputState,
    pub tick: u64,
}

pub struct Engine<S: SampleSource> {
    config: EngineConfig,
    zones: ZoneIndex,
    reconciler: Reconciler,
    pool: VoicePool,
    assets: AssetCache<S>,
    tick: u64,
}

impl<S: SampleSource> Engine<S> {
    pub fn new(config: EngineConfig, zones: ZoneIndex, source: S) -> Self {
        let reconciler = Reconciler::new(zones.len(), &config);
        let pool = VoicePool::new(&config);
        info!(
            "event=engine_init module=engine zones={} capacity={} mode={}",
            zones.len(),
            pool.capacity(),
            config.mode
        );
        Engine {
            config,
            zones,
            reconciler,
            pool,
            assets: AssetCache::new(source),
            tick: 0,
        }
    }

    /// Load zones from GeoJSON using the configured intensity property.
    pub fn from_geojson(config: EngineConfig, geojson: &str, source: S) -> Result<Self, ZoneSoundError> {
        config.validate()?;
        let zones = ZoneIndex::load(geojson, &config.intensity_property, config.fallback_range())?;
        Ok(Engine::new(config, zones, source))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZoneIndex {
        &self.zones
    }

    pub fn assets(&self) -> &AssetCache<S> {
        &self.assets
    }

    pub fn mode(&self) -> SoundMode {
        self.reconciler.mode()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn zone_states(&self) -> &[ZoneState] {
        self.reconciler.states()
    }

    pub fn active_zones(&self) -> Vec<usize> {
        self.reconciler.active_zones()
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.pool.voices()
    }

    pub fn drain_voice_events(&mut self) -> Vec<PoolEvent> {
        self.pool.drain_events()
    }

    /// Start decoding every loop sample in the background.
    pub fn preload(&self) {
        self.assets.preload(1..=self.config.sample_count);
    }

    /// Advance the tick counter. Called once per driver tick, whether or not
    /// positions could be fetched.
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn reconcile(&mut self, points: &[Point]) -> TickReport {
        self.reconciler
            .reconcile(&self.zones, points, &mut self.pool, &self.assets, self.tick)
    }

    pub fn set_mode(&mut self, mode: SoundMode) -> bool {
        self.reconciler.set_mode(mode, &mut self.pool)
    }

    pub fn set_output_state(&mut self, state: OutputState) {
        self.pool.set_output_state(state);
    }

    /// Stop every voice and return every zone to inactive.
    pub fn halt(&mut self) {
        self.reconciler.reset(&mut self.pool);
        info!("event=engine_halt module=engine tick={}", self.tick);
    }

    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        self.pool.render(frames)
    }

    /// Frames needed to play out every fade tail.
    pub fn tail_frames(&self) -> usize {
        if self.pool.tail_count() == 0 {
            return 0;
        }
        let secs = self.config.fade_out_secs.clamp(0.0, MAX_FADE_SECS);
        (secs * self.config.sample_rate as f64).ceil() as usize + 1
    }

    pub fn silence_tails(&mut self) {
        self.pool.silence_tails();
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.mode(),
            active_zones: self.active_zones(),
            live_voices: self.pool.live_count(),
            output_state: self.pool.output_state(),
            tick: self.tick,
        }
    }
}
