//! Zone Reconciler: turns point snapshots into voice start/stop calls.
//!
//! Each zone is either `Inactive` or `Active`. An active zone remembers what
//! happened to its voice: playing, still waiting (output locked or sample
//! decoding), evicted by the pool, or impossible (sample failed to decode).
//! Only membership changes produce pool calls, so feeding the same snapshot
//! twice is free.
//!
//! Per zone, `start` and `stop` strictly alternate: a zone only starts when it
//! holds no voice and only stops the voice it holds. An evicted zone keeps its
//! `Active` status and is not restarted until it leaves and re-enters.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{EngineConfig, SoundMode};
use crate::dsp::sampler::SampleBuffer;
use crate::mapper::{IntensityRange, map_intensity, select_sample};
use crate::pool::{VoiceHandle, VoicePool, VoiceSource};
use crate::zones::{Point, Zone, ZoneIndex};

/// What an active zone's voice is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "voice", content = "handle", rename_all = "lowercase")]
pub enum Attachment {
    /// No voice yet; retried every tick.
    Pending,
    Playing(VoiceHandle),
    /// Pushed out by a newer voice.
    Evicted,
    /// The zone's sample cannot be decoded; it stays silent.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "attachment", rename_all = "lowercase")]
pub enum ZoneState {
    Inactive,
    Active(Attachment),
}

impl ZoneState {
    pub fn is_active(&self) -> bool {
        matches!(self, ZoneState::Active(_))
    }

    pub fn voice(&self) -> Option<VoiceHandle> {
        match self {
            ZoneState::Active(Attachment::Playing(handle)) => Some(*handle),
            _ => None,
        }
    }
}

/// Non-blocking view of one decoded sample.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Ready(Arc<SampleBuffer>),
    Failed,
    Pending,
}

/// Decoded samples as the reconciler sees them: ready, failed or pending.
pub trait SampleLookup {
    fn lookup(&self, sample_id: u32) -> CacheLookup;
}

/// Everything one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: u64,
    pub occupied: Vec<usize>,
    pub started: Vec<usize>,
    pub stopped: Vec<usize>,
    pub evicted: Vec<usize>,
    /// Active zones still waiting for a voice.
    pub deferred: Vec<usize>,
}

impl TickReport {
    /// True when no voice was started or stopped.
    pub fn is_quiet(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.evicted.is_empty()
    }
}

/// Zones containing at least one point, using the bounding-box shortcut.
pub fn occupied_zones(zones: &ZoneIndex, points: &[Point]) -> BTreeSet<usize> {
    zones
        .iter()
        .filter(|zone| points.iter().any(|p| zone.contains(*p)))
        .map(|zone| zone.id)
        .collect()
}

enum Resolved {
    Source(VoiceSource),
    Wait,
    Fail,
}

pub struct Reconciler {
    states: Vec<ZoneState>,
    mode: SoundMode,
    rate_range: [f64; 2],
    gamma: f64,
    sample_count: u32,
}

impl Reconciler {
    pub fn new(zone_count: usize, config: &EngineConfig) -> Self {
        Reconciler {
            states: vec![ZoneState::Inactive; zone_count],
            mode: config.mode,
            rate_range: config.rate_range,
            gamma: config.gamma,
            sample_count: config.sample_count,
        }
    }

    pub fn mode(&self) -> SoundMode {
        self.mode
    }

    pub fn states(&self) -> &[ZoneState] {
        &self.states
    }

    pub fn state_of(&self, zone_id: usize) -> Option<ZoneState> {
        self.states.get(zone_id).copied()
    }

    pub fn active_zones(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_active())
            .map(|(id, _)| id)
            .collect()
    }

    /// Bring zone states and voices in line with `points`.
    pub fn reconcile(
        &mut self,
        zones: &ZoneIndex,
        points: &[Point],
        pool: &mut VoicePool,
        samples: &impl SampleLookup,
        tick: u64,
    ) -> TickReport {
        if self.states.len() < zones.len() {
            self.states.resize(zones.len(), ZoneState::Inactive);
        }
        let occupied = occupied_zones(zones, points);
        let mut report = TickReport {
            tick,
            occupied: occupied.iter().copied().collect(),
            ..TickReport::default()
        };

        // Stops first so leaving zones free their slots before anyone evicts.
        for zone_id in 0..self.states.len() {
            if self.states[zone_id].is_active() && !occupied.contains(&zone_id) {
                if let Some(handle) = self.states[zone_id].voice() {
                    pool.stop(handle);
                    report.stopped.push(zone_id);
                }
                self.states[zone_id] = ZoneState::Inactive;
                info!("event=zone_exit module=reconciler zone={zone_id} tick={tick}");
            }
        }

        let range = zones.intensity_range();
        for &zone_id in &occupied {
            let Some(zone) = zones.get(zone_id) else {
                continue;
            };
            let state = self.states[zone_id];
            match state {
                ZoneState::Inactive => {
                    info!("event=zone_enter module=reconciler zone={zone_id} tick={tick}");
                    self.attach(zone, range, pool, samples, tick, &mut report);
                }
                ZoneState::Active(Attachment::Pending) => {
                    self.attach(zone, range, pool, samples, tick, &mut report);
                }
                ZoneState::Active(_) => {}
            }
        }

        report
    }

    fn attach(
        &mut self,
        zone: &Zone,
        range: IntensityRange,
        pool: &mut VoicePool,
        samples: &impl SampleLookup,
        tick: u64,
        report: &mut TickReport,
    ) {
        let source = match self.resolve(zone, range, samples) {
            Resolved::Source(source) => source,
            Resolved::Wait => {
                self.states[zone.id] = ZoneState::Active(Attachment::Pending);
                report.deferred.push(zone.id);
                return;
            }
            Resolved::Fail => {
                if self.states[zone.id] != ZoneState::Active(Attachment::Failed) {
                    warn!("event=zone_attach module=reconciler status=no_sample zone={}", zone.id);
                }
                self.states[zone.id] = ZoneState::Active(Attachment::Failed);
                return;
            }
        };

        match pool.start(zone.id, source, tick) {
            Ok(outcome) => {
                if let Some(evicted) = outcome.evicted {
                    if self.states.get(evicted.zone_id).and_then(ZoneState::voice)
                        == Some(evicted.handle)
                    {
                        self.states[evicted.zone_id] = ZoneState::Active(Attachment::Evicted);
                    }
                    report.evicted.push(evicted.zone_id);
                }
                self.states[zone.id] = ZoneState::Active(Attachment::Playing(outcome.handle));
                report.started.push(zone.id);
            }
            Err(e) => {
                debug!("event=zone_attach module=reconciler status=deferred zone={} error={e}", zone.id);
                self.states[zone.id] = ZoneState::Active(Attachment::Pending);
                report.deferred.push(zone.id);
            }
        }
    }

    fn resolve(&self, zone: &Zone, range: IntensityRange, samples: &impl SampleLookup) -> Resolved {
        match self.mode {
            SoundMode::Click => Resolved::Source(VoiceSource::Click {
                rate: map_intensity(zone.intensity, range, self.rate_range, self.gamma),
            }),
            SoundMode::Loop => {
                let sample_id = select_sample(zone.intensity, range, self.sample_count, self.gamma);
                match samples.lookup(sample_id) {
                    CacheLookup::Ready(buffer) => {
                        Resolved::Source(VoiceSource::Loop { sample_id, buffer })
                    }
                    CacheLookup::Pending => Resolved::Wait,
                    CacheLookup::Failed => Resolved::Fail,
                }
            }
        }
    }

    /// Switch sound mode: every voice stops and every zone goes inactive, so
    /// the next pass re-activates zones under the new mode. Returns false
    /// when `mode` is already current.
    pub fn set_mode(&mut self, mode: SoundMode, pool: &mut VoicePool) -> bool {
        if mode == self.mode {
            return false;
        }
        let stopped = pool.stop_all().len();
        self.states.fill(ZoneState::Inactive);
        info!(
            "event=mode_switch module=reconciler from={} to={mode} stopped={stopped}",
            self.mode
        );
        self.mode = mode;
        true
    }

    /// Stop everything and forget all activity.
    pub fn reset(&mut self, pool: &mut VoicePool) {
        pool.stop_all();
        self.states.fill(ZoneState::Inactive);
    }
}
