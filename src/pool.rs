//! Voice Pool: a bounded set of sounding voices.
//!
//! At most `capacity` voices are live at once. Starting a voice on a full pool
//! evicts the oldest-started one (lowest zone id on a tie) before the new one
//! is inserted. Stopped and evicted voices leave the live set immediately and
//! finish their fade-out as a tail that is mixed until silent; tails never
//! count against the capacity and can never be restarted.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::config::{EngineConfig, SoundMode};
use crate::dsp::click::ClickVoice;
use crate::dsp::envelope::Fade;
use crate::dsp::mixer::Mixer;
use crate::dsp::sampler::{LoopVoice, SampleBuffer};
use crate::error::VoiceError;
use crate::output::OutputState;

/// Identifies one started voice. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VoiceHandle(u64);

impl fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// What a new voice should play.
#[derive(Debug, Clone)]
pub enum VoiceSource {
    Click { rate: f64 },
    Loop { sample_id: u32, buffer: Arc<SampleBuffer> },
}

impl VoiceSource {
    pub fn kind(&self) -> SoundMode {
        match self {
            VoiceSource::Click { .. } => SoundMode::Click,
            VoiceSource::Loop { .. } => SoundMode::Loop,
        }
    }
}

#[derive(Debug, Clone)]
enum VoiceBody {
    Click(ClickVoice),
    Loop(LoopVoice),
}

impl VoiceBody {
    fn next_sample(&mut self) -> f64 {
        match self {
            VoiceBody::Click(v) => v.next_sample(),
            VoiceBody::Loop(v) => v.next_sample(),
        }
    }

    fn release(&mut self) {
        match self {
            VoiceBody::Click(v) => v.release(),
            VoiceBody::Loop(v) => v.release(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            VoiceBody::Click(v) => v.is_finished(),
            VoiceBody::Loop(v) => v.is_finished(),
        }
    }
}

#[derive(Debug, Clone)]
struct LiveVoice {
    handle: VoiceHandle,
    zone_id: usize,
    kind: SoundMode,
    started_at_tick: u64,
    sample_id: Option<u32>,
    body: VoiceBody,
}

/// A voice that was pushed out to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub handle: VoiceHandle,
    pub zone_id: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub handle: VoiceHandle,
    pub evicted: Option<Eviction>,
}

/// Start/stop history, drained by the owner for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Started { zone_id: usize, handle: VoiceHandle, kind: SoundMode },
    Stopped { zone_id: usize, handle: VoiceHandle, evicted: bool },
}

/// Snapshot of one live voice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceInfo {
    pub handle: VoiceHandle,
    pub zone_id: usize,
    pub kind: SoundMode,
    pub started_at_tick: u64,
    /// Click rate in Hz, for click voices.
    pub rate: Option<f64>,
    /// Looped sample id, for loop voices.
    pub sample_id: Option<u32>,
}

pub struct VoicePool {
    capacity: usize,
    live: Vec<LiveVoice>,
    tails: Vec<VoiceBody>,
    next_handle: u64,
    output_state: OutputState,
    sample_rate: f64,
    fade_in: f64,
    fade_out: f64,
    click_jitter: f64,
    mixer: Mixer,
    events: Vec<PoolEvent>,
}

impl VoicePool {
    pub fn new(config: &EngineConfig) -> Self {
        VoicePool {
            capacity: config.voice_capacity.max(1),
            live: Vec::with_capacity(config.voice_capacity),
            tails: Vec::new(),
            next_handle: 1,
            output_state: OutputState::Uninitialized,
            sample_rate: config.sample_rate as f64,
            fade_in: config.fade_in_secs,
            fade_out: config.fade_out_secs,
            click_jitter: config.click_jitter,
            mixer: Mixer::new(1.0),
            events: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: VoiceHandle) -> bool {
        self.live.iter().any(|v| v.handle == handle)
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.live
            .iter()
            .map(|v| VoiceInfo {
                handle: v.handle,
                zone_id: v.zone_id,
                kind: v.kind,
                started_at_tick: v.started_at_tick,
                rate: match &v.body {
                    VoiceBody::Click(click) => Some(click.rate()),
                    VoiceBody::Loop(_) => None,
                },
                sample_id: v.sample_id,
            })
            .collect()
    }

    /// The pool refuses to start voices unless the output is running.
    pub fn set_output_state(&mut self, state: OutputState) {
        self.output_state = state;
    }

    pub fn output_state(&self) -> OutputState {
        self.output_state
    }

    /// Start a voice for `zone_id`, evicting the oldest voice if full.
    pub fn start(
        &mut self,
        zone_id: usize,
        source: VoiceSource,
        tick: u64,
    ) -> Result<StartOutcome, VoiceError> {
        if self.output_state != OutputState::Running {
            return Err(VoiceError::OutputUnavailable(self.output_state));
        }

        let evicted = if self.live.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        let handle = VoiceHandle(self.next_handle);
        self.next_handle += 1;

        let kind = source.kind();
        let sample_id = match &source {
            VoiceSource::Loop { sample_id, .. } => Some(*sample_id),
            VoiceSource::Click { .. } => None,
        };
        let fade = Fade::new(self.sample_rate, self.fade_in, self.fade_out);
        let body = match source {
            VoiceSource::Click { rate } => VoiceBody::Click(ClickVoice::new(
                rate,
                self.click_jitter,
                fade,
                self.sample_rate,
                ((zone_id as u64) << 32) ^ handle.0,
            )),
            VoiceSource::Loop { buffer, .. } => {
                VoiceBody::Loop(LoopVoice::new(buffer, 1.0, fade, self.sample_rate))
            }
        };

        self.live.push(LiveVoice {
            handle,
            zone_id,
            kind,
            started_at_tick: tick,
            sample_id,
            body,
        });
        self.events.push(PoolEvent::Started { zone_id, handle, kind });
        debug!("event=voice_start module=pool zone={zone_id} handle={handle} kind={kind} tick={tick}");

        Ok(StartOutcome { handle, evicted })
    }

    fn evict_oldest(&mut self) -> Option<Eviction> {
        let idx = self
            .live
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| (v.started_at_tick, v.zone_id))
            .map(|(idx, _)| idx)?;
        let mut voice = self.live.remove(idx);
        voice.body.release();
        self.tails.push(voice.body);
        self.events.push(PoolEvent::Stopped {
            zone_id: voice.zone_id,
            handle: voice.handle,
            evicted: true,
        });
        info!(
            "event=voice_evict module=pool zone={} handle={} capacity={}",
            voice.zone_id, voice.handle, self.capacity
        );
        Some(Eviction {
            handle: voice.handle,
            zone_id: voice.zone_id,
        })
    }

    /// Fade out and drop a voice. Returns false when the handle was not live.
    pub fn stop(&mut self, handle: VoiceHandle) -> bool {
        let Some(idx) = self.live.iter().position(|v| v.handle == handle) else {
            return false;
        };
        let mut voice = self.live.remove(idx);
        voice.body.release();
        self.tails.push(voice.body);
        self.events.push(PoolEvent::Stopped {
            zone_id: voice.zone_id,
            handle,
            evicted: false,
        });
        debug!("event=voice_stop module=pool zone={} handle={handle}", voice.zone_id);
        true
    }

    /// Stop every live voice; returns the zones that lost their voice.
    pub fn stop_all(&mut self) -> Vec<usize> {
        let handles: Vec<(VoiceHandle, usize)> =
            self.live.iter().map(|v| (v.handle, v.zone_id)).collect();
        for (handle, _) in &handles {
            self.stop(*handle);
        }
        handles.into_iter().map(|(_, zone)| zone).collect()
    }

    /// Drop fade tails immediately, e.g. when the output closes.
    pub fn silence_tails(&mut self) {
        self.tails.clear();
    }

    /// Number of stopped voices still fading out.
    pub fn tail_count(&self) -> usize {
        self.tails.len()
    }

    /// Render `frames` samples of every live voice and fade tail.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        self.mixer.begin(frames);
        for voice in self.live.iter_mut() {
            self.mixer.accumulate(|| voice.body.next_sample());
        }
        for tail in self.tails.iter_mut() {
            self.mixer.accumulate(|| tail.next_sample());
        }
        self.tails.retain(|t| !t.is_finished());
        self.mixer.finish()
    }

    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.events)
    }
}
