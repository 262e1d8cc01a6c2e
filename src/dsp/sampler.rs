//! Looped sample playback.
//!
//! A decoded sample is shared between every voice that plays it; voices only
//! own their read position and fade.

use std::sync::Arc;

use super::envelope::Fade;

/// A mono sample buffer loaded into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub data: Vec<f64>,
    /// Native sample rate of the audio.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f64>, sample_rate: u32) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Create from 16-bit signed PCM data.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        let data = pcm.iter().map(|&s| s as f64 / 32768.0).collect();
        SampleBuffer { data, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.sample_rate as f64
    }

    /// Linear interpolation at a fractional position, wrapping at the end
    /// so the last sample blends into the first.
    pub fn read_looped(&self, position: f64) -> f64 {
        let len = self.data.len();
        if len == 0 {
            return 0.0;
        }
        let position = position.rem_euclid(len as f64);
        let idx = position as usize % len;
        let next = (idx + 1) % len;
        let frac = position - position.floor();
        self.data[idx] * (1.0 - frac) + self.data[next] * frac
    }
}

/// A voice looping a whole buffer until released.
#[derive(Debug, Clone)]
pub struct LoopVoice {
    buffer: Arc<SampleBuffer>,
    position: f64,
    /// Read step per output sample (buffer rate / engine rate).
    step: f64,
    gain: f64,
    fade: Fade,
}

impl LoopVoice {
    pub fn new(buffer: Arc<SampleBuffer>, gain: f64, fade: Fade, engine_sample_rate: f64) -> Self {
        let step = if engine_sample_rate > 0.0 {
            buffer.sample_rate as f64 / engine_sample_rate
        } else {
            1.0
        };
        LoopVoice {
            buffer,
            position: 0.0,
            step,
            gain,
            fade,
        }
    }

    /// Generate the next audio sample.
    pub fn next_sample(&mut self) -> f64 {
        if self.fade.is_finished() || self.buffer.is_empty() {
            return 0.0;
        }
        let sample = self.buffer.read_looped(self.position);
        self.position = (self.position + self.step) % self.buffer.len() as f64;
        sample * self.fade.next_sample() * self.gain
    }

    pub fn release(&mut self) {
        self.fade.release();
    }

    pub fn is_finished(&self) -> bool {
        self.fade.is_finished() || self.buffer.is_empty()
    }
}
