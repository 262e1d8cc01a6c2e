//! Click voice: a periodic percussive burst.
//!
//! The click rate is fixed at construction (it comes from the zone's
//! intensity). Randomness lives here only: each burst gets a small pitch and
//! level jitter so a steady rate does not sound like a metronome.

use std::f64::consts::TAU;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::envelope::Fade;

/// Nominal pitch of the tonal part of a click.
const CLICK_PITCH_HZ: f64 = 1800.0;
/// Burst length in seconds.
const BURST_SECS: f64 = 0.03;
/// Amplitude decay time constant in seconds.
const DECAY_SECS: f64 = 0.004;
/// Share of noise in the burst.
const NOISE_MIX: f64 = 0.35;

#[derive(Debug, Clone)]
struct Burst {
    phase: f64,
    phase_inc: f64,
    amp: f64,
    remaining: usize,
}

#[derive(Debug, Clone)]
pub struct ClickVoice {
    rate: f64,
    period: f64,
    until_next: f64,
    burst: Option<Burst>,
    decay: f64,
    jitter: f64,
    sample_rate: f64,
    fade: Fade,
    rng: SmallRng,
}

impl ClickVoice {
    /// `rate` is in clicks per second; `seed` makes the jitter reproducible.
    pub fn new(rate: f64, jitter: f64, fade: Fade, sample_rate: f64, seed: u64) -> Self {
        let rate = rate.max(f64::MIN_POSITIVE);
        ClickVoice {
            rate,
            period: sample_rate / rate,
            until_next: 0.0,
            burst: None,
            decay: (-1.0 / (DECAY_SECS * sample_rate)).exp(),
            jitter: jitter.clamp(0.0, 0.5),
            sample_rate,
            fade,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn trigger(&mut self) {
        let j = self.jitter;
        let pitch = CLICK_PITCH_HZ * (1.0 + self.rng.random_range(-j..=j));
        let amp = 1.0 - self.rng.random_range(0.0..=j);
        self.burst = Some(Burst {
            phase: 0.0,
            phase_inc: pitch / self.sample_rate,
            amp,
            remaining: (BURST_SECS * self.sample_rate) as usize,
        });
    }

    /// Generate the next audio sample.
    pub fn next_sample(&mut self) -> f64 {
        if self.fade.is_finished() {
            return 0.0;
        }

        if self.until_next <= 0.0 {
            if !self.fade.is_releasing() {
                self.trigger();
            }
            self.until_next += self.period;
        }
        self.until_next -= 1.0;

        let gain = self.fade.next_sample();
        let noise = self.rng.random_range(-1.0..=1.0);
        let Some(burst) = self.burst.as_mut() else {
            return 0.0;
        };

        let tone = (TAU * burst.phase).sin();
        let sample = ((1.0 - NOISE_MIX) * tone + NOISE_MIX * noise) * burst.amp;

        burst.phase = (burst.phase + burst.phase_inc).fract();
        burst.amp *= self.decay;
        burst.remaining = burst.remaining.saturating_sub(1);
        if burst.remaining == 0 {
            self.burst = None;
        }

        sample * gain
    }

    pub fn release(&mut self) {
        self.fade.release();
    }

    pub fn is_finished(&self) -> bool {
        self.fade.is_finished()
    }
}
