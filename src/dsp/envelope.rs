//! Fade envelope: linear ramp in, hold, linear ramp out.
//!
//! Every voice starts and stops through one of these so that neither a
//! zone activation nor a stop produces an audible discontinuity.

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    FadeIn,
    Hold,
    FadeOut,
    Done,
}

#[derive(Debug, Clone)]
pub struct Fade {
    /// Fade-in time in seconds.
    pub fade_in: f64,
    /// Fade-out time in seconds.
    pub fade_out: f64,

    stage: Stage,
    level: f64,
    sample_rate: f64,
    stage_samples: usize,
    stage_counter: usize,
    /// Level at the moment the fade-out began.
    start_level: f64,
}

impl Fade {
    /// A fade that starts ramping in immediately.
    pub fn new(sample_rate: f64, fade_in: f64, fade_out: f64) -> Self {
        Fade {
            fade_in,
            fade_out,
            stage: Stage::FadeIn,
            level: 0.0,
            sample_rate,
            stage_samples: (fade_in.max(0.0) * sample_rate) as usize,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    /// Begin the fade-out from whatever level the envelope is at.
    /// Calling it again while fading out is a no-op.
    pub fn release(&mut self) {
        if matches!(self.stage, Stage::FadeOut | Stage::Done) {
            return;
        }
        self.stage = Stage::FadeOut;
        self.stage_samples = (self.fade_out.max(0.0) * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Generate the next gain value in `[0, 1]`.
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::FadeIn => {
                if self.stage_samples == 0 {
                    self.level = 1.0;
                    self.stage = Stage::Hold;
                } else {
                    self.level = self.stage_counter as f64 / self.stage_samples as f64;
                    self.stage_counter += 1;
                    if self.stage_counter >= self.stage_samples {
                        self.stage = Stage::Hold;
                    }
                }
            }
            Stage::Hold => {
                self.level = 1.0;
            }
            Stage::FadeOut => {
                if self.stage_samples == 0 {
                    self.level = 0.0;
                    self.stage = Stage::Done;
                } else {
                    let t = self.stage_counter as f64 / self.stage_samples as f64;
                    self.level = self.start_level * (1.0 - t);
                    self.stage_counter += 1;
                    if self.stage_counter >= self.stage_samples {
                        self.level = 0.0;
                        self.stage = Stage::Done;
                    }
                }
            }
            Stage::Done => {
                self.level = 0.0;
            }
        }
        self.level
    }

    pub fn is_releasing(&self) -> bool {
        matches!(self.stage, Stage::FadeOut | Stage::Done)
    }

    /// True once the fade-out has reached silence.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }
}
