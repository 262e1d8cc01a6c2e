//! Mixer: sums voice output into one block with master gain.

#[derive(Debug, Clone)]
pub struct Mixer {
    pub master_gain: f64,
    buffer: Vec<f64>,
}

impl Default for Mixer {
    fn default() -> Self {
        Mixer::new(1.0)
    }
}

impl Mixer {
    pub fn new(master_gain: f64) -> Self {
        Mixer {
            master_gain,
            buffer: Vec::new(),
        }
    }

    /// Start a new block of `frames` silent samples.
    pub fn begin(&mut self, frames: usize) {
        self.buffer.clear();
        self.buffer.resize(frames, 0.0);
    }

    /// Accumulate a whole voice into the block.
    pub fn accumulate(&mut self, mut source: impl FnMut() -> f64) {
        for slot in self.buffer.iter_mut() {
            *slot += source();
        }
    }

    /// The mixed block with master gain and soft clipping applied.
    pub fn finish(&self) -> Vec<f32> {
        self.buffer
            .iter()
            .map(|&s| soft_clip(s * self.master_gain) as f32)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Several looping zones at full level would clip hard; tanh keeps the sum
/// inside `[-1, 1]`.
fn soft_clip(x: f64) -> f64 {
    x.tanh()
}
