//! Audio output contract.
//!
//! The engine never talks to a device directly. It asks an [`AudioOutput`] to
//! exist, to resume after the platform suspended it, and to accept rendered
//! blocks. Platforms that gate audio behind a user gesture report
//! [`OutputState::Suspended`] until [`AudioOutput::unlock`] is called.

use std::fmt;
#[cfg(feature = "runtime")]
use std::fs::File;
#[cfg(feature = "runtime")]
use std::io::BufWriter;
#[cfg(feature = "runtime")]
use std::path::Path;

use serde::Serialize;

use crate::error::VoiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    /// No output context has been created yet.
    Uninitialized,
    /// Created but not producing sound (locked, backgrounded, interrupted).
    Suspended,
    Running,
    /// Torn down; cannot be resumed.
    Closed,
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputState::Uninitialized => "uninitialized",
            OutputState::Suspended => "suspended",
            OutputState::Running => "running",
            OutputState::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub trait AudioOutput: Send {
    fn state(&self) -> OutputState;

    fn sample_rate(&self) -> u32;

    /// Create the output context if it does not exist yet.
    fn create(&mut self);

    /// Try to get the context running. Returns the resulting state.
    fn resume(&mut self) -> OutputState;

    /// A user interaction happened; platforms that require a gesture may now
    /// resume.
    fn unlock(&mut self) -> OutputState {
        self.create();
        self.resume()
    }

    fn suspend(&mut self);

    fn close(&mut self);

    /// Accept one rendered mono block.
    fn write(&mut self, frames: &[f32]) -> Result<(), VoiceError>;
}

/// Discards audio. Used by tests and dry runs; optionally behaves like a
/// gesture-gated platform.
#[derive(Debug, Clone)]
pub struct NullOutput {
    state: OutputState,
    sample_rate: u32,
    needs_gesture: bool,
    unlocked: bool,
    frames_written: u64,
    peak: f32,
}

impl NullOutput {
    pub fn new(sample_rate: u32) -> Self {
        NullOutput {
            state: OutputState::Uninitialized,
            sample_rate,
            needs_gesture: false,
            unlocked: false,
            frames_written: 0,
            peak: 0.0,
        }
    }

    /// An output that refuses to run until [`AudioOutput::unlock`] is called.
    pub fn gesture_gated(sample_rate: u32) -> Self {
        NullOutput {
            needs_gesture: true,
            ..NullOutput::new(sample_rate)
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Largest absolute sample seen so far.
    pub fn peak(&self) -> f32 {
        self.peak
    }
}

impl AudioOutput for NullOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create(&mut self) {
        if self.state == OutputState::Uninitialized {
            self.state = OutputState::Suspended;
        }
    }

    fn resume(&mut self) -> OutputState {
        if self.state == OutputState::Suspended && (self.unlocked || !self.needs_gesture) {
            self.state = OutputState::Running;
        }
        self.state
    }

    fn unlock(&mut self) -> OutputState {
        self.unlocked = true;
        self.create();
        self.resume()
    }

    fn suspend(&mut self) {
        if self.state == OutputState::Running {
            self.state = OutputState::Suspended;
        }
    }

    fn close(&mut self) {
        self.state = OutputState::Closed;
    }

    fn write(&mut self, frames: &[f32]) -> Result<(), VoiceError> {
        if self.state != OutputState::Running {
            return Err(VoiceError::OutputUnavailable(self.state));
        }
        self.frames_written += frames.len() as u64;
        self.peak = frames.iter().fold(self.peak, |p, s| p.max(s.abs()));
        Ok(())
    }
}

/// Renders offline into a 16-bit mono WAV file.
#[cfg(feature = "runtime")]
pub struct WavOutput {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    state: OutputState,
    sample_rate: u32,
}

#[cfg(feature = "runtime")]
impl WavOutput {
    pub fn create_file(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(WavOutput {
            writer: Some(writer),
            state: OutputState::Suspended,
            sample_rate,
        })
    }

    /// Flush the header and close the file.
    pub fn finalize(&mut self) -> Result<(), hound::Error> {
        self.state = OutputState::Closed;
        match self.writer.take() {
            Some(writer) => writer.finalize(),
            None => Ok(()),
        }
    }
}

#[cfg(feature = "runtime")]
impl AudioOutput for WavOutput {
    fn state(&self) -> OutputState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create(&mut self) {}

    fn resume(&mut self) -> OutputState {
        if self.state == OutputState::Suspended {
            self.state = OutputState::Running;
        }
        self.state
    }

    fn suspend(&mut self) {
        if self.state == OutputState::Running {
            self.state = OutputState::Suspended;
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.finalize() {
            log::warn!("event=output_close module=output status=error error={e}");
        }
    }

    fn write(&mut self, frames: &[f32]) -> Result<(), VoiceError> {
        let state = self.state;
        let Some(writer) = self.writer.as_mut().filter(|_| state == OutputState::Running) else {
            return Err(VoiceError::OutputUnavailable(state));
        };
        for &s in frames {
            let pcm = (s as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16;
            if let Err(e) = writer.write_sample(pcm) {
                log::error!("event=output_write module=output status=error error={e}");
                self.state = OutputState::Closed;
                return Err(VoiceError::OutputUnavailable(OutputState::Closed));
            }
        }
        Ok(())
    }
}
