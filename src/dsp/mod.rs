//! DSP: the sound-producing side of the engine.
//!
//! Everything here renders sample by sample at the engine rate; the voice
//! pool decides which voices exist, these types decide what they sound like.

pub mod click;
#[cfg(feature = "runtime")]
pub mod decode;
pub mod envelope;
pub mod mixer;
pub mod sampler;
