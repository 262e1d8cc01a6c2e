use std::fmt;

use crate::output::OutputState;

#[derive(Debug)]
pub enum ZoneSoundError {
    Load(LoadError),
    Config(ConfigError),
    Voice(VoiceError),
    Decode(DecodeFailure),
    LocationFetch(LocationFetchError),
}

/// Malformed zone geometry. Fatal: the engine cannot start without zones.
#[derive(Debug)]
pub enum LoadError {
    Json(String),
    EmptyCollection,
    DegeneratePolygon { feature: usize },
    NonFiniteCoordinate { feature: usize },
    UnsupportedGeometry { feature: usize, kind: String },
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Json(String),
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceError {
    /// The output context is not running yet (locked or suspended).
    OutputUnavailable(OutputState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub sample_id: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationFetchError {
    Transport(String),
    Status(u16),
    Payload(String),
}

impl fmt::Display for ZoneSoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneSoundError::Load(e) => write!(f, "Zone load error: {e}"),
            ZoneSoundError::Config(e) => write!(f, "Config error: {e}"),
            ZoneSoundError::Voice(e) => write!(f, "Voice error: {e}"),
            ZoneSoundError::Decode(e) => write!(f, "Decode error: {e}"),
            ZoneSoundError::LocationFetch(e) => write!(f, "Location fetch error: {e}"),
        }
    }
}

impl std::error::Error for ZoneSoundError {}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Json(msg) => write!(f, "invalid GeoJSON: {msg}"),
            LoadError::EmptyCollection => write!(f, "zone collection has no features"),
            LoadError::DegeneratePolygon { feature } => {
                write!(f, "feature {feature} has a degenerate polygon ring")
            }
            LoadError::NonFiniteCoordinate { feature } => {
                write!(f, "feature {feature} has a non-finite coordinate")
            }
            LoadError::UnsupportedGeometry { feature, kind } => {
                write!(f, "feature {feature} has unsupported geometry '{kind}'")
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "cannot read config: {msg}"),
            ConfigError::Json(msg) => write!(f, "invalid config JSON: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::OutputUnavailable(state) => {
                write!(f, "audio output unavailable (state: {state})")
            }
        }
    }
}

impl std::error::Error for VoiceError {}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sample {} failed to decode: {}", self.sample_id, self.reason)
    }
}

impl std::error::Error for DecodeFailure {}

impl fmt::Display for LocationFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationFetchError::Transport(msg) => write!(f, "transport failure: {msg}"),
            LocationFetchError::Status(code) => write!(f, "store answered HTTP {code}"),
            LocationFetchError::Payload(msg) => write!(f, "unreadable payload: {msg}"),
        }
    }
}

impl std::error::Error for LocationFetchError {}

impl From<LoadError> for ZoneSoundError {
    fn from(e: LoadError) -> Self {
        ZoneSoundError::Load(e)
    }
}

impl From<ConfigError> for ZoneSoundError {
    fn from(e: ConfigError) -> Self {
        ZoneSoundError::Config(e)
    }
}

impl From<VoiceError> for ZoneSoundError {
    fn from(e: VoiceError) -> Self {
        ZoneSoundError::Voice(e)
    }
}

impl From<DecodeFailure> for ZoneSoundError {
    fn from(e: DecodeFailure) -> Self {
        ZoneSoundError::Decode(e)
    }
}

impl From<LocationFetchError> for ZoneSoundError {
    fn from(e: LocationFetchError) -> Self {
        ZoneSoundError::LocationFetch(e)
    }
}
