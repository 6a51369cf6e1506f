use thiserror::Error;

/// Errors raised while building or configuring an [`AudioEngine`](crate::engine::AudioEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("wav encode: {0}")]
    WavEncode(#[from] hound::Error),
}

/// Errors raised while fetching or preparing an asset (instrument or impulse response).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("fetch failed for {location}: {message}")]
    Fetch { location: String, message: String },
    #[error("invalid preset {location}: {source}")]
    Preset {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("preset {0} has no sampler zones")]
    EmptyPreset(String),
    #[error("checksum mismatch for {location}: expected {expected}, got {actual}")]
    Checksum {
        location: String,
        expected: String,
        actual: String,
    },
    #[error("no preset configured for track {0}")]
    UnknownTrack(u32),
    #[error("external audio {0} needs an asset source")]
    ExternalAudio(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("wav decode: {0}")]
    Wav(#[from] hound::Error),
    #[error("base64 decode: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("unsupported bit depth: {0}")]
    BitDepth(u8),
    #[error("decoded audio is empty")]
    Empty,
    #[error("mp3 decode: {0}")]
    Mp3(String),
}

/// Why an instrument could not be resolved for a track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("track {0} has no instrument")]
    Unknown(u32),
    #[error("instrument for track {0} is not loaded yet")]
    NotReady(u32),
    #[error("instrument for track {0} failed to load")]
    Failed(u32),
    #[error("no loaded instrument named {0:?}")]
    UnknownPreset(String),
}

/// A single note could not be rendered. Never escapes a sequencer tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayError {
    #[error(transparent)]
    Unresolved(#[from] ResolveError),
    #[error("pitch {pitch} out of range for track {track_id}")]
    PitchOutOfRange { track_id: u32, pitch: i32 },
    #[error("no zone covers note {0}")]
    NoZone(u8),
}
