use serde::Serialize;
use thiserror::Error;

/// Every failure the player surfaces, either as a returned error for
/// synchronous misuse or as an emitted [`crate::events::PlayerEvent::Error`]
/// for background failures that have no caller to return to.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", content = "message", rename_all = "camelCase")]
pub enum PlayerError {
    #[error("no connection to voice channel")]
    NoConnection,

    #[error("audio resource is not available")]
    NoAudioResource,

    #[error("track not found")]
    TrackNotFound,

    #[error("cannot use destroyed queue")]
    DestroyedQueue,

    #[error("only voice or stage channels can be joined")]
    InvalidChannelType,

    #[error("unknown guild")]
    UnknownGuild,

    /// Fault surfaced by the playback engine, passed through unchanged.
    #[error("audio player error: {0}")]
    AudioPlayer(String),

    /// Fault while opening or reading a source stream.
    #[error("stream error: {0}")]
    Stream(String),

    /// Voice transport fault, including readiness timeouts.
    #[error("connection error: {0}")]
    Connection(String),
}

impl PlayerError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoConnection => "NoConnection",
            Self::NoAudioResource => "NoAudioResource",
            Self::TrackNotFound => "TrackNotFound",
            Self::DestroyedQueue => "DestroyedQueue",
            Self::InvalidChannelType => "InvalidChannelType",
            Self::UnknownGuild => "UnknownGuild",
            Self::AudioPlayer(_) => "AudioPlayerError",
            Self::Stream(_) => "StreamError",
            Self::Connection(_) => "ConnectionError",
        }
    }
}
