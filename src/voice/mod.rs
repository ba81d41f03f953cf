//! Boundary to the external voice transport, playback engine and track
//! resolver. The engine never touches the wire itself; embedders implement
//! these traits over their platform library and the dispatcher supervises
//! whatever they hand back.

pub mod dispatcher;
pub mod resource;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::common::errors::PlayerError;
use crate::common::types::{ChannelId, GuildId, UserId};
use crate::track::Track;

pub use dispatcher::{StreamDispatcher, StreamOptions, VoiceEvent};
pub use resource::{AudioResource, ByteStream, StreamType, VolumeControl};

/// Voice transport connection state as reported by the platform library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected { reason: DisconnectReason },
    Destroyed,
}

impl ConnectionStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Signalling => StatusKind::Signalling,
            Self::Connecting => StatusKind::Connecting,
            Self::Ready => StatusKind::Ready,
            Self::Disconnected { .. } => StatusKind::Disconnected,
            Self::Destroyed => StatusKind::Destroyed,
        }
    }
}

/// [`ConnectionStatus`] without payloads, for state comparisons and waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The signalling websocket was closed with the given code. Code 4014 is
    /// the platform's forced-move/kick signal.
    WebsocketClose { code: u16 },
    /// The transport adapter went away (shard died, endpoint removed).
    AdapterUnavailable,
    /// We asked for the disconnect ourselves.
    Manual,
}

/// Playback engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
    AutoPaused,
}

/// A playback-engine state snapshot: the status plus the resource it applies
/// to, so an `Idle` transition still names the resource that just ended.
#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub resource: Option<Arc<AudioResource>>,
}

/// Out-of-band playback engine notifications (non-state faults, debug chatter).
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Error(PlayerError),
    Debug(String),
}

/// A voice-capable (or not) channel the bot can be asked to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Stage,
    Text,
}

impl ChannelKind {
    pub fn is_voice_based(self) -> bool {
        matches!(self, Self::Voice | Self::Stage)
    }
}

/// A member's voice-state change, as consumed from the platform gateway.
/// Only the fields the registry needs for empty-room detection.
#[derive(Debug, Clone)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub user_is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

/// One live transport connection. Implementations broadcast every state
/// transition through the returned watch channel.
pub trait VoiceConnection: Send + Sync {
    fn state(&self) -> watch::Receiver<ConnectionStatus>;

    fn status(&self) -> ConnectionStatus {
        self.state().borrow().clone()
    }

    /// How many rejoins have been attempted since the last successful
    /// connection.
    fn rejoin_attempts(&self) -> u32;

    /// Re-establish the dropped connection without changing target channel.
    fn rejoin(&self);

    /// Tear the connection down. Errors if the transport is already gone.
    fn destroy(&self) -> Result<(), PlayerError>;
}

/// One playback engine instance, created per connection by the joiner.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, resource: Arc<AudioResource>) -> Result<(), PlayerError>;

    /// Returns whether the engine accepted the pause.
    fn pause(&self, interpolate_silence: bool) -> bool;

    /// Returns whether the engine accepted the resume.
    fn unpause(&self) -> bool;

    fn stop(&self, force: bool);

    fn state(&self) -> watch::Receiver<PlaybackState>;

    fn status(&self) -> PlaybackStatus {
        self.state().borrow().status
    }

    /// Error/debug side channel. Engines with nothing to report may use the
    /// default, which yields a channel that never produces.
    fn events(&self) -> flume::Receiver<PlaybackEvent> {
        let (_tx, rx) = flume::unbounded();
        rx
    }
}

/// A freshly joined voice channel: the connection and its playback engine.
pub struct JoinedVoice {
    pub connection: Arc<dyn VoiceConnection>,
    pub player: Arc<dyn AudioPlayer>,
}

/// Joins voice channels on behalf of queues.
#[async_trait]
pub trait VoiceJoiner: Send + Sync {
    /// Join `channel`, optionally self-deafened. `PlayerError::UnknownGuild`
    /// if the guild cannot be resolved on the platform side.
    async fn join(&self, channel: &ChannelRef, deaf: bool) -> Result<JoinedVoice, PlayerError>;

    /// Server-deafen or undeafen the bot in `guild`.
    async fn set_deaf(&self, guild: &GuildId, deaf: bool) -> Result<(), PlayerError>;
}

/// Opens a readable byte stream for a track, routed on its source tag.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn open(&self, track: &Track) -> Result<OpenedStream, PlayerError>;
}

pub struct OpenedStream {
    pub stream: ByteStream,
    pub kind: StreamType,
}

/// Live voice-channel occupancy, queried by the registry's cooldown polls.
pub trait ChannelDirectory: Send + Sync {
    /// Number of non-bot members currently in `channel`.
    fn non_bot_occupants(&self, channel: ChannelId) -> usize;

    /// The voice channel the bot currently occupies in `guild`, if any.
    fn bot_channel(&self, guild: &GuildId) -> Option<ChannelId>;
}

/// Waits until the connection reports the target state, bounded by `deadline`.
/// The current state counts, so callers never miss an already-reached target.
pub async fn await_status(
    connection: &dyn VoiceConnection,
    target: StatusKind,
    deadline: Duration,
) -> Result<(), PlayerError> {
    let mut state = connection.state();
    match tokio::time::timeout(deadline, state.wait_for(|s| s.kind() == target)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(PlayerError::Connection(
            "connection state channel closed".to_string(),
        )),
        Err(_) => Err(PlayerError::Connection(format!(
            "timed out waiting for connection to become {target:?}"
        ))),
    }
}
