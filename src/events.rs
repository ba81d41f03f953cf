use crate::common::errors::PlayerError;
use crate::common::types::GuildId;
use crate::track::Track;

/// The engine's public notification surface. Events reference queues by guild
/// id; consumers look the live queue up in the [`crate::player::Player`].
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// A track started streaming.
    TrackStart { guild_id: GuildId, track: Track },
    /// Exactly one track was appended or inserted.
    TrackAdd { guild_id: GuildId, track: Track },
    /// A batch of tracks was appended or inserted.
    TracksAdd { guild_id: GuildId, tracks: Vec<Track> },
    /// The current track finished or was stopped.
    TrackEnd { guild_id: GuildId, track: Track },
    /// Nothing left to play; the idle cooldown starts now.
    QueueEnd { guild_id: GuildId },
    /// The empty-room cooldown expired with no humans present.
    ChannelEmpty { guild_id: GuildId },
    /// The bot was removed from its voice channel by the platform.
    BotDisconnect { guild_id: GuildId },
    /// Background failure with no synchronous caller to return to.
    Error {
        guild_id: Option<GuildId>,
        error: PlayerError,
    },
    /// Voice transport fault (readiness timeout, drop during playback).
    ConnectionError { guild_id: GuildId, message: String },
}

/// Outbound event channel shared by the registry and its queues. Holds both
/// ends so emitting never fails; consumers pull from [`EventBus::subscribe`].
#[derive(Clone)]
pub(crate) struct EventBus {
    tx: flume::Sender<PlayerEvent>,
    rx: flume::Receiver<PlayerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn emit(&self, event: PlayerEvent) {
        tracing::trace!(?event, "player event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> flume::Receiver<PlayerEvent> {
        self.rx.clone()
    }
}
