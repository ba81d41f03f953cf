#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use tunelink::PlayerError;
use tunelink::common::types::{ChannelId, GuildId, UserId};
use tunelink::config::QueueConfig;
use tunelink::events::PlayerEvent;
use tunelink::player::{Player, PlayerOptions};
use tunelink::track::{Track, TrackInfo, TrackSource};
use tunelink::voice::{
    AudioPlayer, AudioResource, ByteStream, ChannelDirectory, ChannelKind, ChannelRef,
    ConnectionStatus, JoinedVoice, OpenedStream, PlaybackState, PlaybackStatus, SourceResolver,
    StreamType, VoiceConnection, VoiceJoiner,
};

pub const BOT_USER: UserId = UserId(1);

/// Scripted voice transport. Tests drive state transitions through
/// [`MockConnection::set_status`]; a `rejoin` call succeeds instantly by
/// jumping back to `Ready`.
pub struct MockConnection {
    tx: watch::Sender<ConnectionStatus>,
    attempts: AtomicU32,
    rejoin_calls: AtomicU32,
}

impl MockConnection {
    pub fn new(initial: ConnectionStatus) -> Arc<Self> {
        let (tx, _rx) = watch::channel(initial);
        Arc::new(Self {
            tx,
            attempts: AtomicU32::new(0),
            rejoin_calls: AtomicU32::new(0),
        })
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        let _ = self.tx.send(status);
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub fn rejoin_calls(&self) -> u32 {
        self.rejoin_calls.load(Ordering::SeqCst)
    }

    pub fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::SeqCst);
    }
}

impl VoiceConnection for MockConnection {
    fn state(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    fn rejoin_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn rejoin(&self) {
        self.rejoin_calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(ConnectionStatus::Ready);
    }

    fn destroy(&self) -> Result<(), PlayerError> {
        if matches!(*self.tx.borrow(), ConnectionStatus::Destroyed) {
            return Err(PlayerError::Connection(
                "transport already destroyed".to_string(),
            ));
        }
        let _ = self.tx.send(ConnectionStatus::Destroyed);
        Ok(())
    }
}

/// Scripted playback engine: playing a resource succeeds immediately, and
/// tests end tracks by calling [`MockEngine::finish_current`].
pub struct MockEngine {
    tx: watch::Sender<PlaybackState>,
    reject_play: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = watch::channel(PlaybackState::default());
        Arc::new(Self {
            tx,
            reject_play: AtomicBool::new(false),
        })
    }

    pub fn reject_next_play(&self) {
        self.reject_play.store(true, Ordering::SeqCst);
    }

    /// Simulates the current resource reaching end of stream.
    pub fn finish_current(&self) {
        let resource = self.tx.borrow().resource.clone();
        let _ = self.tx.send(PlaybackState {
            status: PlaybackStatus::Idle,
            resource,
        });
    }

    pub fn playing(&self) -> Option<Arc<AudioResource>> {
        let state = self.tx.borrow().clone();
        (state.status == PlaybackStatus::Playing)
            .then_some(state.resource)
            .flatten()
    }
}

impl AudioPlayer for MockEngine {
    fn play(&self, resource: Arc<AudioResource>) -> Result<(), PlayerError> {
        if self.reject_play.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::AudioPlayer("engine refused".to_string()));
        }
        let _ = self.tx.send(PlaybackState {
            status: PlaybackStatus::Playing,
            resource: Some(resource),
        });
        Ok(())
    }

    fn pause(&self, _interpolate_silence: bool) -> bool {
        let state = self.tx.borrow().clone();
        if state.status != PlaybackStatus::Playing {
            return false;
        }
        let _ = self.tx.send(PlaybackState {
            status: PlaybackStatus::Paused,
            resource: state.resource,
        });
        true
    }

    fn unpause(&self) -> bool {
        let state = self.tx.borrow().clone();
        if state.status != PlaybackStatus::Paused {
            return false;
        }
        let _ = self.tx.send(PlaybackState {
            status: PlaybackStatus::Playing,
            resource: state.resource,
        });
        true
    }

    fn stop(&self, _force: bool) {
        self.finish_current();
    }

    fn state(&self) -> watch::Receiver<PlaybackState> {
        self.tx.subscribe()
    }
}

/// Hands out a fresh scripted connection and engine per join and keeps the
/// most recent pair for the test to drive.
pub struct MockJoiner {
    last_connection: Mutex<Option<Arc<MockConnection>>>,
    last_engine: Mutex<Option<Arc<MockEngine>>>,
    deaf_calls: Mutex<Vec<(GuildId, bool)>>,
    fail_joins: AtomicBool,
}

impl MockJoiner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_connection: Mutex::new(None),
            last_engine: Mutex::new(None),
            deaf_calls: Mutex::new(Vec::new()),
            fail_joins: AtomicBool::new(false),
        })
    }

    pub fn fail_joins(&self) {
        self.fail_joins.store(true, Ordering::SeqCst);
    }

    pub fn connection(&self) -> Arc<MockConnection> {
        self.last_connection
            .lock()
            .clone()
            .expect("no join has happened yet")
    }

    pub fn engine(&self) -> Arc<MockEngine> {
        self.last_engine
            .lock()
            .clone()
            .expect("no join has happened yet")
    }

    pub fn deaf_calls(&self) -> Vec<(GuildId, bool)> {
        self.deaf_calls.lock().clone()
    }
}

#[async_trait]
impl VoiceJoiner for MockJoiner {
    async fn join(&self, _channel: &ChannelRef, _deaf: bool) -> Result<JoinedVoice, PlayerError> {
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(PlayerError::UnknownGuild);
        }
        let connection = MockConnection::new(ConnectionStatus::Ready);
        let engine = MockEngine::new();
        *self.last_connection.lock() = Some(connection.clone());
        *self.last_engine.lock() = Some(engine.clone());
        Ok(JoinedVoice {
            connection,
            player: engine,
        })
    }

    async fn set_deaf(&self, guild: &GuildId, deaf: bool) -> Result<(), PlayerError> {
        self.deaf_calls.lock().push((guild.clone(), deaf));
        Ok(())
    }
}

/// Resolver that streams a few in-memory bytes for any track.
pub struct MockResolver {
    fail: AtomicBool,
}

impl MockResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_next_open(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceResolver for MockResolver {
    async fn open(&self, track: &Track) -> Result<OpenedStream, PlayerError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Stream(format!(
                "no stream available for {}",
                track.title
            )));
        }
        let stream: ByteStream = Box::new(std::io::Cursor::new(vec![0u8; 64]));
        Ok(OpenedStream {
            stream,
            kind: StreamType::Arbitrary,
        })
    }
}

/// In-memory voice-channel occupancy table.
pub struct MockDirectory {
    occupants: Mutex<HashMap<ChannelId, usize>>,
    bot_channels: Mutex<HashMap<GuildId, ChannelId>>,
}

impl MockDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            occupants: Mutex::new(HashMap::new()),
            bot_channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_occupants(&self, channel: ChannelId, count: usize) {
        self.occupants.lock().insert(channel, count);
    }

    pub fn set_bot_channel(&self, guild: GuildId, channel: ChannelId) {
        self.bot_channels.lock().insert(guild, channel);
    }
}

impl ChannelDirectory for MockDirectory {
    fn non_bot_occupants(&self, channel: ChannelId) -> usize {
        self.occupants.lock().get(&channel).copied().unwrap_or(0)
    }

    fn bot_channel(&self, guild: &GuildId) -> Option<ChannelId> {
        self.bot_channels.lock().get(guild).copied()
    }
}

pub struct Harness {
    pub player: Player,
    pub joiner: Arc<MockJoiner>,
    pub resolver: Arc<MockResolver>,
    pub directory: Arc<MockDirectory>,
    pub events: flume::Receiver<PlayerEvent>,
}

pub fn harness() -> Harness {
    harness_with(QueueConfig::default())
}

pub fn harness_with(defaults: QueueConfig) -> Harness {
    let joiner = MockJoiner::new();
    let resolver = MockResolver::new();
    let directory = MockDirectory::new();
    let player = Player::new(PlayerOptions {
        bot_user: BOT_USER,
        defaults,
        joiner: joiner.clone(),
        resolver: resolver.clone(),
        directory: directory.clone(),
    });
    let events = player.events();
    Harness {
        player,
        joiner,
        resolver,
        directory,
        events,
    }
}

pub fn track(title: &str) -> Track {
    Track::new(TrackInfo {
        title: title.to_string(),
        description: String::new(),
        source: TrackSource::Youtube,
        duration: "3:32".to_string(),
        duration_ms: 212_000,
        thumbnail: String::new(),
        url: format!("https://example.com/{title}"),
        requested_by: None,
        author: "artist".to_string(),
        playlist: None,
    })
}

pub fn voice_channel(id: u64, guild: &str) -> ChannelRef {
    ChannelRef {
        id: ChannelId(id),
        guild_id: GuildId::from(guild),
        kind: ChannelKind::Voice,
    }
}

/// Next event from the engine, bounded so a missing event fails the test
/// instead of hanging it.
pub async fn next_event(events: &flume::Receiver<PlayerEvent>) -> PlayerEvent {
    // Generous bound: paused-clock tests auto-advance through cooldowns that
    // are tens of virtual seconds long.
    tokio::time::timeout(Duration::from_secs(120), events.recv_async())
        .await
        .expect("timed out waiting for a player event")
        .expect("event channel closed")
}

/// Skips events until one matches, bounded like [`next_event`].
pub async fn wait_for_event(
    events: &flume::Receiver<PlayerEvent>,
    mut matches: impl FnMut(&PlayerEvent) -> bool,
) -> PlayerEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
