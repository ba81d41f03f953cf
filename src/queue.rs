use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::common::errors::PlayerError;
use crate::common::time::{build_time_code, parse_ms};
use crate::common::types::{GuildId, TrackId};
use crate::config::QueueConfig;
use crate::events::{EventBus, PlayerEvent};
use crate::player::PlayerInner;
use crate::track::Track;
use crate::voice::{
    ChannelRef, SourceResolver, StatusKind, StreamDispatcher, StreamOptions, VoiceEvent,
    VoiceJoiner, await_status,
};

/// Queue repeat behavior applied when a track finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Replay the just-finished track indefinitely.
    Track,
    /// Rotate finished tracks to the back of the queue.
    Queue,
}

/// The three ways callers may point at a queued track.
#[derive(Debug, Clone)]
pub enum TrackRef {
    Track(Track),
    Index(usize),
    Id(TrackId),
}

impl From<usize> for TrackRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<TrackId> for TrackRef {
    fn from(id: TrackId) -> Self {
        Self::Id(id)
    }
}

impl From<Track> for TrackRef {
    fn from(track: Track) -> Self {
        Self::Track(track)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    /// Start even if a track is already current, replacing it.
    pub force: bool,
    /// Display-time offset to report after the stream starts. This adjusts
    /// the progress clock only; the source is not reopened at the offset.
    pub seek_ms: Option<u64>,
}

/// Current/end timecodes plus progress percentage for the playing track.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlayerTimestamp {
    pub current: String,
    pub end: String,
    pub progress: u32,
}

#[derive(Debug, Clone)]
pub struct ProgressBarOptions {
    pub timecodes: bool,
    pub length: usize,
    pub line: String,
    pub indicator: String,
}

impl Default for ProgressBarOptions {
    fn default() -> Self {
        Self {
            timecodes: true,
            length: 15,
            line: "▬".to_string(),
            indicator: "🔘".to_string(),
        }
    }
}

struct QueueState {
    tracks: VecDeque<Track>,
    previous: VecDeque<Track>,
    current: Option<Track>,
    repeat_mode: RepeatMode,
    volume: u32,
    paused: bool,
}

/// The playback state machine for one guild: upcoming tracks, history, the
/// current track, repeat mode, and the connection that actually streams.
/// Owned by the [`crate::player::Player`] registry; destroying a queue makes
/// it permanently inert.
pub struct Queue {
    guild_id: GuildId,
    options: QueueConfig,
    state: Mutex<QueueState>,
    connection: Mutex<Option<Arc<StreamDispatcher>>>,
    destroyed: AtomicBool,
    /// Re-entrancy marker: a play is between picking its track and handing
    /// the resource to the transport.
    in_flight: AtomicBool,
    /// Display-time base set by seek; added to the resource's own clock.
    stream_time_base: AtomicU64,
    events: EventBus,
    registry: Weak<PlayerInner>,
    resolver: Arc<dyn SourceResolver>,
    joiner: Arc<dyn VoiceJoiner>,
}

impl Queue {
    pub(crate) fn new(
        guild_id: GuildId,
        options: QueueConfig,
        events: EventBus,
        registry: Weak<PlayerInner>,
        resolver: Arc<dyn SourceResolver>,
        joiner: Arc<dyn VoiceJoiner>,
    ) -> Arc<Self> {
        let volume = options.volume;
        Arc::new(Self {
            guild_id,
            options,
            state: Mutex::new(QueueState {
                tracks: VecDeque::new(),
                previous: VecDeque::new(),
                current: None,
                repeat_mode: RepeatMode::Off,
                volume,
                paused: false,
            }),
            connection: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            stream_time_base: AtomicU64::new(0),
            events,
            registry,
            resolver,
            joiner,
        })
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn options(&self) -> &QueueConfig {
        &self.options
    }

    /// Uniform guard: every operation on a destroyed queue reports the misuse
    /// on the event stream and yields its documented empty result.
    fn watch_destroyed(&self) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            self.events.emit(PlayerEvent::Error {
                guild_id: Some(self.guild_id.clone()),
                error: PlayerError::DestroyedQueue,
            });
            true
        } else {
            false
        }
    }

    fn emit(&self, event: PlayerEvent) {
        self.events.emit(event);
    }

    /// Appends tracks to the end of the queue. Returns the new upcoming
    /// length, or `None` on a destroyed queue.
    pub fn add_tracks(&self, tracks: Vec<Track>, emit: bool) -> Option<usize> {
        if self.watch_destroyed() {
            return None;
        }
        let len = {
            let mut state = self.state.lock();
            state.tracks.extend(tracks.iter().cloned());
            state.tracks.len()
        };
        self.emit_added(tracks, emit);
        Some(len)
    }

    /// Splices tracks into the queue at `index` (clamped to the valid range).
    pub fn insert(&self, tracks: Vec<Track>, index: usize, emit: bool) -> Option<usize> {
        if self.watch_destroyed() {
            return None;
        }
        let len = {
            let mut state = self.state.lock();
            let index = index.min(state.tracks.len());
            for (offset, track) in tracks.iter().cloned().enumerate() {
                state.tracks.insert(index + offset, track);
            }
            state.tracks.len()
        };
        self.emit_added(tracks, emit);
        Some(len)
    }

    fn emit_added(&self, mut tracks: Vec<Track>, emit: bool) {
        if !emit {
            return;
        }
        if tracks.len() == 1 {
            self.emit(PlayerEvent::TrackAdd {
                guild_id: self.guild_id.clone(),
                track: tracks.remove(0),
            });
        } else {
            self.emit(PlayerEvent::TracksAdd {
                guild_id: self.guild_id.clone(),
                tracks,
            });
        }
    }

    fn position_of(state: &QueueState, track: &TrackRef) -> Option<usize> {
        match track {
            TrackRef::Index(index) => (*index < state.tracks.len()).then_some(*index),
            TrackRef::Id(id) => state.tracks.iter().position(|t| t.id == *id),
            TrackRef::Track(track) => state.tracks.iter().position(|t| t.id == track.id),
        }
    }

    /// Index of the referenced track among the upcoming tracks.
    pub fn get_track_position(&self, track: impl Into<TrackRef>) -> Option<usize> {
        if self.watch_destroyed() {
            return None;
        }
        let track = track.into();
        Self::position_of(&self.state.lock(), &track)
    }

    /// Removes the referenced upcoming track. The current track is never
    /// affected.
    pub fn remove(&self, track: impl Into<TrackRef>) -> Option<Track> {
        if self.watch_destroyed() {
            return None;
        }
        let track = track.into();
        let mut state = self.state.lock();
        let index = Self::position_of(&state, &track)?;
        state.tracks.remove(index)
    }

    /// Pulls the referenced track to the front of the queue and abandons the
    /// current one; the transport's finish event then starts the jumped-to
    /// track.
    pub fn jump(&self, track: impl Into<TrackRef>) -> Result<(), PlayerError> {
        if self.watch_destroyed() {
            return Ok(());
        }
        let track = track.into();
        {
            let mut state = self.state.lock();
            let index = Self::position_of(&state, &track).ok_or(PlayerError::TrackNotFound)?;
            let found = state
                .tracks
                .remove(index)
                .ok_or(PlayerError::TrackNotFound)?;
            state.tracks.push_front(found);
        }
        self.skip();
        Ok(())
    }

    /// Returns to the most recently played track, force-playing it. The
    /// abandoned current track becomes the next upcoming one.
    pub async fn back(self: &Arc<Self>) -> Result<(), PlayerError> {
        if self.watch_destroyed() {
            return Ok(());
        }
        let track = {
            let mut state = self.state.lock();
            let track = state.previous.pop_front().ok_or(PlayerError::TrackNotFound)?;
            if let Some(current) = state.current.clone() {
                state.tracks.push_front(current);
            }
            track
        };
        self.play(
            Some(track),
            PlayOptions {
                force: true,
                seek_ms: None,
            },
        )
        .await
    }

    /// Uniform random permutation of the upcoming tracks.
    pub fn shuffle(&self) {
        if self.watch_destroyed() {
            return;
        }
        let mut state = self.state.lock();
        state.tracks.make_contiguous().shuffle(&mut rand::thread_rng());
    }

    /// Sets the repeat mode, returning the mode now in effect.
    pub fn set_loop(&self, mode: RepeatMode) -> Option<RepeatMode> {
        if self.watch_destroyed() {
            return None;
        }
        self.state.lock().repeat_mode = mode;
        Some(mode)
    }

    /// Connects to `channel`, reusing a live connection when one already
    /// targets a channel. The new dispatcher's start/finish stream is pumped
    /// by exactly one task for its whole lifetime.
    pub async fn connect(
        self: &Arc<Self>,
        channel: ChannelRef,
    ) -> Result<Arc<StreamDispatcher>, PlayerError> {
        if self.watch_destroyed() {
            return Err(PlayerError::DestroyedQueue);
        }
        if let Some(connection) = self.connection.lock().clone() {
            if connection.channel().is_some() {
                return Ok(connection);
            }
        }
        if !channel.kind.is_voice_based() {
            return Err(PlayerError::InvalidChannelType);
        }

        let joined = self.joiner.join(&channel, false).await?;
        let dispatcher = StreamDispatcher::new(
            joined.connection,
            joined.player,
            channel,
            Duration::from_millis(self.options.connection_timeout_ms),
        );
        *self.connection.lock() = Some(dispatcher.clone());

        let voice_events = dispatcher.subscribe();
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Ok(event) = voice_events.recv_async().await {
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                if queue.destroyed() {
                    break;
                }
                match event {
                    VoiceEvent::Start(resource) => queue.handle_start(resource.track()),
                    VoiceEvent::Finish(resource) => {
                        queue.handle_finish(resource.track().clone()).await;
                    }
                    VoiceEvent::Error(err) => queue.emit(PlayerEvent::ConnectionError {
                        guild_id: queue.guild_id.clone(),
                        message: err.to_string(),
                    }),
                    VoiceEvent::Debug(message) => {
                        debug!(guild = %queue.guild_id, "{message}");
                    }
                }
            }
        });

        Ok(dispatcher)
    }

    fn handle_start(&self, track: &Track) {
        self.state.lock().current = Some(track.clone());
        self.emit(PlayerEvent::TrackStart {
            guild_id: self.guild_id.clone(),
            track: track.clone(),
        });
    }

    /// Reaction to the transport reporting that the current resource ended:
    /// archive the finished track, then decide what (if anything) plays next
    /// from the repeat mode.
    async fn handle_finish(self: &Arc<Self>, track: Track) {
        self.state.lock().current = None;
        self.stream_time_base.store(0, Ordering::Release);

        let Some(connection) = self.connection.lock().clone() else {
            return;
        };

        {
            let mut state = self.state.lock();
            state.previous.push_front(track.clone());
        }
        self.emit(PlayerEvent::TrackEnd {
            guild_id: self.guild_id.clone(),
            track,
        });

        let status = connection.connection().status();
        if connection.channel().is_none() && status.kind() != StatusKind::Destroyed {
            // Channel is gone; let the transport finish dying instead of
            // trying to play into it.
            let _ = await_status(
                &**connection.connection(),
                StatusKind::Destroyed,
                connection.connection_timeout(),
            )
            .await;
            return;
        } else if status.kind() == StatusKind::Destroyed {
            return;
        }

        let (queue_empty, repeat_mode) = {
            let state = self.state.lock();
            (state.tracks.is_empty(), state.repeat_mode)
        };

        if queue_empty && repeat_mode == RepeatMode::Off {
            self.emit(PlayerEvent::QueueEnd {
                guild_id: self.guild_id.clone(),
            });
            if let Some(registry) = self.registry.upgrade() {
                registry.queue_ended(self.clone());
            }
            return;
        }

        let next = match repeat_mode {
            RepeatMode::Track => self.state.lock().previous.front().cloned(),
            RepeatMode::Queue => {
                let mut state = self.state.lock();
                if let Some(last) = state.previous.front().cloned() {
                    state.tracks.push_back(last);
                }
                state.tracks.pop_front()
            }
            RepeatMode::Off => None,
        };

        // play() emits its own failures; just log that the advance stopped.
        if let Err(err) = self.play(next, PlayOptions::default()).await {
            warn!(guild = %self.guild_id, "failed to advance queue: {err}");
        }
    }

    /// Starts playback of `track_override` or the queue head. Without
    /// `force`, a current track or a play already in flight makes this a
    /// no-op so overlapping plays cannot race the transport.
    pub async fn play(
        self: &Arc<Self>,
        track_override: Option<Track>,
        options: PlayOptions,
    ) -> Result<(), PlayerError> {
        if self.watch_destroyed() {
            return Ok(());
        }
        let Some(connection) = self.connection.lock().clone() else {
            return Err(PlayerError::NoConnection);
        };
        if !options.force {
            if self.state.lock().current.is_some() {
                return Ok(());
            }
            if self.in_flight.load(Ordering::Acquire) {
                return Ok(());
            }
            // A forced replay may have handed the transport a fresh resource
            // whose start event hasn't landed yet.
            if connection
                .active_resource()
                .is_some_and(|resource| !resource.ended())
            {
                return Ok(());
            }
        }
        if connection.channel().is_none() {
            return Ok(());
        }

        let _in_flight = InFlight::acquire(&self.in_flight);
        if options.force {
            // Claim the abandoned resource so its idle transition is not
            // treated as a natural finish that would advance the queue.
            if let Some(active) = connection.active_resource() {
                active.mark_ended();
            }
        }
        connection.end();

        let track = match track_override.or_else(|| self.state.lock().tracks.pop_front()) {
            Some(track) => track,
            None => return Ok(()),
        };

        let opened = match self.resolver.open(&track).await {
            Ok(opened) => opened,
            Err(err) => {
                self.emit(PlayerEvent::Error {
                    guild_id: Some(self.guild_id.clone()),
                    error: err.clone(),
                });
                return Err(err);
            }
        };

        let volume = self.state.lock().volume;
        let resource = connection.create_stream(
            opened.stream,
            track,
            StreamOptions {
                kind: opened.kind,
                disable_volume: false,
            },
        );
        connection.play_stream(Some(resource), volume).await?;

        if let Some(seek) = options.seek_ms {
            self.stream_time_base.store(seek, Ordering::Release);
        }
        Ok(())
    }

    /// Ends the current resource; the resulting finish event decides what
    /// plays next. `false` when there is no connection.
    pub fn skip(&self) -> bool {
        if self.watch_destroyed() {
            return false;
        }
        let Some(connection) = self.connection.lock().clone() else {
            return false;
        };
        connection.end();
        true
    }

    /// Moves the progress clock of the current track. Positions at or past
    /// the track's end behave exactly like [`Queue::skip`].
    pub async fn seek(self: &Arc<Self>, position_ms: u64) -> bool {
        if self.watch_destroyed() {
            return false;
        }
        let Some(current) = self.current() else {
            return false;
        };
        if position_ms >= current.duration_ms {
            return self.skip();
        }

        self.play(
            Some(current),
            PlayOptions {
                force: true,
                seek_ms: Some(position_ms),
            },
        )
        .await
        .is_ok()
    }

    /// Sets the queue volume. Rejected without a connection or outside
    /// `(0, max_volume]`.
    pub fn set_volume(&self, volume: u32) -> bool {
        if self.watch_destroyed() {
            return false;
        }
        let Some(connection) = self.connection.lock().clone() else {
            return false;
        };
        if volume == 0 || volume > self.options.max_volume {
            return false;
        }
        self.state.lock().volume = volume;
        connection.set_volume(volume)
    }

    /// Pauses or resumes playback. Rejected without a connection.
    pub fn set_paused(&self, paused: bool) -> bool {
        if self.watch_destroyed() {
            return false;
        }
        let Some(connection) = self.connection.lock().clone() else {
            return false;
        };
        self.state.lock().paused = paused;
        if paused {
            connection.pause(true)
        } else {
            connection.resume()
        }
    }

    /// Server-deafens or undeafens the bot. Rejected without a connection.
    pub async fn set_deaf(&self, deafened: bool) -> bool {
        if self.watch_destroyed() {
            return false;
        }
        if self.connection.lock().is_none() {
            return false;
        }
        self.joiner.set_deaf(&self.guild_id, deafened).await.is_ok()
    }

    /// Leaves the voice channel without destroying the queue.
    pub fn disconnect(&self) {
        if self.watch_destroyed() {
            return;
        }
        if let Some(connection) = self.connection.lock().clone() {
            if connection.channel().is_some() {
                connection.disconnect();
            }
            connection.clear_channel();
        }
    }

    /// Terminal transition: tears down the transport, ends playback, clears
    /// all queue contents and detaches from the registry. A dead session must
    /// hold no connection, or its supervisor would keep rejoining a channel
    /// the session already left. Idempotent; always reports success.
    pub fn destroy(&self) -> bool {
        if self.watch_destroyed() {
            return true;
        }

        if let Some(connection) = self.connection.lock().take() {
            connection.clear_channel();
            connection.disconnect();
        }

        {
            let mut state = self.state.lock();
            state.tracks.clear();
            state.previous.clear();
            state.current = None;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.detach(&self.guild_id);
        }

        self.destroyed.store(true, Ordering::Release);
        true
    }

    /// Convenience alias for [`Queue::destroy`].
    pub fn stop(&self) {
        if self.watch_destroyed() {
            return;
        }
        self.destroy();
    }

    /// Drops both upcoming and previous tracks.
    pub fn clear(&self) {
        if self.watch_destroyed() {
            return;
        }
        self.clear_upcoming();
        self.clear_previous();
    }

    pub fn clear_upcoming(&self) -> Option<Vec<Track>> {
        if self.watch_destroyed() {
            return None;
        }
        Some(self.state.lock().tracks.drain(..).collect())
    }

    pub fn clear_previous(&self) -> Option<Vec<Track>> {
        if self.watch_destroyed() {
            return None;
        }
        Some(self.state.lock().previous.drain(..).collect())
    }

    pub fn exists(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<Track> {
        if self.watch_destroyed() {
            return None;
        }
        self.state.lock().current.clone()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.state.lock().tracks.iter().cloned().collect()
    }

    pub fn previous_tracks(&self) -> Vec<Track> {
        self.state.lock().previous.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tracks.is_empty()
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().repeat_mode
    }

    pub fn volume(&self) -> u32 {
        self.state.lock().volume
    }

    pub fn paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn connection(&self) -> Option<Arc<StreamDispatcher>> {
        self.connection.lock().clone()
    }

    /// Progress of the current track in milliseconds: the seek base plus the
    /// transport's delivered-audio clock.
    pub fn stream_time(&self) -> u64 {
        if self.watch_destroyed() {
            return 0;
        }
        let Some(connection) = self.connection.lock().clone() else {
            return 0;
        };
        self.stream_time_base.load(Ordering::Acquire) + connection.stream_time()
    }

    /// Total remaining playtime: the current track plus everything upcoming.
    pub fn total_time(&self) -> u64 {
        if self.watch_destroyed() {
            return 0;
        }
        let state = self.state.lock();
        let current = state.current.as_ref().map_or(0, |t| t.duration_ms);
        current + state.tracks.iter().map(|t| t.duration_ms).sum::<u64>()
    }

    /// Timecodes and percentage progress for the current track.
    pub fn get_timestamp(&self) -> Option<PlayerTimestamp> {
        if self.watch_destroyed() {
            return None;
        }
        let current = self.state.lock().current.clone()?;
        let stream_time = self.stream_time();
        let total = current.duration_ms;
        let progress = if total == 0 {
            0
        } else {
            ((stream_time as f64 / total as f64) * 100.0).round() as u32
        };
        Some(PlayerTimestamp {
            current: build_time_code(parse_ms(stream_time)),
            end: build_time_code(parse_ms(total)),
            progress,
        })
    }

    /// Textual progress bar for the current track, e.g.
    /// `0:00 ┃ 🔘▬▬▬▬▬▬▬▬▬▬▬▬▬▬ ┃ 3:32`.
    pub fn create_progress_bar(&self, options: &ProgressBarOptions) -> Option<String> {
        if self.watch_destroyed() {
            return None;
        }
        let current = self.state.lock().current.clone()?;

        let length = if options.length == 0 || options.length > 30 {
            15
        } else {
            options.length
        };
        let duration = current.duration_ms.max(1);
        let index =
            ((self.stream_time() as f64 / duration as f64) * length as f64).round() as usize;

        let bar = if index >= 1 && index <= length {
            let mut cells: Vec<&str> = vec![options.line.as_str(); length - 1];
            cells.insert(index.min(cells.len()), options.indicator.as_str());
            cells.concat()
        } else {
            format!("{}{}", options.indicator, options.line.repeat(length - 1))
        };

        if options.timecodes {
            let timestamp = self.get_timestamp()?;
            Some(format!("{} ┃ {} ┃ {}", timestamp.current, bar, timestamp.end))
        } else {
            Some(bar)
        }
    }

    /// Numbered, chat-ready listing of the upcoming tracks.
    pub fn format_tracks(&self, include_author: bool) -> Option<Vec<String>> {
        if self.watch_destroyed() {
            return None;
        }
        Some(
            self.state
                .lock()
                .tracks
                .iter()
                .enumerate()
                .map(|(i, track)| format!("**{}.** {}", i + 1, track.display(include_author)))
                .collect(),
        )
    }
}

/// Releases the play re-entrancy marker on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
