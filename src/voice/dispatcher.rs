use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::common::errors::PlayerError;
use crate::track::Track;

use super::{
    AudioPlayer, AudioResource, ByteStream, ChannelRef, ConnectionStatus, DisconnectReason,
    PlaybackEvent, PlaybackState, PlaybackStatus, StatusKind, StreamType, VoiceConnection,
    await_status,
};

/// Websocket close code the platform sends when the bot is force-moved or has
/// its channel pulled out from under it.
const FORCED_MOVE_CLOSE_CODE: u16 = 4014;

/// Rejoins attempted before a dropped connection is considered dead.
const MAX_REJOIN_ATTEMPTS: u32 = 5;

/// What the dispatcher reports upward to its owning queue.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// A resource started streaming.
    Start(Arc<AudioResource>),
    /// The active resource ended; it has been cleared and marked ended.
    Finish(Arc<AudioResource>),
    Error(PlayerError),
    Debug(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub kind: StreamType,
    /// Skip attaching an inline volume control to the resource.
    pub disable_volume: bool,
}

/// Supervises one voice connection and one playback engine instance: applies
/// the rejoin/backoff policy on transport drops, waits out readiness
/// transitions, and translates engine state changes into start/finish events.
/// Owned exclusively by one queue and torn down with it.
pub struct StreamDispatcher {
    connection: Arc<dyn VoiceConnection>,
    audio_player: Arc<dyn AudioPlayer>,
    channel: Mutex<Option<ChannelRef>>,
    resource: Mutex<Option<Arc<AudioResource>>>,
    paused: AtomicBool,
    ready_lock: AtomicBool,
    connection_timeout: Duration,
    tx: flume::Sender<VoiceEvent>,
    rx: flume::Receiver<VoiceEvent>,
}

impl StreamDispatcher {
    pub fn new(
        connection: Arc<dyn VoiceConnection>,
        audio_player: Arc<dyn AudioPlayer>,
        channel: ChannelRef,
        connection_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = flume::unbounded();
        let this = Arc::new(Self {
            connection,
            audio_player,
            channel: Mutex::new(Some(channel)),
            resource: Mutex::new(None),
            paused: AtomicBool::new(false),
            ready_lock: AtomicBool::new(false),
            connection_timeout,
            tx,
            rx,
        });

        // The watch subscriptions are taken before new() returns so that
        // transitions fired ahead of the tasks' first poll are not lost.
        let connection_state = this.connection.state();
        let mut playback_state = this.audio_player.state();
        let initial_playback = playback_state.borrow_and_update().clone();

        tokio::spawn(supervise_connection(
            Arc::downgrade(&this),
            connection_state,
        ));
        tokio::spawn(supervise_playback(
            Arc::downgrade(&this),
            playback_state,
            initial_playback,
        ));
        tokio::spawn(forward_engine_events(
            Arc::downgrade(&this),
            this.audio_player.events(),
        ));

        this
    }

    /// The dispatcher's start/finish/error stream. One consumer per
    /// dispatcher: the owning queue's event pump.
    pub fn subscribe(&self) -> flume::Receiver<VoiceEvent> {
        self.rx.clone()
    }

    pub fn connection(&self) -> &Arc<dyn VoiceConnection> {
        &self.connection
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn channel(&self) -> Option<ChannelRef> {
        self.channel.lock().clone()
    }

    /// Forgets the target channel. A later finish event then waits for the
    /// transport to die instead of advancing the queue.
    pub fn clear_channel(&self) {
        *self.channel.lock() = None;
    }

    pub fn status(&self) -> PlaybackStatus {
        self.audio_player.status()
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// The resource currently held for playback, if any.
    pub fn active_resource(&self) -> Option<Arc<AudioResource>> {
        self.resource.lock().clone()
    }

    /// Wraps a byte stream as the active playable resource, tagged with its
    /// track and (unless disabled) an inline volume control.
    pub fn create_stream(
        &self,
        stream: ByteStream,
        track: Track,
        options: StreamOptions,
    ) -> Arc<AudioResource> {
        let resource = Arc::new(AudioResource::new(
            stream,
            options.kind,
            track,
            !options.disable_volume,
        ));
        *self.resource.lock() = Some(resource.clone());
        resource
    }

    /// Starts playback of `resource` (or the stored active resource) at the
    /// given volume. Background failures (already-ended resource, readiness
    /// timeout, engine refusal) surface as emitted errors, not returned ones;
    /// only the complete absence of a resource is a caller mistake.
    pub async fn play_stream(
        &self,
        resource: Option<Arc<AudioResource>>,
        volume: u32,
    ) -> Result<(), PlayerError> {
        let resource = match resource.or_else(|| self.resource.lock().clone()) {
            Some(resource) => resource,
            None => return Err(PlayerError::NoAudioResource),
        };

        if resource.ended() {
            let _ = self.tx.send(VoiceEvent::Error(PlayerError::Stream(
                "cannot play a resource that has already ended".to_string(),
            )));
            return Ok(());
        }

        {
            let mut slot = self.resource.lock();
            if slot.is_none() {
                *slot = Some(resource.clone());
            }
        }

        self.set_volume(volume);

        if self.connection.status().kind() != StatusKind::Ready {
            if let Err(err) =
                await_status(&*self.connection, StatusKind::Ready, self.connection_timeout).await
            {
                let _ = self.tx.send(VoiceEvent::Error(err));
                return Ok(());
            }
        }

        if let Err(err) = self.audio_player.play(resource) {
            let _ = self.tx.send(VoiceEvent::Error(err));
        }

        Ok(())
    }

    /// Applies a percentage to the active resource's inline volume. Rejects
    /// when there is no resource or its volume control was disabled.
    pub fn set_volume(&self, value: u32) -> bool {
        let resource = self.resource.lock().clone();
        if let Some(resource) = resource {
            if let Some(control) = resource.volume() {
                control.set_volume_logarithmic(f64::from(value) / 100.0);
                return true;
            }
        }
        false
    }

    /// The active resource's user-facing volume percentage; 100 when nothing
    /// is playing.
    pub fn volume(&self) -> u32 {
        self.resource
            .lock()
            .as_ref()
            .and_then(|resource| resource.volume().map(|control| control.percent()))
            .unwrap_or(100)
    }

    /// Pauses the engine. The local paused flag tracks the engine's answer so
    /// queue-level state stays truthful even if the engine refuses.
    pub fn pause(&self, interpolate_silence: bool) -> bool {
        let success = self.audio_player.pause(interpolate_silence);
        self.paused.store(success, Ordering::Release);
        success
    }

    pub fn resume(&self) -> bool {
        let success = self.audio_player.unpause();
        self.paused.store(!success, Ordering::Release);
        success
    }

    /// Stops the engine outright. The resulting idle transition raises the
    /// finish event.
    pub fn end(&self) {
        self.audio_player.stop(false);
    }

    /// Destroys the transport and force-stops the engine. An already
    /// torn-down transport is not an error here.
    pub fn disconnect(&self) {
        if let Err(err) = self.connection.destroy() {
            debug!("transport already torn down on disconnect: {err}");
        }
        self.audio_player.stop(true);
    }

    /// Milliseconds of the active resource delivered so far.
    pub fn stream_time(&self) -> u64 {
        self.resource
            .lock()
            .as_ref()
            .map(|resource| resource.playback_duration_ms())
            .unwrap_or(0)
    }

    fn destroy_connection(&self) {
        if self.connection.status().kind() != StatusKind::Destroyed {
            if let Err(err) = self.connection.destroy() {
                let _ = self.tx.send(VoiceEvent::Error(err));
            }
        }
    }
}

/// Watches transport state transitions and applies the reconnection policy:
/// ride out forced moves (close code 4014), back off and rejoin on other
/// drops up to the attempt budget, and give the transport a bounded window to
/// become ready on every connect.
async fn supervise_connection(
    this: Weak<StreamDispatcher>,
    mut state: watch::Receiver<ConnectionStatus>,
) {
    let (connection, timeout) = match this.upgrade() {
        Some(strong) => (strong.connection.clone(), strong.connection_timeout),
        None => return,
    };

    loop {
        let status = state.borrow_and_update().clone();
        let Some(dispatcher) = this.upgrade() else {
            break;
        };

        match status {
            ConnectionStatus::Disconnected { reason } => {
                if reason == (DisconnectReason::WebsocketClose { code: FORCED_MOVE_CLOSE_CODE }) {
                    // Forced move: the transport should come back on its own.
                    if await_status(&*connection, StatusKind::Connecting, timeout)
                        .await
                        .is_err()
                    {
                        dispatcher.destroy_connection();
                    }
                } else if connection.rejoin_attempts() < MAX_REJOIN_ATTEMPTS {
                    let backoff = Duration::from_millis(
                        u64::from(connection.rejoin_attempts() + 1) * 5_000,
                    );
                    tokio::time::sleep(backoff).await;
                    connection.rejoin();
                } else {
                    dispatcher.destroy_connection();
                }
            }
            ConnectionStatus::Destroyed => break,
            ConnectionStatus::Signalling | ConnectionStatus::Connecting => {
                // The ready wait must not double-fire when signalling and
                // connecting arrive back to back.
                if !dispatcher.ready_lock.swap(true, Ordering::SeqCst) {
                    if await_status(&*connection, StatusKind::Ready, timeout)
                        .await
                        .is_err()
                    {
                        dispatcher.destroy_connection();
                    }
                    dispatcher.ready_lock.store(false, Ordering::SeqCst);
                }
            }
            ConnectionStatus::Ready => {}
        }

        drop(dispatcher);
        if state.changed().await.is_err() {
            break;
        }
    }
}

/// Translates playback engine transitions into start/finish events: entering
/// `Playing` from idle or buffering emits start, entering `Idle` marks the
/// resource ended, clears it and emits finish. A resume out of a pause does
/// not re-announce, and both events are suppressed while the dispatcher
/// holds a pause.
async fn supervise_playback(
    this: Weak<StreamDispatcher>,
    mut state: watch::Receiver<PlaybackState>,
    mut last: PlaybackState,
) {
    while state.changed().await.is_ok() {
        let snapshot = state.borrow_and_update().clone();
        let old = std::mem::replace(&mut last, snapshot.clone());
        let Some(dispatcher) = this.upgrade() else {
            break;
        };
        if dispatcher.paused() {
            continue;
        }

        if snapshot.status == PlaybackStatus::Playing {
            let entered =
                matches!(old.status, PlaybackStatus::Idle | PlaybackStatus::Buffering);
            // The watch channel coalesces: a forced replay's idle gap can fold
            // into one playing-to-playing transition, so a fresh resource
            // while already playing still counts as a start. A resume out of
            // a pause keeps its resource and stays silent.
            let replaced = old.status == PlaybackStatus::Playing
                && !same_resource(&old.resource, &snapshot.resource);
            if entered || replaced {
                if let Some(resource) = snapshot.resource {
                    let _ = dispatcher.tx.send(VoiceEvent::Start(resource));
                }
            }
        } else if snapshot.status == PlaybackStatus::Idle && old.status != PlaybackStatus::Idle {
            if let Some(resource) = snapshot.resource {
                let was_abandoned = resource.mark_ended();
                {
                    let mut slot = dispatcher.resource.lock();
                    // A forced replay may already have installed the next
                    // resource; only clear the one that actually ended.
                    if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, &resource)) {
                        *slot = None;
                    }
                }
                // Already-ended means someone deliberately replaced this
                // resource and owns what happens next.
                if !was_abandoned {
                    let _ = dispatcher.tx.send(VoiceEvent::Finish(resource));
                }
            }
        }
    }
}

fn same_resource(a: &Option<Arc<AudioResource>>, b: &Option<Arc<AudioResource>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

async fn forward_engine_events(this: Weak<StreamDispatcher>, events: flume::Receiver<PlaybackEvent>) {
    while let Ok(event) = events.recv_async().await {
        let Some(dispatcher) = this.upgrade() else {
            break;
        };
        let forwarded = match event {
            PlaybackEvent::Error(err) => VoiceEvent::Error(err),
            PlaybackEvent::Debug(message) => VoiceEvent::Debug(message),
        };
        let _ = dispatcher.tx.send(forwarded);
    }
}
