use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::common::types::{ChannelId, GuildId, UserId};
use crate::config::QueueConfig;
use crate::events::{EventBus, PlayerEvent};
use crate::queue::Queue;
use crate::voice::{ChannelDirectory, SourceResolver, VoiceJoiner, VoiceStateUpdate};

/// Everything the registry needs from the embedder: platform adapters, the
/// bot's own user id, and default queue options.
pub struct PlayerOptions {
    pub bot_user: UserId,
    pub defaults: QueueConfig,
    pub joiner: Arc<dyn VoiceJoiner>,
    pub resolver: Arc<dyn SourceResolver>,
    pub directory: Arc<dyn ChannelDirectory>,
}

pub(crate) struct PlayerInner {
    queues: DashMap<GuildId, Arc<Queue>>,
    idle_cooldowns: DashMap<GuildId, JoinHandle<()>>,
    empty_cooldowns: DashMap<GuildId, JoinHandle<()>>,
    events: EventBus,
    joiner: Arc<dyn VoiceJoiner>,
    resolver: Arc<dyn SourceResolver>,
    directory: Arc<dyn ChannelDirectory>,
    bot_user: UserId,
    defaults: QueueConfig,
}

/// Guild-to-queue registry. One per bot process; owns every queue and the
/// idle/empty-channel cooldown timers that reap abandoned ones.
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    pub fn new(options: PlayerOptions) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                queues: DashMap::new(),
                idle_cooldowns: DashMap::new(),
                empty_cooldowns: DashMap::new(),
                events: EventBus::new(),
                joiner: options.joiner,
                resolver: options.resolver,
                directory: options.directory,
                bot_user: options.bot_user,
                defaults: options.defaults,
            }),
        }
    }

    /// The engine's outbound event stream. Every call returns a receiver on
    /// the same underlying channel.
    pub fn events(&self) -> flume::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the guild's queue, creating it when absent. A destroyed queue
    /// still in the map is replaced, never returned.
    pub fn create_queue(
        &self,
        guild_id: GuildId,
        overrides: Option<QueueConfig>,
    ) -> Arc<Queue> {
        if let Some(existing) = self.inner.queues.get(&guild_id) {
            if existing.exists() {
                return existing.clone();
            }
        }
        self.inner.detach(&guild_id);

        let options = overrides.unwrap_or_else(|| self.inner.defaults.clone());
        let queue = Queue::new(
            guild_id.clone(),
            options,
            self.inner.events.clone(),
            Arc::downgrade(&self.inner),
            self.inner.resolver.clone(),
            self.inner.joiner.clone(),
        );
        self.inner.queues.insert(guild_id.clone(), queue.clone());
        info!(guild = %guild_id, "created queue");
        queue
    }

    /// The guild's queue if one exists and has not been destroyed.
    pub fn get_queue(&self, guild_id: &GuildId) -> Option<Arc<Queue>> {
        self.inner
            .queues
            .get(guild_id)
            .map(|q| q.clone())
            .filter(|q| q.exists())
    }

    /// Destroys and removes the guild's queue, leaving its voice channel.
    pub fn delete_queue(&self, guild_id: &GuildId) -> bool {
        let Some(queue) = self.get_queue(guild_id) else {
            return false;
        };
        queue.destroy()
    }

    pub fn has_queue(&self, guild_id: &GuildId) -> bool {
        self.get_queue(guild_id).is_some()
    }

    /// Feed of raw voice-state transitions from the platform gateway. Drives
    /// forced-disconnect teardown and the empty-channel cooldown.
    pub fn voice_state_update(&self, update: VoiceStateUpdate) {
        let Some(queue) = self.get_queue(&update.guild_id) else {
            return;
        };

        // The bot itself left (kicked, or moved out by an admin): the session
        // is over regardless of what the queue holds.
        if update.user_id == self.inner.bot_user
            && update.old_channel.is_some()
            && update.new_channel.is_none()
        {
            queue.destroy();
            self.inner.events.emit(PlayerEvent::BotDisconnect {
                guild_id: update.guild_id,
            });
            return;
        }

        let Some(bot_channel) = self.inner.directory.bot_channel(&update.guild_id) else {
            return;
        };

        if !update.user_is_bot && update.new_channel == Some(bot_channel) {
            // A listener arrived; the room is no longer empty.
            if let Some((_, timer)) = self.inner.empty_cooldowns.remove(&update.guild_id) {
                timer.abort();
            }
            return;
        }

        if update.old_channel == Some(bot_channel)
            && update.new_channel != Some(bot_channel)
            && self.inner.directory.non_bot_occupants(bot_channel) == 0
        {
            self.inner.start_empty_cooldown(queue, bot_channel);
        }
    }
}

impl PlayerInner {
    /// Forgets the guild's queue and cancels any pending cooldowns. Called by
    /// the queue itself during destroy.
    pub(crate) fn detach(&self, guild_id: &GuildId) {
        self.queues.remove(guild_id);
        if let Some((_, timer)) = self.idle_cooldowns.remove(guild_id) {
            timer.abort();
        }
        if let Some((_, timer)) = self.empty_cooldowns.remove(guild_id) {
            timer.abort();
        }
    }

    /// The queue drained with repeat off. Arms the idle cooldown unless the
    /// queue opted out or a cooldown is already running.
    pub(crate) fn queue_ended(self: &Arc<Self>, queue: Arc<Queue>) {
        if queue.options().always_on {
            return;
        }
        let guild_id = queue.guild_id().clone();
        if self.idle_cooldowns.contains_key(&guild_id) {
            return;
        }

        let max = Duration::from_millis(queue.options().leave_on_idle_timeout_ms);
        let inner = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut poll = tokio::time::interval(Duration::from_secs(1));
            poll.tick().await;
            loop {
                poll.tick().await;
                if queue.destroyed() || queue.current().is_some() || !queue.is_empty() {
                    debug!(guild = %queue.guild_id(), "idle cooldown cancelled");
                    break;
                }
                if started.elapsed() > max {
                    info!(guild = %queue.guild_id(), "idle cooldown expired, leaving");
                    queue.destroy();
                    break;
                }
            }
            if let Some(inner) = inner.upgrade() {
                inner.idle_cooldowns.remove(queue.guild_id());
            }
        });
        self.idle_cooldowns.insert(guild_id, handle);
    }

    /// The bot's channel lost its last listener. Arms the empty cooldown
    /// unless the queue opted out or a cooldown is already running.
    fn start_empty_cooldown(self: &Arc<Self>, queue: Arc<Queue>, channel: ChannelId) {
        if queue.options().always_on {
            return;
        }
        let guild_id = queue.guild_id().clone();
        if self.empty_cooldowns.contains_key(&guild_id) {
            return;
        }

        let max = Duration::from_millis(queue.options().leave_on_empty_timeout_ms);
        let directory = self.directory.clone();
        let inner = Arc::downgrade(self);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut poll = tokio::time::interval(Duration::from_secs(1));
            poll.tick().await;
            loop {
                poll.tick().await;
                if queue.destroyed() || directory.non_bot_occupants(channel) > 0 {
                    debug!(guild = %queue.guild_id(), "empty cooldown cancelled");
                    break;
                }
                if started.elapsed() >= max {
                    info!(guild = %queue.guild_id(), "channel stayed empty, leaving");
                    events.emit(PlayerEvent::ChannelEmpty {
                        guild_id: queue.guild_id().clone(),
                    });
                    queue.destroy();
                    break;
                }
            }
            if let Some(inner) = inner.upgrade() {
                inner.empty_cooldowns.remove(queue.guild_id());
            }
        });
        self.empty_cooldowns.insert(guild_id, handle);
    }
}
