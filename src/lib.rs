//! Tunelink is a per-guild playback queue and connection resilience engine
//! for Discord-style music bots. The embedder supplies the platform pieces
//! (a [`voice::VoiceJoiner`], a [`voice::SourceResolver`] and a
//! [`voice::ChannelDirectory`]); Tunelink supplies the [`queue::Queue`]
//! state machine, the [`voice::StreamDispatcher`] that keeps the transport
//! alive through drops and forced moves, and the [`player::Player`] registry
//! with its idle and empty-channel cooldowns.
//!
//! ```no_run
//! # use tunelink::player::{Player, PlayerOptions};
//! # fn adapters() -> PlayerOptions { unimplemented!() }
//! let player = Player::new(adapters());
//! let events = player.events();
//! let queue = player.create_queue("guild".into(), None);
//! ```

pub mod common;
pub mod config;
pub mod events;
pub mod player;
pub mod queue;
pub mod track;
pub mod voice;

pub use common::errors::PlayerError;
pub use common::types::{ChannelId, GuildId, TrackId, UserId};
pub use config::{Config, QueueConfig};
pub use events::PlayerEvent;
pub use player::{Player, PlayerOptions};
pub use queue::{PlayOptions, Queue, RepeatMode, TrackRef};
pub use track::{Playlist, Track, TrackInfo, TrackSource};
