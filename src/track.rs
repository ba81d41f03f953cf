use serde::{Deserialize, Serialize};

use crate::common::types::{TrackId, UserId};

/// Where a track's audio comes from; routes resolution in the embedder's
/// [`crate::voice::SourceResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Youtube,
    Spotify,
    Soundcloud,
    /// Direct URL to an audio stream or file.
    Arbitrary,
}

/// The member that asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBy {
    pub user_id: UserId,
    pub display_name: String,
}

/// Lightweight, non-owning reference from a track back to the playlist it was
/// expanded from. The full [`Playlist`] stays with whoever resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub title: String,
    pub thumbnail: String,
    pub source: TrackSource,
    pub length: usize,
    pub url: String,
}

/// Everything needed to construct a [`Track`]. Produced by the embedder's
/// search/lookup layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub description: String,
    pub source: TrackSource,
    /// Human-readable duration as rendered by the resolver ("3:32", "∞").
    pub duration: String,
    pub duration_ms: u64,
    pub thumbnail: String,
    pub url: String,
    pub requested_by: Option<RequestedBy>,
    pub author: String,
    pub playlist: Option<PlaylistInfo>,
}

/// An immutable playable item. Identity is assigned once at construction;
/// the queue moves tracks (never copies them) between its upcoming, current
/// and previous lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub description: String,
    pub source: TrackSource,
    pub duration: String,
    pub duration_ms: u64,
    pub thumbnail: String,
    pub url: String,
    pub requested_by: Option<RequestedBy>,
    pub author: String,
    pub playlist: Option<PlaylistInfo>,
}

impl Track {
    pub fn new(info: TrackInfo) -> Self {
        Self {
            id: TrackId::next(),
            title: info.title,
            description: info.description,
            source: info.source,
            duration: info.duration,
            duration_ms: info.duration_ms,
            thumbnail: info.thumbnail,
            url: info.url,
            requested_by: info.requested_by,
            author: info.author,
            playlist: info.playlist,
        }
    }

    /// Markdown rendering suitable for chat embeds:
    /// `[title](url) | author | requester | ` `3:32` `.
    pub fn display(&self, include_author: bool) -> String {
        let author = if include_author {
            format!("| {} ", self.author)
        } else {
            String::new()
        };
        let requester = self
            .requested_by
            .as_ref()
            .map(|r| r.display_name.as_str())
            .unwrap_or("unknown");

        format!(
            "[{}]({}) {}| {} | `{}`",
            self.title, self.url, author, requester, self.duration
        )
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display(true))
    }
}

/// An ordered group of tracks expanded from one playlist URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub title: String,
    pub thumbnail: String,
    pub source: TrackSource,
    pub length: usize,
    pub url: String,
    pub tracks: Vec<Track>,
}

impl Playlist {
    /// The back-reference tracks of this playlist should carry.
    pub fn info(&self) -> PlaylistInfo {
        PlaylistInfo {
            title: self.title.clone(),
            thumbnail: self.thumbnail.clone(),
            source: self.source,
            length: self.length,
            url: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> TrackInfo {
        TrackInfo {
            title: "Never Gonna Give You Up".to_string(),
            description: "No description provided".to_string(),
            source: TrackSource::Youtube,
            duration: "3:32".to_string(),
            duration_ms: 212_000,
            thumbnail: "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string(),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            requested_by: Some(RequestedBy {
                user_id: UserId(1),
                display_name: "Olebeh".to_string(),
            }),
            author: "Rick Astley".to_string(),
            playlist: None,
        }
    }

    #[test]
    fn construction_assigns_fresh_ids() {
        let a = Track::new(sample_info());
        let b = Track::new(sample_info());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn display_with_and_without_author() {
        let track = Track::new(sample_info());
        assert_eq!(
            track.display(true),
            "[Never Gonna Give You Up](https://www.youtube.com/watch?v=dQw4w9WgXcQ) \
             | Rick Astley | Olebeh | `3:32`"
        );
        assert_eq!(
            track.display(false),
            "[Never Gonna Give You Up](https://www.youtube.com/watch?v=dQw4w9WgXcQ) \
             | Olebeh | `3:32`"
        );
    }

    #[test]
    fn serialized_track_keeps_its_wire_shape() {
        let track = Track::new(sample_info());
        let value = serde_json::to_value(&track).unwrap();
        assert_eq!(value["source"], "youtube");
        assert_eq!(value["duration_ms"], 212_000);
        assert_eq!(value["requested_by"]["display_name"], "Olebeh");
        assert!(value["playlist"].is_null());
    }

    #[test]
    fn playlist_info_snapshot() {
        let playlist = Playlist {
            title: "Mix".to_string(),
            thumbnail: String::new(),
            source: TrackSource::Spotify,
            length: 2,
            url: "https://example.com/mix".to_string(),
            tracks: vec![Track::new(sample_info()), Track::new(sample_info())],
        };
        let info = playlist.info();
        assert_eq!(info.title, "Mix");
        assert_eq!(info.length, 2);
        assert_eq!(info.source, TrackSource::Spotify);
    }
}
