use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::track::Track;

/// Opaque readable audio bytes handed from the resolver to the playback
/// engine. The engine takes the stream out of the resource when it starts.
pub type ByteStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Container/encoding hint the playback engine uses to pick a demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamType {
    #[default]
    Arbitrary,
    Raw,
    OggOpus,
    WebmOpus,
}

/// Inline volume on a resource. Values are stored through a perceptual curve
/// so that linear user-facing percentages feel linear to the ear; the getter
/// reverses the curve.
pub struct VolumeControl {
    stored: Mutex<f64>,
}

impl VolumeControl {
    const CURVE: f64 = 1.660964;

    pub fn new() -> Self {
        Self {
            stored: Mutex::new(1.0),
        }
    }

    /// Sets the volume from a linear fraction (1.0 == 100%).
    pub fn set_volume_logarithmic(&self, fraction: f64) {
        *self.stored.lock() = fraction.powf(Self::CURVE);
    }

    /// The raw stored multiplier the engine applies to samples.
    pub fn multiplier(&self) -> f64 {
        *self.stored.lock()
    }

    /// The user-facing percentage, reversing the perceptual curve.
    pub fn percent(&self) -> u32 {
        (self.multiplier().powf(1.0 / Self::CURVE) * 100.0).round() as u32
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// One playable unit: a byte stream, its inline volume, and the track it
/// carries. Created by the dispatcher, consumed by the playback engine.
pub struct AudioResource {
    track: Track,
    kind: StreamType,
    stream: Mutex<Option<ByteStream>>,
    volume: Option<VolumeControl>,
    ended: AtomicBool,
    playback_ms: AtomicU64,
}

impl AudioResource {
    pub fn new(stream: ByteStream, kind: StreamType, track: Track, inline_volume: bool) -> Self {
        Self {
            track,
            kind,
            stream: Mutex::new(Some(stream)),
            volume: inline_volume.then(VolumeControl::new),
            ended: AtomicBool::new(false),
            playback_ms: AtomicU64::new(0),
        }
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn kind(&self) -> StreamType {
        self.kind
    }

    /// Takes the byte stream out. The engine calls this once when playback
    /// starts; later calls return `None`.
    pub fn take_stream(&self) -> Option<ByteStream> {
        self.stream.lock().take()
    }

    pub fn volume(&self) -> Option<&VolumeControl> {
        self.volume.as_ref()
    }

    /// A finished resource can never be replayed.
    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Marks the resource ended, returning whether it already was. Callers
    /// that abandon a resource on purpose mark it first so the engine's
    /// eventual idle transition is not mistaken for a natural finish.
    pub fn mark_ended(&self) -> bool {
        self.ended.swap(true, Ordering::AcqRel)
    }

    /// Milliseconds of audio delivered so far, advanced by the engine.
    pub fn playback_duration_ms(&self) -> u64 {
        self.playback_ms.load(Ordering::Relaxed)
    }

    pub fn set_playback_duration_ms(&self, ms: u64) {
        self.playback_ms.store(ms, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResource")
            .field("track", &self.track.title)
            .field("kind", &self.kind)
            .field("ended", &self.ended())
            .field("playback_ms", &self.playback_duration_ms())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_percent_round_trips_within_rounding() {
        let control = VolumeControl::new();
        for v in 1..=200u32 {
            control.set_volume_logarithmic(f64::from(v) / 100.0);
            let back = control.percent();
            assert!(
                back.abs_diff(v) <= 1,
                "set {v} read back {back}, outside tolerance"
            );
        }
    }

    #[test]
    fn curve_is_perceptual_not_linear() {
        let control = VolumeControl::new();
        control.set_volume_logarithmic(0.5);
        // 0.5^1.660964 ≈ 0.316: half volume stores a much smaller multiplier.
        assert!((control.multiplier() - 0.316).abs() < 0.01);
    }

    #[test]
    fn stream_can_only_be_taken_once() {
        let track = crate::track::Track::new(crate::track::TrackInfo {
            title: "t".into(),
            description: String::new(),
            source: crate::track::TrackSource::Arbitrary,
            duration: "0:01".into(),
            duration_ms: 1_000,
            thumbnail: String::new(),
            url: "https://example.com/a.mp3".into(),
            requested_by: None,
            author: String::new(),
            playlist: None,
        });
        let resource =
            AudioResource::new(Box::new(tokio::io::empty()), StreamType::Arbitrary, track, true);
        assert!(resource.take_stream().is_some());
        assert!(resource.take_stream().is_none());
    }
}
