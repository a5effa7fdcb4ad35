//! Source fixtures: JSON descriptions of synthetic input containers
//!
//! A fixture lists tracks by format, sample count and cadence. Sample sizes
//! and payload bytes are derived from the fixture seed, so the same file
//! always demuxes to the same byte stream.

use std::path::Path;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use recast_core::backend::{ContainerError, ContainerResult};
use recast_core::media::{MediaFormat, MediaKind, avc, mime};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::codec::{FRAMES_PER_PACKET, audio_specific_config};

const MICROS_PER_SECOND: i64 = 1_000_000;
const VIDEO_SAMPLE_BYTES: usize = 2048;
const AUDIO_SAMPLE_BYTES: usize = 384;
const AVC_PPS: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];
const TRACK_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// One elementary stream of a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureTrack {
    pub format: MediaFormat,
    pub sample_count: usize,
    pub sample_interval_us: i64,
    pub average_sample_size: usize,
    /// Every n-th sample is a sync sample; 0 and 1 mark every sample
    #[serde(default)]
    pub key_frame_interval: usize,
}

impl FixtureTrack {
    pub fn kind(&self) -> Option<MediaKind> {
        self.format.kind()
    }
}

/// Description of a synthetic source container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFixture {
    /// Length used to lay out the tracks
    pub duration_us: i64,
    /// When false the container reports no duration
    #[serde(default = "default_true")]
    pub declares_duration: bool,
    #[serde(default)]
    pub rotation_degrees: u32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub tracks: Vec<FixtureTrack>,
}

fn default_true() -> bool {
    true
}

/// Position of one sample in the interleaved stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    pub track: usize,
    /// Index within the track
    pub index: usize,
    pub presentation_time_us: i64,
    pub size: usize,
    pub key_frame: bool,
}

impl SourceFixture {
    pub fn new(duration_us: i64) -> Self {
        Self {
            duration_us,
            declares_duration: true,
            rotation_degrees: 0,
            seed: 0,
            tracks: Vec::new(),
        }
    }

    /// Adds a video track covering the whole duration.
    pub fn with_video(self, mime_type: &str, width: u32, height: u32, frame_rate: u32) -> Self {
        let frame_rate = frame_rate.max(1);
        let mut format = MediaFormat::video(mime_type, width, height)
            .with_frame_rate(frame_rate)
            .with_duration_us(self.duration_us)
            .with_max_input_size(VIDEO_SAMPLE_BYTES * 2);
        if mime_type == mime::VIDEO_AVC {
            format = format.with_csd(
                avc::sps_with_profile(avc::PROFILE_IDC_BASELINE, 31),
                Some(AVC_PPS.to_vec()),
            );
        }

        let sample_interval_us = MICROS_PER_SECOND / i64::from(frame_rate);
        let track = FixtureTrack {
            format,
            sample_count: self.samples_covering(sample_interval_us),
            sample_interval_us,
            average_sample_size: VIDEO_SAMPLE_BYTES,
            key_frame_interval: frame_rate as usize,
        };
        self.with_track(track)
    }

    /// Adds an audio track of 1024-frame packets covering the whole duration.
    pub fn with_audio(self, mime_type: &str, sample_rate: u32, channels: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let mut format = MediaFormat::audio(mime_type, sample_rate, channels)
            .with_duration_us(self.duration_us)
            .with_max_input_size(AUDIO_SAMPLE_BYTES * 2);
        if mime_type == mime::AUDIO_AAC {
            format = format.with_csd(audio_specific_config(sample_rate, channels), None);
        }

        let sample_interval_us =
            FRAMES_PER_PACKET as i64 * MICROS_PER_SECOND / i64::from(sample_rate);
        let track = FixtureTrack {
            format,
            sample_count: self.samples_covering(sample_interval_us),
            sample_interval_us,
            average_sample_size: AUDIO_SAMPLE_BYTES,
            key_frame_interval: 1,
        };
        self.with_track(track)
    }

    pub fn with_track(mut self, track: FixtureTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation_degrees = degrees;
        for track in &mut self.tracks {
            if track.kind() == Some(MediaKind::Video) {
                track.format.rotation_degrees = Some(degrees);
            }
        }
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn without_declared_duration(mut self) -> Self {
        self.declares_duration = false;
        self
    }

    /// Duration reported in the container metadata.
    pub fn declared_duration_us(&self) -> Option<i64> {
        self.declares_duration.then_some(self.duration_us)
    }

    fn samples_covering(&self, interval_us: i64) -> usize {
        if interval_us <= 0 || self.duration_us <= 0 {
            return 0;
        }
        (self.duration_us / interval_us) as usize
    }

    fn track_rng(&self, track: usize) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed ^ (track as u64 + 1).wrapping_mul(TRACK_SEED_STRIDE))
    }

    /// Every sample of every track, ordered by presentation time then track.
    pub fn samples(&self) -> Vec<SampleEntry> {
        let mut entries = Vec::new();
        for (track, spec) in self.tracks.iter().enumerate() {
            let mut rng = self.track_rng(track);
            let average = spec.average_sample_size;
            let limit = spec.format.max_input_size.unwrap_or(usize::MAX);
            let key_interval = spec.key_frame_interval.max(1);

            for index in 0..spec.sample_count {
                let size = rng
                    .random_range(average * 3 / 4..=average * 5 / 4)
                    .clamp(1, limit.max(1));
                entries.push(SampleEntry {
                    track,
                    index,
                    presentation_time_us: index as i64 * spec.sample_interval_us,
                    size,
                    key_frame: index % key_interval == 0,
                });
            }
        }
        entries.sort_by_key(|entry| (entry.presentation_time_us, entry.track));
        entries
    }

    /// Payload bytes of one sample.
    pub fn sample_data(&self, entry: &SampleEntry) -> Vec<u8> {
        let seed = self.seed
            ^ (entry.track as u64 + 1).wrapping_mul(TRACK_SEED_STRIDE)
            ^ (entry.index as u64).rotate_left(32);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut data = vec![0u8; entry.size];
        rng.fill_bytes(&mut data);
        data
    }

    /// Hex SHA-1 over the payloads of `track` in decode order.
    pub fn track_digest(&self, track: usize) -> String {
        let mut hasher = Sha1::new();
        for entry in self.samples().iter().filter(|entry| entry.track == track) {
            hasher.update(self.sample_data(entry));
        }
        hex::encode(hasher.finalize())
    }

    /// Reads a fixture file.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Open` - File cannot be read
    /// - `ContainerError::InvalidSource` - File is not a fixture
    pub fn load(path: &Path) -> ContainerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ContainerError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ContainerError::InvalidSource {
            reason: format!("{} is not a source fixture: {e}", path.display()),
        })
    }

    /// Writes the fixture as pretty JSON.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Io` - File cannot be written
    /// - `ContainerError::Write` - Serialization failed
    pub fn save(&self, path: &Path) -> ContainerResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| ContainerError::Write {
            reason: e.to_string(),
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn clip() -> SourceFixture {
        SourceFixture::new(1_000_000)
            .with_video(mime::VIDEO_AVC, 1920, 1080, 30)
            .with_audio(mime::AUDIO_AAC, 44100, 2)
            .with_seed(9)
    }

    #[test]
    fn test_track_layout() {
        let fixture = clip();
        let video = &fixture.tracks[0];
        let audio = &fixture.tracks[1];

        assert_eq!(video.sample_count, 30);
        assert_eq!(video.sample_interval_us, 33_333);
        assert_eq!(
            avc::profile_idc(video.format.csd0.as_deref().unwrap()),
            Ok(avc::PROFILE_IDC_BASELINE)
        );
        assert_eq!(audio.sample_interval_us, 23_219);
        assert_eq!(audio.sample_count, 43);
        assert_eq!(audio.format.csd0, Some(vec![0x12, 0x10]));
    }

    #[test]
    fn test_samples_are_interleaved_and_bounded() {
        let fixture = clip();
        let samples = fixture.samples();

        assert_eq!(samples.len(), 30 + 43);
        assert_eq!(samples[0].track, 0);
        assert_eq!(samples[1].track, 1);
        for entry in &samples {
            let limit = fixture.tracks[entry.track].format.max_input_size.unwrap();
            assert!(entry.size >= 1 && entry.size <= limit);
        }
        let key_frames = samples
            .iter()
            .filter(|entry| entry.track == 0 && entry.key_frame)
            .count();
        assert_eq!(key_frames, 1);
    }

    #[test]
    fn test_payloads_are_deterministic() {
        let fixture = clip();
        let entry = fixture.samples()[5];
        assert_eq!(fixture.sample_data(&entry), fixture.sample_data(&entry));
        assert_eq!(fixture.track_digest(1), clip().track_digest(1));
        assert_ne!(fixture.track_digest(0), clip().with_seed(10).track_digest(0));
    }

    #[test]
    fn test_rotation_and_undeclared_duration() {
        let fixture = clip().with_rotation(90).without_declared_duration();
        assert_eq!(fixture.tracks[0].format.rotation_degrees, Some(90));
        assert_eq!(fixture.tracks[1].format.rotation_degrees, None);
        assert_eq!(fixture.declared_duration_us(), None);
        assert_eq!(clip().declared_duration_us(), Some(1_000_000));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.json");
        let fixture = clip().with_rotation(270);
        fixture.save(&path).unwrap();
        assert_eq!(SourceFixture::load(&path).unwrap(), fixture);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            SourceFixture::load(&missing),
            Err(ContainerError::Open { .. })
        ));

        let garbage = dir.path().join("garbage.mp4");
        std::fs::write(&garbage, b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(matches!(
            SourceFixture::load(&garbage),
            Err(ContainerError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_zero_duration_has_no_samples() {
        let fixture = SourceFixture::new(0).with_video(mime::VIDEO_AVC, 640, 360, 30);
        assert!(fixture.samples().is_empty());
        assert_eq!(fixture.declared_duration_us(), Some(0));
    }

    proptest! {
        #[test]
        fn prop_samples_ordered_by_time(
            duration_ms in 1i64..3_000,
            frame_rate in 1u32..60,
            sample_rate in prop::sample::select(vec![22050u32, 44100, 48000]),
        ) {
            let fixture = SourceFixture::new(duration_ms * 1000)
                .with_video(mime::VIDEO_VP8, 640, 360, frame_rate)
                .with_audio(mime::AUDIO_VORBIS, sample_rate, 1);
            let samples = fixture.samples();
            for pair in samples.windows(2) {
                prop_assert!(
                    (pair[0].presentation_time_us, pair[0].track)
                        <= (pair[1].presentation_time_us, pair[1].track)
                );
            }
            for entry in &samples {
                prop_assert!(entry.presentation_time_us < fixture.duration_us);
            }
        }
    }
}
