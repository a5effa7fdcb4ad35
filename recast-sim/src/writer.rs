//! Container writer producing a JSON summary of the muxed stream
//!
//! The output file is created when the writer is opened and filled with an
//! [`OutputSummary`] on `stop`. A writer released without stopping leaves an
//! empty file behind, the same way an aborted muxer leaves a truncated one.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use recast_core::backend::{ContainerError, ContainerFormat, ContainerResult, ContainerWriter};
use recast_core::media::{BufferInfo, MediaFormat};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// One muxed track as it ended up in the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTrack {
    pub format: MediaFormat,
    pub samples: u64,
    pub key_frames: u64,
    pub bytes: u64,
    pub first_presentation_time_us: Option<i64>,
    pub last_presentation_time_us: Option<i64>,
    pub end_of_stream: bool,
    /// Hex SHA-1 over every payload in write order
    pub payload_digest: String,
}

/// Everything a test needs to know about a finished output container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    pub container: ContainerFormat,
    pub orientation_hint: u32,
    pub tracks: Vec<OutputTrack>,
}

impl OutputSummary {
    /// Reads the summary a stopped writer left at `path`.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Open` - File cannot be read
    /// - `ContainerError::InvalidSource` - File was never finalized
    pub fn read(path: &Path) -> ContainerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ContainerError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ContainerError::InvalidSource {
            reason: format!("{} is not a finalized output: {e}", path.display()),
        })
    }

    /// First track whose format has the given mime prefix (`video/` or `audio/`).
    pub fn track_with_prefix(&self, prefix: &str) -> Option<&OutputTrack> {
        self.tracks
            .iter()
            .find(|track| track.format.mime().is_some_and(|mime| mime.starts_with(prefix)))
    }
}

struct TrackRecord {
    format: MediaFormat,
    samples: u64,
    key_frames: u64,
    bytes: u64,
    first_presentation_time_us: Option<i64>,
    last_presentation_time_us: Option<i64>,
    end_of_stream: bool,
    digest: Sha1,
}

impl TrackRecord {
    fn finish(self) -> OutputTrack {
        OutputTrack {
            format: self.format,
            samples: self.samples,
            key_frames: self.key_frames,
            bytes: self.bytes,
            first_presentation_time_us: self.first_presentation_time_us,
            last_presentation_time_us: self.last_presentation_time_us,
            end_of_stream: self.end_of_stream,
            payload_digest: hex::encode(self.digest.finalize()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Initialized,
    Started,
    Stopped,
}

pub struct SimContainerWriter {
    path: PathBuf,
    file: Option<File>,
    container: ContainerFormat,
    orientation_hint: u32,
    tracks: Vec<TrackRecord>,
    state: WriterState,
}

impl SimContainerWriter {
    /// Creates the output file.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Open` - File cannot be created
    pub fn create(path: &Path, container: ContainerFormat) -> ContainerResult<Self> {
        let file = File::create(path).map_err(|e| ContainerError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            container,
            orientation_hint: 0,
            tracks: Vec::new(),
            state: WriterState::Initialized,
        })
    }

    fn expect_state(&self, expected: WriterState, operation: &str) -> ContainerResult<()> {
        if self.state != expected {
            return Err(ContainerError::Write {
                reason: format!("{operation} while {:?}", self.state),
            });
        }
        Ok(())
    }
}

impl ContainerWriter for SimContainerWriter {
    fn set_orientation_hint(&mut self, degrees: u32) -> ContainerResult<()> {
        self.expect_state(WriterState::Initialized, "set_orientation_hint")?;
        if !matches!(degrees, 0 | 90 | 180 | 270) {
            return Err(ContainerError::Write {
                reason: format!("unsupported orientation {degrees}"),
            });
        }
        self.orientation_hint = degrees;
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> ContainerResult<usize> {
        self.expect_state(WriterState::Initialized, "add_track")?;
        if format.mime().is_none() {
            return Err(ContainerError::Write {
                reason: "track format has no mime type".to_string(),
            });
        }
        self.tracks.push(TrackRecord {
            format: format.clone(),
            samples: 0,
            key_frames: 0,
            bytes: 0,
            first_presentation_time_us: None,
            last_presentation_time_us: None,
            end_of_stream: false,
            digest: Sha1::new(),
        });
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> ContainerResult<()> {
        self.expect_state(WriterState::Initialized, "start")?;
        if self.tracks.is_empty() {
            return Err(ContainerError::Write {
                reason: "no tracks added".to_string(),
            });
        }
        self.state = WriterState::Started;
        tracing::debug!(
            "Writer started for {} with {} tracks",
            self.path.display(),
            self.tracks.len()
        );
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> ContainerResult<()> {
        self.expect_state(WriterState::Started, "write_sample")?;
        let record = self
            .tracks
            .get_mut(track)
            .ok_or(ContainerError::InvalidTrack { track })?;

        if info.is_end_of_stream() {
            record.end_of_stream = true;
            return Ok(());
        }
        if record.end_of_stream {
            return Err(ContainerError::Write {
                reason: format!("sample for track {track} after end of stream"),
            });
        }

        let payload = data
            .get(info.offset..info.offset + info.size)
            .ok_or_else(|| ContainerError::Write {
                reason: format!(
                    "sample range {}..{} exceeds {} bytes",
                    info.offset,
                    info.offset + info.size,
                    data.len()
                ),
            })?;
        record.digest.update(payload);
        record.samples += 1;
        record.bytes += payload.len() as u64;
        if info.flags.is_key_frame() {
            record.key_frames += 1;
        }
        record
            .first_presentation_time_us
            .get_or_insert(info.presentation_time_us);
        record.last_presentation_time_us = Some(info.presentation_time_us);
        Ok(())
    }

    fn stop(&mut self) -> ContainerResult<()> {
        self.expect_state(WriterState::Started, "stop")?;
        self.state = WriterState::Stopped;

        let summary = OutputSummary {
            container: self.container,
            orientation_hint: self.orientation_hint,
            tracks: self.tracks.drain(..).map(TrackRecord::finish).collect(),
        };
        let text = serde_json::to_string_pretty(&summary).map_err(|e| ContainerError::Write {
            reason: e.to_string(),
        })?;
        let file = self.file.as_mut().ok_or_else(|| ContainerError::Write {
            reason: "writer already released".to_string(),
        })?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn release(&mut self) {
        self.file = None;
    }
}
