//! Single frame capture through an offscreen decode surface
//!
//! Decodes the video track until the first frame at or after the requested
//! time, draws it into a private offscreen context sized like the source and
//! reads it back as RGBA. No encoder or container writer is involved.

use std::path::Path;

use serde::Serialize;

use super::select_tracks;
use crate::backend::{Extractor, MediaBackend, MediaCodec, OutputStatus};
use crate::coder::{drain_extractor, release_codec};
use crate::config::PipelineConfig;
use crate::error::{Result, TranscodeError};
use crate::media::MediaKind;
use crate::surface::OutputSurface;

/// One decoded frame read back from the GPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedFrame {
    pub presentation_time_us: i64,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows
    #[serde(skip)]
    pub rgba: Vec<u8>,
}

/// Captures the first frame of `input` presented at or after `at_us`.
///
/// # Errors
///
/// - `TranscodeError::Configuration` - No video track, no frame size, no decoder, or no frame at `at_us`
/// - `TranscodeError::Gpu` - Offscreen surface failed or no frame arrived within `capture_frame_timeout`
/// - `TranscodeError::Codec` / `Container` - Decoding or demuxing failed
pub fn capture_frame(
    backend: &dyn MediaBackend,
    config: &PipelineConfig,
    input: &Path,
    at_us: i64,
) -> Result<CapturedFrame> {
    let mut extractor = backend.open_extractor(input)?;
    let mut capture = FrameCapture {
        decoder: None,
        decoder_started: false,
        surface: None,
    };
    let result = capture.run(backend, config, extractor.as_mut(), at_us);
    capture.release();
    extractor.release();

    match &result {
        Ok(frame) => tracing::info!(
            "Captured {}x{} frame at {}us from {}",
            frame.width,
            frame.height,
            frame.presentation_time_us,
            input.display()
        ),
        Err(e) => tracing::error!("Frame capture from {} failed: {}", input.display(), e),
    }
    result
}

struct FrameCapture {
    decoder: Option<Box<dyn MediaCodec>>,
    decoder_started: bool,
    surface: Option<OutputSurface>,
}

impl FrameCapture {
    fn run(
        &mut self,
        backend: &dyn MediaBackend,
        config: &PipelineConfig,
        extractor: &mut dyn Extractor,
        at_us: i64,
    ) -> Result<CapturedFrame> {
        let source = select_tracks(extractor)?
            .into_iter()
            .find(|source| source.kind == MediaKind::Video)
            .ok_or_else(|| TranscodeError::configuration("input has no video track"))?;
        let (Some(width), Some(height)) = (source.format.width, source.format.height) else {
            return Err(TranscodeError::configuration("video track has no frame size"));
        };
        let mime = source
            .format
            .mime()
            .ok_or_else(|| TranscodeError::configuration("video track has no mime type"))?;
        if !backend.codecs().supports_decoder(mime) {
            return Err(TranscodeError::configuration(format!("no decoder for {mime}")));
        }

        extractor.select_track(source.index)?;
        let surface = self.surface.insert(OutputSurface::offscreen(
            backend.gpu(),
            width,
            height,
            config.capture_frame_timeout,
        )?);

        let mut format = source.format.clone();
        if format.rotation_degrees.is_some() {
            format.rotation_degrees = Some(0);
        }
        let decoder = self.decoder.insert(backend.codecs().create_decoder(mime)?);
        decoder.configure(&format, Some(surface.surface()?))?;
        decoder.start()?;
        self.decoder_started = true;

        let timeout = config.dequeue_timeout;
        let mut extractor_done = false;
        loop {
            let fed = drain_extractor(
                source.index,
                extractor,
                &mut **decoder,
                &mut extractor_done,
                timeout,
            )?;

            let (index, info) = match decoder.dequeue_output_buffer(timeout)? {
                OutputStatus::Buffer { index, info } => (index, info),
                OutputStatus::FormatChanged | OutputStatus::BuffersChanged => continue,
                OutputStatus::TryAgainLater => {
                    if !fed.is_busy() {
                        std::thread::sleep(config.idle_sleep);
                    }
                    continue;
                }
            };

            if info.is_end_of_stream() {
                decoder.release_output_buffer(index, false)?;
                return Err(TranscodeError::configuration(format!(
                    "no video frame at or after {at_us}us"
                )));
            }

            let wanted = info.size > 0 && info.presentation_time_us >= at_us;
            decoder.release_output_buffer(index, wanted)?;
            if !wanted {
                tracing::trace!("Skipped frame at {}us", info.presentation_time_us);
                continue;
            }

            surface.await_new_image()?;
            surface.draw_image()?;
            let rgba = surface.read_frame(width, height)?;
            return Ok(CapturedFrame {
                presentation_time_us: info.presentation_time_us,
                width,
                height,
                rgba,
            });
        }
    }

    fn release(&mut self) {
        release_codec(self.decoder.take(), self.decoder_started, "capture decoder");
        self.decoder_started = false;
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::backend::test_backend::{MemoryBackend, audio_format, interleaved, video_format};
    use crate::error::ErrorCategory;

    #[test]
    fn test_capture_requires_video_track() {
        let backend = MemoryBackend::new(Some(1_000_000), vec![audio_format()], Vec::new());
        let err = capture_frame(
            &backend,
            &PipelineConfig::default(),
            &PathBuf::from("audio-only.m4a"),
            0,
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_capture_requires_decoder() {
        let backend = MemoryBackend::new(
            Some(1_000_000),
            vec![video_format(), audio_format()],
            interleaved(4),
        );
        let err = capture_frame(
            &backend,
            &PipelineConfig::default(),
            &PathBuf::from("clip.mp4"),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, TranscodeError::Configuration { .. }));
        assert!(err.to_string().contains("no decoder"));
    }
}
