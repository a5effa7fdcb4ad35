//! In-memory backend for engine and pool unit tests
//!
//! Only pass-through jobs can complete: no codec or GPU resource can be created.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use super::{
    CodecError, CodecFactory, CodecResult, ContainerFormat, ContainerResult, ContainerWriter,
    Extractor, FrameStream, GlApi, GpuError, GpuProvider, GpuResult, MediaBackend, MediaCodec,
    RenderContext, SourceMetadata, SurfaceHandle, TextureId,
};
use crate::coder::test_support::{Sample, SharedWriter, VecExtractor, WrittenTracks};
use crate::media::{MediaFormat, mime};
use crate::surface::FrameSignal;

pub(crate) struct NoCodecs;

impl CodecFactory for NoCodecs {
    fn create_decoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>> {
        Err(CodecError::Unsupported {
            mime: mime.to_string(),
        })
    }

    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>> {
        Err(CodecError::Unsupported {
            mime: mime.to_string(),
        })
    }

    fn supports_decoder(&self, _mime: &str) -> bool {
        false
    }

    fn supports_encoder(&self, _mime: &str) -> bool {
        false
    }
}

pub(crate) struct NoGpu;

fn no_gpu<T>() -> GpuResult<T> {
    Err(GpuError::ContextUnavailable {
        reason: "no gpu in unit tests".to_string(),
    })
}

impl GpuProvider for NoGpu {
    fn create_window_context(&self, _window: SurfaceHandle) -> GpuResult<Box<dyn RenderContext>> {
        no_gpu()
    }

    fn create_offscreen_context(
        &self,
        _width: u32,
        _height: u32,
    ) -> GpuResult<Box<dyn RenderContext>> {
        no_gpu()
    }

    fn create_gl(&self) -> GpuResult<Box<dyn GlApi>> {
        no_gpu()
    }

    fn create_frame_stream(
        &self,
        _texture: TextureId,
        _signal: FrameSignal,
    ) -> GpuResult<Box<dyn FrameStream>> {
        no_gpu()
    }
}

/// Blocks metadata reads until opened.
#[derive(Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub(crate) fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }
}

pub(crate) struct MemoryBackend {
    pub(crate) metadata: SourceMetadata,
    pub(crate) formats: Vec<MediaFormat>,
    pub(crate) samples: Vec<Sample>,
    pub(crate) written: Arc<Mutex<WrittenTracks>>,
    pub(crate) gate: Option<Arc<Gate>>,
    writers_opened: AtomicUsize,
}

impl MemoryBackend {
    pub(crate) fn new(
        duration_us: Option<i64>,
        formats: Vec<MediaFormat>,
        samples: Vec<Sample>,
    ) -> Self {
        Self {
            metadata: SourceMetadata {
                duration_us,
                rotation_degrees: 90,
            },
            formats,
            samples,
            written: Arc::new(Mutex::new(WrittenTracks::default())),
            gate: None,
            writers_opened: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn writers_opened(&self) -> usize {
        self.writers_opened.load(Ordering::SeqCst)
    }
}

impl MediaBackend for MemoryBackend {
    fn read_metadata(&self, _input: &Path) -> ContainerResult<SourceMetadata> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        Ok(self.metadata)
    }

    fn open_extractor(&self, _input: &Path) -> ContainerResult<Box<dyn Extractor>> {
        Ok(Box::new(VecExtractor::new(
            self.formats.clone(),
            self.samples.clone(),
        )))
    }

    fn create_writer(
        &self,
        _output: &Path,
        _container: ContainerFormat,
    ) -> ContainerResult<Box<dyn ContainerWriter>> {
        self.writers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SharedWriter(self.written.clone())))
    }

    fn codecs(&self) -> &dyn CodecFactory {
        &NoCodecs
    }

    fn gpu(&self) -> &dyn GpuProvider {
        &NoGpu
    }
}

pub(crate) fn video_format() -> MediaFormat {
    MediaFormat::video(mime::VIDEO_AVC, 1920, 1080).with_csd(
        vec![0, 0, 0, 1, 0x67, 66, 0, 30],
        Some(vec![0, 0, 0, 1, 0x68]),
    )
}

pub(crate) fn audio_format() -> MediaFormat {
    MediaFormat::audio(mime::AUDIO_AAC, 44100, 2).with_csd(vec![0x12, 0x10], None)
}

/// `count` video samples on track 0 interleaved with `count` audio samples on track 1.
pub(crate) fn interleaved(count: usize) -> Vec<Sample> {
    (0..count)
        .flat_map(|i| {
            let pts = i as i64 * 33_333;
            [
                Sample {
                    track: 0,
                    pts,
                    key: i % 30 == 0,
                    data: vec![0xAA, i as u8, 1],
                },
                Sample {
                    track: 1,
                    pts,
                    key: true,
                    data: vec![0xBB, i as u8],
                },
            ]
        })
        .collect()
}
