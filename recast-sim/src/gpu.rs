//! Simulated GPU: contexts, GL calls and decoder texture streams
//!
//! Decoders and encoders never touch pixels here. A rendered decoder frame is
//! its presentation time pushed into the matching texture stream, and a
//! presented encoder frame is a timestamp pushed into the encoder's input
//! queue. The [`SurfaceRegistry`] connects codecs to those queues by handle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use recast_core::backend::{
    FrameStream, GlApi, GpuError, GpuProvider, GpuResult, ProgramId, QuadDraw, RenderContext,
    SurfaceHandle, TextureId,
};
use recast_core::surface::FrameSignal;

/// GL_INVALID_VALUE
pub const GL_INVALID_VALUE: u32 = 0x0501;
/// GL_INVALID_OPERATION
pub const GL_INVALID_OPERATION: u32 = 0x0502;
/// EGL_BAD_SURFACE
pub const EGL_BAD_SURFACE: u32 = 0x300D;

const NANOS_PER_MICRO: i64 = 1_000;

/// Presentation times of frames waiting on one side of the bridge.
pub type FrameQueue = Arc<Mutex<VecDeque<i64>>>;

struct StreamTarget {
    signal: FrameSignal,
    frames: FrameQueue,
}

/// Shared table of decoder output surfaces and encoder input surfaces.
#[derive(Default)]
pub struct SurfaceRegistry {
    next_handle: AtomicU64,
    streams: Mutex<HashMap<SurfaceHandle, StreamTarget>>,
    encoder_inputs: Mutex<HashMap<SurfaceHandle, FrameQueue>>,
    asynchronous_frames: bool,
}

impl SurfaceRegistry {
    pub fn new(asynchronous_frames: bool) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            asynchronous_frames,
            ..Default::default()
        }
    }

    fn allocate(&self) -> SurfaceHandle {
        SurfaceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a surface-input encoder and returns its window handle.
    pub fn create_encoder_input(&self) -> (SurfaceHandle, FrameQueue) {
        let handle = self.allocate();
        let frames = FrameQueue::default();
        self.encoder_inputs.lock().insert(handle, frames.clone());
        (handle, frames)
    }

    fn encoder_input(&self, handle: SurfaceHandle) -> Option<FrameQueue> {
        self.encoder_inputs.lock().get(&handle).cloned()
    }

    fn register_stream(&self, signal: FrameSignal) -> (SurfaceHandle, FrameQueue) {
        let handle = self.allocate();
        let frames = FrameQueue::default();
        self.streams.lock().insert(
            handle,
            StreamTarget {
                signal,
                frames: frames.clone(),
            },
        );
        (handle, frames)
    }

    /// Decoder side: renders the frame at `presentation_time_us` into `surface`.
    ///
    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - No texture stream owns `surface`
    pub fn render(&self, surface: SurfaceHandle, presentation_time_us: i64) -> GpuResult<()> {
        let streams = self.streams.lock();
        let target = streams
            .get(&surface)
            .ok_or_else(|| GpuError::ContextUnavailable {
                reason: format!("surface {} has no texture stream", surface.0),
            })?;
        target.frames.lock().push_back(presentation_time_us);

        let signal = target.signal.clone();
        if self.asynchronous_frames {
            std::thread::spawn(move || signal.notify());
        } else {
            signal.notify();
        }
        Ok(())
    }

    pub fn remove(&self, handle: SurfaceHandle) {
        self.streams.lock().remove(&handle);
        self.encoder_inputs.lock().remove(&handle);
    }

    /// Surfaces still registered, for leak checks.
    pub fn live_surfaces(&self) -> usize {
        self.streams.lock().len() + self.encoder_inputs.lock().len()
    }
}

/// Context presenting into an encoder input queue, or nowhere when offscreen.
struct SimContext {
    target: Option<FrameQueue>,
    current: bool,
    presentation_time_ns: i64,
    released: bool,
}

impl RenderContext for SimContext {
    fn make_current(&mut self) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::CallFailed {
                call: "eglMakeCurrent".to_string(),
                code: EGL_BAD_SURFACE,
            });
        }
        self.current = true;
        Ok(())
    }

    fn release_current(&mut self) -> GpuResult<()> {
        self.current = false;
        Ok(())
    }

    fn set_presentation_time(&mut self, nanos: i64) -> GpuResult<()> {
        self.presentation_time_ns = nanos;
        Ok(())
    }

    fn swap_buffers(&mut self) -> GpuResult<()> {
        if !self.current {
            return Err(GpuError::CallFailed {
                call: "eglSwapBuffers".to_string(),
                code: EGL_BAD_SURFACE,
            });
        }
        if let Some(target) = &self.target {
            target
                .lock()
                .push_back(self.presentation_time_ns / NANOS_PER_MICRO);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        self.current = false;
        self.target = None;
    }
}

/// GL entry points that record draws and can inject an error code.
struct SimGl {
    next_name: Arc<AtomicU32>,
    draws: Arc<AtomicU64>,
    fail_draw_after: Option<u64>,
    pending_error: Option<u32>,
}

impl SimGl {
    fn name(&self) -> u32 {
        self.next_name.fetch_add(1, Ordering::Relaxed)
    }
}

impl GlApi for SimGl {
    fn create_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> GpuResult<ProgramId> {
        if vertex_source.is_empty() || fragment_source.is_empty() {
            self.pending_error = Some(GL_INVALID_OPERATION);
        }
        Ok(ProgramId(self.name()))
    }

    fn create_external_texture(&mut self) -> GpuResult<TextureId> {
        Ok(TextureId(self.name()))
    }

    fn clear(&mut self, _red: f32, _green: f32, _blue: f32, _alpha: f32) {}

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> GpuResult<()> {
        let drawn = self.draws.fetch_add(1, Ordering::Relaxed);
        if draw.vertices.len() < draw.vertex_count * 5 {
            self.pending_error = Some(GL_INVALID_OPERATION);
        }
        if self.fail_draw_after.is_some_and(|limit| drawn >= limit) {
            self.pending_error = Some(GL_INVALID_OPERATION);
        }
        Ok(())
    }

    fn finish(&mut self) {}

    fn read_pixels(&mut self, width: u32, height: u32, pixels: &mut [u8]) -> GpuResult<()> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() < expected {
            self.pending_error = Some(GL_INVALID_VALUE);
            return Ok(());
        }
        // Shade encodes how many quads were drawn so far
        let shade = self.draws.load(Ordering::Relaxed) as u8;
        for pixel in pixels[..expected].chunks_exact_mut(4) {
            pixel.copy_from_slice(&[shade, 0x80, 0x40, 0xFF]);
        }
        Ok(())
    }

    fn take_error(&mut self) -> Option<u32> {
        self.pending_error.take()
    }

    fn delete_program(&mut self, _program: ProgramId) {}

    fn delete_texture(&mut self, _texture: TextureId) {}
}

/// Texture stream whose frames are timestamps rendered by a simulated decoder.
struct SimFrameStream {
    handle: SurfaceHandle,
    frames: FrameQueue,
    registry: Arc<SurfaceRegistry>,
}

impl FrameStream for SimFrameStream {
    fn surface(&self) -> SurfaceHandle {
        self.handle
    }

    fn update_tex_image(&mut self) -> GpuResult<()> {
        // Latching consumes the oldest rendered frame
        self.frames.lock().pop_front();
        Ok(())
    }

    fn transform_matrix(&self) -> [f32; 16] {
        recast_core::surface::renderer::IDENTITY_MATRIX
    }

    fn release(&mut self) {
        self.registry.remove(self.handle);
    }
}

/// Simulated GPU provider.
#[derive(Clone)]
pub struct SimGpu {
    registry: Arc<SurfaceRegistry>,
    next_name: Arc<AtomicU32>,
    draws: Arc<AtomicU64>,
    fail_draw_after: Option<u64>,
}

impl SimGpu {
    pub fn new(registry: Arc<SurfaceRegistry>) -> Self {
        Self {
            registry,
            next_name: Arc::new(AtomicU32::new(1)),
            draws: Arc::new(AtomicU64::new(0)),
            fail_draw_after: None,
        }
    }

    /// Every draw after the first `draws` reports GL_INVALID_OPERATION.
    pub fn with_draw_failure_after(mut self, draws: u64) -> Self {
        self.fail_draw_after = Some(draws);
        self
    }

    /// Quads drawn by every renderer created from this provider.
    pub fn draw_count(&self) -> u64 {
        self.draws.load(Ordering::Relaxed)
    }
}

impl GpuProvider for SimGpu {
    fn create_window_context(&self, window: SurfaceHandle) -> GpuResult<Box<dyn RenderContext>> {
        let target =
            self.registry
                .encoder_input(window)
                .ok_or_else(|| GpuError::ContextUnavailable {
                    reason: format!("window {} is not an encoder input surface", window.0),
                })?;
        Ok(Box::new(SimContext {
            target: Some(target),
            current: false,
            presentation_time_ns: 0,
            released: false,
        }))
    }

    fn create_offscreen_context(
        &self,
        width: u32,
        height: u32,
    ) -> GpuResult<Box<dyn RenderContext>> {
        if width == 0 || height == 0 {
            return Err(GpuError::ContextUnavailable {
                reason: format!("offscreen buffer {width}x{height} is empty"),
            });
        }
        Ok(Box::new(SimContext {
            target: None,
            current: false,
            presentation_time_ns: 0,
            released: false,
        }))
    }

    fn create_gl(&self) -> GpuResult<Box<dyn GlApi>> {
        Ok(Box::new(SimGl {
            next_name: self.next_name.clone(),
            draws: self.draws.clone(),
            fail_draw_after: self.fail_draw_after,
            pending_error: None,
        }))
    }

    fn create_frame_stream(
        &self,
        _texture: TextureId,
        signal: FrameSignal,
    ) -> GpuResult<Box<dyn FrameStream>> {
        let (handle, frames) = self.registry.register_stream(signal);
        Ok(Box::new(SimFrameStream {
            handle,
            frames,
            registry: self.registry.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use recast_core::surface::{InputSurface, OutputSurface, bridge_frame};

    use super::*;

    #[test]
    fn test_frame_travels_from_decoder_surface_to_encoder() {
        let registry = Arc::new(SurfaceRegistry::new(false));
        let gpu = SimGpu::new(registry.clone());
        let (window, encoder_frames) = registry.create_encoder_input();

        let mut input = InputSurface::new(&gpu, window).unwrap();
        input.make_current().unwrap();
        let mut output = OutputSurface::new(&gpu, Duration::from_millis(100)).unwrap();

        registry.render(output.surface().unwrap(), 40_000).unwrap();
        bridge_frame(&mut output, &mut input, 40_000).unwrap();

        assert_eq!(encoder_frames.lock().pop_front(), Some(40_000));
        assert_eq!(gpu.draw_count(), 1);

        output.release();
        input.release();
        registry.remove(window);
        assert_eq!(registry.live_surfaces(), 0);
    }

    #[test]
    fn test_asynchronous_delivery() {
        let registry = Arc::new(SurfaceRegistry::new(true));
        let gpu = SimGpu::new(registry.clone());
        let mut output = OutputSurface::new(&gpu, Duration::from_secs(2)).unwrap();

        registry.render(output.surface().unwrap(), 0).unwrap();
        output.await_new_image().unwrap();
        output.draw_image().unwrap();
        output.release();
    }

    #[test]
    fn test_injected_draw_failure() {
        let registry = Arc::new(SurfaceRegistry::new(false));
        let gpu = SimGpu::new(registry.clone()).with_draw_failure_after(0);
        let mut output = OutputSurface::new(&gpu, Duration::from_millis(100)).unwrap();

        registry.render(output.surface().unwrap(), 0).unwrap();
        output.await_new_image().unwrap();
        assert!(matches!(
            output.draw_image(),
            Err(GpuError::CallFailed {
                code: GL_INVALID_OPERATION,
                ..
            })
        ));
        output.release();
    }

    #[test]
    fn test_unknown_window_is_rejected() {
        let gpu = SimGpu::new(Arc::new(SurfaceRegistry::new(false)));
        assert!(gpu.create_window_context(SurfaceHandle(99)).is_err());
        assert!(gpu.create_offscreen_context(0, 10).is_err());
    }
}
