//! Decode target: texture stream, frame handshake and blit renderer

use std::time::Duration;

use super::frame_sync::FrameSignal;
use super::renderer::TextureRenderer;
use crate::backend::{
    FrameStream, GpuError, GpuProvider, GpuResult, RenderContext, SurfaceHandle,
};

/// Surface a decoder renders into, drawn onto the current context on demand.
pub struct OutputSurface {
    stream: Option<Box<dyn FrameStream>>,
    renderer: Option<TextureRenderer>,
    signal: FrameSignal,
    frame_timeout: Duration,
    /// Own context when not sharing an encoder's input surface
    offscreen: Option<Box<dyn RenderContext>>,
}

impl OutputSurface {
    /// Creates the stream in the currently bound context.
    ///
    /// # Errors
    ///
    /// - `GpuError` - Renderer or texture stream creation failed
    pub fn new(gpu: &dyn GpuProvider, frame_timeout: Duration) -> GpuResult<Self> {
        Self::build(gpu, frame_timeout, None)
    }

    /// Creates the stream in a private offscreen context of the given size.
    ///
    /// # Errors
    ///
    /// - `GpuError` - Context, renderer or texture stream creation failed
    pub fn offscreen(
        gpu: &dyn GpuProvider,
        width: u32,
        height: u32,
        frame_timeout: Duration,
    ) -> GpuResult<Self> {
        let mut context = gpu.create_offscreen_context(width, height)?;
        context.make_current()?;
        Self::build(gpu, frame_timeout, Some(context))
    }

    fn build(
        gpu: &dyn GpuProvider,
        frame_timeout: Duration,
        offscreen: Option<Box<dyn RenderContext>>,
    ) -> GpuResult<Self> {
        let mut surface = Self {
            stream: None,
            renderer: None,
            signal: FrameSignal::new(),
            frame_timeout,
            offscreen,
        };

        let renderer = match gpu.create_gl().and_then(TextureRenderer::new) {
            Ok(renderer) => renderer,
            Err(e) => {
                surface.release();
                return Err(e);
            }
        };
        let texture = renderer.texture();
        surface.renderer = Some(renderer);

        match gpu.create_frame_stream(texture, surface.signal.clone()) {
            Ok(stream) => surface.stream = Some(stream),
            Err(e) => {
                surface.release();
                return Err(e);
            }
        }
        Ok(surface)
    }

    /// Surface handle to configure the decoder with.
    ///
    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - Surface already released
    pub fn surface(&self) -> GpuResult<SurfaceHandle> {
        self.stream
            .as_ref()
            .map(|stream| stream.surface())
            .ok_or_else(released)
    }

    /// Handshake shared with the frame producer.
    pub fn frame_signal(&self) -> FrameSignal {
        self.signal.clone()
    }

    /// Waits for the decoder to render a frame and latches it.
    ///
    /// # Errors
    ///
    /// - `GpuError::FrameTimeout` - No frame within the configured timeout
    /// - `GpuError::FrameAlreadySet` - A frame was dropped before being consumed
    pub fn await_new_image(&mut self) -> GpuResult<()> {
        self.signal.wait(self.frame_timeout)?;
        self.stream.as_mut().ok_or_else(released)?.update_tex_image()
    }

    /// Blits the latched frame onto the current render target.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Drawing reported a GL error
    pub fn draw_image(&mut self) -> GpuResult<()> {
        let st_matrix = self
            .stream
            .as_ref()
            .ok_or_else(released)?
            .transform_matrix();
        self.renderer
            .as_mut()
            .ok_or_else(released)?
            .draw_frame(&st_matrix)
    }

    /// Reads the drawn frame back as RGBA.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Read-back reported a GL error
    pub fn read_frame(&mut self, width: u32, height: u32) -> GpuResult<Vec<u8>> {
        self.renderer
            .as_mut()
            .ok_or_else(released)?
            .read_pixels(width, height)
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release();
        }
        if let Some(mut context) = self.offscreen.take() {
            if let Err(e) = context.release_current() {
                tracing::warn!("Failed to release offscreen context: {}", e);
            }
            context.release();
        }
    }
}

fn released() -> GpuError {
    GpuError::ContextUnavailable {
        reason: "output surface released".to_string(),
    }
}
