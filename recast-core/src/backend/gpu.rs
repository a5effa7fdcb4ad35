//! GPU context, texture and surface primitives used by the surface bridge

use serde::{Deserialize, Serialize};

use crate::surface::FrameSignal;

/// Errors reported by GPU primitives or detected by the surface bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("{call} failed with error {code:#06x}")]
    CallFailed { call: String, code: u32 },

    #[error("No new frame within {waited_ms}ms")]
    FrameTimeout { waited_ms: u64 },

    #[error("Frame signaled again before the previous one was consumed")]
    FrameAlreadySet,

    #[error("GPU context unavailable: {reason}")]
    ContextUnavailable { reason: String },
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Opaque native window handle passed between codecs and the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// One draw of a textured triangle-strip quad.
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw<'a> {
    pub program: ProgramId,
    pub texture: TextureId,
    /// Interleaved position (x, y, z) and texture (u, v) per vertex
    pub vertices: &'a [f32],
    pub vertex_count: usize,
    pub mvp_matrix: &'a [f32; 16],
    pub st_matrix: &'a [f32; 16],
}

/// Rendering context bound to a window or offscreen target.
pub trait RenderContext: Send {
    fn make_current(&mut self) -> GpuResult<()>;

    fn release_current(&mut self) -> GpuResult<()>;

    /// Timestamp attached to the next presented frame.
    fn set_presentation_time(&mut self, nanos: i64) -> GpuResult<()>;

    /// Presents the back buffer.
    fn swap_buffers(&mut self) -> GpuResult<()>;

    fn release(&mut self);
}

/// GL entry points needed for the single blit pass.
pub trait GlApi: Send {
    fn create_program(&mut self, vertex_source: &str, fragment_source: &str)
    -> GpuResult<ProgramId>;

    fn create_external_texture(&mut self) -> GpuResult<TextureId>;

    fn clear(&mut self, red: f32, green: f32, blue: f32, alpha: f32);

    fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> GpuResult<()>;

    fn finish(&mut self);

    /// Copies the current render target into `pixels` as tightly packed RGBA.
    fn read_pixels(&mut self, width: u32, height: u32, pixels: &mut [u8]) -> GpuResult<()>;

    /// Pops the oldest pending error code.
    fn take_error(&mut self) -> Option<u32>;

    fn delete_program(&mut self, program: ProgramId);

    fn delete_texture(&mut self, texture: TextureId);
}

/// Texture fed by a decoder that renders into the stream's surface.
pub trait FrameStream: Send {
    /// Surface handed to the decoder as its output target.
    fn surface(&self) -> SurfaceHandle;

    /// Latches the most recent frame into the texture.
    fn update_tex_image(&mut self) -> GpuResult<()>;

    /// Texture coordinate transform for the latched frame.
    fn transform_matrix(&self) -> [f32; 16];

    fn release(&mut self);
}

/// Factory for GPU resources.
pub trait GpuProvider: Send + Sync {
    /// Context rendering into an encoder input surface.
    fn create_window_context(&self, window: SurfaceHandle) -> GpuResult<Box<dyn RenderContext>>;

    /// Context rendering into an offscreen buffer.
    fn create_offscreen_context(&self, width: u32, height: u32)
    -> GpuResult<Box<dyn RenderContext>>;

    fn create_gl(&self) -> GpuResult<Box<dyn GlApi>>;

    /// Stream whose producer calls `signal.notify()` for every new frame.
    fn create_frame_stream(
        &self,
        texture: TextureId,
        signal: FrameSignal,
    ) -> GpuResult<Box<dyn FrameStream>>;
}
