//! GPU bridge moving decoded video frames into a surface-input encoder
//!
//! The decoder renders into an [`OutputSurface`]; each frame is blitted once
//! onto the [`InputSurface`] owned by the encoder and presented with its
//! original timestamp. Rotation is not applied here, the container carries
//! it as an orientation hint.

pub mod frame_sync;
pub mod input;
pub mod output;
pub mod renderer;

pub use frame_sync::FrameSignal;
pub use input::InputSurface;
pub use output::OutputSurface;
pub use renderer::TextureRenderer;

use crate::backend::GpuResult;

const NANOS_PER_MICRO: i64 = 1_000;

/// Moves one decoded frame from `output` to `input`.
///
/// # Errors
///
/// - `GpuError::FrameTimeout` - Decoder did not deliver the frame in time
/// - `GpuError::FrameAlreadySet` - Producer signaled twice before consumption
/// - `GpuError::CallFailed` - A GL or present call failed
pub fn bridge_frame(
    output: &mut OutputSurface,
    input: &mut InputSurface,
    presentation_time_us: i64,
) -> GpuResult<()> {
    output.await_new_image()?;
    output.draw_image()?;
    input.set_presentation_time(presentation_time_us * NANOS_PER_MICRO)?;
    input.swap_buffers()
}
