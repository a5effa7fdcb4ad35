//! Render target feeding a surface-input encoder

use crate::backend::{GpuError, GpuProvider, GpuResult, RenderContext, SurfaceHandle};

/// GPU context bound to an encoder's input surface.
pub struct InputSurface {
    context: Option<Box<dyn RenderContext>>,
}

impl InputSurface {
    /// Creates a context rendering into `window`.
    ///
    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - Context or window surface creation failed
    pub fn new(gpu: &dyn GpuProvider, window: SurfaceHandle) -> GpuResult<Self> {
        let context = gpu.create_window_context(window)?;
        Ok(Self {
            context: Some(context),
        })
    }

    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - Surface already released
    pub fn make_current(&mut self) -> GpuResult<()> {
        self.context()?.make_current()
    }

    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - Surface already released
    pub fn release_current(&mut self) -> GpuResult<()> {
        self.context()?.release_current()
    }

    /// Stamps the next swapped frame.
    ///
    /// # Errors
    ///
    /// - `GpuError::ContextUnavailable` - Surface already released
    pub fn set_presentation_time(&mut self, nanos: i64) -> GpuResult<()> {
        self.context()?.set_presentation_time(nanos)
    }

    /// Submits the drawn frame to the encoder.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Present failed
    pub fn swap_buffers(&mut self) -> GpuResult<()> {
        self.context()?.swap_buffers()
    }

    pub fn release(&mut self) {
        if let Some(mut context) = self.context.take() {
            if let Err(e) = context.release_current() {
                tracing::warn!("Failed to release current input context: {}", e);
            }
            context.release();
        }
    }

    fn context(&mut self) -> GpuResult<&mut dyn RenderContext> {
        match self.context.as_mut() {
            Some(context) => Ok(context.as_mut()),
            None => Err(GpuError::ContextUnavailable {
                reason: "input surface released".to_string(),
            }),
        }
    }
}
