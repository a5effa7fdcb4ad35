//! Single-pass blit of an external texture onto the current render target

use crate::backend::{GlApi, GpuError, GpuResult, ProgramId, QuadDraw, TextureId};

pub const VERTEX_SHADER: &str = "\
uniform mat4 uMVPMatrix;
uniform mat4 uSTMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 vTextureCoord;
void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = (uSTMatrix * aTextureCoord).xy;
}
";

pub const FRAGMENT_SHADER: &str = "\
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// Full-screen quad as a triangle strip: x, y, z, u, v per vertex.
pub const QUAD_VERTICES: [f32; 20] = [
    -1.0, -1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0,
];

pub const QUAD_VERTEX_COUNT: usize = 4;

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Draws the decoder's external texture through a fixed shader pair.
pub struct TextureRenderer {
    gl: Box<dyn GlApi>,
    program: ProgramId,
    texture: TextureId,
    mvp_matrix: [f32; 16],
    released: bool,
}

impl TextureRenderer {
    /// Compiles the blit program and allocates the external texture.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Program or texture creation reported a GL error
    pub fn new(mut gl: Box<dyn GlApi>) -> GpuResult<Self> {
        let program = gl.create_program(VERTEX_SHADER, FRAGMENT_SHADER)?;
        check_error(gl.as_mut(), "create_program")?;

        let texture = gl.create_external_texture()?;
        check_error(gl.as_mut(), "create_external_texture")?;

        Ok(Self {
            gl,
            program,
            texture,
            mvp_matrix: IDENTITY_MATRIX,
            released: false,
        })
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Draws one frame using the producer's texture transform.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Drawing reported a GL error
    pub fn draw_frame(&mut self, st_matrix: &[f32; 16]) -> GpuResult<()> {
        self.gl.clear(0.0, 0.0, 0.0, 1.0);

        self.gl.draw_quad(&QuadDraw {
            program: self.program,
            texture: self.texture,
            vertices: &QUAD_VERTICES,
            vertex_count: QUAD_VERTEX_COUNT,
            mvp_matrix: &self.mvp_matrix,
            st_matrix,
        })?;
        check_error(self.gl.as_mut(), "draw_quad")?;

        self.gl.finish();
        Ok(())
    }

    /// Reads back the last drawn frame as RGBA.
    ///
    /// # Errors
    ///
    /// - `GpuError::CallFailed` - Read-back reported a GL error
    pub fn read_pixels(&mut self, width: u32, height: u32) -> GpuResult<Vec<u8>> {
        let mut pixels = vec![0u8; width as usize * height as usize * 4];
        self.gl.read_pixels(width, height, &mut pixels)?;
        check_error(self.gl.as_mut(), "read_pixels")?;
        Ok(pixels)
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.gl.delete_program(self.program);
        self.gl.delete_texture(self.texture);
    }
}

fn check_error(gl: &mut dyn GlApi, call: &str) -> GpuResult<()> {
    match gl.take_error() {
        Some(code) => Err(GpuError::CallFailed {
            call: call.to_string(),
            code,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct GlLog {
        draws: Vec<(Vec<f32>, usize, [f32; 16])>,
        deleted: usize,
        pending_error: Option<u32>,
        finished: usize,
    }

    struct RecordingGl(Arc<Mutex<GlLog>>);

    impl GlApi for RecordingGl {
        fn create_program(&mut self, vertex: &str, fragment: &str) -> GpuResult<ProgramId> {
            assert!(vertex.contains("uSTMatrix"));
            assert!(fragment.contains("samplerExternalOES"));
            Ok(ProgramId(3))
        }

        fn create_external_texture(&mut self) -> GpuResult<TextureId> {
            Ok(TextureId(7))
        }

        fn clear(&mut self, _red: f32, _green: f32, _blue: f32, _alpha: f32) {}

        fn draw_quad(&mut self, draw: &QuadDraw<'_>) -> GpuResult<()> {
            self.0
                .lock()
                .draws
                .push((draw.vertices.to_vec(), draw.vertex_count, *draw.st_matrix));
            Ok(())
        }

        fn finish(&mut self) {
            self.0.lock().finished += 1;
        }

        fn read_pixels(&mut self, _width: u32, _height: u32, pixels: &mut [u8]) -> GpuResult<()> {
            pixels.fill(0x7F);
            Ok(())
        }

        fn take_error(&mut self) -> Option<u32> {
            self.0.lock().pending_error.take()
        }

        fn delete_program(&mut self, _program: ProgramId) {
            self.0.lock().deleted += 1;
        }

        fn delete_texture(&mut self, _texture: TextureId) {
            self.0.lock().deleted += 1;
        }
    }

    #[test]
    fn test_draw_frame_uses_transform() {
        let log = Arc::new(Mutex::new(GlLog::default()));
        let mut renderer = TextureRenderer::new(Box::new(RecordingGl(log.clone()))).unwrap();
        assert_eq!(renderer.texture(), TextureId(7));

        let mut st = IDENTITY_MATRIX;
        st[13] = 1.0;
        renderer.draw_frame(&st).unwrap();

        let log = log.lock();
        assert_eq!(log.draws.len(), 1);
        assert_eq!(log.draws[0].0, QUAD_VERTICES.to_vec());
        assert_eq!(log.draws[0].1, 4);
        assert_eq!(log.draws[0].2, st);
        assert_eq!(log.finished, 1);
    }

    #[test]
    fn test_gl_error_fails_draw() {
        let log = Arc::new(Mutex::new(GlLog::default()));
        let mut renderer = TextureRenderer::new(Box::new(RecordingGl(log.clone()))).unwrap();

        log.lock().pending_error = Some(0x0502);
        let error = renderer.draw_frame(&IDENTITY_MATRIX).unwrap_err();
        assert_eq!(
            error,
            GpuError::CallFailed {
                call: "draw_quad".to_string(),
                code: 0x0502
            }
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let log = Arc::new(Mutex::new(GlLog::default()));
        let mut renderer = TextureRenderer::new(Box::new(RecordingGl(log.clone()))).unwrap();

        renderer.release();
        renderer.release();
        assert_eq!(log.lock().deleted, 2);
    }
}
