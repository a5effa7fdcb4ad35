//! [`MediaBackend`] assembled from the simulated collaborators

use std::path::Path;
use std::sync::Arc;

use recast_core::backend::{
    CodecFactory, ContainerFormat, ContainerResult, ContainerWriter, Extractor, GpuProvider,
    MediaBackend, SourceMetadata,
};
use recast_core::config::SimulationConfig;

use crate::codec::SimCodecFactory;
use crate::extractor::SimExtractor;
use crate::fixture::SourceFixture;
use crate::gpu::{SimGpu, SurfaceRegistry};
use crate::writer::SimContainerWriter;

/// Backend reading [`SourceFixture`] files and writing output summaries.
pub struct SimBackend {
    config: SimulationConfig,
    registry: Arc<SurfaceRegistry>,
    codecs: SimCodecFactory,
    gpu: SimGpu,
}

impl SimBackend {
    pub fn new(config: SimulationConfig) -> Self {
        let registry = Arc::new(SurfaceRegistry::new(config.asynchronous_frames));
        Self {
            codecs: SimCodecFactory::new(registry.clone(), &config),
            gpu: SimGpu::new(registry.clone()),
            registry,
            config,
        }
    }

    /// Deterministic backend with inline frame delivery.
    pub fn for_testing() -> Self {
        Self::new(SimulationConfig::deterministic_testing())
    }

    /// Removes the decoder and encoder for `mime`.
    pub fn without_codec(mut self, mime: &str) -> Self {
        self.codecs = self.codecs.without_codec(mime);
        self
    }

    /// Makes every draw after the first `draws` fail with a GL error.
    pub fn with_draw_failure_after(mut self, draws: u64) -> Self {
        self.gpu = self.gpu.with_draw_failure_after(draws);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Surfaces not yet released by the pipeline.
    pub fn live_surfaces(&self) -> usize {
        self.registry.live_surfaces()
    }

    pub fn draw_count(&self) -> u64 {
        self.gpu.draw_count()
    }
}

impl MediaBackend for SimBackend {
    fn read_metadata(&self, input: &Path) -> ContainerResult<SourceMetadata> {
        let fixture = SourceFixture::load(input)?;
        Ok(SourceMetadata {
            duration_us: fixture.declared_duration_us(),
            rotation_degrees: fixture.rotation_degrees,
        })
    }

    fn open_extractor(&self, input: &Path) -> ContainerResult<Box<dyn Extractor>> {
        let fixture = SourceFixture::load(input)?;
        tracing::debug!(
            "Opened fixture {} with {} tracks",
            input.display(),
            fixture.tracks.len()
        );
        Ok(Box::new(SimExtractor::new(fixture)))
    }

    fn create_writer(
        &self,
        output: &Path,
        container: ContainerFormat,
    ) -> ContainerResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(SimContainerWriter::create(output, container)?))
    }

    fn codecs(&self) -> &dyn CodecFactory {
        &self.codecs
    }

    fn gpu(&self) -> &dyn GpuProvider {
        &self.gpu
    }
}
