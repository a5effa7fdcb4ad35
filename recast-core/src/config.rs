//! Centralized configuration for Recast.
//!
//! All tunable parameters are defined here so pipeline constants are not
//! scattered through the coders and the engine.

use std::time::Duration;

use crate::coder::{CoderSettings, DEFAULT_PASS_THROUGH_BUFFER};
use crate::media::avc;
use crate::muxer::DEFAULT_BACKING_CAPACITY;

/// Central configuration for all Recast components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct RecastConfig {
    pub pipeline: PipelineConfig,
    pub pool: PoolConfig,
    pub simulation: SimulationConfig,
}

/// Step loop and per-track timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Sleep when no coder made progress in an iteration
    pub idle_sleep: Duration,
    /// Iterations between progress reports
    pub progress_interval: u64,
    /// Wait for a decoded frame on the transcode path
    pub frame_timeout: Duration,
    /// Wait for a decoded frame when capturing a single frame
    pub capture_frame_timeout: Duration,
    /// Timeout passed to every codec dequeue call
    pub dequeue_timeout: Duration,
    /// Initial size of the muxer's pre-start sample store
    pub muxer_backing_capacity: usize,
    /// Copy buffer for pass-through tracks without a max input size
    pub pass_through_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(10),
            progress_interval: 10,
            frame_timeout: Duration::from_millis(1000),
            capture_frame_timeout: Duration::from_millis(5000),
            dequeue_timeout: Duration::ZERO,
            muxer_backing_capacity: DEFAULT_BACKING_CAPACITY,
            pass_through_buffer_size: DEFAULT_PASS_THROUGH_BUFFER,
        }
    }
}

impl PipelineConfig {
    /// Settings handed to every coder of a job.
    pub fn coder_settings(&self) -> CoderSettings {
        CoderSettings {
            dequeue_timeout: self.dequeue_timeout,
            frame_timeout: self.frame_timeout,
            pass_through_buffer_size: self.pass_through_buffer_size,
        }
    }
}

/// Job pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Jobs running at the same time
    pub max_concurrent_jobs: usize,
    /// Jobs waiting for a worker before submissions are refused
    pub queue_capacity: usize,
    /// Finished jobs whose final progress can still be queried
    pub finished_history: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            queue_capacity: 64,
            finished_history: 256,
        }
    }
}

/// Behavior of the simulated media backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Seed mixed into every synthesized sample stream
    pub deterministic_seed: Option<u64>,
    /// Deliver decoded frames from a separate thread instead of inline
    pub asynchronous_frames: bool,
    /// profile_idc written into the simulated AVC encoder's SPS
    pub encoder_profile_idc: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            asynchronous_frames: true,
            encoder_profile_idc: avc::PROFILE_IDC_BASELINE,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42),
            asynchronous_frames: false,
            encoder_profile_idc: avc::PROFILE_IDC_BASELINE,
        }
    }
}

impl RecastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(jobs) = env_parse::<usize>("RECAST_MAX_JOBS")
            && jobs > 0
        {
            config.pool.max_concurrent_jobs = jobs;
        }

        if let Some(millis) = env_parse::<u64>("RECAST_FRAME_TIMEOUT_MS") {
            config.pipeline.frame_timeout = Duration::from_millis(millis);
        }

        if let Some(millis) = env_parse::<u64>("RECAST_IDLE_SLEEP_MS") {
            config.pipeline.idle_sleep = Duration::from_millis(millis);
        }

        if let Some(seed) = env_parse::<u64>("RECAST_SIMULATION_SEED") {
            config.simulation.deterministic_seed = Some(seed);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                idle_sleep: Duration::from_millis(1),
                ..Default::default()
            },
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = RecastConfig::default();

        assert_eq!(config.pipeline.idle_sleep, Duration::from_millis(10));
        assert_eq!(config.pipeline.progress_interval, 10);
        assert_eq!(config.pipeline.frame_timeout, Duration::from_millis(1000));
        assert_eq!(
            config.pipeline.capture_frame_timeout,
            Duration::from_millis(5000)
        );
        assert_eq!(config.pipeline.muxer_backing_capacity, 64 * 1024);
        assert_eq!(config.pipeline.pass_through_buffer_size, 2048);
        assert_eq!(config.pool.max_concurrent_jobs, 3);
        assert_eq!(config.simulation.deterministic_seed, None);
    }

    #[test]
    fn test_coder_settings_follow_pipeline() {
        let pipeline = PipelineConfig {
            frame_timeout: Duration::from_millis(250),
            pass_through_buffer_size: 4096,
            ..Default::default()
        };
        let settings = pipeline.coder_settings();
        assert_eq!(settings.frame_timeout, Duration::from_millis(250));
        assert_eq!(settings.pass_through_buffer_size, 4096);
        assert_eq!(settings.dequeue_timeout, Duration::ZERO);
    }

    #[test]
    fn test_config_presets() {
        let testing = RecastConfig::for_testing();
        assert_eq!(testing.simulation.deterministic_seed, Some(42));
        assert!(!testing.simulation.asynchronous_frames);
        assert!(testing.pipeline.idle_sleep < Duration::from_millis(10));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("RECAST_MAX_JOBS", "5");
            std::env::set_var("RECAST_FRAME_TIMEOUT_MS", "2500");
            std::env::set_var("RECAST_IDLE_SLEEP_MS", "not-a-number");
            std::env::set_var("RECAST_SIMULATION_SEED", "12345");
        }

        let config = RecastConfig::from_env();

        assert_eq!(config.pool.max_concurrent_jobs, 5);
        assert_eq!(config.pipeline.frame_timeout, Duration::from_millis(2500));
        assert_eq!(config.pipeline.idle_sleep, Duration::from_millis(10));
        assert_eq!(config.simulation.deterministic_seed, Some(12345));

        unsafe {
            std::env::remove_var("RECAST_MAX_JOBS");
            std::env::remove_var("RECAST_FRAME_TIMEOUT_MS");
            std::env::remove_var("RECAST_IDLE_SLEEP_MS");
            std::env::remove_var("RECAST_SIMULATION_SEED");
        }
    }
}
