//! Recast Simulation Backend - deterministic codecs, GPU and containers.
//!
//! Sources are JSON [`SourceFixture`] files describing tracks by format and
//! cadence; payload bytes are derived from a seed. Outputs are JSON
//! [`OutputSummary`] files listing the muxed tracks with sample counts,
//! timestamps and payload digests. In between, every codec and GPU call goes
//! through the same traits a hardware backend implements, so the full
//! decode, bridge, encode and mux path runs unchanged.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use recast_core::config::PipelineConfig;
//! use recast_core::engine::{CancellationFlag, NoopListener, TranscodeEngine, TranscodeJob};
//! use recast_core::media::mime;
//! use recast_core::{FitStrategy, Preset};
//! use recast_sim::{OutputSummary, SimBackend, SourceFixture};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! SourceFixture::new(2_000_000)
//!     .with_video(mime::VIDEO_AVC, 1920, 1080, 30)
//!     .with_audio(mime::AUDIO_AAC, 44100, 2)
//!     .save("clip.json".as_ref())?;
//!
//! let engine = TranscodeEngine::new(Arc::new(SimBackend::for_testing()), PipelineConfig::default());
//! let job = TranscodeJob::new("clip.json", "clip.mp4", Arc::new(FitStrategy::preset(Preset::Hd720)));
//! engine.execute(&job, &NoopListener, &CancellationFlag::new())?;
//!
//! let summary = OutputSummary::read("clip.mp4".as_ref())?;
//! println!("{} tracks written", summary.tracks.len());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod extractor;
pub mod fixture;
pub mod gpu;
pub mod writer;

pub use backend::SimBackend;
pub use codec::{CodecRole, SimCodec, SimCodecFactory};
pub use extractor::SimExtractor;
pub use fixture::{FixtureTrack, SampleEntry, SourceFixture};
pub use gpu::{SimGpu, SurfaceRegistry};
pub use writer::{OutputSummary, OutputTrack, SimContainerWriter};
