//! Simulated hardware codecs
//!
//! Payloads are synthetic but the buffer protocol is strict: indices must be
//! owned by the caller, outputs are preceded by a format change, end of stream
//! is propagated, and input slots stop being handed out while too many
//! outputs are waiting. Video decoders render into surfaces registered with
//! the [`SurfaceRegistry`]; video encoders consume frames presented on their
//! input surface.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use recast_core::backend::{
    CodecError, CodecFactory, CodecResult, MediaCodec, OutputStatus, SurfaceHandle,
};
use recast_core::config::SimulationConfig;
use recast_core::media::{
    AAC_PROFILE_LC, BufferFlags, BufferInfo, MediaFormat, MediaKind, avc, mime,
};

use crate::gpu::{FrameQueue, SurfaceRegistry};

/// Input slots per codec instance
pub const INPUT_SLOTS: usize = 4;
/// Outputs waiting or held by the caller before input is refused
pub const MAX_PENDING_OUTPUTS: usize = 8;
/// PCM frames produced per compressed audio packet
pub const FRAMES_PER_PACKET: usize = 1024;
/// Input capacity of audio encoders, deliberately not a multiple of a decoded packet
pub const AUDIO_ENCODER_INPUT_BYTES: usize = 3072;

const DEFAULT_VIDEO_INPUT_BYTES: usize = 256 * 1024;
const DEFAULT_AUDIO_INPUT_BYTES: usize = 16 * 1024;
const VIDEO_COMPRESSION: u32 = 16;
const AVC_LEVEL: u8 = 31;
const AVC_PPS: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80];
const RAW_VIDEO: &str = "video/raw";
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const SUPPORTED: [&str; 4] = [
    mime::VIDEO_AVC,
    mime::VIDEO_VP8,
    mime::AUDIO_AAC,
    mime::AUDIO_VORBIS,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
    AudioEncoder,
}

impl CodecRole {
    fn new(kind: MediaKind, encoder: bool) -> Self {
        match (kind, encoder) {
            (MediaKind::Video, false) => CodecRole::VideoDecoder,
            (MediaKind::Video, true) => CodecRole::VideoEncoder,
            (MediaKind::Audio, false) => CodecRole::AudioDecoder,
            (MediaKind::Audio, true) => CodecRole::AudioEncoder,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CodecRole::VideoDecoder | CodecRole::AudioDecoder => "decoder",
            CodecRole::VideoEncoder | CodecRole::AudioEncoder => "encoder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Configured,
    Started,
    Stopped,
    Released,
}

struct OutputSlot {
    data: Vec<u8>,
    info: BufferInfo,
    dequeued: bool,
}

pub struct SimCodec {
    name: String,
    role: CodecRole,
    mime: String,
    lifecycle: Lifecycle,
    registry: Arc<SurfaceRegistry>,
    encoder_profile_idc: u8,
    rng: ChaCha8Rng,
    configured: MediaFormat,
    output_format: MediaFormat,
    format_announced: bool,
    target_surface: Option<SurfaceHandle>,
    input_window: Option<(SurfaceHandle, FrameQueue)>,
    input_slots: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    dequeued_inputs: HashSet<usize>,
    outputs: Vec<Option<OutputSlot>>,
    ready: VecDeque<usize>,
    input_ended: bool,
    end_queued: bool,
    frames_encoded: u64,
}

impl SimCodec {
    pub fn new(
        role: CodecRole,
        mime: &str,
        registry: Arc<SurfaceRegistry>,
        encoder_profile_idc: u8,
        seed: u64,
    ) -> Self {
        let codec = mime.rsplit('/').next().unwrap_or(mime);
        Self {
            name: format!("sim.{codec}.{}", role.label()),
            role,
            mime: mime.to_string(),
            lifecycle: Lifecycle::Created,
            registry,
            encoder_profile_idc,
            rng: ChaCha8Rng::seed_from_u64(seed),
            configured: MediaFormat::default(),
            output_format: MediaFormat::default(),
            format_announced: false,
            target_surface: None,
            input_window: None,
            input_slots: Vec::new(),
            free_inputs: VecDeque::new(),
            dequeued_inputs: HashSet::new(),
            outputs: Vec::new(),
            ready: VecDeque::new(),
            input_ended: false,
            end_queued: false,
            frames_encoded: 0,
        }
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    fn failed(&self, operation: &'static str, reason: impl Into<String>) -> CodecError {
        CodecError::Failed {
            codec: self.name.clone(),
            operation,
            reason: reason.into(),
        }
    }

    fn require(&self, expected: Lifecycle, operation: &str) -> CodecResult<()> {
        if self.lifecycle != expected {
            return Err(CodecError::InvalidState {
                reason: format!(
                    "{} called {} while {:?}, expected {:?}",
                    self.name, operation, self.lifecycle, expected
                ),
            });
        }
        Ok(())
    }

    fn require_field(&self, value: Option<u32>, field: &str) -> CodecResult<u32> {
        value.ok_or_else(|| self.failed("configure", format!("format has no {field}")))
    }

    fn pending_outputs(&self) -> usize {
        self.outputs.iter().flatten().count()
    }

    fn push_output(&mut self, data: Vec<u8>, info: BufferInfo) -> usize {
        let slot = OutputSlot {
            data,
            info,
            dequeued: false,
        };
        let index = match self.outputs.iter().position(Option::is_none) {
            Some(index) => {
                self.outputs[index] = Some(slot);
                index
            }
            None => {
                self.outputs.push(Some(slot));
                self.outputs.len() - 1
            }
        };
        self.ready.push_back(index);
        index
    }

    fn dequeued_output(&self, index: usize) -> CodecResult<&OutputSlot> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .filter(|slot| slot.dequeued)
            .ok_or(CodecError::InvalidBufferIndex { index })
    }

    fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        self.rng.fill_bytes(&mut data);
        data
    }

    fn configure_outputs(&mut self, format: &MediaFormat) -> CodecResult<usize> {
        match self.role {
            CodecRole::VideoDecoder => {
                let width = self.require_field(format.width, "width")?;
                let height = self.require_field(format.height, "height")?;
                if self.target_surface.is_none() {
                    return Err(self.failed("configure", "only surface output is supported"));
                }
                self.output_format = MediaFormat::video(RAW_VIDEO, width, height);
                Ok(format.max_input_size.unwrap_or(DEFAULT_VIDEO_INPUT_BYTES))
            }
            CodecRole::AudioDecoder => {
                let sample_rate = self.require_field(format.sample_rate, "sample rate")?;
                let channels = self.require_field(format.channel_count, "channel count")?;
                self.output_format = MediaFormat::audio(mime::AUDIO_RAW, sample_rate, channels);
                Ok(format.max_input_size.unwrap_or(DEFAULT_AUDIO_INPUT_BYTES))
            }
            CodecRole::VideoEncoder => {
                self.require_field(format.width, "width")?;
                self.require_field(format.height, "height")?;
                self.require_field(format.bit_rate, "bit rate")?;
                self.require_field(format.frame_rate, "frame rate")?;
                let mut output = format.clone();
                if self.mime == mime::VIDEO_AVC {
                    output = output.with_csd(
                        avc::sps_with_profile(self.encoder_profile_idc, AVC_LEVEL),
                        Some(AVC_PPS.to_vec()),
                    );
                }
                self.output_format = output;
                Ok(0)
            }
            CodecRole::AudioEncoder => {
                let sample_rate = self.require_field(format.sample_rate, "sample rate")?;
                let channels = self.require_field(format.channel_count, "channel count")?;
                self.require_field(format.bit_rate, "bit rate")?;
                let mut output = format.clone();
                if self.mime == mime::AUDIO_AAC {
                    output = output.with_csd(audio_specific_config(sample_rate, channels), None);
                } else if self.mime == mime::AUDIO_VORBIS {
                    output = output.with_csd(vec![0x01, b'v', b'o', b'r', b'b', b'i', b's'], None);
                }
                self.output_format = output;
                Ok(AUDIO_ENCODER_INPUT_BYTES)
            }
        }
    }

    /// Turns every frame presented on the input surface into a packet.
    fn pump_surface_frames(&mut self) {
        let presented: Vec<i64> = match &self.input_window {
            Some((_, frames)) => frames.lock().drain(..).collect(),
            None => Vec::new(),
        };
        for presentation_time_us in presented {
            self.encode_video_frame(presentation_time_us);
        }
        if self.input_ended && !self.end_queued {
            self.end_queued = true;
            let last = self
                .outputs
                .iter()
                .flatten()
                .map(|slot| slot.info.presentation_time_us)
                .max()
                .unwrap_or(0);
            self.push_output(Vec::new(), BufferInfo::end_of_stream(last));
        }
    }

    fn encode_video_frame(&mut self, presentation_time_us: i64) {
        let bit_rate = self.configured.bit_rate.unwrap_or(1);
        let frame_rate = self.configured.frame_rate.unwrap_or(1).max(1);
        let nominal = (bit_rate / 8 / frame_rate / VIDEO_COMPRESSION).clamp(32, 16 * 1024) as usize;
        let size = self.rng.random_range(nominal * 9 / 10..=nominal * 11 / 10);

        let key_interval =
            u64::from(frame_rate * self.configured.i_frame_interval.unwrap_or(1)).max(1);
        let flags = if self.frames_encoded % key_interval == 0 {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        self.frames_encoded += 1;

        let data = self.random_bytes(size);
        self.push_output(data, BufferInfo::new(0, size, presentation_time_us, flags));
    }

    fn process_input(&mut self, payload: &[u8], info: BufferInfo) -> CodecResult<()> {
        let presentation_time_us = info.presentation_time_us;
        match self.role {
            CodecRole::VideoDecoder => {
                let frame = payload.to_vec();
                let size = frame.len();
                self.push_output(
                    frame,
                    BufferInfo::new(0, size, presentation_time_us, BufferFlags::NONE),
                );
            }
            CodecRole::AudioDecoder => {
                let channels = self.output_format.channel_count.unwrap_or(1) as usize;
                let pcm: Vec<u8> = (0..FRAMES_PER_PACKET * channels)
                    .flat_map(|_| self.rng.random_range(-8000i16..=8000).to_le_bytes())
                    .collect();
                let size = pcm.len();
                self.push_output(
                    pcm,
                    BufferInfo::new(0, size, presentation_time_us, BufferFlags::NONE),
                );
            }
            CodecRole::AudioEncoder => {
                let size = (payload.len() / 8).max(1);
                let packet = self.random_bytes(size);
                self.push_output(
                    packet,
                    BufferInfo::new(0, size, presentation_time_us, BufferFlags::KEY_FRAME),
                );
            }
            CodecRole::VideoEncoder => {
                return Err(CodecError::InvalidState {
                    reason: format!("{} only accepts input through its surface", self.name),
                });
            }
        }
        Ok(())
    }
}

impl MediaCodec for SimCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<SurfaceHandle>,
    ) -> CodecResult<()> {
        self.require(Lifecycle::Created, "configure")?;
        if !format.has_mime(&self.mime) {
            return Err(self.failed(
                "configure",
                format!("format {format} does not match {}", self.mime),
            ));
        }

        self.target_surface = surface;
        let slot_size = self.configure_outputs(format)?;
        self.configured = format.clone();
        if slot_size > 0 {
            self.input_slots = vec![vec![0u8; slot_size]; INPUT_SLOTS];
            self.free_inputs = (0..INPUT_SLOTS).collect();
        }
        self.lifecycle = Lifecycle::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<SurfaceHandle> {
        self.require(Lifecycle::Configured, "create_input_surface")?;
        if self.role != CodecRole::VideoEncoder {
            return Err(CodecError::InvalidState {
                reason: format!("{} has no input surface", self.name),
            });
        }
        let (handle, frames) = self.registry.create_encoder_input();
        self.input_window = Some((handle, frames));
        Ok(handle)
    }

    fn start(&mut self) -> CodecResult<()> {
        self.require(Lifecycle::Configured, "start")?;
        if self.role == CodecRole::VideoEncoder && self.input_window.is_none() {
            return Err(self.failed("start", "input surface was never created"));
        }
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.require(Lifecycle::Started, "stop")?;
        self.ready.clear();
        self.outputs.clear();
        self.dequeued_inputs.clear();
        self.lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        if let Some((handle, _)) = self.input_window.take() {
            self.registry.remove(handle);
        }
        self.ready.clear();
        self.outputs.clear();
        self.lifecycle = Lifecycle::Released;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        self.require(Lifecycle::Started, "dequeue_input_buffer")?;
        if self.role == CodecRole::VideoEncoder {
            return Err(CodecError::InvalidState {
                reason: format!("{} only accepts input through its surface", self.name),
            });
        }
        if self.input_ended || self.pending_outputs() >= MAX_PENDING_OUTPUTS {
            return Ok(None);
        }
        let index = self.free_inputs.pop_front();
        if let Some(index) = index {
            self.dequeued_inputs.insert(index);
        }
        Ok(index)
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        if !self.dequeued_inputs.contains(&index) {
            return Err(CodecError::InvalidBufferIndex { index });
        }
        self.input_slots
            .get_mut(index)
            .map(Vec::as_mut_slice)
            .ok_or(CodecError::InvalidBufferIndex { index })
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        self.require(Lifecycle::Started, "queue_input_buffer")?;
        if !self.dequeued_inputs.remove(&index) {
            return Err(CodecError::InvalidBufferIndex { index });
        }
        self.free_inputs.push_back(index);

        if info.is_end_of_stream() {
            self.input_ended = true;
            self.end_queued = true;
            self.push_output(
                Vec::new(),
                BufferInfo::end_of_stream(info.presentation_time_us),
            );
            return Ok(());
        }

        let end = info.offset + info.size;
        let payload = match self.input_slots.get(index).and_then(|slot| slot.get(info.offset..end))
        {
            Some(payload) => payload.to_vec(),
            None => {
                return Err(self.failed(
                    "queue_input_buffer",
                    format!("range {}..{end} exceeds the input buffer", info.offset),
                ));
            }
        };
        self.process_input(&payload, info)
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputStatus> {
        self.require(Lifecycle::Started, "dequeue_output_buffer")?;
        if self.role == CodecRole::VideoEncoder {
            self.pump_surface_frames();
        }

        if !self.format_announced && !self.ready.is_empty() {
            self.format_announced = true;
            let config = match (&self.output_format.csd0, self.role) {
                (Some(csd0), CodecRole::VideoEncoder | CodecRole::AudioEncoder) => {
                    let mut blob = csd0.clone();
                    blob.extend(self.output_format.csd1.iter().flatten());
                    Some(blob)
                }
                _ => None,
            };
            if let Some(blob) = config {
                let size = blob.len();
                let index = self.push_output(
                    blob,
                    BufferInfo::new(0, size, 0, BufferFlags::CODEC_CONFIG),
                );
                // Config precedes every media buffer
                self.ready.pop_back();
                self.ready.push_front(index);
            }
            return Ok(OutputStatus::FormatChanged);
        }

        let Some(index) = self.ready.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        let slot = self
            .outputs
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(CodecError::InvalidBufferIndex { index })?;
        slot.dequeued = true;
        Ok(OutputStatus::Buffer {
            index,
            info: slot.info,
        })
    }

    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]> {
        self.dequeued_output(index).map(|slot| slot.data.as_slice())
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        if !self.format_announced {
            return Err(CodecError::InvalidState {
                reason: format!("{} has not reported an output format", self.name),
            });
        }
        Ok(self.output_format.clone())
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        let info = self.dequeued_output(index)?.info;
        self.outputs[index] = None;

        if !render {
            return Ok(());
        }
        let Some(surface) = self.target_surface else {
            return Err(self.failed("release_output_buffer", "no surface to render into"));
        };
        self.registry
            .render(surface, info.presentation_time_us)
            .map_err(|e| self.failed("release_output_buffer", e.to_string()))
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        self.require(Lifecycle::Started, "signal_end_of_input_stream")?;
        if self.role != CodecRole::VideoEncoder {
            return Err(CodecError::InvalidState {
                reason: format!("{} is not a surface-input encoder", self.name),
            });
        }
        self.input_ended = true;
        Ok(())
    }
}

/// Two byte AAC-LC AudioSpecificConfig.
pub fn audio_specific_config(sample_rate: u32, channels: u32) -> Vec<u8> {
    let frequency_index = AAC_SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .unwrap_or(4) as u16;
    let object_type = AAC_PROFILE_LC as u16;
    let config = (object_type << 11) | (frequency_index << 7) | ((channels as u16 & 0xF) << 3);
    config.to_be_bytes().to_vec()
}

/// Codec factory handing out [`SimCodec`] instances.
pub struct SimCodecFactory {
    registry: Arc<SurfaceRegistry>,
    encoder_profile_idc: u8,
    seed: u64,
    created: AtomicU64,
    unsupported: HashSet<String>,
}

impl SimCodecFactory {
    pub fn new(registry: Arc<SurfaceRegistry>, config: &SimulationConfig) -> Self {
        Self {
            registry,
            encoder_profile_idc: config.encoder_profile_idc,
            seed: config.deterministic_seed.unwrap_or_else(rand::random),
            created: AtomicU64::new(0),
            unsupported: HashSet::new(),
        }
    }

    /// Removes both the decoder and encoder for `mime`.
    pub fn without_codec(mut self, mime: &str) -> Self {
        self.unsupported.insert(mime.to_string());
        self
    }

    fn supports(&self, mime: &str) -> bool {
        SUPPORTED.contains(&mime) && !self.unsupported.contains(mime)
    }

    fn create(&self, mime: &str, encoder: bool) -> CodecResult<Box<dyn MediaCodec>> {
        let kind = MediaKind::from_mime(mime)
            .filter(|_| self.supports(mime))
            .ok_or_else(|| CodecError::Unsupported {
                mime: mime.to_string(),
            })?;
        let instance = self.created.fetch_add(1, Ordering::Relaxed);
        let codec = SimCodec::new(
            CodecRole::new(kind, encoder),
            mime,
            self.registry.clone(),
            self.encoder_profile_idc,
            self.seed.wrapping_add(instance),
        );
        tracing::debug!("Created simulated codec {}", codec.name());
        Ok(Box::new(codec))
    }
}

impl CodecFactory for SimCodecFactory {
    fn create_decoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>> {
        self.create(mime, false)
    }

    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn MediaCodec>> {
        self.create(mime, true)
    }

    fn supports_decoder(&self, mime: &str) -> bool {
        self.supports(mime)
    }

    fn supports_encoder(&self, mime: &str) -> bool {
        self.supports(mime)
    }
}

#[cfg(test)]
mod tests {
    use recast_core::backend::{GpuProvider, RenderContext};

    use super::*;
    use crate::gpu::SimGpu;

    const TIMEOUT: Duration = Duration::from_millis(0);

    fn registry() -> Arc<SurfaceRegistry> {
        Arc::new(SurfaceRegistry::new(false))
    }

    fn started(role: CodecRole, mime: &str, format: &MediaFormat) -> SimCodec {
        let mut codec = SimCodec::new(role, mime, registry(), avc::PROFILE_IDC_BASELINE, 7);
        codec.configure(format, None).unwrap();
        codec.start().unwrap();
        codec
    }

    fn queue(codec: &mut SimCodec, bytes: &[u8], pts: i64) {
        let index = codec.dequeue_input_buffer(TIMEOUT).unwrap().unwrap();
        codec.input_buffer(index).unwrap()[..bytes.len()].copy_from_slice(bytes);
        codec
            .queue_input_buffer(index, BufferInfo::new(0, bytes.len(), pts, BufferFlags::NONE))
            .unwrap();
    }

    #[test]
    fn test_audio_decoder_announces_format_then_pcm() {
        let format = MediaFormat::audio(mime::AUDIO_AAC, 48000, 2);
        let mut decoder = started(CodecRole::AudioDecoder, mime::AUDIO_AAC, &format);

        assert_eq!(
            decoder.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::TryAgainLater
        );
        queue(&mut decoder, &[1, 2, 3], 21_333);

        assert_eq!(
            decoder.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged
        );
        let decoded = decoder.output_format().unwrap();
        assert!(decoded.has_mime(mime::AUDIO_RAW));
        assert_eq!(decoded.sample_rate, Some(48000));

        let OutputStatus::Buffer { index, info } = decoder.dequeue_output_buffer(TIMEOUT).unwrap()
        else {
            panic!("expected a decoded buffer");
        };
        assert_eq!(info.presentation_time_us, 21_333);
        assert_eq!(decoder.output_buffer(index).unwrap().len(), FRAMES_PER_PACKET * 2 * 2);
        decoder.release_output_buffer(index, false).unwrap();

        let index = decoder.dequeue_input_buffer(TIMEOUT).unwrap().unwrap();
        decoder
            .queue_input_buffer(index, BufferInfo::end_of_stream(0))
            .unwrap();
        let OutputStatus::Buffer { info, .. } = decoder.dequeue_output_buffer(TIMEOUT).unwrap()
        else {
            panic!("expected end of stream");
        };
        assert!(info.is_end_of_stream());
        assert_eq!(decoder.dequeue_input_buffer(TIMEOUT).unwrap(), None);
    }

    #[test]
    fn test_input_refused_while_outputs_pile_up() {
        let format = MediaFormat::audio(mime::AUDIO_AAC, 44100, 1);
        let mut decoder = started(CodecRole::AudioDecoder, mime::AUDIO_AAC, &format);

        for pts in 0..MAX_PENDING_OUTPUTS as i64 {
            queue(&mut decoder, &[0xAB], pts);
        }
        assert_eq!(decoder.dequeue_input_buffer(TIMEOUT).unwrap(), None);

        assert_eq!(
            decoder.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged
        );
        let OutputStatus::Buffer { index, .. } = decoder.dequeue_output_buffer(TIMEOUT).unwrap()
        else {
            panic!("expected a decoded buffer");
        };
        assert_eq!(decoder.dequeue_input_buffer(TIMEOUT).unwrap(), None);
        decoder.release_output_buffer(index, false).unwrap();
        assert!(decoder.dequeue_input_buffer(TIMEOUT).unwrap().is_some());
    }

    #[test]
    fn test_buffer_ownership_is_enforced() {
        let format = MediaFormat::audio(mime::AUDIO_AAC, 44100, 2).with_bit_rate(128_000);
        let mut encoder = started(CodecRole::AudioEncoder, mime::AUDIO_AAC, &format);

        assert_eq!(
            encoder.input_buffer(0),
            Err(CodecError::InvalidBufferIndex { index: 0 })
        );
        assert_eq!(
            encoder.queue_input_buffer(2, BufferInfo::end_of_stream(0)),
            Err(CodecError::InvalidBufferIndex { index: 2 })
        );
        assert_eq!(
            encoder.release_output_buffer(0, false),
            Err(CodecError::InvalidBufferIndex { index: 0 })
        );

        let index = encoder.dequeue_input_buffer(TIMEOUT).unwrap().unwrap();
        assert_eq!(
            encoder.input_buffer(index).unwrap().len(),
            AUDIO_ENCODER_INPUT_BYTES
        );
    }

    #[test]
    fn test_aac_encoder_emits_config_before_packets() {
        let format = MediaFormat::audio(mime::AUDIO_AAC, 44100, 2).with_bit_rate(128_000);
        let mut encoder = started(CodecRole::AudioEncoder, mime::AUDIO_AAC, &format);
        queue(&mut encoder, &[0u8; 2048], 0);

        assert_eq!(
            encoder.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged
        );
        assert_eq!(
            encoder.output_format().unwrap().csd0,
            Some(vec![0x12, 0x10])
        );

        let OutputStatus::Buffer { index, info } = encoder.dequeue_output_buffer(TIMEOUT).unwrap()
        else {
            panic!("expected codec config");
        };
        assert!(info.flags.is_codec_config());
        encoder.release_output_buffer(index, false).unwrap();

        let OutputStatus::Buffer { info, .. } = encoder.dequeue_output_buffer(TIMEOUT).unwrap()
        else {
            panic!("expected a packet");
        };
        assert!(info.flags.is_key_frame());
        assert!(info.size > 0);
    }

    #[test]
    fn test_video_encoder_consumes_presented_frames() {
        let registry = registry();
        let gpu = SimGpu::new(registry.clone());
        let format = MediaFormat::video(mime::VIDEO_AVC, 1280, 720)
            .with_bit_rate(2_000_000)
            .with_frame_rate(30)
            .with_i_frame_interval(1);
        let mut encoder = SimCodec::new(
            CodecRole::VideoEncoder,
            mime::VIDEO_AVC,
            registry.clone(),
            avc::PROFILE_IDC_HIGH,
            1,
        );
        encoder.configure(&format, None).unwrap();
        let window = encoder.create_input_surface().unwrap();
        encoder.start().unwrap();
        assert!(encoder.dequeue_input_buffer(TIMEOUT).is_err());

        let mut context = gpu.create_window_context(window).unwrap();
        context.make_current().unwrap();
        for frame in 0..2i64 {
            context.set_presentation_time(frame * 33_333_000).unwrap();
            context.swap_buffers().unwrap();
        }

        assert_eq!(
            encoder.dequeue_output_buffer(TIMEOUT).unwrap(),
            OutputStatus::FormatChanged
        );
        let output = encoder.output_format().unwrap();
        assert_eq!(
            avc::profile_idc(output.csd0.as_deref().unwrap()),
            Ok(avc::PROFILE_IDC_HIGH)
        );

        let mut media = Vec::new();
        loop {
            match encoder.dequeue_output_buffer(TIMEOUT).unwrap() {
                OutputStatus::Buffer { index, info } => {
                    encoder.release_output_buffer(index, false).unwrap();
                    if info.is_end_of_stream() {
                        break;
                    }
                    if !info.flags.is_codec_config() {
                        media.push(info);
                    }
                }
                OutputStatus::TryAgainLater => encoder.signal_end_of_input_stream().unwrap(),
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(media.len(), 2);
        assert!(media[0].flags.is_key_frame());
        assert!(!media[1].flags.is_key_frame());
        assert_eq!(media[1].presentation_time_us, 33_333);

        context.release();
        encoder.release().unwrap();
        assert_eq!(registry.live_surfaces(), 0);
    }

    #[test]
    fn test_lifecycle_violations() {
        let mut codec = SimCodec::new(
            CodecRole::AudioDecoder,
            mime::AUDIO_AAC,
            registry(),
            avc::PROFILE_IDC_BASELINE,
            0,
        );
        assert!(matches!(
            codec.start(),
            Err(CodecError::InvalidState { .. })
        ));
        assert!(matches!(
            codec.configure(&MediaFormat::audio(mime::AUDIO_VORBIS, 44100, 2), None),
            Err(CodecError::Failed { .. })
        ));
        assert!(matches!(
            codec.create_input_surface(),
            Err(CodecError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_factory_capabilities() {
        let factory = SimCodecFactory::new(registry(), &SimulationConfig::deterministic_testing())
            .without_codec(mime::AUDIO_VORBIS);

        assert!(factory.supports_decoder(mime::VIDEO_AVC));
        assert!(factory.supports_encoder(mime::VIDEO_VP8));
        assert!(!factory.supports_encoder(mime::AUDIO_VORBIS));
        assert!(!factory.supports_decoder("video/hevc"));
        assert!(matches!(
            factory.create_encoder(mime::AUDIO_VORBIS),
            Err(CodecError::Unsupported { .. })
        ));

        let encoder = factory.create_encoder(mime::AUDIO_AAC).unwrap();
        assert_eq!(encoder.name(), "sim.mp4a-latm.encoder");
    }

    #[test]
    fn test_audio_specific_config() {
        assert_eq!(audio_specific_config(44100, 2), vec![0x12, 0x10]);
        assert_eq!(audio_specific_config(48000, 1), vec![0x11, 0x88]);
    }
}
