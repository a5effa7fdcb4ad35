//! Bridge between an audio decoder's PCM output and an encoder's input slots

use std::collections::VecDeque;
use std::time::Duration;

use super::remix::Remix;
use crate::backend::MediaCodec;
use crate::error::{Result, TranscodeError};
use crate::media::{BufferFlags, BufferInfo, MediaFormat, MediaKind};

const MICROS_PER_SECOND: i64 = 1_000_000;
const BYTES_PER_SAMPLE: usize = 2;

/// Duration of `sample_count` interleaved samples, truncated to whole microseconds.
pub fn duration_us(sample_count: usize, sample_rate: u32, channel_count: u32) -> i64 {
    let frames_per_second = i64::from(sample_rate) * i64::from(channel_count);
    if frames_per_second == 0 {
        return 0;
    }
    sample_count as i64 * MICROS_PER_SECOND / frames_per_second
}

/// Decoded PCM held until an encoder slot is free.
#[derive(Debug, Default)]
struct AudioBuffer {
    /// Decoder output buffer backing these samples, `None` for end of stream
    decoder_index: Option<usize>,
    presentation_time_us: i64,
    samples: Vec<i16>,
    /// Samples already remixed into an encoder slot or the overflow
    position: usize,
}

/// Remixed samples that did not fit into the previous encoder slot.
#[derive(Debug, Default)]
struct Overflow {
    samples: Vec<i16>,
    position: usize,
    base_time_us: i64,
}

impl Overflow {
    fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

/// Negotiated input side of the channel.
#[derive(Debug, Clone, Copy)]
struct DecodedLayout {
    sample_rate: u32,
    channels: u32,
    remix: Remix,
}

/// Moves PCM from decoder to encoder, converting channel layout on the way.
///
/// Pending decoder buffers live in an arena recycled through a free list, so
/// steady-state feeding does not allocate.
#[derive(Debug)]
pub struct AudioChannel {
    output_sample_rate: u32,
    output_channels: u32,
    layout: Option<DecodedLayout>,
    arena: Vec<AudioBuffer>,
    free: Vec<usize>,
    filled: VecDeque<usize>,
    overflow: Option<Overflow>,
    scratch: Vec<i16>,
}

impl AudioChannel {
    /// Creates a channel producing samples for `output_format`.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Output format lacks sample rate or channel count
    pub fn new(output_format: &MediaFormat) -> Result<Self> {
        let output_sample_rate = output_format
            .sample_rate
            .ok_or_else(|| TranscodeError::configuration("audio output format has no sample rate"))?;
        let output_channels = output_format.channel_count.ok_or_else(|| {
            TranscodeError::configuration("audio output format has no channel count")
        })?;

        Ok(Self {
            output_sample_rate,
            output_channels,
            layout: None,
            arena: Vec::new(),
            free: Vec::new(),
            filled: VecDeque::new(),
            overflow: None,
            scratch: Vec::new(),
        })
    }

    /// Records the decoder's output layout and picks the remix.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Sample rates differ, or a channel count is not mono or stereo
    pub fn bind_decoded_format(&mut self, format: &MediaFormat) -> Result<()> {
        let sample_rate = format.sample_rate.ok_or_else(|| {
            TranscodeError::configuration("decoded audio format has no sample rate")
        })?;
        let channels = format.channel_count.ok_or_else(|| {
            TranscodeError::configuration("decoded audio format has no channel count")
        })?;

        if sample_rate != self.output_sample_rate {
            return Err(TranscodeError::configuration(format!(
                "cannot convert {sample_rate}Hz audio to {}Hz",
                self.output_sample_rate
            )));
        }
        if !matches!(channels, 1 | 2) {
            return Err(TranscodeError::configuration(format!(
                "unsupported input channel count {channels}"
            )));
        }
        if !matches!(self.output_channels, 1 | 2) {
            return Err(TranscodeError::configuration(format!(
                "unsupported output channel count {}",
                self.output_channels
            )));
        }

        let remix = Remix::select(channels, self.output_channels);
        tracing::debug!(
            "Audio channel bound: {}Hz {}ch -> {}ch ({:?})",
            sample_rate,
            channels,
            self.output_channels,
            remix
        );

        self.layout = Some(DecodedLayout {
            sample_rate,
            channels,
            remix,
        });
        if let Some(overflow) = self.overflow.as_mut() {
            overflow.samples.clear();
            overflow.position = 0;
            overflow.base_time_us = 0;
        }
        Ok(())
    }

    /// Queues a decoder output buffer, or the end-of-stream sentinel when `index` is `None`.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Codec` - Decoder does not own `index`
    pub fn enqueue_decoder_output(
        &mut self,
        decoder: &dyn MediaCodec,
        index: Option<usize>,
        presentation_time_us: i64,
    ) -> Result<()> {
        let slot = self.acquire_buffer();
        let buffer = &mut self.arena[slot];
        buffer.decoder_index = index;
        buffer.presentation_time_us = presentation_time_us;
        buffer.samples.clear();
        buffer.position = 0;

        if let Some(index) = index {
            let bytes = decoder.output_buffer(index)?;
            buffer.samples.extend(
                bytes
                    .chunks_exact(BYTES_PER_SAMPLE)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );

            if self.overflow.is_none() {
                self.overflow = Some(Overflow::default());
            }
        }

        self.filled.push_back(slot);
        Ok(())
    }

    /// Fills at most one encoder input slot.
    ///
    /// Returns `false` when there was nothing to feed, no slot was free, or
    /// the end-of-stream marker was just queued.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Configuration` - Samples arrived before the decoded format was bound
    /// - `TranscodeError::Codec` - A buffer index was not obtainable
    pub fn feed_encoder(
        &mut self,
        decoder: &mut dyn MediaCodec,
        encoder: &mut dyn MediaCodec,
        timeout: Duration,
    ) -> Result<bool> {
        let has_overflow = self.overflow_remaining() > 0;
        if self.filled.is_empty() && !has_overflow {
            return Ok(false);
        }

        let Some(encoder_index) = encoder.dequeue_input_buffer(timeout)? else {
            return Ok(false);
        };

        if has_overflow {
            self.drain_overflow(encoder, encoder_index)?;
            return Ok(true);
        }

        let Some(&slot) = self.filled.front() else {
            return Ok(false);
        };

        let Some(decoder_index) = self.arena[slot].decoder_index else {
            encoder.queue_input_buffer(encoder_index, BufferInfo::end_of_stream(0))?;
            self.filled.pop_front();
            self.free.push(slot);
            tracing::debug!("Audio channel queued end of stream to encoder");
            return Ok(false);
        };

        let layout = self.layout.ok_or_else(|| {
            TranscodeError::configuration("audio samples arrived before the decoded format")
        })?;
        let buffer = &mut self.arena[slot];
        let start = buffer.position;
        let presentation_time_us = buffer.presentation_time_us
            + duration_us(start, layout.sample_rate, layout.channels);

        let capacity = encoder.input_buffer(encoder_index)?.len() / BYTES_PER_SAMPLE;
        self.scratch.clear();
        self.scratch.resize(capacity, 0);

        let count = layout.remix.remix(&buffer.samples[start..], &mut self.scratch);
        if count.consumed == 0 {
            return Err(TranscodeError::Pipeline {
                kind: MediaKind::Audio,
                reason: format!("encoder input slot of {capacity} samples cannot hold one frame"),
            });
        }
        buffer.position += count.consumed;

        // Spill at most one slot, the rest stays queued in the decoder buffer
        let rest = &buffer.samples[buffer.position..];
        if layout.remix.output_len(rest.len()) > 0 {
            let overflow = self.overflow.get_or_insert_with(Overflow::default);
            overflow.samples.clear();
            overflow.samples.resize(capacity, 0);
            let spilled = layout.remix.remix(rest, &mut overflow.samples);
            overflow.samples.truncate(spilled.written);
            overflow.position = 0;
            overflow.base_time_us = buffer.presentation_time_us
                + duration_us(buffer.position, layout.sample_rate, layout.channels);
            buffer.position += spilled.consumed;
        }
        let consumed = layout
            .remix
            .output_len(buffer.samples.len() - buffer.position)
            == 0;

        write_samples(encoder.input_buffer(encoder_index)?, &self.scratch[..count.written]);
        encoder.queue_input_buffer(
            encoder_index,
            BufferInfo::new(
                0,
                count.written * BYTES_PER_SAMPLE,
                presentation_time_us,
                BufferFlags::NONE,
            ),
        )?;

        if consumed {
            decoder.release_output_buffer(decoder_index, false)?;
            self.filled.pop_front();
            self.free.push(slot);
        }
        Ok(true)
    }

    /// Samples still waiting in the overflow buffer.
    pub fn overflow_remaining(&self) -> usize {
        self.overflow.as_ref().map_or(0, Overflow::remaining)
    }

    /// Presentation time of the first sample that was spilled into the overflow buffer.
    pub fn overflow_base_time_us(&self) -> Option<i64> {
        self.overflow.as_ref().map(|overflow| overflow.base_time_us)
    }

    /// Decoder buffers queued and not yet fed.
    #[cfg(test)]
    pub(crate) fn pending_buffers(&self) -> usize {
        self.filled.len()
    }

    /// Buffers allocated in the arena so far.
    #[cfg(test)]
    pub(crate) fn allocated_buffers(&self) -> usize {
        self.arena.len()
    }

    fn acquire_buffer(&mut self) -> usize {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        self.arena.push(AudioBuffer::default());
        self.arena.len() - 1
    }

    fn drain_overflow(&mut self, encoder: &mut dyn MediaCodec, encoder_index: usize) -> Result<()> {
        let (sample_rate, output_channels) = match self.layout {
            Some(layout) => (layout.sample_rate, self.output_channels),
            None => (self.output_sample_rate, self.output_channels),
        };
        let Some(overflow) = self.overflow.as_mut() else {
            return Ok(());
        };

        let slot = encoder.input_buffer(encoder_index)?;
        let count = overflow.remaining().min(slot.len() / BYTES_PER_SAMPLE);
        let start = overflow.position;
        write_samples(slot, &overflow.samples[start..start + count]);

        let presentation_time_us =
            overflow.base_time_us + duration_us(start, sample_rate, output_channels);
        overflow.position += count;

        encoder.queue_input_buffer(
            encoder_index,
            BufferInfo::new(
                0,
                count * BYTES_PER_SAMPLE,
                presentation_time_us,
                BufferFlags::NONE,
            ),
        )?;
        tracing::trace!(
            "Audio overflow drained {} samples at {}us, {} left",
            count,
            presentation_time_us,
            overflow.remaining()
        );
        Ok(())
    }
}

fn write_samples(target: &mut [u8], samples: &[i16]) {
    for (bytes, sample) in target.chunks_exact_mut(BYTES_PER_SAMPLE).zip(samples) {
        bytes.copy_from_slice(&sample.to_le_bytes());
    }
}
