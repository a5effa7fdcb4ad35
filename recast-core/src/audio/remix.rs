//! Channel-count conversion for interleaved 16-bit PCM

const SIGNED_SHORT_LIMIT: i64 = 32768;
const UNSIGNED_SHORT_MAX: i64 = 65535;

/// Channel conversion applied between decoder and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remix {
    /// Same channel count on both sides
    PassThrough,
    /// Mono to stereo
    UpMix,
    /// Stereo to mono
    DownMix,
}

/// Samples read from the input and written to the output by one remix call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemixCount {
    pub consumed: usize,
    pub written: usize,
}

impl Remix {
    /// Picks the conversion for the given channel counts.
    pub fn select(input_channels: u32, output_channels: u32) -> Self {
        if input_channels > output_channels {
            Remix::DownMix
        } else if input_channels < output_channels {
            Remix::UpMix
        } else {
            Remix::PassThrough
        }
    }

    /// Number of output samples produced from `input_samples` input samples.
    pub fn output_len(self, input_samples: usize) -> usize {
        match self {
            Remix::PassThrough => input_samples,
            Remix::UpMix => input_samples * 2,
            Remix::DownMix => input_samples / 2,
        }
    }

    /// Converts as many whole frames as fit into `output`.
    ///
    /// Never reads past the end of `input`; a trailing half stereo frame is
    /// left unconsumed.
    pub fn remix(self, input: &[i16], output: &mut [i16]) -> RemixCount {
        match self {
            Remix::PassThrough => {
                let count = input.len().min(output.len());
                output[..count].copy_from_slice(&input[..count]);
                RemixCount {
                    consumed: count,
                    written: count,
                }
            }
            Remix::UpMix => {
                let frames = input.len().min(output.len() / 2);
                for (sample, pair) in input[..frames].iter().zip(output.chunks_exact_mut(2)) {
                    pair[0] = *sample;
                    pair[1] = *sample;
                }
                RemixCount {
                    consumed: frames,
                    written: frames * 2,
                }
            }
            Remix::DownMix => {
                let frames = (input.len() / 2).min(output.len());
                for (pair, out) in input.chunks_exact(2).take(frames).zip(output.iter_mut()) {
                    *out = mix_pair(pair[0], pair[1]);
                }
                RemixCount {
                    consumed: frames * 2,
                    written: frames,
                }
            }
        }
    }
}

/// Mixes one stereo pair into a single sample.
///
/// Both values are shifted into the unsigned domain. When either is below the
/// midpoint the product is normalized, otherwise the complementary form is
/// used, so loud and quiet passages both keep their level. The loud corner
/// can exceed the unsigned range by a few steps and saturates.
pub fn mix_pair(left: i16, right: i16) -> i16 {
    let a = i64::from(left) + SIGNED_SHORT_LIMIT;
    let b = i64::from(right) + SIGNED_SHORT_LIMIT;

    let mixed = if a < SIGNED_SHORT_LIMIT || b < SIGNED_SHORT_LIMIT {
        a * b / SIGNED_SHORT_LIMIT
    } else {
        2 * (a + b) - (a * b) / SIGNED_SHORT_LIMIT - UNSIGNED_SHORT_MAX
    };
    let mixed = mixed.min(UNSIGNED_SHORT_MAX);

    // 0..=65535 shifted back into the signed range
    (mixed - SIGNED_SHORT_LIMIT) as i16
}
