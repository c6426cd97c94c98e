//! Channel remixing of interleaved signed 16-bit PCM.
//!
//! Buffers are byte slices holding native-endian `i16` samples, the layout
//! codec sessions hand out. Each remix call processes as much of the input
//! as fits in the output and reports how far it got on both sides.

/// Bytes per PCM sample.
pub const BYTES_PER_SAMPLE: usize = 2;

const SIGNED_SHORT_LIMIT: i32 = 32768;
const UNSIGNED_SHORT_MAX: i32 = 65535;

/// Channel conversion applied between an audio decoder and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRemixer {
    /// Stereo to mono.
    Downmix,
    /// Mono to stereo.
    Upmix,
    /// Same channel count on both sides.
    Passthrough,
}

/// Progress of one remix call, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Remixed {
    /// Input bytes read.
    pub consumed: usize,
    /// Output bytes written.
    pub produced: usize,
}

impl AudioRemixer {
    /// Pick the remixer converting `input_channels` into `output_channels`.
    pub fn select(input_channels: u32, output_channels: u32) -> Self {
        if input_channels > output_channels {
            AudioRemixer::Downmix
        } else if input_channels < output_channels {
            AudioRemixer::Upmix
        } else {
            AudioRemixer::Passthrough
        }
    }

    /// Remix `input` into the front of `output`.
    pub fn remix(self, input: &[u8], output: &mut [u8]) -> Remixed {
        match self {
            AudioRemixer::Downmix => downmix(input, output),
            AudioRemixer::Upmix => upmix(input, output),
            AudioRemixer::Passthrough => passthrough(input, output),
        }
    }
}

/// Mix one stereo pair down to a single sample.
///
/// Viktor Toth's loudness-preserving mix on samples shifted into the unsigned
/// range: `a * b / 32768` when either side is below the midpoint, otherwise
/// `2 * (a + b) - a * b / 32768 - 65535`, with 65536 clamped to 65535.
/// Arithmetic wraps at 32 bits and the result is truncated to 16 bits.
pub fn downmix_pair(a: i16, b: i16) -> i16 {
    let a = i32::from(a) + SIGNED_SHORT_LIMIT;
    let b = i32::from(b) + SIGNED_SHORT_LIMIT;

    let mut m = if a < SIGNED_SHORT_LIMIT || b < SIGNED_SHORT_LIMIT {
        a * b / SIGNED_SHORT_LIMIT
    } else {
        2 * (a + b) - a.wrapping_mul(b) / SIGNED_SHORT_LIMIT - UNSIGNED_SHORT_MAX
    };
    if m == UNSIGNED_SHORT_MAX + 1 {
        m = UNSIGNED_SHORT_MAX;
    }
    (m - SIGNED_SHORT_LIMIT) as i16
}

fn sample_at(buf: &[u8], index: usize) -> i16 {
    let at = index * BYTES_PER_SAMPLE;
    i16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn put_sample(buf: &mut [u8], index: usize, value: i16) {
    let at = index * BYTES_PER_SAMPLE;
    buf[at..at + BYTES_PER_SAMPLE].copy_from_slice(&value.to_ne_bytes());
}

fn downmix(input: &[u8], output: &mut [u8]) -> Remixed {
    let in_pairs = input.len() / (2 * BYTES_PER_SAMPLE);
    let out_space = output.len() / BYTES_PER_SAMPLE;
    let count = in_pairs.min(out_space);

    for i in 0..count {
        let mixed = downmix_pair(sample_at(input, 2 * i), sample_at(input, 2 * i + 1));
        put_sample(output, i, mixed);
    }

    Remixed {
        consumed: count * 2 * BYTES_PER_SAMPLE,
        produced: count * BYTES_PER_SAMPLE,
    }
}

fn upmix(input: &[u8], output: &mut [u8]) -> Remixed {
    let in_samples = input.len() / BYTES_PER_SAMPLE;
    let out_space = output.len() / (2 * BYTES_PER_SAMPLE);
    let count = in_samples.min(out_space);

    for i in 0..count {
        let sample = sample_at(input, i);
        put_sample(output, 2 * i, sample);
        put_sample(output, 2 * i + 1, sample);
    }

    Remixed {
        consumed: count * BYTES_PER_SAMPLE,
        produced: count * 2 * BYTES_PER_SAMPLE,
    }
}

fn passthrough(input: &[u8], output: &mut [u8]) -> Remixed {
    let len = input.len().min(output.len()) / BYTES_PER_SAMPLE * BYTES_PER_SAMPLE;
    output[..len].copy_from_slice(&input[..len]);
    Remixed {
        consumed: len,
        produced: len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_select() {
        assert_eq!(AudioRemixer::select(2, 1), AudioRemixer::Downmix);
        assert_eq!(AudioRemixer::select(1, 2), AudioRemixer::Upmix);
        assert_eq!(AudioRemixer::select(2, 2), AudioRemixer::Passthrough);
        assert_eq!(AudioRemixer::select(1, 1), AudioRemixer::Passthrough);
    }

    #[test]
    fn test_downmix_quiet_branch() {
        // Both below midpoint: 16384 * 16384 / 32768 = 8192.
        assert_eq!(downmix_pair(-16384, -16384), -24576);
        assert_eq!(downmix_pair(i16::MIN, i16::MIN), i16::MIN);
        assert_eq!(downmix_pair(i16::MIN, i16::MAX), i16::MIN);
    }

    #[test]
    fn test_downmix_loud_branch() {
        // a = b = 49152: 2 * 98304 - 73728 - 65535 = 57345.
        assert_eq!(downmix_pair(16384, 16384), (57345 - 32768) as i16);
    }

    #[test]
    fn test_downmix_clamp() {
        // a = 32768, b = 65535 lands exactly on 65536 before the clamp.
        let (a, b) = (32768i64, 65535i64);
        assert_eq!(2 * (a + b) - (a * b) / 32768 - 65535, 65536);
        assert_eq!(downmix_pair(0, i16::MAX), i16::MAX);
    }

    #[test]
    fn test_downmix_wraps_like_32_bit() {
        // 65535 * 65535 overflows 32 bits; the mix lands on 196608, which
        // truncates to -32768.
        assert_eq!(downmix_pair(i16::MAX, i16::MAX), i16::MIN);
    }

    #[test]
    fn test_downmix_bounded_by_output() {
        let input = pcm(&[100, 100, 200, 200, 300, 300]);
        let mut output = vec![0u8; 2 * BYTES_PER_SAMPLE];
        let done = AudioRemixer::Downmix.remix(&input, &mut output);
        assert_eq!(done.consumed, 4 * BYTES_PER_SAMPLE);
        assert_eq!(done.produced, 2 * BYTES_PER_SAMPLE);
    }

    #[test]
    fn test_upmix_duplicates() {
        let input = pcm(&[1, -2, 3]);
        let mut output = vec![0u8; 6 * BYTES_PER_SAMPLE];
        let done = AudioRemixer::Upmix.remix(&input, &mut output);
        assert_eq!(done.produced, 6 * BYTES_PER_SAMPLE);
        assert_eq!(samples(&output), vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn test_passthrough_partial() {
        let input = pcm(&[7, 8, 9]);
        let mut output = vec![0u8; 2 * BYTES_PER_SAMPLE];
        let done = AudioRemixer::Passthrough.remix(&input, &mut output);
        assert_eq!(done.consumed, 2 * BYTES_PER_SAMPLE);
        assert_eq!(samples(&output), vec![7, 8]);
    }
}
