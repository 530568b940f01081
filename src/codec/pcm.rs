//! Raw PCM passthrough: the simplest codec, and the one every other adapter
//! is checked against, since it performs no actual decoding — only the
//! canonical bit-exact upshift into 32-bit stereo frames.

use crate::codec::{Codec, CodecError, DecodeResult, OpenParams, BYTES_PER_FRAME, MAX_DECODE_FRAMES};
use crate::engine::Engine;

/// Indexed by `rate - '0'`, exactly as the start-stream command encodes it.
const SAMPLE_RATES: [u32; 15] = [
    11025, 22050, 32000, 44100, 48000, 8000, 12000, 16000, 24000, 96000, 88200, 176400, 192000, 352800, 384000,
];

pub struct Pcm {
    sample_size: u8,
    sample_rate: u32,
    channels: u8,
    bigendian: bool,
}

impl Pcm {
    pub fn new() -> Self {
        Self {
            sample_size: 2,
            sample_rate: 44100,
            channels: 2,
            bigendian: false,
        }
    }

    fn read_sample(&self, iptr: &[u8]) -> i32 {
        match (self.sample_size, self.bigendian) {
            (2, true) => (iptr[0] as i32) << 24 | (iptr[1] as i32) << 16,
            (2, false) => (iptr[0] as i32) << 16 | (iptr[1] as i32) << 24,
            (3, true) => (iptr[0] as i32) << 24 | (iptr[1] as i32) << 16 | (iptr[2] as i32) << 8,
            (3, false) => (iptr[0] as i32) << 8 | (iptr[1] as i32) << 16 | (iptr[2] as i32) << 24,
            (1, _) => (iptr[0] as i32) << 24,
            _ => 0,
        }
    }
}

impl Default for Pcm {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Pcm {
    fn id(&self) -> char {
        'p'
    }

    fn mime_tags(&self) -> &'static str {
        "aif,pcm"
    }

    fn min_read_bytes(&self) -> u32 {
        4096
    }

    fn min_output_space_bytes(&self) -> u32 {
        102400
    }

    fn open(&mut self, params: OpenParams) -> Result<(), CodecError> {
        self.sample_size = (params.sample_size - b'0') + 1;
        let rate_index = (params.sample_rate_code - b'0') as usize;
        self.sample_rate = *SAMPLE_RATES
            .get(rate_index)
            .ok_or(CodecError::UnsupportedSampleRateCode(params.sample_rate_code))?;
        self.channels = params.channels - b'0';
        self.bigendian = params.endianness == b'0';
        log::info!(
            "pcm size: {} rate: {} chan: {} bigendian: {}",
            self.sample_size,
            self.sample_rate,
            self.channels,
            self.bigendian
        );
        if self.channels == 0 || self.channels > 2 {
            return Err(CodecError::UnsupportedChannelCount {
                expected: "1 or 2",
                actual: self.channels as u32,
            });
        }
        Ok(())
    }

    fn close(&mut self) {}

    fn streambuf_alignment(&self) -> usize {
        self.sample_size as usize * self.channels as usize
    }

    fn decode(&mut self, engine: &Engine) -> DecodeResult {
        let mut stream_guard = engine.streambuf.lock();
        let mut output_guard = engine.outputbuf.lock();

        if (output_guard.space() as u32) < self.min_output_space_bytes() {
            return DecodeResult::Running;
        }

        let bytes_per_input_frame = self.channels as usize * self.sample_size as usize;
        let (read_off, read_len) = stream_guard.contiguous_read_span();
        let in_frames = stream_guard.used().min(read_len) / bytes_per_input_frame;
        let (write_off, write_len) = output_guard.contiguous_write_span();
        let out_frames = output_guard.space().min(write_len) / BYTES_PER_FRAME;

        if stream_guard.side().is_disconnected() && in_frames == 0 {
            return DecodeResult::Complete;
        }

        let mut decode_state = engine.decode_state.lock();
        if decode_state.new_stream {
            let write_offset = output_guard.write_offset();
            output_guard.side_mut().mark_track_start(self.sample_rate, write_offset);
            decode_state.new_stream = false;
        }
        drop(decode_state);

        let frames = in_frames.min(out_frames).min(MAX_DECODE_FRAMES);
        if frames == 0 {
            return DecodeResult::Running;
        }

        let input = stream_guard.read_slice(read_off, frames * bytes_per_input_frame).to_vec();
        let output = output_guard.write_slice(write_off, frames * BYTES_PER_FRAME);

        for frame in 0..frames {
            let base_in = frame * bytes_per_input_frame;
            let base_out = frame * BYTES_PER_FRAME;
            let left = self.read_sample(&input[base_in..]);
            let right = if self.channels == 2 {
                self.read_sample(&input[base_in + self.sample_size as usize..])
            } else {
                left
            };
            output[base_out..base_out + 4].copy_from_slice(&left.to_le_bytes());
            output[base_out + 4..base_out + 8].copy_from_slice(&right.to_le_bytes());
        }

        log::trace!("decoded {frames} frames");

        stream_guard.advance_read(frames * bytes_per_input_frame);
        output_guard.advance_write(frames * BYTES_PER_FRAME);

        DecodeResult::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: u8, rate: u8, chan: u8, endian: u8) -> OpenParams {
        OpenParams {
            sample_size: size,
            sample_rate_code: rate,
            channels: chan,
            endianness: endian,
        }
    }

    #[test]
    fn open_parses_squeezelite_style_ascii_digit_params() {
        let mut pcm = Pcm::new();
        pcm.open(params(b'1', b'4', b'2', b'1')).unwrap();
        assert_eq!(pcm.sample_size, 2);
        assert_eq!(pcm.sample_rate, 48000);
        assert_eq!(pcm.channels, 2);
        assert!(!pcm.bigendian);
    }

    #[test]
    fn sixteen_bit_little_endian_upshifts_into_high_bits() {
        let pcm = Pcm {
            sample_size: 2,
            sample_rate: 44100,
            channels: 2,
            bigendian: false,
        };
        // 0x1234 little-endian on the wire -> placed in the top 16 bits
        let sample = pcm.read_sample(&[0x34, 0x12]);
        assert_eq!(sample, 0x1234_0000u32 as i32);
    }

    #[test]
    fn eight_bit_sample_fills_only_the_top_byte() {
        let pcm = Pcm {
            sample_size: 1,
            sample_rate: 44100,
            channels: 1,
            bigendian: false,
        };
        let sample = pcm.read_sample(&[0x7F]);
        assert_eq!(sample, 0x7F00_0000u32 as i32);
    }

    #[test]
    fn rejects_unsupported_sample_rate_code() {
        let mut pcm = Pcm::new();
        let err = pcm.open(params(b'1', b'9' + 10, b'2', b'1'));
        assert!(err.is_err());
    }
}
