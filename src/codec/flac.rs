//! FLAC decoding, driven directly by the decode loop (pull model) instead of
//! libFLAC's push-style read/write/error callbacks.

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_FLAC};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::growable_source::GrowableSource;
use crate::codec::{convert, Codec, CodecError, DecodeResult, OpenParams, BYTES_PER_FRAME, MAX_DECODE_FRAMES};
use crate::engine::Engine;

const MIN_PROBE_BYTES: usize = 64;

/// FLAC only decodes cleanly to canonical frames at the two depths this
/// crate upshifts from; anything else is rejected rather than silently
/// producing garbage samples.
fn validate_bits_per_sample(bits: Option<u32>) -> Result<(), CodecError> {
    match bits {
        Some(b) if b != 16 && b != 24 => Err(CodecError::UnsupportedBitDepth(b)),
        _ => Ok(()),
    }
}

pub struct Flac {
    source: GrowableSource,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
}

impl Flac {
    pub fn new() -> Self {
        Self {
            source: GrowableSource::new(),
            reader: None,
            decoder: None,
            track_id: 0,
        }
    }

    fn try_probe(&mut self) -> Result<(), CodecError> {
        if self.reader.is_some() || self.source.len() < MIN_PROBE_BYTES {
            return Ok(());
        }
        let mss = MediaSourceStream::new(Box::new(self.source.clone()), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("flac");
        let format_opts = FormatOptions {
            enable_gapless: false,
            ..Default::default()
        };
        let probed = match symphonia::default::get_probe().format(&hint, mss, &format_opts, &MetadataOptions::default())
        {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let format_reader = probed.format;
        let track = match format_reader.tracks().iter().find(|t| t.codec_params.codec == CODEC_TYPE_FLAC) {
            Some(t) => t,
            None => return Ok(()),
        };
        validate_bits_per_sample(track.codec_params.bits_per_sample)?;
        self.track_id = track.id;
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        self.decoder = Some(decoder);
        self.reader = Some(format_reader);
        Ok(())
    }
}

impl Default for Flac {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Flac {
    fn id(&self) -> char {
        'f'
    }

    fn mime_tags(&self) -> &'static str {
        "flc,flac"
    }

    fn min_read_bytes(&self) -> u32 {
        8192
    }

    fn min_output_space_bytes(&self) -> u32 {
        102400
    }

    fn open(&mut self, _params: OpenParams) -> Result<(), CodecError> {
        self.source = GrowableSource::new();
        self.reader = None;
        self.decoder = None;
        log::info!("using flac");
        Ok(())
    }

    fn close(&mut self) {
        self.source = GrowableSource::new();
        self.reader = None;
        self.decoder = None;
    }

    fn decode(&mut self, engine: &Engine) -> DecodeResult {
        let mut stream_guard = engine.streambuf.lock();
        let mut output_guard = engine.outputbuf.lock();

        if (output_guard.space() as u32) < self.min_output_space_bytes() {
            return DecodeResult::Running;
        }

        let (read_off, read_len) = stream_guard.contiguous_read_span();
        if read_len > 0 {
            self.source.extend(stream_guard.read_slice(read_off, read_len));
            stream_guard.advance_read(read_len);
        }

        let disconnected = stream_guard.side().is_disconnected();

        if let Err(e) = self.try_probe() {
            log::warn!("flac: rejecting stream: {e}");
            return DecodeResult::Error;
        }
        let (Some(reader), Some(decoder)) = (self.reader.as_mut(), self.decoder.as_mut()) else {
            return if disconnected && self.source.len() < MIN_PROBE_BYTES {
                DecodeResult::Complete
            } else {
                DecodeResult::Running
            };
        };

        let mut decode_state = engine.decode_state.lock();
        let new_stream = decode_state.new_stream;
        drop(decode_state);
        if new_stream {
            if let Some(sample_rate) = reader
                .tracks()
                .iter()
                .find(|t| t.id == self.track_id)
                .and_then(|t| t.codec_params.sample_rate)
            {
                let write_offset = output_guard.write_offset();
                output_guard.side_mut().mark_track_start(sample_rate, write_offset);
                engine.decode_state.lock().new_stream = false;
            }
        }

        let mut frames_written = 0usize;
        loop {
            if frames_written >= MAX_DECODE_FRAMES {
                break;
            }
            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => {
                    log::warn!("flac: format error: {e}");
                    return DecodeResult::Error;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded: AudioBufferRef = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("flac: decode error, skipping packet: {msg}");
                    continue;
                }
                Err(e) => {
                    log::warn!("flac: unrecoverable decoder error: {e}");
                    return DecodeResult::Error;
                }
            };

            let remaining_space = output_guard.space();
            if remaining_space < BYTES_PER_FRAME {
                break;
            }
            let (write_off, write_len) = output_guard.contiguous_write_span();
            let budget = remaining_space.min(write_len).min((MAX_DECODE_FRAMES - frames_written) * BYTES_PER_FRAME);
            let out = output_guard.write_slice(write_off, budget);
            let written = convert::write_canonical_frames(&decoded, out, budget / BYTES_PER_FRAME);
            output_guard.advance_write(written * BYTES_PER_FRAME);
            frames_written += written;
        }

        self.source.compact();

        if frames_written == 0 && disconnected {
            DecodeResult::Complete
        } else {
            DecodeResult::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_decoder_probes_nothing_with_no_input() {
        let flac = Flac::new();
        assert!(flac.reader.is_none());
        assert!(flac.decoder.is_none());
    }

    #[test]
    fn open_resets_accumulation_buffer() {
        let mut flac = Flac::new();
        flac.source.extend(&[0u8; 32]);
        flac.open(OpenParams {
            sample_size: 0,
            sample_rate_code: 0,
            channels: 0,
            endianness: 0,
        })
        .unwrap();
        assert_eq!(flac.source.len(), 0);
    }

    #[test]
    fn accepts_16_and_24_bit_depths() {
        assert!(validate_bits_per_sample(Some(16)).is_ok());
        assert!(validate_bits_per_sample(Some(24)).is_ok());
        assert!(validate_bits_per_sample(None).is_ok());
    }

    #[test]
    fn rejects_other_bit_depths() {
        assert!(validate_bits_per_sample(Some(20)).is_err());
        assert!(validate_bits_per_sample(Some(8)).is_err());
        assert!(validate_bits_per_sample(Some(32)).is_err());
    }
}
