//! Ogg/Vorbis decoding via `symphonia`'s pure-Rust decoder, replacing the
//! original's dual floating-point/Tremor libvorbis FFI bindings — one
//! implementation covers what used to be a build-time fixed/float choice.

use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_VORBIS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::growable_source::GrowableSource;
use crate::codec::{convert, Codec, CodecError, DecodeResult, OpenParams, BYTES_PER_FRAME, MAX_DECODE_FRAMES};
use crate::engine::Engine;

const MIN_PROBE_BYTES: usize = 256;

/// Canonical frame conversion only carries a left/right lane; anything wider
/// than stereo (or silent/absent) has no meaningful place to go.
fn validate_channel_count(channels: u32) -> Result<(), CodecError> {
    if channels > 2 {
        Err(CodecError::UnsupportedChannelCount {
            expected: "1 or 2",
            actual: channels,
        })
    } else {
        Ok(())
    }
}

pub struct Vorbis {
    source: GrowableSource,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    channels: u32,
}

impl Vorbis {
    pub fn new() -> Self {
        Self {
            source: GrowableSource::new(),
            reader: None,
            decoder: None,
            track_id: 0,
            channels: 2,
        }
    }

    fn try_probe(&mut self) -> Result<(), CodecError> {
        if self.reader.is_some() || self.source.len() < MIN_PROBE_BYTES {
            return Ok(());
        }
        let mss = MediaSourceStream::new(Box::new(self.source.clone()), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("ogg");
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
        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec == CODEC_TYPE_VORBIS)
            .ok_or(CodecError::NoTrackFound)?;
        self.track_id = track.id;
        let channels = track.codec_params.channels.map(|c| c.count() as u32).unwrap_or(2);
        validate_channel_count(channels)?;
        self.channels = channels;
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        self.decoder = Some(decoder);
        self.reader = Some(format_reader);
        Ok(())
    }
}

impl Default for Vorbis {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Vorbis {
    fn id(&self) -> char {
        'o'
    }

    fn mime_tags(&self) -> &'static str {
        "ogg,oga"
    }

    fn min_read_bytes(&self) -> u32 {
        4096
    }

    fn min_output_space_bytes(&self) -> u32 {
        102400
    }

    fn open(&mut self, _params: OpenParams) -> Result<(), CodecError> {
        self.source = GrowableSource::new();
        self.reader = None;
        self.decoder = None;
        log::info!("using vorbis");
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
            log::warn!("vorbis: {e}");
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
        let mut terminate = false;
        loop {
            if frames_written >= MAX_DECODE_FRAMES {
                break;
            }
            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    terminate = true;
                    break;
                }
                Err(e) => {
                    log::warn!("vorbis: {e}, closing track");
                    terminate = true;
                    break;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("vorbis: {e}, closing track");
                    terminate = true;
                    break;
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

        if terminate || (frames_written == 0 && disconnected) {
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
    fn fresh_decoder_defaults_to_stereo() {
        let vorbis = Vorbis::new();
        assert_eq!(vorbis.channels, 2);
    }

    #[test]
    fn open_resets_accumulation_buffer() {
        let mut vorbis = Vorbis::new();
        vorbis.source.extend(&[0u8; 16]);
        vorbis
            .open(OpenParams {
                sample_size: 0,
                sample_rate_code: 0,
                channels: 0,
                endianness: 0,
            })
            .unwrap();
        assert_eq!(vorbis.source.len(), 0);
    }

    #[test]
    fn accepts_mono_and_stereo() {
        assert!(validate_channel_count(1).is_ok());
        assert!(validate_channel_count(2).is_ok());
    }

    #[test]
    fn rejects_more_than_stereo() {
        assert!(validate_channel_count(6).is_err());
    }
}
