//! ADTS AAC decoding via `symphonia`'s `aac` feature, following the same
//! accumulate/probe/batch-decode shape as the Flac adapter.

use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_AAC};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::codec::growable_source::GrowableSource;
use crate::codec::{convert, Codec, CodecError, DecodeResult, OpenParams, BYTES_PER_FRAME, MAX_DECODE_FRAMES};
use crate::engine::Engine;

const MIN_PROBE_BYTES: usize = 32;

pub struct Aac {
    source: GrowableSource,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
}

impl Aac {
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
        hint.with_extension("aac");
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
        let track = match format_reader.tracks().iter().find(|t| t.codec_params.codec == CODEC_TYPE_AAC) {
            Some(t) => t,
            None => return Ok(()),
        };
        self.track_id = track.id;
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
        self.decoder = Some(decoder);
        self.reader = Some(format_reader);
        Ok(())
    }
}

impl Default for Aac {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for Aac {
    fn id(&self) -> char {
        'a'
    }

    fn mime_tags(&self) -> &'static str {
        "aac,adts"
    }

    fn min_read_bytes(&self) -> u32 {
        2048
    }

    fn min_output_space_bytes(&self) -> u32 {
        20480
    }

    fn open(&mut self, _params: OpenParams) -> Result<(), CodecError> {
        self.source = GrowableSource::new();
        self.reader = None;
        self.decoder = None;
        log::info!("using aac");
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
            log::warn!("aac: rejecting stream: {e}");
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
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    log::warn!("aac: format error: {e}");
                    return DecodeResult::Error;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("aac: decode error, skipping frame: {msg}");
                    continue;
                }
                Err(e) => {
                    log::warn!("aac: unrecoverable decoder error: {e}");
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
    fn fresh_decoder_has_no_reader() {
        let aac = Aac::new();
        assert!(aac.reader.is_none());
    }
}
