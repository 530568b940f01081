//! The codec plug-point: a uniform `open`/`close`/`decode` interface with
//! interchangeable decoder adapters, plus the registry that maps a
//! single-character codec id (as carried in the start-stream command) to a
//! registered instance.

pub mod aac;
pub mod flac;
pub(crate) mod growable_source;
pub mod mpa;
pub mod pcm;
pub mod vorbis;

use crate::engine::Engine;

/// Canonical stereo frame size: two signed 32-bit little-endian samples.
pub const BYTES_PER_FRAME: usize = 8;

/// Upper bound on frames produced by a single `decode()` call, shared by
/// every codec so worst-case added latency stays bounded regardless of how
/// many natural units (FLAC blocks, Vorbis/MP3/AAC packets) a call's batch
/// happens to cover.
pub const MAX_DECODE_FRAMES: usize = 4096;

/// Failures a codec can hit that aren't an ordinary `DecodeResult::Error`
/// return from a `decode()` call — e.g. while opening it.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec requires {expected} channel(s), stream declared {actual}")]
    UnsupportedChannelCount { expected: &'static str, actual: u32 },
    #[error("unsupported sample depth: {0} bits per sample")]
    UnsupportedBitDepth(u32),
    #[error("unsupported sample rate code: {0}")]
    UnsupportedSampleRateCode(u8),
    #[error("no audio track found in stream")]
    NoTrackFound,
    #[error("underlying decoder error: {0}")]
    Backend(#[from] symphonia::core::errors::Error),
}

/// Failures surfaced from a `decode()` call, retained in `DecodeState::last_error`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("codec id {0:?} is not registered")]
    UnknownCodec(char),
    #[error("codec '{0}' returned an unrecoverable decode error")]
    Failed(char),
}

/// Outcome of one `decode()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeResult {
    Running,
    Complete,
    Error,
}

/// Parameters carried by the start-stream command. Non-PCM codecs largely
/// ignore these in favor of parameters recovered from the stream itself,
/// but they're still passed through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct OpenParams {
    pub sample_size: u8,
    pub sample_rate_code: u8,
    pub channels: u8,
    pub endianness: u8,
}

/// A decoder plugged into the pipeline: consumes bytes from STREAMBUF,
/// produces canonical stereo frames into OUTPUTBUF.
pub trait Codec: Send {
    /// Single-character id as carried in the start-stream command (`'p'`, `'f'`, `'o'`, `'m'`, `'a'`).
    fn id(&self) -> char;

    /// File extensions/mime tags this codec handles, informational only.
    fn mime_tags(&self) -> &'static str;

    /// STREAMBUF must hold at least this many bytes (or the stream must be
    /// disconnected) before `decode()` is called.
    fn min_read_bytes(&self) -> u32;

    /// OUTPUTBUF must have at least this much free space before `decode()`
    /// is called; otherwise it returns `Running` without consuming input.
    fn min_output_space_bytes(&self) -> u32;

    /// Initialise or reset internal state for a freshly announced track.
    /// Idempotent if called twice without an intervening `close`.
    fn open(&mut self, params: OpenParams) -> Result<(), CodecError>;

    /// Release any resources held for the current track.
    fn close(&mut self);

    /// Byte alignment `DecodeEngine::start_stream` applies to STREAMBUF for
    /// this codec, mirroring squeezelite's per-codec `buf_adjust` call.
    /// Compressed codecs read arbitrary-length packets and leave this at the
    /// default of `1`; only raw PCM needs its input frame size enforced so a
    /// frame never straddles a buffer wrap.
    fn streambuf_alignment(&self) -> usize {
        1
    }

    /// Decode at most one natural unit of compressed/raw audio, writing
    /// canonical stereo frames to `engine.outputbuf`. See the locking
    /// discipline documented on `engine::DecodeEngine`.
    fn decode(&mut self, engine: &Engine) -> DecodeResult;
}

/// Looks up codec instances by id, built once at `Engine` init.
///
/// Every adapter here is backed by the statically linked `symphonia` crate,
/// so registration never fails the way a dynamically loaded system library
/// binding could; the fallible signature is kept so a future FFI-backed
/// codec can plug into the same call site without changing callers.
pub struct CodecRegistry {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) -> Result<(), CodecError> {
        log::info!("registered codec '{}' ({})", codec.id(), codec.mime_tags());
        self.codecs.push(codec);
        Ok(())
    }

    pub fn get_mut(&mut self, id: char) -> Option<&mut Box<dyn Codec>> {
        self.codecs.iter_mut().find(|c| c.id() == id)
    }

    pub fn contains(&self, id: char) -> bool {
        self.codecs.iter().any(|c| c.id() == id)
    }

    /// Registry covering all five ids in the registration table: `p`, `f`,
    /// `o`, `m`, `a`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let _ = registry.register(Box::new(pcm::Pcm::new()));
        let _ = registry.register(Box::new(flac::Flac::new()));
        let _ = registry.register(Box::new(vorbis::Vorbis::new()));
        let _ = registry.register(Box::new(mpa::Mpa::new()));
        let _ = registry.register(Box::new(aac::Aac::new()));
        registry
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Shared sample-format conversion used by the symphonia-backed adapters
/// (Flac, Vorbis, Mpa, Aac) to turn a decoded `AudioBufferRef` into
/// canonical stereo 32-bit frames, duplicating mono to both channels.
pub(crate) mod convert {
    use symphonia::core::audio::{AudioBufferRef, Signal};

    /// Writes up to `max_frames` canonical stereo frames (8 bytes each) into
    /// `out`. Returns the number of frames written.
    pub fn write_canonical_frames(decoded: &AudioBufferRef, out: &mut [u8], max_frames: usize) -> usize {
        match decoded {
            AudioBufferRef::U8(buf) => write_from(buf, out, max_frames, |s| ((s as i32) - 128) << 24),
            AudioBufferRef::S16(buf) => write_from(buf, out, max_frames, |s| (s as i32) << 16),
            AudioBufferRef::S24(buf) => write_from(buf, out, max_frames, |s| s.inner() << 8),
            AudioBufferRef::S32(buf) => write_from(buf, out, max_frames, |s| s),
            AudioBufferRef::F32(buf) => write_from(buf, out, max_frames, |s| {
                (s.clamp(-1.0, 1.0) * i32::MAX as f32) as i32
            }),
            _ => 0,
        }
    }

    fn write_from<S: Copy, F: Fn(S) -> i32>(
        buf: &symphonia::core::audio::AudioBuffer<S>,
        out: &mut [u8],
        max_frames: usize,
        to_i32: F,
    ) -> usize {
        let channels = buf.spec().channels.count().max(1);
        let frames = buf.frames().min(max_frames).min(out.len() / super::BYTES_PER_FRAME);
        for frame in 0..frames {
            let left = to_i32(buf.chan(0)[frame]);
            let right = if channels >= 2 {
                to_i32(buf.chan(1)[frame])
            } else {
                left
            };
            let base = frame * super::BYTES_PER_FRAME;
            out[base..base + 4].copy_from_slice(&left.to_le_bytes());
            out[base + 4..base + 8].copy_from_slice(&right.to_le_bytes());
        }
        frames
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use symphonia::core::audio::{AudioBuffer, Layout, SignalSpec};

        #[test]
        fn mono_duplicates_to_both_output_lanes() {
            let spec = SignalSpec::new_with_layout(44100, Layout::Mono);
            let mut buf: AudioBuffer<i16> = AudioBuffer::new(2, spec);
            buf.render_reserved(Some(2));
            buf.chan_mut(0)[0] = 1000;
            buf.chan_mut(0)[1] = -1000;

            let mut out = [0u8; 16];
            let written = write_canonical_frames(&AudioBufferRef::S16(std::borrow::Cow::Borrowed(&buf)), &mut out, 2);

            assert_eq!(written, 2);
            let left0 = i32::from_le_bytes(out[0..4].try_into().unwrap());
            let right0 = i32::from_le_bytes(out[4..8].try_into().unwrap());
            assert_eq!(left0, 1000 << 16);
            assert_eq!(right0, left0);
        }

        #[test]
        fn stereo_keeps_distinct_lanes() {
            let spec = SignalSpec::new_with_layout(44100, Layout::Stereo);
            let mut buf: AudioBuffer<i16> = AudioBuffer::new(1, spec);
            buf.render_reserved(Some(1));
            buf.chan_mut(0)[0] = 1000;
            buf.chan_mut(1)[0] = -2000;

            let mut out = [0u8; 8];
            let written = write_canonical_frames(&AudioBufferRef::S16(std::borrow::Cow::Borrowed(&buf)), &mut out, 1);

            assert_eq!(written, 1);
            let left = i32::from_le_bytes(out[0..4].try_into().unwrap());
            let right = i32::from_le_bytes(out[4..8].try_into().unwrap());
            assert_eq!(left, 1000 << 16);
            assert_eq!(right, -2000 << 16);
        }
    }
}
