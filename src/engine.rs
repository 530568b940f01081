//! `Engine`: the non-singleton bundle of both ring buffers, the handshake
//! state they carry, and the decode thread that sits between them. Built
//! once per running stream via `Engine::new(EngineConfig)` and shared with
//! every thread as `Arc<Engine>` — no process-wide globals anywhere here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{CodecRegistry, DecodeError, DecodeResult, OpenParams};
use crate::ring_buffer::RingBuffer;
use crate::state::{DecodeState, OutputState, RunState, StreamState};

/// Conservative upper bound on a single FLAC block's raw bytes across
/// channels at the widest depth this crate accepts (24-bit, 2 channels),
/// using FLAC's maximum blocksize of 65535 samples rounded up to a power of
/// two. `EngineConfig` refuses a STREAMBUF smaller than twice this, so a
/// single block can never starve the decoder mid-probe.
pub const MAX_FLAC_BLOCK_BYTES: usize = 65536 * 2 * 4;

const DEFAULT_STREAMBUF_CAPACITY: usize = 2 * 1024 * 1024;
const DEFAULT_OUTPUTBUF_CAPACITY: usize = 4 * 1024 * 1024;

/// How long the decode thread parks on OUTPUTBUF's condvar between retries
/// when thresholds aren't met, per §4.3.
const DECODE_POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum EngineConfigError {
    #[error("streambuf_capacity ({0}) must be at least twice MAX_FLAC_BLOCK_BYTES ({MAX_FLAC_BLOCK_BYTES})")]
    StreambufTooSmall(usize),
}

/// Buffer sizing and codec registration for a fresh `Engine`.
pub struct EngineConfig {
    pub streambuf_capacity: usize,
    pub outputbuf_capacity: usize,
    pub codecs: CodecRegistry,
}

impl EngineConfig {
    pub fn new(streambuf_capacity: usize, outputbuf_capacity: usize) -> Result<Self, EngineConfigError> {
        if streambuf_capacity < 2 * MAX_FLAC_BLOCK_BYTES {
            return Err(EngineConfigError::StreambufTooSmall(streambuf_capacity));
        }
        Ok(Self {
            streambuf_capacity,
            outputbuf_capacity,
            codecs: CodecRegistry::with_defaults(),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STREAMBUF_CAPACITY, DEFAULT_OUTPUTBUF_CAPACITY)
            .expect("default buffer capacities satisfy the FLAC block-size floor")
    }
}

/// Bundles STREAMBUF, OUTPUTBUF, and the decode-side handshake state.
/// `streambuf`'s companion state is `StreamState` (mutated by the external
/// stream-fetch thread, read by codecs under STREAMBUF's lock);
/// `outputbuf`'s is `OutputState` (mutated by codecs, read by the external
/// output thread under OUTPUTBUF's lock). `decode_state` is locked
/// separately, innermost, only by the decode thread and the control thread
/// that calls `start_stream`/`stop` — it never participates in the
/// STREAMBUF-before-OUTPUTBUF ordering because it never needs both.
pub struct Engine {
    pub streambuf: RingBuffer<StreamState>,
    pub outputbuf: RingBuffer<OutputState>,
    pub decode_state: Mutex<DecodeState>,
    codecs: Mutex<CodecRegistry>,
    running: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            streambuf: RingBuffer::new(config.streambuf_capacity),
            outputbuf: RingBuffer::new(config.outputbuf_capacity),
            decode_state: Mutex::new(DecodeState::default()),
            codecs: Mutex::new(config.codecs),
            running: AtomicBool::new(false),
        })
    }
}

/// Owns the single decode thread. Constructed alongside `Engine` and kept
/// by the host; `start_stream`/`stop` are the only entry points the control
/// protocol thread calls.
pub struct DecodeEngine {
    engine: Arc<Engine>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeEngine {
    pub fn init(engine: Arc<Engine>) -> Self {
        Self { engine, handle: None }
    }

    /// Closes the previous codec if different, opens the new one, arms
    /// `new_stream`, and spawns (or keeps running) the decode loop.
    pub fn start_stream(&mut self, codec_id: char, size: u8, rate: u8, chan: u8, endian: u8) -> Result<(), DecodeError> {
        {
            let mut codecs = self.engine.codecs.lock();
            if !codecs.contains(codec_id) {
                return Err(DecodeError::UnknownCodec(codec_id));
            }
            let prev = self.engine.decode_state.lock().active_codec;
            if let Some(prev_id) = prev {
                if prev_id != codec_id {
                    if let Some(prev_codec) = codecs.get_mut(prev_id) {
                        prev_codec.close();
                    }
                }
            }
            let codec = codecs.get_mut(codec_id).expect("just checked contains");
            codec.close();
            codec.open(OpenParams {
                sample_size: size,
                sample_rate_code: rate,
                channels: chan,
                endianness: endian,
            })?;
            let alignment = codec.streambuf_alignment();
            self.engine.streambuf.lock().adjust_alignment(alignment);
        }

        {
            let mut decode_state = self.engine.decode_state.lock();
            decode_state.new_stream = true;
            decode_state.state = RunState::Running;
            decode_state.last_error = None;
            decode_state.active_codec = Some(codec_id);
        }

        self.engine.running.store(true, Ordering::SeqCst);
        self.spawn_if_needed();
        Ok(())
    }

    /// Halts the decode loop and closes the active codec. Idempotent.
    pub fn stop(&mut self) {
        self.engine.running.store(false, Ordering::SeqCst);
        self.engine.decode_state.lock().state = RunState::Stopped;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.engine.streambuf.lock().adjust_alignment(1);
    }

    fn spawn_if_needed(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        self.handle = Some(std::thread::spawn(move || decode_loop(engine)));
    }
}

/// The decode thread body: while running, wait for thresholds and call
/// `codec.decode(&engine)`, mapping `Complete`/`Error` to a stopped state.
/// Reads `decode_state.active_codec` fresh every iteration rather than
/// capturing a fixed id, so a single persistent thread keeps driving
/// whichever codec `start_stream` most recently switched to.
fn decode_loop(engine: Arc<Engine>) {
    loop {
        if !engine.running.load(Ordering::SeqCst) {
            return;
        }
        if engine.decode_state.lock().state != RunState::Running {
            return;
        }
        let Some(codec_id) = engine.decode_state.lock().active_codec else {
            return;
        };

        let (min_read, min_space) = {
            let mut codecs = engine.codecs.lock();
            match codecs.get_mut(codec_id) {
                Some(codec) => (codec.min_read_bytes() as usize, codec.min_output_space_bytes() as usize),
                None => return,
            }
        };

        let have_space = engine.outputbuf.lock().space() >= min_space;
        if !have_space {
            engine.outputbuf.wait_for_space(min_space, DECODE_POLL_TIMEOUT);
            continue;
        }

        let stream_guard = engine.streambuf.lock();
        let have_data = stream_guard.used() >= min_read;
        let disconnected = stream_guard.side().is_disconnected();
        drop(stream_guard);

        if !have_data && !disconnected {
            engine.streambuf.wait_for_data(min_read, DECODE_POLL_TIMEOUT);
            continue;
        }

        let result = {
            let mut codecs = engine.codecs.lock();
            let codec = match codecs.get_mut(codec_id) {
                Some(c) => c,
                None => return,
            };
            codec.decode(&engine)
        };

        match result {
            DecodeResult::Running => continue,
            DecodeResult::Complete => {
                log::info!("codec '{codec_id}' reached end of stream");
                engine.decode_state.lock().state = RunState::Stopped;
                return;
            }
            DecodeResult::Error => {
                log::error!("codec '{codec_id}' failed, stopping decode loop");
                let mut decode_state = engine.decode_state.lock();
                decode_state.state = RunState::Stopped;
                decode_state.last_error = Some(DecodeError::Failed(codec_id));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_satisfies_flac_block_floor() {
        let config = EngineConfig::default();
        assert!(config.streambuf_capacity >= 2 * MAX_FLAC_BLOCK_BYTES);
    }

    #[test]
    fn undersized_streambuf_is_rejected() {
        let err = EngineConfig::new(1024, DEFAULT_OUTPUTBUF_CAPACITY);
        assert!(err.is_err());
    }

    #[test]
    fn fresh_engine_starts_idle() {
        let engine = Engine::new(EngineConfig::default());
        assert_eq!(engine.decode_state.lock().state, RunState::Stopped);
        assert!(!engine.running.load(Ordering::SeqCst));
    }
}
