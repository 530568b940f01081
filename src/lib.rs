//! netplay-core: the decode and buffered-audio pipeline of a headless LAN
//! audio player.
//!
//! Two mutex+condvar ring buffers — STREAMBUF between the network reader
//! and the decode thread, OUTPUTBUF between the decode thread and the
//! platform audio sink — carry bytes and canonical stereo frames
//! respectively. A small set of codec adapters (`Pcm`, `Flac`, `Vorbis`,
//! `Mpa`, `Aac`) pull from STREAMBUF and push to OUTPUTBUF under a fixed
//! lock order. The network transport, control protocol, and platform audio
//! driver are out of scope; this crate is the core that sits between them.

pub mod codec;
pub mod engine;
pub mod ring_buffer;
pub mod state;

pub use engine::{Engine, EngineConfig, EngineConfigError};
pub use ring_buffer::{RingBuffer, RingBufferGuard};
pub use state::{DecodeState, FadeController, FadeMode, OutputState, RunState, StreamPhase, StreamState};
