//! The handshake structures shared between the stream, decode, and output
//! threads: `StreamState` (stream thread → decoders), `DecodeState` (decode
//! engine → codecs), `OutputState` (decoders → output thread), and the
//! `FadeController` embedded in the latter.

/// Coarse phase of the (external) stream-fetch thread. The core only ever
/// asks whether `state <= Disconnect`, i.e. "no more bytes are coming";
/// deriving `PartialOrd` in declaration order makes that a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamPhase {
    Stopped,
    Disconnect,
    Recv,
    SendHeaders,
    Connected,
}

impl Default for StreamPhase {
    fn default() -> Self {
        StreamPhase::Stopped
    }
}

/// Shared with the stream thread under STREAMBUF's lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamState {
    pub phase: StreamPhase,
}

impl StreamState {
    /// No more bytes are coming from the network.
    pub fn is_disconnected(&self) -> bool {
        self.phase <= StreamPhase::Disconnect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Stopped
    }
}

/// Owned by `DecodeEngine`, consulted (and partly mutated) by the active codec.
#[derive(Debug, Default)]
pub struct DecodeState {
    /// Set by `DecodeEngine::start_stream`; cleared by the codec on its first
    /// successful frame, at which point it must announce sample rate and
    /// mark `track_start`.
    pub new_stream: bool,
    pub state: RunState,
    /// Id of the codec the decode thread should be driving. Read fresh on
    /// every loop iteration so a running thread follows a codec switch
    /// instead of being pinned to whichever id it was spawned for.
    pub active_codec: Option<char>,
    /// Most recent codec failure, kept for diagnostics; not read by the
    /// decode loop itself.
    pub last_error: Option<crate::codec::DecodeError>,
}

impl DecodeState {
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// How the output thread should ramp gain across a track boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeMode {
    #[default]
    None,
    CrossFade,
    FadeIn,
    FadeOut,
    FadeInOut,
}

/// Computes (and the output thread consults) the gain ramp around a track
/// boundary. The core's job is solely to place `fade_start`/`fade_end`; the
/// per-sample multiply happens in the (out of scope) output driver.
#[derive(Debug, Default)]
pub struct FadeController {
    pub mode: FadeMode,
    /// Fade duration in OUTPUTBUF bytes (must be a multiple of
    /// `BYTES_PER_FRAME`), set by the host before arming.
    pub duration_bytes: u64,
    pub fade_start: Option<u64>,
    pub fade_end: Option<u64>,
}

impl FadeController {
    pub fn new(mode: FadeMode, duration_bytes: u64) -> Self {
        Self {
            mode,
            duration_bytes,
            fade_start: None,
            fade_end: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.mode != FadeMode::None
    }

    /// Called by a codec when it has just marked a new `track_start`. Places
    /// `fade_start`/`fade_end` relative to that boundary.
    pub fn check_fade(&mut self, track_start: u64, new_track: bool) {
        if !self.is_armed() || !new_track {
            return;
        }
        match self.mode {
            FadeMode::CrossFade | FadeMode::FadeInOut => {
                self.fade_start = Some(track_start.saturating_sub(self.duration_bytes / 2));
                self.fade_end = Some(track_start.saturating_add(self.duration_bytes / 2));
            }
            FadeMode::FadeIn => {
                self.fade_start = Some(track_start);
                self.fade_end = Some(track_start.saturating_add(self.duration_bytes));
            }
            FadeMode::FadeOut => {
                self.fade_start = Some(track_start.saturating_sub(self.duration_bytes));
                self.fade_end = Some(track_start);
            }
            FadeMode::None => {}
        }
    }

    /// Linear gain (0.0..=1.0) at a given OUTPUTBUF write offset. `1.0`
    /// outside the armed window or when no fade is armed.
    pub fn gain_at(&self, offset: u64) -> f32 {
        let (Some(start), Some(end)) = (self.fade_start, self.fade_end) else {
            return 1.0;
        };
        if end <= start || offset <= start {
            return if matches!(self.mode, FadeMode::FadeIn | FadeMode::FadeInOut) {
                0.0
            } else {
                1.0
            };
        }
        if offset >= end {
            return if matches!(self.mode, FadeMode::FadeOut) {
                0.0
            } else {
                1.0
            };
        }
        let frac = (offset - start) as f32 / (end - start) as f32;
        match self.mode {
            FadeMode::FadeIn | FadeMode::CrossFade | FadeMode::FadeInOut => frac,
            FadeMode::FadeOut => 1.0 - frac,
            FadeMode::None => 1.0,
        }
    }
}

/// Shared with the output thread under OUTPUTBUF's lock.
#[derive(Debug, Default)]
pub struct OutputState {
    pub next_sample_rate: u32,
    /// Monotonic OUTPUTBUF write offset of a new track's first frame.
    /// Cleared by the output thread once consumed.
    pub track_start: Option<u64>,
    pub fade: FadeController,
}

impl OutputState {
    /// Called by a codec once it has recovered stream parameters for a
    /// freshly opened track, while holding OUTPUTBUF's lock.
    pub fn mark_track_start(&mut self, sample_rate: u32, write_offset: u64) {
        log::info!("setting track_start at offset {write_offset}");
        self.next_sample_rate = sample_rate;
        self.track_start = Some(write_offset);
        if self.fade.is_armed() {
            self.fade.check_fade(write_offset, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_phase_ordering_matches_disconnect_predicate() {
        assert!(StreamState { phase: StreamPhase::Stopped }.is_disconnected());
        assert!(StreamState { phase: StreamPhase::Disconnect }.is_disconnected());
        assert!(!StreamState { phase: StreamPhase::Recv }.is_disconnected());
        assert!(!StreamState { phase: StreamPhase::Connected }.is_disconnected());
    }

    #[test]
    fn fade_in_ramps_zero_to_one() {
        let mut fade = FadeController::new(FadeMode::FadeIn, 100);
        fade.check_fade(1000, true);
        assert_eq!(fade.gain_at(999), 0.0);
        assert_eq!(fade.gain_at(1050), 0.5);
        assert_eq!(fade.gain_at(1100), 1.0);
    }

    #[test]
    fn fade_out_ramps_one_to_zero() {
        let mut fade = FadeController::new(FadeMode::FadeOut, 100);
        fade.check_fade(1000, true);
        assert_eq!(fade.gain_at(900), 1.0);
        assert_eq!(fade.gain_at(950), 0.5);
        assert_eq!(fade.gain_at(1000), 0.0);
    }

    #[test]
    fn unarmed_fade_is_always_unity_gain() {
        let fade = FadeController::default();
        assert_eq!(fade.gain_at(12345), 1.0);
    }
}
