//! Fixed-capacity byte ring buffer shared between exactly two threads.
//!
//! One side writes, the other reads; both hold the same mutex while they
//! inspect the contiguous span, copy bytes in or out of it, and advance
//! their index. A condvar lets the decode thread park instead of spinning
//! when the far end hasn't produced (or drained) enough to proceed.
//!
//! `RingBuffer<T>` carries a companion value of type `T` guarded by the
//! exact same mutex as the ring indices. STREAMBUF and OUTPUTBUF use this to
//! host `StreamState`/`OutputState` respectively, so "read under STREAMBUF's
//! lock" is a property of the type rather than a convention callers have to
//! remember.

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Internal ring state. `r`/`w` are physical offsets into `data`, always
/// `< data.len()`. `read_offset`/`write_offset` are monotonic counters that
/// never wrap, used to hand out stable markers (e.g. `track_start`) that
/// stay comparable across physical wraps.
struct RingState<T> {
    data: Vec<u8>,
    r: usize,
    w: usize,
    align: usize,
    read_offset: u64,
    write_offset: u64,
    side: T,
}

/// A fixed-capacity SPSC byte ring buffer with contiguous-span accessors,
/// plus a companion value `T` (default `()`) guarded by the same mutex.
///
/// `capacity` bytes of storage are allocated; at most `capacity - 1` bytes
/// are ever considered "used" at once, the spare byte disambiguating full
/// from empty without a separate flag.
pub struct RingBuffer<T = ()> {
    state: Mutex<RingState<T>>,
    space_available: Condvar,
    data_available: Condvar,
    capacity: usize,
}

impl<T: Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_side(capacity, T::default())
    }
}

impl<T> RingBuffer<T> {
    pub fn with_side(capacity: usize, side: T) -> Self {
        assert!(capacity >= 2, "ring buffer capacity must hold at least one byte");
        Self {
            state: Mutex::new(RingState {
                data: vec![0u8; capacity],
                r: 0,
                w: 0,
                align: 1,
                read_offset: 0,
                write_offset: 0,
                side,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
            capacity,
        }
    }

    /// Total storage capacity in bytes (one byte of which is never usable).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire the buffer's mutex. Per the crate's lock-order invariant,
    /// whenever both STREAMBUF and OUTPUTBUF must be held, STREAMBUF's
    /// guard must be created first and dropped last.
    pub fn lock(&self) -> RingBufferGuard<'_, T> {
        RingBufferGuard {
            state: self.state.lock(),
            space_available: &self.space_available,
            data_available: &self.data_available,
        }
    }

    /// Block until at least `min_used` bytes are available to read, or the
    /// timeout elapses. Returns the guard either way; callers re-check
    /// `used()` themselves (spurious wakeups and timeouts are both signalled
    /// the same way: "go check again").
    pub fn wait_for_data(&self, min_used: usize, timeout: Duration) -> RingBufferGuard<'_, T> {
        let mut state = self.state.lock();
        if Self::used_of(&state) < min_used {
            self.data_available.wait_for(&mut state, timeout);
        }
        RingBufferGuard {
            state,
            space_available: &self.space_available,
            data_available: &self.data_available,
        }
    }

    /// Block until at least `min_space` bytes are free to write, or the
    /// timeout elapses.
    pub fn wait_for_space(&self, min_space: usize, timeout: Duration) -> RingBufferGuard<'_, T> {
        let mut state = self.state.lock();
        if Self::space_of(&state) < min_space {
            self.space_available.wait_for(&mut state, timeout);
        }
        RingBufferGuard {
            state,
            space_available: &self.space_available,
            data_available: &self.data_available,
        }
    }

    fn used_of(state: &RingState<T>) -> usize {
        (state.w + state.data.len() - state.r) % state.data.len()
    }

    fn space_of(state: &RingState<T>) -> usize {
        state.data.len() - Self::used_of(state) - 1
    }
}

/// Held while inspecting/mutating a [`RingBuffer`]'s indices, contents, and
/// companion state.
pub struct RingBufferGuard<'a, T> {
    state: MutexGuard<'a, RingState<T>>,
    space_available: &'a Condvar,
    data_available: &'a Condvar,
}

impl<'a, T> RingBufferGuard<'a, T> {
    /// Bytes currently available to read.
    pub fn used(&self) -> usize {
        RingBuffer::<T>::used_of(&self.state)
    }

    /// Bytes currently free to write (capacity minus used minus the spare byte).
    pub fn space(&self) -> usize {
        RingBuffer::<T>::space_of(&self.state)
    }

    /// Monotonic count of bytes ever read from this buffer. Stable across wraps.
    pub fn read_offset(&self) -> u64 {
        self.state.read_offset
    }

    /// Monotonic count of bytes ever written to this buffer. Stable across wraps.
    pub fn write_offset(&self) -> u64 {
        self.state.write_offset
    }

    /// Borrow the companion state guarded by this buffer's mutex.
    pub fn side(&self) -> &T {
        &self.state.side
    }

    /// Mutably borrow the companion state guarded by this buffer's mutex.
    pub fn side_mut(&mut self) -> &mut T {
        &mut self.state.side
    }

    /// `(physical_offset, length)` of the longest run of readable bytes that
    /// doesn't cross the end of the backing storage.
    pub fn contiguous_read_span(&self) -> (usize, usize) {
        let len = self.state.data.len();
        let used = self.used();
        let till_wrap = len - self.state.r;
        (self.state.r, used.min(till_wrap))
    }

    /// `(physical_offset, length)` of the longest run of writable bytes that
    /// doesn't cross the end of the backing storage.
    pub fn contiguous_write_span(&self) -> (usize, usize) {
        let len = self.state.data.len();
        let space = self.space();
        let till_wrap = len - self.state.w;
        (self.state.w, space.min(till_wrap))
    }

    /// Borrow `len` bytes starting at a physical offset returned by
    /// [`contiguous_read_span`](Self::contiguous_read_span).
    pub fn read_slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.state.data[offset..offset + len]
    }

    /// Mutably borrow `len` bytes starting at a physical offset returned by
    /// [`contiguous_write_span`](Self::contiguous_write_span).
    pub fn write_slice(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.state.data[offset..offset + len]
    }

    /// Advance the read index by `n` bytes (must be `<= used()`) and wake any
    /// writer waiting for space. Rounded down to a multiple of the current
    /// alignment, so `r` stays a multiple of `a` per invariant 3 even when a
    /// caller hands in an unaligned count.
    pub fn advance_read(&mut self, n: usize) {
        let n = n - (n % self.state.align.max(1));
        debug_assert!(n <= self.used(), "advance_read past what's been written");
        let len = self.state.data.len();
        self.state.r = (self.state.r + n) % len;
        self.state.read_offset += n as u64;
        self.space_available.notify_one();
    }

    /// Advance the write index by `n` bytes (must be `<= space()`) and wake
    /// any reader waiting for data. Rounded down to a multiple of the
    /// current alignment, mirroring [`advance_read`](Self::advance_read).
    pub fn advance_write(&mut self, n: usize) {
        let n = n - (n % self.state.align.max(1));
        debug_assert!(n <= self.space(), "advance_write past available space");
        let len = self.state.data.len();
        self.state.w = (self.state.w + n) % len;
        self.state.write_offset += n as u64;
        self.data_available.notify_one();
    }

    /// Clamp both indices down to the nearest multiple of `a`, so the atomic
    /// unit a codec writes (one sample frame) never straddles the wrap.
    /// Called at codec open with the frame size, and reset to `1` on close.
    pub fn adjust_alignment(&mut self, a: usize) {
        assert!(a >= 1, "alignment must be at least 1");
        self.state.align = a;
        self.state.r -= self.state.r % a;
        self.state.w -= self.state.w % a;
    }

    pub fn alignment(&self) -> usize {
        self.state.align
    }

    /// Reset both indices to zero. Does not zero the backing storage or the
    /// companion state.
    pub fn reset(&mut self) {
        self.state.r = 0;
        self.state.w = 0;
        self.state.align = 1;
        self.state.read_offset = 0;
        self.state.write_offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_has_zero_used() {
        let rb: RingBuffer = RingBuffer::new(16);
        let g = rb.lock();
        assert_eq!(g.used(), 0);
        assert_eq!(g.space(), 15);
    }

    #[test]
    fn fifo_round_trip() {
        let rb: RingBuffer = RingBuffer::new(8);
        {
            let mut g = rb.lock();
            let (off, len) = g.contiguous_write_span();
            assert!(len >= 4);
            g.write_slice(off, 4).copy_from_slice(b"abcd");
            g.advance_write(4);
        }
        {
            let mut g = rb.lock();
            let (off, len) = g.contiguous_read_span();
            assert_eq!(len, 4);
            assert_eq!(g.read_slice(off, 4), b"abcd");
            g.advance_read(4);
        }
        let g = rb.lock();
        assert_eq!(g.used(), 0);
    }

    #[test]
    fn wrap_around_splits_into_two_contiguous_spans() {
        let rb: RingBuffer = RingBuffer::new(8);
        {
            let mut g = rb.lock();
            let (off, len) = g.contiguous_write_span();
            g.write_slice(off, len).copy_from_slice(&vec![1u8; len]);
            g.advance_write(len);
        }
        {
            let mut g = rb.lock();
            g.advance_read(5);
        }
        {
            let mut g = rb.lock();
            let (off, len) = g.contiguous_write_span();
            assert_eq!((off, len), (7, 1));
            g.write_slice(off, len).copy_from_slice(&vec![2u8; len]);
            g.advance_write(len);
            // the next span should now wrap to offset 0
            let (off2, len2) = g.contiguous_write_span();
            assert_eq!(off2, 0);
            assert!(len2 >= 1);
        }
    }

    #[test]
    fn alignment_clamps_indices() {
        let rb: RingBuffer = RingBuffer::new(10);
        {
            let mut g = rb.lock();
            let (off, _) = g.contiguous_write_span();
            g.write_slice(off, 7).iter_mut().for_each(|b| *b = 0xAA);
            g.advance_write(7);
        }
        {
            let mut g = rb.lock();
            g.adjust_alignment(6);
            assert_eq!(g.used() % 6, 0);
        }
    }

    #[test]
    fn monotonic_offsets_survive_wraps() {
        let rb: RingBuffer = RingBuffer::new(4);
        for _ in 0..10 {
            let mut g = rb.lock();
            let (off, len) = g.contiguous_write_span();
            if len == 0 {
                drop(g);
                let mut g2 = rb.lock();
                g2.advance_read(1);
                continue;
            }
            g.write_slice(off, 1)[0] = 7;
            g.advance_write(1);
        }
        let g = rb.lock();
        assert!(g.write_offset() >= 4);
    }

    #[test]
    fn companion_state_shares_the_same_lock() {
        #[derive(Default)]
        struct Side {
            counter: u32,
        }
        let rb: RingBuffer<Side> = RingBuffer::new(8);
        {
            let mut g = rb.lock();
            g.side_mut().counter += 1;
            g.advance_write(1);
        }
        let g = rb.lock();
        assert_eq!(g.side().counter, 1);
        assert_eq!(g.used(), 1);
    }
}
