//! A `symphonia` `MediaSource` backed by a buffer that keeps growing as more
//! STREAMBUF bytes arrive, instead of the one-shot `Cursor` snapshot a file
//! read would use. Probing and decoding both read through the same shared
//! buffer, so a `FormatReader`/`Decoder` built at probe time keeps seeing
//! new bytes appended after it as the track continues to stream in.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use symphonia::core::io::MediaSource;

struct Buf {
    data: Vec<u8>,
    pos: usize,
}

#[derive(Clone)]
pub(crate) struct GrowableSource(Arc<Mutex<Buf>>);

impl GrowableSource {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Buf { data: Vec::new(), pos: 0 })))
    }

    /// Append newly arrived bytes, visible to any in-flight `Read` on this
    /// or a cloned handle.
    pub fn extend(&self, bytes: &[u8]) {
        self.0.lock().data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.0.lock().data.len()
    }

    /// Drop bytes already consumed by the reader, shifting `pos` back to 0
    /// so the buffer doesn't grow for the entire life of a track. Safe as
    /// long as the format never seeks behind its current read position,
    /// true for straight-through streaming playback (no seek support).
    pub fn compact(&self) {
        let mut buf = self.0.lock();
        if buf.pos == 0 {
            return;
        }
        buf.data.drain(0..buf.pos);
        buf.pos = 0;
    }
}

impl Read for GrowableSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut buf = self.0.lock();
        let avail = buf.data.len() - buf.pos;
        let n = avail.min(out.len());
        out[..n].copy_from_slice(&buf.data[buf.pos..buf.pos + n]);
        buf.pos += n;
        Ok(n)
    }
}

impl Seek for GrowableSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut buf = self.0.lock();
        let len = buf.data.len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => len + p,
            SeekFrom::Current(p) => buf.pos as i64 + p,
        };
        if new_pos < 0 || new_pos as usize > buf.data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek out of bounds"));
        }
        buf.pos = new_pos as usize;
        Ok(buf.pos as u64)
    }
}

impl MediaSource for GrowableSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.0.lock().data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_what_was_extended_across_calls() {
        let source = GrowableSource::new();
        source.extend(&[1, 2, 3]);
        let mut reader = source.clone();
        let mut out = [0u8; 2];
        assert_eq!(reader.read(&mut out).unwrap(), 2);
        assert_eq!(out, [1, 2]);

        source.extend(&[4, 5]);
        let mut out = [0u8; 8];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(&out[..n], &[3, 4, 5]);
    }

    #[test]
    fn compact_shifts_position_back_to_zero() {
        let source = GrowableSource::new();
        source.extend(&[1, 2, 3, 4]);
        let mut reader = source.clone();
        let mut out = [0u8; 3];
        reader.read(&mut out).unwrap();
        source.compact();
        assert_eq!(source.len(), 1);
    }
}
