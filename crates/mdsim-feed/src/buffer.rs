//! Byte accumulator between the socket and the frame parser.
//!
//! Bytes are appended at the tail and consumed from a read cursor. The
//! consumed prefix is only shifted out once it reaches half of the stored
//! bytes, so a steady stream of small reads never pays an O(n) move per
//! frame while memory stays bounded.

use std::io::{self, Read};

#[derive(Debug)]
pub struct StreamBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl StreamBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), offset: 0 }
    }

    /// Bytes received but not yet consumed.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// One `read` of up to `max` bytes straight into the tail.
    ///
    /// Returns what the reader returned; `Ok(0)` means end of stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R, max: usize) -> io::Result<usize> {
        let start = self.data.len();
        self.data.resize(start + max, 0);
        let result = reader.read(&mut self.data[start..]);
        let filled = *result.as_ref().unwrap_or(&0);
        self.data.truncate(start + filled);
        result
    }

    /// Advance the read cursor by `n` bytes (clamped to what is stored).
    pub fn consume(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.data.len());
        self.compact();
    }

    fn compact(&mut self) {
        if self.offset == self.data.len() {
            self.data.clear();
            self.offset = 0;
        } else if self.offset > 0 && self.offset >= self.data.len() / 2 {
            self.data.drain(..self.offset);
            self.offset = 0;
        }
    }

    /// Bytes still stored in front of the cursor, awaiting compaction.
    #[inline]
    pub fn consumed_prefix(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_consume() {
        let mut buf = StreamBuffer::with_capacity(16);
        buf.append(b"abcdef");
        assert_eq!(buf.unread(), b"abcdef");
        buf.consume(2);
        assert_eq!(buf.unread(), b"cdef");
        assert_eq!(buf.consumed_prefix(), 2);
        buf.consume(4);
        assert!(buf.is_empty());
        assert_eq!(buf.consumed_prefix(), 0);
    }

    #[test]
    fn compacts_once_half_is_consumed() {
        let mut buf = StreamBuffer::with_capacity(16);
        buf.append(&[1; 10]);
        buf.consume(4);
        assert_eq!(buf.consumed_prefix(), 4);
        buf.consume(1);
        assert_eq!(buf.consumed_prefix(), 0);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn over_consume_is_clamped() {
        let mut buf = StreamBuffer::with_capacity(4);
        buf.append(b"xy");
        buf.consume(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_from_keeps_only_filled_bytes() {
        let mut buf = StreamBuffer::with_capacity(4);
        buf.append(b"ab");
        let mut src: &[u8] = b"cde";
        assert_eq!(buf.read_from(&mut src, 64).unwrap(), 3);
        assert_eq!(buf.unread(), b"abcde");
        assert_eq!(buf.read_from(&mut src, 64).unwrap(), 0);
        assert_eq!(buf.unread(), b"abcde");
    }
}
