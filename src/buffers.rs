//! Fixed-capacity payload buffers.
//!
//! Every request hands the engine one [`FixedBuf`] and receives the same
//!  buffer back through its completion callback. The buffer's *length* is the
//!  live payload (the bytes to send, or the bytes received); its *capacity*
//!  is the most the engine is allowed to write into it, so a single buffer
//!  expresses both `data` and `data_max_len` of the underlying protocol.

use std::borrow::Borrow;
use std::fmt::{Debug, Formatter};

use bytes::buf::UninitSlice;

/// A fixed-capacity, dynamically allocated buffer.
pub struct FixedBuf {
    buf: Vec<u8>,
    len: usize,
}

impl FixedBuf {
    /// Create an empty buffer with the given capacity. The capacity is
    ///  eagerly allocated and zero-initialized; buffers live for the whole
    ///  duration of a request, so lazy initialization buys nothing here.
    pub fn new(capacity: usize) -> FixedBuf {
        FixedBuf {
            buf: vec![0; capacity],
            len: 0,
        }
    }

    /// Create a buffer whose capacity and content both come from `data`,
    ///  padding with zeroes if `capacity` exceeds the data length.
    ///
    /// Panics if `data` is longer than `capacity`.
    pub fn from_slice(capacity: usize, data: &[u8]) -> FixedBuf {
        assert!(data.len() <= capacity);
        let mut result = FixedBuf::new(capacity);
        bytes::BufMut::put_slice(&mut result, data);
        result
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Make the entire underlying capacity available through `as_ref()` etc.
    ///  This is how a read target of a given length is expressed: allocate
    ///  the capacity, then maximize the length.
    pub fn maximize_len(&mut self) {
        self.len = self.capacity();
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Set the live length directly. The engine uses this to report how many
    ///  payload bytes a response actually carried.
    pub(crate) fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity());
        self.len = len;
    }
}

impl PartialEq for FixedBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref().eq(other.as_ref())
    }
}
impl Eq for FixedBuf {}

impl Debug for FixedBuf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl Borrow<[u8]> for FixedBuf {
    fn borrow(&self) -> &[u8] {
        self.as_ref()
    }
}

impl AsRef<[u8]> for FixedBuf {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl AsMut<[u8]> for FixedBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for FixedBuf {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use rstest::rstest;

    fn new_buf(capacity: usize, content: &[u8]) -> FixedBuf {
        let mut result = FixedBuf::new(capacity);
        result.put_slice(content);
        result
    }

    #[rstest]
    #[case::empty(new_buf(100, b""), 0)]
    #[case::simple(new_buf(100, b"abc"), 3)]
    #[case::full(new_buf(3, b"abc"), 3)]
    fn test_len(#[case] buf: FixedBuf, #[case] expected: usize) {
        assert_eq!(buf.len(), expected);
        assert_eq!(buf.is_empty(), expected == 0);
    }

    #[rstest]
    #[case::empty(new_buf(3, b""), b"\0\0\0")]
    #[case::data(new_buf(4, b"abc"), b"abc\0")]
    #[case::full(new_buf(5, b"abcde"), b"abcde")]
    fn test_maximize_len(#[case] mut buf: FixedBuf, #[case] expected: &[u8]) {
        buf.maximize_len();
        assert_eq!(buf.as_ref(), expected);
    }

    #[rstest]
    #[case::empty(new_buf(100, b""), 100)]
    #[case::data(new_buf(200, b"abc"), 200)]
    #[case::full(new_buf(5, b"abcde"), 5)]
    fn test_capacity(#[case] buf: FixedBuf, #[case] expected: usize) {
        assert_eq!(buf.capacity(), expected);
    }

    #[test]
    fn test_clear() {
        let mut buf = new_buf(10, b"123");
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.as_ref(), b"");
        assert_eq!(buf.capacity(), 10);
    }

    #[test]
    fn test_from_slice() {
        let buf = FixedBuf::from_slice(20, b"hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_ref(), b"hello");
        assert_eq!(buf.capacity(), 20);
    }

    #[test]
    #[should_panic]
    fn test_from_slice_over_capacity() {
        FixedBuf::from_slice(3, b"hello");
    }

    #[test]
    fn test_set_len_exposes_written_bytes() {
        let mut buf = FixedBuf::new(8);
        buf.set_len(4);
        buf.as_mut().copy_from_slice(b"abcd");
        assert_eq!(buf.as_ref(), b"abcd");
        buf.set_len(2);
        assert_eq!(buf.as_ref(), b"ab");
    }

    #[rstest]
    #[case::equal(new_buf(100, b"hi"), new_buf(200, b"hi"), true)]
    #[case::different(new_buf(100, b"hi"), new_buf(100, b"yo"), false)]
    #[case::prefix(new_buf(100, b"h"), new_buf(100, b"hi"), false)]
    fn test_eq(#[case] buf1: FixedBuf, #[case] buf2: FixedBuf, #[case] expected: bool) {
        assert_eq!(buf1.eq(&buf2), expected);
        assert_eq!(buf2.eq(&buf1), expected);
    }

    #[test]
    fn test_buf_mut() {
        let mut buf = FixedBuf::new(10);
        buf.put_slice(b"hello");
        assert_eq!(buf.remaining_mut(), 5);
        buf.put_slice(b"world");
        assert_eq!(buf.remaining_mut(), 0);
        assert_eq!(buf.as_ref(), b"helloworld");
    }
}
