//! Buffer value types for scatter/gather I/O.
//!
//! A buffer is a pointer+length pair describing a byte region owned by the
//! caller. Buffers are plain values: copying one copies the view, never the
//! bytes. [`ConstBuffer`] views immutable bytes (write sources),
//! [`MutableBuffer`] views writable bytes (read targets). Spans are ordered
//! sequences of buffers for vectored I/O.
//!
//! # Lifetime contract
//!
//! Buffers carry no lifetime: they are handed to the kernel by raw pointer
//! (readv/writev iovecs, io_uring SQE addresses). The caller must keep the
//! backing storage alive and un-moved for the full lifetime of any operation
//! the buffer was submitted to. Every constructor taking a slice borrows it
//! only for the duration of the call; holding the resulting buffer past the
//! borrow is the caller's responsibility, exactly as with `libc::iovec`.

use std::fmt;

/// View of an immutable byte region.
#[derive(Clone, Copy)]
pub struct ConstBuffer {
    ptr: *const u8,
    len: usize,
}

// SAFETY: a buffer is an address and a length; sending it between threads
// does not create aliasing on its own. Dereferencing remains gated behind
// the lifetime contract in the module docs.
unsafe impl Send for ConstBuffer {}
unsafe impl Sync for ConstBuffer {}

impl ConstBuffer {
    /// Creates a buffer viewing `bytes`.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// Creates a buffer from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that outlive every use of
    /// the buffer.
    #[must_use]
    pub const unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Empty buffer.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::NonNull::<u8>::dangling().as_ptr(),
            len: 0,
        }
    }

    /// Base address of the region.
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Length of the region in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first `n` bytes (clamped to the buffer length).
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len.min(n),
        }
    }

    /// The region with the first `n` bytes removed (clamped).
    #[must_use]
    pub fn suffix(&self, n: usize) -> Self {
        let n = n.min(self.len);
        Self {
            // SAFETY: n <= len, so the offset stays inside the region (or
            // one past the end, which is allowed).
            ptr: unsafe { self.ptr.add(n) },
            len: self.len - n,
        }
    }

    /// The region as an iovec for vectored syscalls.
    #[must_use]
    pub fn as_iovec(&self) -> libc::iovec {
        libc::iovec {
            iov_base: self.ptr.cast_mut().cast(),
            iov_len: self.len,
        }
    }
}

impl From<&[u8]> for ConstBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for ConstBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// View of a mutable byte region.
#[derive(Clone, Copy)]
pub struct MutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: see `ConstBuffer`. The exclusive-access requirement is part of
// the lifetime contract: at most one in-flight operation may target a
// mutable buffer.
unsafe impl Send for MutableBuffer {}
unsafe impl Sync for MutableBuffer {}

impl MutableBuffer {
    /// Creates a buffer viewing `bytes`.
    #[must_use]
    pub fn new(bytes: &mut [u8]) -> Self {
        Self {
            ptr: bytes.as_mut_ptr(),
            len: bytes.len(),
        }
    }

    /// Creates a buffer from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` writable bytes that outlive every use of
    /// the buffer, with no other access for the duration.
    #[must_use]
    pub const unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Empty buffer.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::NonNull::<u8>::dangling().as_ptr(),
            len: 0,
        }
    }

    /// Base address of the region.
    #[must_use]
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the region in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the region is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first `n` bytes (clamped to the buffer length).
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len.min(n),
        }
    }

    /// The region with the first `n` bytes removed (clamped).
    #[must_use]
    pub fn suffix(&self, n: usize) -> Self {
        let n = n.min(self.len);
        Self {
            // SAFETY: n <= len keeps the offset within bounds.
            ptr: unsafe { self.ptr.add(n) },
            len: self.len - n,
        }
    }

    /// Read-only view of the same region.
    #[must_use]
    pub const fn as_const(&self) -> ConstBuffer {
        // SAFETY: same region, weaker access.
        unsafe { ConstBuffer::from_raw_parts(self.ptr, self.len) }
    }

    /// The region as an iovec for vectored syscalls.
    #[must_use]
    pub fn as_iovec(&self) -> libc::iovec {
        libc::iovec {
            iov_base: self.ptr.cast(),
            iov_len: self.len,
        }
    }
}

impl From<&mut [u8]> for MutableBuffer {
    fn from(bytes: &mut [u8]) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for MutableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Ordered sequence of immutable buffers (gather source).
#[derive(Clone, Debug, Default)]
pub struct ConstBufferSpan {
    buffers: Vec<ConstBuffer>,
}

impl ConstBufferSpan {
    /// Creates a span from a list of buffers.
    #[must_use]
    pub fn new(buffers: Vec<ConstBuffer>) -> Self {
        Self { buffers }
    }

    /// Span containing a single buffer.
    #[must_use]
    pub fn single(buffer: ConstBuffer) -> Self {
        Self {
            buffers: vec![buffer],
        }
    }

    /// The buffers in order.
    #[must_use]
    pub fn buffers(&self) -> &[ConstBuffer] {
        &self.buffers
    }

    /// Total byte length across all buffers.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.buffers.iter().map(ConstBuffer::len).sum()
    }

    /// Returns `true` if no bytes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(ConstBuffer::is_empty)
    }

    /// The span with the first `n` bytes removed across buffer boundaries.
    ///
    /// Leading buffers fully consumed by `n` are dropped; a partially
    /// consumed buffer is replaced by its suffix.
    #[must_use]
    pub fn advance(&self, mut n: usize) -> Self {
        let mut out = Vec::with_capacity(self.buffers.len());
        for buf in &self.buffers {
            if n >= buf.len() {
                n -= buf.len();
                continue;
            }
            out.push(buf.suffix(n));
            n = 0;
        }
        Self { buffers: out }
    }

    /// The span as a freshly collected iovec array.
    #[must_use]
    pub fn iovecs(&self) -> Vec<libc::iovec> {
        self.buffers.iter().map(ConstBuffer::as_iovec).collect()
    }
}

impl From<ConstBuffer> for ConstBufferSpan {
    fn from(buffer: ConstBuffer) -> Self {
        Self::single(buffer)
    }
}

/// Ordered sequence of mutable buffers (scatter target).
#[derive(Clone, Debug, Default)]
pub struct MutableBufferSpan {
    buffers: Vec<MutableBuffer>,
}

impl MutableBufferSpan {
    /// Creates a span from a list of buffers.
    #[must_use]
    pub fn new(buffers: Vec<MutableBuffer>) -> Self {
        Self { buffers }
    }

    /// Span containing a single buffer.
    #[must_use]
    pub fn single(buffer: MutableBuffer) -> Self {
        Self {
            buffers: vec![buffer],
        }
    }

    /// The buffers in order.
    #[must_use]
    pub fn buffers(&self) -> &[MutableBuffer] {
        &self.buffers
    }

    /// Total byte length across all buffers.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.buffers.iter().map(MutableBuffer::len).sum()
    }

    /// Returns `true` if no bytes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(MutableBuffer::is_empty)
    }

    /// The span with the first `n` bytes removed across buffer boundaries.
    #[must_use]
    pub fn advance(&self, mut n: usize) -> Self {
        let mut out = Vec::with_capacity(self.buffers.len());
        for buf in &self.buffers {
            if n >= buf.len() {
                n -= buf.len();
                continue;
            }
            out.push(buf.suffix(n));
            n = 0;
        }
        Self { buffers: out }
    }

    /// The span as a freshly collected iovec array.
    #[must_use]
    pub fn iovecs(&self) -> Vec<libc::iovec> {
        self.buffers.iter().map(MutableBuffer::as_iovec).collect()
    }
}

impl From<MutableBuffer> for MutableBufferSpan {
    fn from(buffer: MutableBuffer) -> Self {
        Self::single(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_suffix_arithmetic() {
        let mut storage = [0u8; 16];
        let buf = MutableBuffer::new(&mut storage);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.prefix(4).len(), 4);
        assert_eq!(buf.suffix(4).len(), 12);
        assert_eq!(buf.suffix(32).len(), 0);
        assert_eq!(buf.suffix(4).as_mut_ptr() as usize, buf.as_mut_ptr() as usize + 4);
    }

    #[test]
    fn span_advance_crosses_boundaries() {
        let a = [0u8; 6];
        let b = [0u8; 5];
        let span = ConstBufferSpan::new(vec![ConstBuffer::new(&a), ConstBuffer::new(&b)]);
        assert_eq!(span.total_len(), 11);

        let rest = span.advance(6);
        assert_eq!(rest.buffers().len(), 1);
        assert_eq!(rest.total_len(), 5);

        let rest = span.advance(8);
        assert_eq!(rest.total_len(), 3);
        assert_eq!(rest.buffers()[0].as_ptr() as usize, b.as_ptr() as usize + 2);

        assert!(span.advance(11).is_empty());
    }

    #[test]
    fn zero_length_span_is_empty() {
        let span = MutableBufferSpan::new(vec![MutableBuffer::empty()]);
        assert!(span.is_empty());
        assert_eq!(span.total_len(), 0);
    }

    #[test]
    fn iovec_passthrough() {
        let bytes = b"hello";
        let buf = ConstBuffer::new(bytes);
        let iov = buf.as_iovec();
        assert_eq!(iov.iov_len, 5);
        assert_eq!(iov.iov_base as usize, bytes.as_ptr() as usize);
    }
}
