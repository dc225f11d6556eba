//! File resources.

use crate::backend::Backend;
use crate::buffer::{ConstBuffer, ConstBufferSpan, MutableBuffer, MutableBufferSpan};
use crate::exec::{then, Sender};
use crate::open_options::{Caching, Creation, Mode, OpenRequest};
use crate::seq::{all_of, reduce, BufferedSequence};
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;

/// A byte-stream file resource: open yields a [`FileHandle`].
pub struct File<B: Backend> {
    ctx: Arc<B::Context>,
    path: PathBuf,
    mode: Mode,
    creation: Creation,
    caching: Caching,
    dirfd: Option<RawFd>,
}

impl<B: Backend> File<B> {
    /// Creates the factory for `path`.
    pub fn new(
        ctx: &Arc<B::Context>,
        path: impl Into<PathBuf>,
        mode: Mode,
        creation: Creation,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            path: path.into(),
            mode,
            creation,
            caching: Caching::Unchanged,
            dirfd: None,
        }
    }

    /// Sets the caching request.
    #[must_use]
    pub fn caching(mut self, caching: Caching) -> Self {
        self.caching = caching;
        self
    }

    /// Resolves the path relative to `dirfd` instead of the working
    /// directory.
    #[must_use]
    pub fn dirfd(mut self, dirfd: RawFd) -> Self {
        self.dirfd = Some(dirfd);
        self
    }

    /// Opens the file.
    pub fn open(&self) -> impl Sender<Value = FileHandle<B>> {
        let request = OpenRequest::new(
            self.path.clone(),
            self.mode,
            self.creation,
            self.caching,
            self.dirfd,
        );
        then(B::open_file(&self.ctx, request), |state| FileHandle {
            state,
        })
    }
}

/// View on open file state; operations without offsets.
pub struct FileHandle<B: Backend> {
    state: B::FileState,
}

impl<B: Backend> Clone for FileHandle<B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<B: Backend> FileHandle<B> {
    /// Adopts an externally owned fd (e.g. stdin/stdout).
    ///
    /// # Errors
    ///
    /// Propagates registration failures.
    pub fn adopt(ctx: &Arc<B::Context>, fd: RawFd) -> io::Result<Self> {
        Ok(Self {
            state: B::adopt_fd(ctx, fd)?,
        })
    }

    /// The backend descriptor state.
    #[must_use]
    pub fn state(&self) -> &B::FileState {
        &self.state
    }

    /// Releases the descriptor.
    pub fn close(&self) -> B::CloseSender {
        B::close_file(&self.state)
    }

    /// One partial read into `buffer`.
    pub fn read_some(&self, buffer: MutableBuffer) -> B::ReadSomeSender {
        B::read_some(&self.state, MutableBufferSpan::single(buffer), None)
    }

    /// One partial scatter read into `buffers`.
    pub fn read_some_vectored(&self, buffers: MutableBufferSpan) -> B::ReadSomeSender {
        B::read_some(&self.state, buffers, None)
    }

    /// One partial write of `buffer`.
    pub fn write_some(&self, buffer: ConstBuffer) -> B::WriteSomeSender {
        B::write_some(&self.state, ConstBufferSpan::single(buffer), None)
    }

    /// One partial gather write of `buffers`.
    pub fn write_some_vectored(&self, buffers: ConstBufferSpan) -> B::WriteSomeSender {
        B::write_some(&self.state, buffers, None)
    }

    /// Reads until `buffers` is full or the stream reports EOF; completes
    /// with the total byte count.
    pub fn read(&self, buffers: MutableBufferSpan) -> impl Sender<Value = usize> {
        let state = self.state.clone();
        reduce(BufferedSequence::new(
            move |remaining, _offset| B::read_some(&state, remaining, None),
            buffers,
            None,
        ))
    }

    /// Writes all of `buffers`; completes with the total byte count.
    pub fn write(&self, buffers: ConstBufferSpan) -> impl Sender<Value = usize> {
        let state = self.state.clone();
        reduce(BufferedSequence::new(
            move |remaining, _offset| B::write_some(&state, remaining, None),
            buffers,
            None,
        ))
    }
}

/// A random-access file resource: open yields a [`SeekableFileHandle`].
pub struct SeekableFile<B: Backend> {
    inner: File<B>,
}

impl<B: Backend> SeekableFile<B> {
    /// Creates the factory for `path`.
    pub fn new(
        ctx: &Arc<B::Context>,
        path: impl Into<PathBuf>,
        mode: Mode,
        creation: Creation,
    ) -> Self {
        Self {
            inner: File::new(ctx, path, mode, creation),
        }
    }

    /// Sets the caching request.
    #[must_use]
    pub fn caching(mut self, caching: Caching) -> Self {
        self.inner = self.inner.caching(caching);
        self
    }

    /// Resolves the path relative to `dirfd`.
    #[must_use]
    pub fn dirfd(mut self, dirfd: RawFd) -> Self {
        self.inner = self.inner.dirfd(dirfd);
        self
    }

    /// Opens the file.
    pub fn open(&self) -> impl Sender<Value = SeekableFileHandle<B>> {
        then(self.inner.open(), |handle| SeekableFileHandle {
            inner: handle,
        })
    }
}

/// View on open file state; adds offset-bearing operations.
pub struct SeekableFileHandle<B: Backend> {
    inner: FileHandle<B>,
}

impl<B: Backend> Clone for SeekableFileHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Backend> SeekableFileHandle<B> {
    /// The backend descriptor state.
    #[must_use]
    pub fn state(&self) -> &B::FileState {
        self.inner.state()
    }

    /// Releases the descriptor.
    pub fn close(&self) -> B::CloseSender {
        self.inner.close()
    }

    /// One partial read at the file position.
    pub fn read_some(&self, buffer: MutableBuffer) -> B::ReadSomeSender {
        self.inner.read_some(buffer)
    }

    /// One partial write at the file position.
    pub fn write_some(&self, buffer: ConstBuffer) -> B::WriteSomeSender {
        self.inner.write_some(buffer)
    }

    /// One partial read at `offset`.
    pub fn read_some_at(&self, buffer: MutableBuffer, offset: u64) -> B::ReadSomeSender {
        B::read_some(
            self.state(),
            MutableBufferSpan::single(buffer),
            Some(offset),
        )
    }

    /// One partial scatter read at `offset`.
    pub fn read_some_vectored_at(
        &self,
        buffers: MutableBufferSpan,
        offset: u64,
    ) -> B::ReadSomeSender {
        B::read_some(self.state(), buffers, Some(offset))
    }

    /// One partial write at `offset`.
    pub fn write_some_at(&self, buffer: ConstBuffer, offset: u64) -> B::WriteSomeSender {
        B::write_some(self.state(), ConstBufferSpan::single(buffer), Some(offset))
    }

    /// One partial gather write at `offset`.
    pub fn write_some_vectored_at(
        &self,
        buffers: ConstBufferSpan,
        offset: u64,
    ) -> B::WriteSomeSender {
        B::write_some(self.state(), buffers, Some(offset))
    }

    /// Reads `buffers` full starting at `offset`, retrying short reads;
    /// completes with the total byte count (short only at EOF).
    pub fn read_at(&self, buffers: MutableBufferSpan, offset: u64) -> impl Sender<Value = usize> {
        let state = self.state().clone();
        reduce(BufferedSequence::new(
            move |remaining, offset| B::read_some(&state, remaining, offset),
            buffers,
            Some(offset),
        ))
    }

    /// Writes all of `buffers` starting at `offset`; completes with the
    /// total byte count.
    pub fn write_at(&self, buffers: ConstBufferSpan, offset: u64) -> impl Sender<Value = usize> {
        let state = self.state().clone();
        reduce(BufferedSequence::new(
            move |remaining, offset| B::write_some(&state, remaining, offset),
            buffers,
            Some(offset),
        ))
    }

    /// Fan-out of independent single-offset reads: `buffers[i]` is filled
    /// from `offsets[i]`, all reads awaited together.
    pub fn read_batched(
        &self,
        buffers: Vec<MutableBuffer>,
        offsets: Vec<u64>,
    ) -> impl Sender<Value = ()> {
        let senders = buffers
            .into_iter()
            .zip(offsets)
            .map(|(buffer, offset)| {
                B::read_some(
                    self.state(),
                    MutableBufferSpan::single(buffer),
                    Some(offset),
                )
            })
            .collect();
        all_of(senders)
    }
}
