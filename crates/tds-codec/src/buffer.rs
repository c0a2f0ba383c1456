//! Deadline-polled read buffer.
//!
//! [`StreamBuffer`] owns one contiguous byte vector with a read cursor
//! (`tail`) and a write cursor (`head`). Callers ask for a window of at
//! least `n` bytes with [`StreamBuffer::next`] and then declare how much
//! they consumed with [`StreamBuffer::used`]. When the requested window
//! would run past the end of the vector, the live bytes are slid back to
//! offset zero first.
//!
//! Each transport read is bounded by [`POLL_INTERVAL`]. An elapsed poll is
//! not an error: the buffer re-checks its [`Interrupt`] and reads again, so
//! a cancelled or expired query never blocks on a silent socket.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CodecError;

/// Upper bound for a single transport read before interrupts are re-checked.
pub const POLL_INTERVAL: Duration = Duration::from_millis(120);

/// Cancellation sources observed while waiting for data.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// An interrupt that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fire when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fire once `deadline` has passed.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fire `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Whether any source is configured.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.cancel.is_some() || self.deadline.is_some()
    }

    /// Fail if the token was cancelled or the deadline passed.
    pub fn check(&self) -> Result<(), CodecError> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(CodecError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(CodecError::Timeout);
        }
        Ok(())
    }
}

/// Single-allocation read buffer over an async transport.
#[derive(Debug)]
pub struct StreamBuffer<R> {
    inner: R,
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    interrupt: Interrupt,
}

impl<R> StreamBuffer<R> {
    /// Wrap `inner` with a buffer of `capacity` bytes.
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0; capacity],
            head: 0,
            tail: 0,
            interrupt: Interrupt::none(),
        }
    }

    /// Buffer capacity; the largest window [`next`](Self::next) can return.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes read from the transport but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.tail..self.head]
    }

    /// Replace the interrupt observed by future reads.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
    }

    /// Remove any interrupt.
    pub fn clear_interrupt(&mut self) {
        self.interrupt = Interrupt::none();
    }

    /// Current interrupt.
    #[must_use]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Mark `k` bytes of the last window as consumed.
    pub fn used(&mut self, k: usize) -> Result<(), CodecError> {
        let available = self.head - self.tail;
        if k > available {
            return Err(CodecError::Overconsumed { used: k, available });
        }
        self.tail += k;
        if self.tail == self.head {
            self.tail = 0;
            self.head = 0;
        }
        Ok(())
    }

    /// Consume the buffer and return the transport. Unconsumed bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn slide(&mut self) {
        if self.tail > 0 {
            self.buf.copy_within(self.tail..self.head, 0);
            self.head -= self.tail;
            self.tail = 0;
        }
    }
}

impl<R: AsyncRead + Unpin> StreamBuffer<R> {
    /// Return a window of at least `n` buffered bytes, reading as needed.
    pub async fn next(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if n > self.buf.len() {
            return Err(CodecError::RequestTooLarge {
                requested: n,
                capacity: self.buf.len(),
            });
        }
        if self.tail + n > self.buf.len() {
            self.slide();
        }
        while self.head - self.tail < n {
            if self.fill().await? == 0 {
                return Err(CodecError::UnexpectedEof);
            }
        }
        Ok(&self.buf[self.tail..self.head])
    }

    /// Return between one and `max` bytes, reading only when nothing is buffered.
    ///
    /// Bytes already buffered are delivered even if the transport has closed.
    pub async fn next_some(&mut self, max: usize) -> Result<&[u8], CodecError> {
        if self.head == self.tail && self.fill().await? == 0 {
            return Err(CodecError::UnexpectedEof);
        }
        let end = self.head.min(self.tail + max);
        Ok(&self.buf[self.tail..end])
    }

    /// Copy out and consume exactly `n` bytes.
    pub async fn take(&mut self, n: usize) -> Result<Bytes, CodecError> {
        let window = self.next(n).await?;
        let bytes = Bytes::copy_from_slice(&window[..n]);
        self.used(n)?;
        Ok(bytes)
    }

    /// One transport read into the free space. Returns 0 on EOF.
    async fn fill(&mut self) -> Result<usize, CodecError> {
        if self.head == self.buf.len() {
            self.slide();
        }
        loop {
            self.interrupt.check()?;
            let read = tokio::time::timeout(
                POLL_INTERVAL,
                self.inner.read(&mut self.buf[self.head..]),
            )
            .await;
            match read {
                Err(_elapsed) => continue,
                Ok(Ok(k)) => {
                    self.head += k;
                    return Ok(k);
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}
