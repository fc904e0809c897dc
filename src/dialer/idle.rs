//! Idle-timeout connection wrapper
//!
//! Long-lived idle upstream connections are closed after a fixed period of
//! inactivity to bound file-descriptor growth without disrupting active
//! traffic.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};
use tracing::debug;

use super::transport::ProxyConnection;

type IdleCallback = Box<dyn FnOnce() + Send>;

/// Wraps a dialed connection and closes it after a period with no read or
/// write activity
///
/// When the idle deadline fires the underlying connection is shut down
/// best-effort, the idle callback runs exactly once, and subsequent I/O
/// fails with `TimedOut`. Explicit shutdown is idempotent and suppresses
/// the idle callback.
pub struct IdleTimeoutConn {
    inner: Box<dyn ProxyConnection>,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    closed: bool,
    on_idle: Option<IdleCallback>,
}

impl IdleTimeoutConn {
    pub fn new(
        inner: Box<dyn ProxyConnection>,
        timeout: Duration,
        on_idle: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(sleep(timeout)),
            closed: false,
            on_idle: Some(Box::new(on_idle)),
        }
    }

    fn touch(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.timeout);
    }

    // Idle deadline fired: run the callback once and shut the inner
    // connection down best-effort. Close errors are logged, not propagated.
    fn close_idle(&mut self, cx: &mut Context<'_>) {
        self.closed = true;
        if let Some(on_idle) = self.on_idle.take() {
            on_idle();
        }
        if let Poll::Ready(Err(e)) = Pin::new(&mut self.inner).poll_shutdown(cx) {
            debug!("Unable to close idle connection: {}", e);
        }
    }

    fn idle_error() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "connection closed after idle timeout")
    }
}

impl AsyncRead for IdleTimeoutConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(Self::idle_error()));
        }
        if this.deadline.as_mut().poll(cx).is_ready() {
            this.close_idle(cx);
            return Poll::Ready(Err(Self::idle_error()));
        }
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.touch();
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl AsyncWrite for IdleTimeoutConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(Self::idle_error()));
        }
        if this.deadline.as_mut().poll(cx).is_ready() {
            this.close_idle(cx);
            return Poll::Ready(Err(Self::idle_error()));
        }
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.touch();
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Double close is a no-op.
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut this.inner).poll_shutdown(cx) {
            Poll::Ready(result) => {
                this.closed = true;
                // Explicit close suppresses the idle callback.
                this.on_idle = None;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
