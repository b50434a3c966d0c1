//! A userspace POSIX asynchronous I/O core: per-descriptor work queues,
//! ordering-aware worker scheduling, cancellation, and completion
//! notification, independent of any particular async runtime's I/O driver.
//!
//! This crate schedules the *bookkeeping* (ordering, cancellation,
//! notification) on [`tokio`], but every actual `read`/`write`/`fsync` call
//! runs as a genuine blocking syscall on a dedicated OS thread via
//! [`tokio::task::spawn_blocking`] — there is no non-blocking I/O path here,
//! by design: this crate exists for callers who need real POSIX AIO
//! semantics (ordering, `aio_cancel`, signal/callback notification) rather
//! than an epoll-backed reactor.
//!
//! ```no_run
//! # async fn example() {
//! use posix_aio::{Aiocb, Notify, OpCode};
//!
//! let mut buf = vec![0u8; 4096];
//! let cb = std::sync::Arc::new(Aiocb::new(3, OpCode::Read, buf.as_mut_ptr(), buf.len(), 0, Notify::None));
//! posix_aio::aio_read(cb.clone()).await.unwrap();
//! cb.wait_until_complete();
//! assert_eq!(cb.error(), 0);
//! # }
//! ```

mod cancel;
mod cleanup;
mod config;
mod directory;
mod error;
mod fork;
mod futex;
mod handle;
mod interrupt;
mod notify;
mod queue;
mod signals;
mod worker;

pub use config::{get as config_get, install as config_install, AioConfig};
pub use error::{CancelResult, SubmitError};
pub use handle::{Aiocb, AiocbBuf, Notify, OpCode, IN_PROGRESS};

use std::sync::Arc;

/// Submits `cb` for asynchronous read (`spec.md` §4.5, operation `aio_read`).
pub async fn aio_read(cb: Arc<Aiocb>) -> Result<(), SubmitError> {
    submit(cb, OpCode::Read).await
}

/// Submits `cb` for asynchronous write (`spec.md` §4.5, operation `aio_write`).
pub async fn aio_write(cb: Arc<Aiocb>) -> Result<(), SubmitError> {
    submit(cb, OpCode::Write).await
}

/// Submits `cb` for asynchronous full sync (`spec.md` §4.5, operation
/// `aio_fsync` with `O_SYNC` semantics).
pub async fn aio_fsync(cb: Arc<Aiocb>) -> Result<(), SubmitError> {
    submit(cb, OpCode::Sync).await
}

/// Submits `cb` for asynchronous data-only sync (`spec.md` §4.5, operation
/// `aio_fsync` with `O_DSYNC` semantics).
pub async fn aio_dsync(cb: Arc<Aiocb>) -> Result<(), SubmitError> {
    submit(cb, OpCode::DSync).await
}

/// `aio_error`: current completion status of `cb` (`spec.md` §4.7).
pub fn aio_error(cb: &Aiocb) -> i32 {
    cb.error()
}

/// `aio_return`: the raw `read`/`write`/`fsync` result of `cb` (`spec.md`
/// §4.7). Only meaningful once [`aio_error`] reports other than
/// [`IN_PROGRESS`].
pub fn aio_return(cb: &Aiocb) -> i64 {
    cb.ret()
}

/// `aio_cancel`: cancels `aiocbp` specifically, or every outstanding
/// request on `fd` when `aiocbp` is `None` (`spec.md` §4.6). `Err` carries
/// the POSIX errno: `EINVAL` if `aiocbp` names a request on a different fd,
/// `EBADF` if `fd` doesn't name an open descriptor at all.
pub fn aio_cancel(fd: i32, aiocbp: Option<&Aiocb>) -> Result<CancelResult, i32> {
    cancel::aio_cancel(fd, aiocbp)
}

/// The close-path integration hook (`spec.md` §1, §4.6): drains any
/// outstanding AIO requests on `fd` before the caller recycles the
/// descriptor. A no-op when no AIO has ever been submitted anywhere in the
/// process, via the `live_queue_count` fast path the spec describes.
pub fn aio_close(fd: i32) {
    cancel::aio_close(fd)
}

/// Submission path common to all four operations (`spec.md` §4.5).
async fn submit(cb: Arc<Aiocb>, op: OpCode) -> Result<(), SubmitError> {
    fork::ensure_registered();

    cb.err_word().store(handle::IN_PROGRESS as u32, std::sync::atomic::Ordering::SeqCst);

    let fd = cb.fd;
    let queue = match directory::acquire_and(fd, true, |queue, state| {
        state.ref_count += 1;
        tracing::trace!(target: "aio::directory", fd, op = ?op, refs = state.ref_count, "request queued");
        queue.clone()
    }) {
        Ok(queue) => queue,
        Err(e) => {
            // `spec.md` §4.5 step 2: a rejected submission still stamps the
            // handle so a caller polling `aio_error`/`aio_return` sees a
            // terminal outcome instead of an eternal `IN_PROGRESS`.
            cb.ret.store(-1, std::sync::atomic::Ordering::SeqCst);
            cb.err_word().store(e.errno() as u32, std::sync::atomic::Ordering::SeqCst);
            return Err(e);
        }
    };

    worker::spawn_and_handshake(queue, cb, op).await;
    Ok(())
}
