//! The caller-owned request handle (`spec.md` §3, "Request Handle").

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::futex;

/// Distinguished `err` value held from submission until completion.
/// Identical to `EINPROGRESS`, per the GLOSSARY.
pub const IN_PROGRESS: i32 = libc::EINPROGRESS;

/// One of the three operations a worker can run for a request
/// (`spec.md` §3: "for syncs, the submit path passes the sync flavour
/// directly and the opcode is not consulted").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Read,
    Write,
    /// `fsync(2)`-equivalent full sync.
    Sync,
    /// `fdatasync(2)`-equivalent data-only sync.
    DSync,
}

impl OpCode {
    pub(crate) fn is_write_like(self) -> bool {
        matches!(self, OpCode::Write)
    }
}

/// Completion notification descriptor (`spec.md` §6).
#[derive(Clone)]
pub enum Notify {
    /// No notification; the caller polls `aio_error`/`aio_return`.
    None,
    /// Enqueue a realtime signal on completion.
    Signal { signo: i32, value: i32 },
    /// Invoke a callback on the worker task on completion.
    Callback {
        func: std::sync::Arc<dyn Fn(i64) + Send + Sync>,
        value: i64,
    },
}

impl std::fmt::Debug for Notify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notify::None => write!(f, "Notify::None"),
            Notify::Signal { signo, value } => f
                .debug_struct("Notify::Signal")
                .field("signo", signo)
                .field("value", value)
                .finish(),
            Notify::Callback { value, .. } => {
                f.debug_struct("Notify::Callback").field("value", value).finish()
            }
        }
    }
}

/// A caller-owned AIO request. Mirrors `struct aiocb`: the submitter fills
/// in `fd`/`op`/`buf`/`nbytes`/`offset`/`notify` and owns the buffer for the
/// request's lifetime; the core writes `ret`/`err` exactly once and never
/// touches anything else.
pub struct Aiocb {
    pub fd: i32,
    pub op: OpCode,
    pub buf: AiocbBuf,
    pub nbytes: usize,
    pub offset: i64,
    pub notify: Notify,

    /// Result slot, written once by the worker before completion is
    /// observed (`spec.md` §3).
    pub(crate) ret: AtomicI64,
    /// Error slot; `IN_PROGRESS` until the worker writes the final value.
    /// Stored as `u32` (the errno/`IN_PROGRESS` value's bit pattern) rather
    /// than the more natural `i32`, since this word is parked on directly by
    /// [`Aiocb::wait_until_complete`] and the `atomic-wait` futex wrapper
    /// only accepts `AtomicU32`.
    pub(crate) err: AtomicU32,
}

/// The buffer a read fills or a write drains. Kept as a raw pointer + len
/// rather than a borrowed slice because the buffer must outlive the async
/// worker task while the `Aiocb` itself is `Send`-shared with it; callers
/// are responsible for the buffer staying valid and unaliased for the
/// request's lifetime, exactly as the POSIX contract requires of
/// `aio_buf`.
pub struct AiocbBuf(pub *mut u8);

// Safety: the caller guarantees exclusive access to the buffer for the
// request's lifetime (POSIX's own contract for `aio_buf`); the core never
// reads/writes it concurrently from more than one worker.
unsafe impl Send for AiocbBuf {}
unsafe impl Sync for AiocbBuf {}

impl Aiocb {
    /// Builds a new request handle. `err` starts at `IN_PROGRESS` lazily,
    /// set by [`crate::submit`] right before the worker spawns, matching
    /// the C source's `cb->__err = EINPROGRESS` placement.
    pub fn new(fd: i32, op: OpCode, buf: *mut u8, nbytes: usize, offset: i64, notify: Notify) -> Self {
        Self {
            fd,
            op,
            buf: AiocbBuf(buf),
            nbytes,
            offset,
            notify,
            ret: AtomicI64::new(-1),
            err: AtomicU32::new(IN_PROGRESS as u32),
        }
    }

    /// `aio_error`: low 31 bits of `err`, after a read barrier
    /// (`spec.md` §4.7). The high bit is reserved for an external
    /// list-notification layer and is not interpreted here.
    pub fn error(&self) -> i32 {
        std::sync::atomic::fence(Ordering::Acquire);
        (self.err.load(Ordering::Relaxed) & 0x7fff_ffff) as i32
    }

    /// `aio_return`: the raw result, verbatim. Callers must not call this
    /// before `aio_error` reports completion (`spec.md` §4.7).
    pub fn ret(&self) -> i64 {
        self.ret.load(Ordering::Relaxed)
    }

    pub(crate) fn err_word(&self) -> &AtomicU32 {
        &self.err
    }

    /// Blocks the calling thread until `error()` is no longer `IN_PROGRESS`.
    /// Not part of the public `aio_*` surface (`spec.md` scopes
    /// `aio_suspend` out as an external collaborator) but is the primitive
    /// such a waiter would be built from.
    pub fn wait_until_complete(&self) {
        loop {
            let cur = self.err.load(Ordering::Acquire);
            if cur != IN_PROGRESS as u32 {
                return;
            }
            futex::wait_u32(&self.err, cur);
        }
    }
}
