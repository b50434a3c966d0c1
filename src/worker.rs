//! Worker lifecycle: one task per in-flight request (`spec.md` §4.3).

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::cleanup;
use crate::handle::{Aiocb, OpCode};
use crate::interrupt;
use crate::queue::Queue;
use crate::signals;

/// Sentinel values for [`WorkerState::running`] (`spec.md` §4.4, §4.6).
/// Kept as `u32` (rather than the more natural `i32`) because the
/// `atomic-wait` crate's futex wrapper only accepts `AtomicU32`;
/// `RUNNING_WITH_WAITER` is `-1i32`'s bit pattern reinterpreted as `u32`.
pub(crate) const RUNNING: u32 = 1;
pub(crate) const RUNNING_WITH_WAITER: u32 = u32::MAX;
pub(crate) const FINISHED: u32 = 0;

/// Per-request worker bookkeeping, visible to cancellers and sibling
/// workers via [`crate::queue::QueueState::workers`]. `spec.md` §3 notes
/// only the linked-list pointers, `op`, `running`, and `err` are touched by
/// other tasks; this struct has no list pointers (see `queue.rs`) and no
/// lock, matching that observation.
pub struct WorkerState {
    pub op: OpCode,
    pub(crate) running: AtomicU32,
    /// Tentative `ECANCELED` until the worker records the real outcome in
    /// step 9 of its lifecycle; read by `aio_cancel` only after observing
    /// `running == FINISHED`, so a relaxed load suffices. Not one of the
    /// three futex-wrapped words (nothing parks on it directly), so it
    /// stays a plain `AtomicI32` holding the real errno value.
    pub(crate) err: AtomicI32,
    /// Native thread id of the blocking-pool thread running this worker,
    /// published once the I/O call is about to start; 0 beforehand/after.
    pub(crate) tid: AtomicU64,
    /// Identity of the [`Aiocb`] this worker is executing, as a raw address
    /// for pointer-equality comparison only (never dereferenced from here).
    /// Lets `aio_cancel(fd, Some(aiocbp))` pick out one worker among a
    /// queue's siblings, the way the original compares `struct aiocb *`
    /// directly.
    pub(crate) cb_identity: usize,
}

impl WorkerState {
    fn new(op: OpCode, cb: &Aiocb) -> Arc<Self> {
        Arc::new(Self {
            op,
            running: AtomicU32::new(RUNNING),
            err: AtomicI32::new(libc::ECANCELED),
            tid: AtomicU64::new(0),
            cb_identity: cb as *const Aiocb as usize,
        })
    }
}

/// Spawns the worker task for one request and blocks the calling task until
/// the worker has linked itself into the queue (`spec.md` §4.5 step 8).
pub(crate) async fn spawn_and_handshake(queue: Arc<Queue>, cb: Arc<Aiocb>, op: OpCode) {
    let handshake = Arc::new(tokio::sync::Semaphore::new(0));
    let handshake_worker = handshake.clone();

    tokio::task::spawn_blocking(move || run(queue, cb, op, handshake_worker));

    // Retried automatically: Semaphore::acquire only returns Err if the
    // semaphore is closed, which this crate never does.
    let _ = handshake.acquire().await;
}

/// The worker task body (`spec.md` §4.3 steps 1-10). Runs on a blocking
/// thread pool thread so the blocking I/O call genuinely blocks only that
/// thread, matching the thread-per-request model the spec assumes.
fn run(queue: Arc<Queue>, cb: Arc<Aiocb>, op: OpCode, handshake: Arc<tokio::sync::Semaphore>) {
    signals::block_all_forever();
    interrupt::ensure_installed();

    let worker = WorkerState::new(op, &cb);

    // Step 1-3: acquire queue mutex, post handshake, link self in.
    let mut state = queue.lock();
    handshake.add_permits(1);
    state.workers.push(worker.clone());

    // Step 4: lazy fd classification.
    queue.classify_if_needed(&mut state);
    let (seekable, append) = (state.seekable, state.append);

    // Step 6: wait for ordering predecessors.
    if Queue::needs_ordering(op, append) {
        while Queue::has_write_sibling(&state, &worker) {
            state = queue.wait_for_sequencing(state);
        }
    }

    // Step 7: release queue mutex before the blocking I/O call.
    drop(state);

    // Step 5 (scoped cleanup) + step 8-9: perform I/O, recording the
    // outcome unconditionally via Drop, mirroring pthread_cleanup_push's
    // "runs on every exit path, including cancellation" guarantee.
    let _guard = CleanupOnDrop { queue: &queue, worker: &worker, cb: &cb };
    let (ret, err) = execute(&cb, op, seekable, append, &worker);
    worker.err.store(err, Ordering::SeqCst);
    cb.ret.store(ret, Ordering::SeqCst);
    worker.tid.store(0, Ordering::SeqCst);
    // _guard drops here, running cleanup::run unconditionally.
}

/// RAII stand-in for the original's `pthread_cleanup_push`/`_pop(1)` pair:
/// runs `cleanup::run` exactly once, on every exit path from `run`,
/// including the early return cancellation takes through `execute`.
struct CleanupOnDrop<'a> {
    queue: &'a Arc<Queue>,
    worker: &'a Arc<WorkerState>,
    cb: &'a Arc<Aiocb>,
}

impl Drop for CleanupOnDrop<'_> {
    fn drop(&mut self) {
        cleanup::run(self.queue, self.worker, self.cb);
    }
}

/// Step 8-9: dispatch the blocking I/O call and record `(ret, err)`,
/// retrying past stray `EINTR`s that don't correspond to our own
/// cancellation signal (`spec.md` §4.3, §4.9).
fn execute(cb: &Aiocb, op: OpCode, seekable: bool, append: bool, worker: &WorkerState) -> (i64, i32) {
    worker.tid.store(unsafe { libc::pthread_self() } as u64, Ordering::SeqCst);

    loop {
        // A canceller may have armed `running` in the gap between the
        // handshake and here, or between two loop iterations, before the
        // syscall below was actually in progress to catch the interrupt
        // signal - check the sentinel ourselves rather than relying solely
        // on `EINTR` to close that window (`spec.md` §4.9).
        if worker.running.load(Ordering::SeqCst) == RUNNING_WITH_WAITER {
            return (-1, libc::ECANCELED);
        }

        let rc = match op {
            OpCode::Read => unsafe {
                if !seekable {
                    libc::read(cb.fd, cb.buf.0 as *mut libc::c_void, cb.nbytes)
                } else {
                    libc::pread(cb.fd, cb.buf.0 as *mut libc::c_void, cb.nbytes, cb.offset as libc::off_t)
                }
            },
            OpCode::Write => unsafe {
                if append {
                    libc::write(cb.fd, cb.buf.0 as *const libc::c_void, cb.nbytes)
                } else {
                    libc::pwrite(cb.fd, cb.buf.0 as *const libc::c_void, cb.nbytes, cb.offset as libc::off_t)
                }
            },
            OpCode::Sync => unsafe { libc::fsync(cb.fd) as isize },
            OpCode::DSync => unsafe { libc::fdatasync(cb.fd) as isize },
        };

        if rc >= 0 {
            return (rc as i64, 0);
        }

        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
        if errno == libc::EINTR {
            if worker.running.load(Ordering::SeqCst) == RUNNING_WITH_WAITER {
                // A canceller armed us; honor the tentative ECANCELED/-1
                // already staged rather than retrying.
                return (-1, libc::ECANCELED);
            }
            continue; // stray signal, not ours: retry the syscall.
        }
        return (-1, errno);
    }
}
