//! `aio_cancel` (`spec.md` §4.6), grounded on the original's `aio_cancel`.

use std::sync::atomic::Ordering;

use crate::directory;
use crate::error::CancelResult;
use crate::futex;
use crate::handle::Aiocb;
use crate::signals::AllSignalsBlocked;
use crate::worker::{RUNNING, RUNNING_WITH_WAITER};

/// Cancels one request (`aiocbp` is `Some`) or every outstanding request on
/// `fd` (`aiocbp` is `None`).
///
/// Matches the original's three-outcome contract, though this crate's
/// algorithm - like the reference implementation's - never actually
/// produces [`CancelResult::NotCanceled`]: by the time a worker is found,
/// it either still has `running == RUNNING` (so cancellation is attempted
/// and always "succeeds" in the sense of being requested) or it is already
/// gone from the queue entirely, which reads as [`CancelResult::AllDone`].
///
/// Returns `Err(errno)` for the two failure modes `spec.md` §4.6 names:
/// `EINVAL` (step 1) when `aiocbp` names a request on a different fd than
/// `fd` itself, matching the original's `if (cb && fd != cb->aio_fildes) {
/// errno = EINVAL; return -1; }`; and `EBADF` when `fd` doesn't name an open
/// descriptor at all and so has never had a queue, matching the original's
/// `if (errno == EBADF) ret = -1;` on the no-queue path.
pub fn aio_cancel(fd: i32, aiocbp: Option<&Aiocb>) -> Result<CancelResult, i32> {
    // Step 1: a supplied handle must name the same fd as the argument.
    if let Some(cb) = aiocbp {
        if cb.fd != fd {
            return Err(libc::EINVAL);
        }
    }

    let _signals = AllSignalsBlocked::enter();

    let Some(queue) = directory::lookup(fd) else {
        // No queue for this fd: either nothing was ever submitted on it
        // (ALL_DONE) or the fd itself is bad (EBADF) - distinguish the two
        // by actually probing the descriptor, since a missing queue alone
        // can't tell them apart.
        directory::validate_fd(fd).map_err(|_| libc::EBADF)?;
        return Ok(CancelResult::AllDone);
    };

    let target_identity = aiocbp.map(|cb| cb as *const Aiocb as usize);

    let state = queue.lock();
    let targets: Vec<_> = state
        .workers
        .iter()
        .filter(|w| target_identity.map_or(true, |id| w.cb_identity == id))
        .cloned()
        .collect();
    drop(state);

    if targets.is_empty() {
        return Ok(CancelResult::AllDone);
    }

    let mut any_canceled = false;
    for worker in &targets {
        // CAS running: 1 -> -1, arming the "someone is waiting on me"
        // sentinel a completing worker checks in `cleanup::run`.
        let armed = worker
            .running
            .compare_exchange(RUNNING, RUNNING_WITH_WAITER, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if !armed {
            // Already finished (or another canceller got there first);
            // nothing left to interrupt.
            continue;
        }

        let tid = worker.tid.load(Ordering::SeqCst);
        if tid != 0 {
            crate::interrupt::interrupt(tid as libc::pthread_t);
        }

        let mut running = worker.running.load(Ordering::SeqCst);
        while running != crate::worker::FINISHED {
            futex::wait_u32(&worker.running, running);
            running = worker.running.load(Ordering::SeqCst);
        }

        if worker.err.load(Ordering::SeqCst) == libc::ECANCELED {
            any_canceled = true;
        }
    }

    Ok(if any_canceled { CancelResult::Canceled } else { CancelResult::AllDone })
}

/// The integration hook a file-descriptor close path calls before recycling
/// `fd`, draining any outstanding AIO requests on it first (`spec.md` §1,
/// §4.6 "Close integration"). Grounded on the original's `__aio_close`: a
/// cheap `live_queue_count` read lets a process with no AIO in flight
/// anywhere skip the directory lookup and cancel scan entirely.
pub fn aio_close(fd: i32) {
    if directory::live_queue_count() == 0 {
        return;
    }
    tracing::debug!(target: "aio::cancel", fd, "draining aio requests before close");
    let _ = aio_cancel(fd, None);
}
