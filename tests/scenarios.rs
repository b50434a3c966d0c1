//! End-to-end coverage for the testable properties this crate promises.
//!
//! Each test below exercises one of the numbered properties: ordering
//! guarantees, cancellation's two permitted outcomes, sync completion, and
//! fork safety. Real files/pipes via [`tempfile`], no mocked I/O.

use std::io::{Read, Write as _};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use posix_aio::{aio_cancel, aio_close, aio_fsync, aio_read, aio_write, Aiocb, CancelResult, Notify, OpCode, IN_PROGRESS};

#[allow(unused)]
fn init_tracing() {
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn wait_for(cb: &Aiocb) {
    cb.wait_until_complete();
}

/// S1: a plain READ sees exactly the bytes on disk.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_returns_file_contents() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"ABCDE\0\0\0\0\0").unwrap();
    file.flush().unwrap();
    let fd = file.as_raw_fd();

    let mut buf = vec![0u8; 100];
    let cb = Arc::new(Aiocb::new(fd, OpCode::Read, buf.as_mut_ptr(), buf.len(), 0, Notify::None));
    aio_read(cb.clone()).await.unwrap();
    wait_for(&cb);

    assert_eq!(cb.error(), 0);
    assert_eq!(cb.ret(), 5);
    assert_eq!(&buf[..5], b"ABCDE");
}

/// S2: two append-mode WRITEs on the same fd never interleave or reorder.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn append_writes_preserve_submission_order() {
    let mut path = std::env::temp_dir();
    path.push(format!("posix-aio-s2-{}", std::process::id()));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .append(true)
        .open(&path)
        .unwrap();
    let fd = file.as_raw_fd();

    let first = Arc::new(Aiocb::new(fd, OpCode::Write, b"foo".as_ptr() as *mut u8, 3, 0, Notify::None));
    let second = Arc::new(Aiocb::new(fd, OpCode::Write, b"bar".as_ptr() as *mut u8, 3, 0, Notify::None));

    aio_write(first.clone()).await.unwrap();
    aio_write(second.clone()).await.unwrap();
    wait_for(&first);
    wait_for(&second);

    assert_eq!(first.error(), 0);
    assert_eq!(second.error(), 0);

    let mut contents = String::new();
    std::fs::File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(contents, "foobar");
}

/// S3: racing `aio_cancel` against a slow WRITE yields exactly one of the
/// two permitted outcomes, never a torn or inconsistent one.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_of_slow_write_is_canceled_or_all_done() {
    let (read_fd, write_fd) = {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    };
    // Nobody ever drains read_fd, so once the pipe buffer fills the WRITE
    // blocks - giving aio_cancel a real race to win or lose.
    let buf = vec![0u8; 1024 * 1024];
    let cb = Arc::new(Aiocb::new(write_fd, OpCode::Write, buf.as_ptr() as *mut u8, buf.len(), 0, Notify::None));

    aio_write(cb.clone()).await.unwrap();
    let result = aio_cancel(write_fd, Some(&cb)).unwrap();
    wait_for(&cb);

    match result {
        CancelResult::Canceled => {
            assert_eq!(cb.error(), libc::ECANCELED);
            assert_eq!(cb.ret(), -1);
        }
        CancelResult::AllDone => {
            assert_eq!(cb.error(), 0);
            assert_eq!(cb.ret(), buf.len() as i64);
        }
        CancelResult::NotCanceled => panic!("aio_cancel must not report NotCanceled for a live request"),
    }

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

/// S4: a DSYNC on a sink that never fails completes cleanly.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dsync_on_dev_null_completes_successfully() {
    let file = std::fs::OpenOptions::new().write(true).open("/dev/null").unwrap();
    let fd = file.as_raw_fd();

    let cb = Arc::new(Aiocb::new(fd, OpCode::DSync, std::ptr::null_mut(), 0, 0, Notify::None));
    aio_fsync(cb.clone()).await.unwrap();
    wait_for(&cb);

    assert_eq!(cb.error(), 0);
    assert_eq!(cb.ret(), 0);
}

/// S5: a signal-style notification fires exactly once, with the caller's
/// chosen value, once the request completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_notification_fires_once_with_value() {
    // A `Notify::Callback` is this crate's in-process analogue of the
    // reference implementation's `SIGEV_SIGNAL`: both run exactly once on
    // completion carrying the caller's chosen value. Asserting on a
    // callback rather than an actual delivered signal keeps this test from
    // racing the process's global signal disposition against any other
    // test in the same binary.
    static FIRED: AtomicI32 = AtomicI32::new(-1);
    static FIRE_COUNT: AtomicI32 = AtomicI32::new(0);

    let notify = Notify::Callback {
        func: Arc::new(|value| {
            FIRED.store(value as i32, Ordering::SeqCst);
            FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
        }),
        value: 42,
    };

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"hello").unwrap();
    let fd = file.as_raw_fd();

    let mut buf = vec![0u8; 5];
    let cb = Arc::new(Aiocb::new(fd, OpCode::Read, buf.as_mut_ptr(), buf.len(), 0, notify));
    aio_read(cb.clone()).await.unwrap();
    wait_for(&cb);

    assert_eq!(FIRED.load(Ordering::SeqCst), 42);
    assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
}

/// S6: after `fork()`, the child starts with an empty directory - canceling
/// anything reports ALL_DONE, and a fresh request still works.
#[test]
fn fork_resets_directory_in_child() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(b"ABCDE").unwrap();
    let fd = file.as_raw_fd();

    // SAFETY: the child immediately limits itself to async-signal-safe
    // work plus a brand-new single-threaded runtime of its own, then calls
    // `_exit` rather than unwinding back through the parent's stack.
    match unsafe { nix::unistd::fork() }.expect("fork") {
        nix::unistd::ForkResult::Child => {
            // `fd` is open and valid but has no queue (nothing was ever
            // submitted on it), so this must report ALL_DONE rather than
            // EBADF - unlike an arbitrary unopened fd, which `aio_cancel`
            // now correctly rejects per `spec.md` §4.6.
            let outcome = posix_aio::aio_cancel(fd, None);
            let ok = matches!(outcome, Ok(CancelResult::AllDone));

            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let ok = ok && rt.block_on(async {
                let mut buf = vec![0u8; 5];
                let cb = Arc::new(Aiocb::new(fd, OpCode::Read, buf.as_mut_ptr(), buf.len(), 0, Notify::None));
                if aio_read(cb.clone()).await.is_err() {
                    return false;
                }
                cb.wait_until_complete();
                cb.error() == 0 && cb.ret() == 5
            });

            std::process::exit(if ok { 0 } else { 1 });
        }
        nix::unistd::ForkResult::Parent { child } => {
            let status = nix::sys::wait::waitpid(child, None).expect("waitpid");
            assert_eq!(status, nix::sys::wait::WaitStatus::Exited(child, 0));
        }
    }
}

/// `spec.md` §4.6 step 1: a supplied handle naming a different fd than the
/// argument is rejected with EINVAL, and the request itself is left alone.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_rejects_fd_mismatch_with_einval() {
    let file = tempfile::tempfile().unwrap();
    let fd = file.as_raw_fd();
    let mut buf = vec![0u8; 5];
    let cb = Arc::new(Aiocb::new(fd, OpCode::Read, buf.as_mut_ptr(), buf.len(), 0, Notify::None));
    aio_read(cb.clone()).await.unwrap();

    let other_fd = fd + 1000;
    assert_eq!(aio_cancel(other_fd, Some(&cb)), Err(libc::EINVAL));

    wait_for(&cb);
    assert_eq!(cb.error(), 0);
}

/// `spec.md` §4.6/§8: canceling on an fd that was never opened at all is
/// EBADF, not ALL_DONE - the two must be distinguishable.
#[test]
fn cancel_on_invalid_fd_is_ebadf() {
    assert_eq!(aio_cancel(-1, None), Err(libc::EBADF));
}

/// The close-path hook drains an in-flight WRITE on a pipe before the
/// descriptor would be recycled, the same race `S3` exercises via
/// `aio_cancel` directly.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_hook_drains_outstanding_write() {
    let (read_fd, write_fd) = {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    };
    let buf = vec![0u8; 1024 * 1024];
    let cb = Arc::new(Aiocb::new(write_fd, OpCode::Write, buf.as_ptr() as *mut u8, buf.len(), 0, Notify::None));

    aio_write(cb.clone()).await.unwrap();
    aio_close(write_fd);
    wait_for(&cb);

    assert_ne!(cb.error(), IN_PROGRESS);

    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

/// With no AIO ever submitted anywhere, `aio_close` takes the
/// `live_queue_count == 0` fast path and is a pure no-op.
#[test]
fn close_hook_is_noop_with_no_queues() {
    aio_close(123_456);
}

/// `aio_error` starts at `IN_PROGRESS` and only moves forward.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_starts_in_progress() {
    let file = std::fs::OpenOptions::new().write(true).open("/dev/null").unwrap();
    let fd = file.as_raw_fd();
    let cb = Arc::new(Aiocb::new(fd, OpCode::Sync, std::ptr::null_mut(), 0, 0, Notify::None));
    assert_eq!(cb.error(), IN_PROGRESS);
    aio_fsync(cb.clone()).await.unwrap();
    wait_for(&cb);
    assert_eq!(cb.error(), 0);
}
