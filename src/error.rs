//! Internal error types for the submission/directory path.
//!
//! The public `aio_*` surface never returns these directly — it flattens
//! them to the `errno`-shaped integers `spec.md` §6/§7 describe, the same
//! way [`anvil_server::error::RequestError`] wraps foreign error types and
//! gets collapsed to a wire response at the edge.

/// Failure modes of [`crate::directory::acquire`] and [`crate::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The file descriptor is invalid (negative, or `fcntl(F_GETFD)` failed).
    #[error("bad file descriptor")]
    BadFd,
    /// Directory/queue allocation or worker spawn failed.
    #[error("resource temporarily unavailable")]
    Again,
}

impl SubmitError {
    /// Maps to the POSIX `errno` value `spec.md` §7 requires at the boundary.
    pub fn errno(self) -> i32 {
        match self {
            SubmitError::BadFd => libc::EBADF,
            SubmitError::Again => libc::EAGAIN,
        }
    }
}

/// Outcome codes for [`crate::aio_cancel`] (`spec.md` §4.6, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// At least one matching request was cancelled before completion.
    Canceled = 0,
    /// A matching request existed but had already finished.
    NotCanceled = 1,
    /// No matching request was found (including "no queue for this fd").
    AllDone = 2,
}
