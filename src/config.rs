//! Process-wide AIO configuration (`spec.md` §4.5 step 5).
//!
//! The only tunable the original implementation has is the worker stack
//! size, derived lazily from the platform's minimum signal-handler stack
//! size. Installed once via [`std::sync::OnceLock`], the same lazy-init-once
//! shape the teacher uses for its own startup-time config structs.

use std::sync::OnceLock;

/// Minimum fallback used when `AT_MINSIGSTKSZ` can't be read from the aux
/// vector (non-Linux targets, or a libc too old to define the getauxval
/// key). Matches musl's own `MINSIGSTKSZ` floor.
const MINSIGSTKSZ_FALLBACK: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct AioConfig {
    /// Stack size given to a worker's task-creation attributes when no
    /// caller-supplied attributes are present (`spec.md` §4.5 step 5).
    pub callback_stack_size: usize,
}

impl Default for AioConfig {
    fn default() -> Self {
        Self { callback_stack_size: default_stack_size() }
    }
}

fn default_stack_size() -> usize {
    let min_sigstack = read_at_minsigstksz().unwrap_or(MINSIGSTKSZ_FALLBACK);
    std::cmp::max(MINSIGSTKSZ_FALLBACK + 2048, min_sigstack + 512)
}

#[cfg(target_os = "linux")]
fn read_at_minsigstksz() -> Option<usize> {
    // AT_MINSIGSTKSZ = 51, not yet exposed by `libc` on all targets; read it
    // directly the way `getauxval(3)` does.
    const AT_MINSIGSTKSZ: libc::c_ulong = 51;
    let val = unsafe { libc::getauxval(AT_MINSIGSTKSZ) };
    if val == 0 {
        None
    } else {
        Some(val as usize)
    }
}

#[cfg(not(target_os = "linux"))]
fn read_at_minsigstksz() -> Option<usize> {
    None
}

static CONFIG: OnceLock<AioConfig> = OnceLock::new();

/// Installs the process-wide configuration. Only the first call has any
/// effect, matching `io_thread_stack_size`'s "compute once, reuse forever"
/// semantics in the original source.
pub fn install(config: AioConfig) {
    let _ = CONFIG.set(config);
}

/// Returns the active configuration, computing the default lazily on first
/// use if [`install`] was never called.
pub fn get() -> AioConfig {
    *CONFIG.get_or_init(AioConfig::default)
}
