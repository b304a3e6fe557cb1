/*
 * clock.rs
 *
 * Nanosecond clocks. All four are clock_gettime with a different id.
 *
 * relative_time is the one to measure intervals with: CLOCK_MONOTONIC
 * never jumps when someone sets the wall clock. real_time does.
 */

use std::time::Duration;

fn clock_ns(clock: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid timespec out-pointer; every clock id used here
    // is supported on Linux, so the call can't fail.
    unsafe {
        libc::clock_gettime(clock, &raw mut ts);
    }
    #[allow(clippy::cast_sign_loss)]
    let secs = ts.tv_sec as u64;
    #[allow(clippy::cast_sign_loss)]
    let nanos = ts.tv_nsec as u64;
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

/// Wall clock, nanoseconds since the epoch.
#[must_use]
pub fn real_time() -> u64 {
    clock_ns(libc::CLOCK_REALTIME)
}

/// Monotonic clock, nanoseconds since an arbitrary start.
#[must_use]
pub fn relative_time() -> u64 {
    clock_ns(libc::CLOCK_MONOTONIC)
}

/// CPU time consumed by the whole process.
#[must_use]
pub fn process_time() -> u64 {
    clock_ns(libc::CLOCK_PROCESS_CPUTIME_ID)
}

/// CPU time consumed by the calling thread.
#[must_use]
pub fn thread_time() -> u64 {
    clock_ns(libc::CLOCK_THREAD_CPUTIME_ID)
}

/// Run `f` and return how long it took on the monotonic clock.
pub fn measure<F: FnOnce()>(f: F) -> Duration {
    let start = relative_time();
    f();
    Duration::from_nanos(elapsed_ns(start, relative_time()).unwrap_or(0))
}

/*
 * now - start, None if now < start.
 *
 * None means the arguments were swapped or the clock went backwards;
 * callers decide, saturating_sub would hide it.
 */
#[inline]
#[must_use]
pub const fn elapsed_ns(start_ns: u64, now_ns: u64) -> Option<u64> {
    now_ns.checked_sub(start_ns)
}
