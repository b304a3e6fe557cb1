/*
 * timer.rs
 *
 * Two kinds of timer, picked at creation and fixed for life:
 *
 * Signal delivery: a POSIX timer (timer_create, CLOCK_BOOTTIME so it keeps
 * counting through suspend) that raises a signal when it fires. Enable
 * the signal on the bridge or the default disposition applies.
 *
 * Thread delivery: a task on a small tokio pool, built the first time
 * somebody asks for one. Each arm gets a fresh CancellationToken;
 * disarm/destroy cancel it. Every firing goes through spawn_blocking, so
 * callbacks land on whatever pool thread is free, not the same one every
 * time, and run concurrently with the main thread, other timers, and
 * their own earlier firings. Nothing here serializes them.
 *
 * Cancellation is best-effort: a callback already running finishes.
 *
 * Ids are never reused, so a destroyed id stays dead. Arming it fails.
 */

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BootError, Result};
use crate::event::{Event, EventCode};

/// Callback run on every firing of a thread-delivery timer.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/* worker threads for thread-delivery timers */
const POOL_THREADS: usize = 2;

/// Opaque handle for one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/* timer_t is a raw pointer; the kernel object behind it isn't thread-bound */
struct OsTimer(libc::timer_t);

// SAFETY: a POSIX timer id may be used from any thread of the process.
// Access is serialized through the Timers mutex anyway.
unsafe impl Send for OsTimer {}

enum Delivery {
    Signal {
        event: Event,
        timer: OsTimer,
    },
    Thread {
        callback: TimerCallback,
        armed: Option<CancellationToken>,
    },
}

/// Every live timer of one runtime.
pub struct Timers {
    entries: Mutex<HashMap<TimerId, Delivery>>,
    next_id: AtomicU64,
    pool: Mutex<Option<tokio::runtime::Runtime>>,
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pool: Mutex::new(None),
        }
    }

    fn allocate_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a timer that raises `code` (a signal) when it fires.
    pub fn create_signal_timer(&self, code: impl EventCode) -> Result<TimerId> {
        let raw = code.raw_code();
        let event = Event::new(raw)
            .filter(|event| event.is_signal())
            .ok_or_else(|| BootError::TimerCreateFailed(BootError::NotASignal(raw).to_string()))?;

        // SAFETY: a zeroed sigevent is valid; we set notify and signo below.
        let mut sev: libc::sigevent = unsafe { core::mem::zeroed() };
        sev.sigev_notify = libc::SIGEV_SIGNAL;
        sev.sigev_signo = event.as_raw();

        let mut timer: libc::timer_t = core::ptr::null_mut();
        // SAFETY: sev and timer are valid pointers for the duration of the
        // call; CLOCK_BOOTTIME is supported for timers on Linux >= 3.15.
        let rc = unsafe { libc::timer_create(libc::CLOCK_BOOTTIME, &raw mut sev, &raw mut timer) };
        if rc < 0 {
            return Err(BootError::TimerCreateFailed(
                io::Error::last_os_error().to_string(),
            ));
        }

        let id = self.allocate_id();
        debug!(target: "sigboot", id = id.0, %event, "created signal timer");
        self.entries.lock().insert(
            id,
            Delivery::Signal {
                event,
                timer: OsTimer(timer),
            },
        );
        Ok(id)
    }

    /// Create a timer that runs `callback` on a pool thread when it fires.
    pub fn create_thread_timer<F>(&self, callback: F) -> Result<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_pool()?;
        let id = self.allocate_id();
        debug!(target: "sigboot", id = id.0, "created thread timer");
        self.entries.lock().insert(
            id,
            Delivery::Thread {
                callback: Arc::new(callback),
                armed: None,
            },
        );
        Ok(id)
    }

    /* build the worker pool on first use */
    fn ensure_pool(&self) -> Result<tokio::runtime::Handle> {
        let mut pool = self.pool.lock();
        if let Some(rt) = pool.as_ref() {
            return Ok(rt.handle().clone());
        }
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(POOL_THREADS)
            .thread_name("sigboot-timer")
            .enable_time()
            .build()
            .map_err(|err| BootError::TimerCreateFailed(err.to_string()))?;
        let handle = rt.handle().clone();
        *pool = Some(rt);
        Ok(handle)
    }

    /// Fire once after `delay`.
    pub fn arm(&self, id: TimerId, delay: Duration) -> Result<()> {
        self.schedule(id, delay, None, "start")
    }

    /// Fire after `period`, then every `period` until disarmed.
    pub fn arm_interval(&self, id: TimerId, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(BootError::TimerOperationFailed {
                op: "interval",
                reason: "period must be non-zero".to_string(),
            });
        }
        self.schedule(id, period, Some(period), "interval")
    }

    /// Cancel pending firings; the timer stays usable.
    pub fn disarm(&self, id: TimerId) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&id) {
            Some(Delivery::Signal { timer, .. }) => settime(timer, Duration::ZERO, None, "stop"),
            Some(Delivery::Thread { armed, .. }) => {
                if let Some(token) = armed.take() {
                    token.cancel();
                }
                Ok(())
            }
            None => Err(dead_timer(id, "stop")),
        }?;
        debug!(target: "sigboot", id = id.0, "timer stopped");
        Ok(())
    }

    /// Release the timer. The id is invalid afterwards.
    pub fn destroy(&self, id: TimerId) -> Result<()> {
        let entry = self
            .entries
            .lock()
            .remove(&id)
            .ok_or_else(|| dead_timer(id, "delete"))?;
        release(entry)?;
        debug!(target: "sigboot", id = id.0, "timer deleted");
        Ok(())
    }

    /// Number of live (not destroyed) timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schedule(
        &self,
        id: TimerId,
        delay: Duration,
        period: Option<Duration>,
        op: &'static str,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(&id) {
            Some(Delivery::Signal { timer, event }) => {
                debug!(target: "sigboot", id = id.0, %event, ?delay, ?period, "arming signal timer");
                /* a zero delay would disarm; 1ns means "as soon as possible" */
                settime(timer, delay.max(Duration::from_nanos(1)), period, op)
            }
            Some(Delivery::Thread { callback, armed }) => {
                let pool = self.ensure_pool()?;
                /* re-arming replaces the previous schedule */
                if let Some(previous) = armed.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                let cancelled = token.clone();
                let callback = Arc::clone(callback);
                debug!(target: "sigboot", id = id.0, ?delay, ?period, "arming thread timer");
                pool.spawn(async move {
                    tokio::select! {
                        () = cancelled.cancelled() => {}
                        () = run_schedule(callback, delay, period) => {}
                    }
                });
                *armed = Some(token);
                Ok(())
            }
            None => Err(dead_timer(id, op)),
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            let _ = release(entry);
        }
        /* shutdown_background is safe even when dropped from a pool thread */
        if let Some(rt) = self.pool.get_mut().take() {
            rt.shutdown_background();
        }
    }
}

async fn run_schedule(callback: TimerCallback, delay: Duration, period: Option<Duration>) {
    tokio::time::sleep(delay).await;
    fire(&callback);
    let Some(period) = period else {
        return;
    };
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        fire(&callback);
    }
}

/* hand one firing to the blocking pool; panics stay in that task */
fn fire(callback: &TimerCallback) {
    let callback = Arc::clone(callback);
    drop(tokio::task::spawn_blocking(move || callback()));
}

fn dead_timer(id: TimerId, op: &'static str) -> BootError {
    BootError::TimerOperationFailed {
        op,
        reason: format!("no timer {} (never created or already deleted)", id.0),
    }
}

fn release(entry: Delivery) -> Result<()> {
    match entry {
        Delivery::Signal { timer, .. } => {
            // SAFETY: timer came from timer_create and was removed from the
            // table, so this is its only delete.
            if unsafe { libc::timer_delete(timer.0) } < 0 {
                return Err(BootError::TimerOperationFailed {
                    op: "delete",
                    reason: io::Error::last_os_error().to_string(),
                });
            }
            Ok(())
        }
        Delivery::Thread { armed, .. } => {
            if let Some(token) = armed {
                token.cancel();
            }
            Ok(())
        }
    }
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        #[allow(clippy::cast_possible_wrap)]
        tv_sec: d.as_secs() as libc::time_t,
        #[allow(clippy::cast_lossless)]
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/* it_value of zero disarms, anything else arms */
fn settime(
    timer: &OsTimer,
    value: Duration,
    period: Option<Duration>,
    op: &'static str,
) -> Result<()> {
    let spec = libc::itimerspec {
        it_interval: to_timespec(period.unwrap_or(Duration::ZERO)),
        it_value: to_timespec(value),
    };
    // SAFETY: timer is a live id from timer_create, spec is a valid itimerspec,
    // the old-value pointer may be null.
    let rc = unsafe { libc::timer_settime(timer.0, 0, &raw const spec, core::ptr::null_mut()) };
    if rc < 0 {
        return Err(BootError::TimerOperationFailed {
            op,
            reason: io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    fn counting_timer(timers: &Timers) -> (TimerId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = timers
            .create_thread_timer(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (id, count)
    }

    #[test]
    fn test_one_shot_fires_once() {
        let timers = Timers::new();
        let (id, count) = counting_timer(&timers);
        timers.arm(id, Duration::from_millis(20)).unwrap();
        sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interval_repeats_until_disarmed() {
        let timers = Timers::new();
        let (id, count) = counting_timer(&timers);
        timers.arm_interval(id, Duration::from_millis(20)).unwrap();
        sleep(Duration::from_millis(250));
        timers.disarm(id).unwrap();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several firings, got {fired}");

        /* allow an in-flight callback to land, then it must stay quiet */
        sleep(Duration::from_millis(50));
        let settled = count.load(Ordering::SeqCst);
        sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_disarm_before_fire() {
        let timers = Timers::new();
        let (id, count) = counting_timer(&timers);
        timers.arm(id, Duration::from_millis(100)).unwrap();
        timers.disarm(id).unwrap();
        sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rearm_replaces_schedule() {
        let timers = Timers::new();
        let (id, count) = counting_timer(&timers);
        timers.arm(id, Duration::from_millis(150)).unwrap();
        timers.arm(id, Duration::from_millis(10)).unwrap();
        sleep(Duration::from_millis(400));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_use_after_destroy_fails() {
        let timers = Timers::new();
        let (id, _) = counting_timer(&timers);
        timers.destroy(id).unwrap();
        assert!(matches!(
            timers.arm(id, Duration::from_millis(10)),
            Err(BootError::TimerOperationFailed { op: "start", .. })
        ));
        assert!(timers.disarm(id).is_err());
        assert!(timers.destroy(id).is_err());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_zero_period_rejected() {
        let timers = Timers::new();
        let (id, _) = counting_timer(&timers);
        assert!(timers.arm_interval(id, Duration::ZERO).is_err());
    }

    #[test]
    fn test_signal_timer_requires_signal() {
        let timers = Timers::new();
        assert_eq!(
            timers.create_signal_timer(Event::SHUTDOWN),
            Err(BootError::TimerCreateFailed("not a signal: 0".to_string()))
        );
        assert_eq!(
            timers.create_signal_timer(77u32),
            Err(BootError::TimerCreateFailed("not a signal: 77".to_string()))
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn test_signal_timer_lifecycle_without_firing() {
        /* created and destroyed without arming, so no signal is ever raised */
        let timers = Timers::new();
        let id = timers.create_signal_timer(Event::SIGUSR2).unwrap();
        timers.disarm(id).unwrap();
        timers.destroy(id).unwrap();
        assert!(timers.arm(id, Duration::from_millis(1)).is_err());
    }
}
