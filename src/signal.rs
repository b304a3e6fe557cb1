/*
 * signal.rs
 *
 * Signal bridge: install our handler for a signal, put back whatever was
 * there before, and turn deliveries into event codes.
 *
 * Self-pipe trick. The handler runs in signal context where almost
 * nothing is allowed, so it writes the signal number as one byte into a
 * non-blocking pipe and returns. Listeners run later, on whichever
 * thread drains the pipe (the lifecycle driver's main loop, or the
 * caller of Runtime::pump). They never run in signal context.
 *
 * The pipe is process-wide because dispositions are. It's created once
 * and never closed; fds go away with the process.
 *
 * Prior dispositions are captured once, when the bridge is built, so
 * disable always returns to the pre-framework state no matter how many
 * times enable ran in between.
 */

use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BootError, Result};
use crate::event::{Event, EventCode};

type RawFd = i32;

/* Write end of the signal pipe, -1 until the first bridge is built. */
static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/* Read end, or the error text if the pipe couldn't be created. */
static SIGNAL_PIPE: OnceLock<core::result::Result<RawFd, String>> = OnceLock::new();

/* one slot per signal number; index 0 unused */
const SLOTS: usize = 32;

/* bytes drained per read() */
const DRAIN_CHUNK: usize = 64;

#[derive(Clone, Copy)]
struct SignalState {
    prior: libc::sigaction,
    enabled: bool,
}

/// Installs and restores signal dispositions, and drains delivered signals.
pub struct SignalBridge {
    read_fd: RawFd,
    states: Mutex<[Option<SignalState>; SLOTS]>,
}

impl SignalBridge {
    /// Create (or reuse) the signal pipe and capture every signal's
    /// current disposition.
    pub fn new() -> Result<Self> {
        let read_fd = signal_pipe().map_err(BootError::AllocationFailed)?;

        let mut states = [None; SLOTS];
        for event in Event::signals() {
            /* SIGKILL/SIGSTOP can be queried, just never changed */
            match query(event) {
                Ok(prior) => {
                    states[event.index()] = Some(SignalState {
                        prior,
                        enabled: false,
                    });
                }
                Err(err) => {
                    debug!(target: "sigboot", %event, %err, "could not capture disposition");
                }
            }
        }

        Ok(Self {
            read_fd,
            states: Mutex::new(states),
        })
    }

    /// Route `code` through the event registry.
    ///
    /// Enabling twice just reinstalls the handler; the captured prior
    /// disposition is left alone.
    pub fn enable(&self, code: impl EventCode) -> Result<Event> {
        let event = signal_event(code)?;
        let mut states = self.states.lock();
        let Some(state) = states[event.index()].as_mut() else {
            return Err(install_failed(event, "prior disposition unknown".to_string()));
        };

        // SAFETY: sigaction struct is zeroed then properly initialized.
        // on_signal is an extern "C" fn with the sa_handler signature.
        // sigemptyset and sigaction are standard POSIX calls with valid args.
        #[allow(clippy::multiple_unsafe_ops_per_block)]
        let rc = unsafe {
            let mut sa: libc::sigaction = core::mem::zeroed();
            sa.sa_sigaction = on_signal as *const () as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&raw mut sa.sa_mask);
            libc::sigaction(event.as_raw(), &raw const sa, core::ptr::null_mut())
        };
        if rc < 0 {
            return Err(install_failed(event, io::Error::last_os_error().to_string()));
        }

        state.enabled = true;
        debug!(target: "sigboot", %event, "signal enabled");
        Ok(event)
    }

    /// Put back the disposition captured when the bridge was built.
    pub fn disable(&self, code: impl EventCode) -> Result<Event> {
        let event = signal_event(code)?;
        let mut states = self.states.lock();
        let Some(state) = states[event.index()].as_mut() else {
            return Err(install_failed(event, "prior disposition unknown".to_string()));
        };

        restore(event, &state.prior)?;
        state.enabled = false;
        debug!(target: "sigboot", %event, "signal disabled");
        Ok(event)
    }

    /// True while our handler is installed for `event`.
    #[must_use]
    pub fn is_enabled(&self, event: Event) -> bool {
        event.is_signal()
            && self.states.lock()[event.index()].is_some_and(|state| state.enabled)
    }

    /// Handler address the OS currently has for `code` (SIG_DFL is 0).
    pub fn current_handler(&self, code: impl EventCode) -> Result<usize> {
        let event = signal_event(code)?;
        query(event)
            .map(|sa| sa.sa_sigaction)
            .map_err(|err| install_failed(event, err.to_string()))
    }

    /// Handler address captured before the framework touched `code`.
    pub fn prior_handler(&self, code: impl EventCode) -> Result<usize> {
        let event = signal_event(code)?;
        self.states.lock()[event.index()]
            .map(|state| state.prior.sa_sigaction)
            .ok_or_else(|| install_failed(event, "prior disposition unknown".to_string()))
    }

    /// Take every signal delivered so far, in delivery order. Never blocks.
    #[must_use]
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let mut buf = [0u8; DRAIN_CHUNK];
        loop {
            // SAFETY: buf is a valid DRAIN_CHUNK-byte buffer, read_fd is the
            // non-blocking read end of our pipe. -1/EAGAIN means empty.
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            let Ok(n) = usize::try_from(n) else {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break;
            };
            if n == 0 {
                break;
            }
            events.extend(buf[..n].iter().filter_map(|&b| Event::new(u32::from(b))));
            if n < buf.len() {
                break;
            }
        }
        events
    }

    /// Block until a signal arrives or `timeout` passes, then drain.
    ///
    /// Also returns early, possibly empty, when the wait is interrupted.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> Vec<Event> {
        let mut pfd = libc::pollfd {
            fd: self.read_fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        // SAFETY: pfd is a valid pollfd, nfds is 1. EINTR is handled by
        // draining whatever is there.
        let _ = unsafe { libc::poll(&raw mut pfd, 1, ms) };
        self.drain()
    }
}

impl Drop for SignalBridge {
    /* leave the process the way we found it */
    fn drop(&mut self) {
        let states = self.states.get_mut();
        for event in Event::signals() {
            if let Some(state) = states[event.index()].as_mut()
                && state.enabled
            {
                let _ = restore(event, &state.prior);
                state.enabled = false;
            }
        }
    }
}

/* Minimal signal handler - write the signal number to the pipe */
extern "C" fn on_signal(sig: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    // Saved and restored so the interrupted code never sees our write's errno.
    let saved = unsafe { *libc::__errno_location() };
    // SAFETY: fd is the non-blocking write end set before any handler was
    // installed. write() of one byte is async-signal-safe per POSIX; a full
    // pipe drops the byte, nothing else we could do here.
    unsafe {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let byte: u8 = sig as u8;
        let _ = libc::write(fd, (&raw const byte).cast(), 1);
    }
    // SAFETY: same pointer as above.
    unsafe {
        *libc::__errno_location() = saved;
    }
}

/* create the pipe on first use, reuse it afterwards */
fn signal_pipe() -> core::result::Result<RawFd, String> {
    SIGNAL_PIPE
        .get_or_init(|| {
            let mut fds = [0i32; 2];
            // SAFETY: fds is a valid 2-element array, pipe2() writes exactly 2 fds.
            // O_NONBLOCK is required - the signal handler must never block.
            if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } != 0
            {
                return Err(format!(
                    "signal pipe: {}",
                    io::Error::last_os_error()
                ));
            }
            /* publish the write end before any handler can be installed */
            SIGNAL_WRITE_FD.store(fds[1], Ordering::SeqCst);
            Ok(fds[0])
        })
        .clone()
}

/* signal-range check; anything else, including >= N, is NotASignal */
fn signal_event(code: impl EventCode) -> Result<Event> {
    let raw = code.raw_code();
    match Event::new(raw) {
        Some(event) if event.is_signal() => Ok(event),
        _ => Err(BootError::NotASignal(raw)),
    }
}

fn install_failed(signal: Event, reason: String) -> BootError {
    BootError::DispositionInstallFailed { signal, reason }
}

fn query(event: Event) -> io::Result<libc::sigaction> {
    // SAFETY: a zeroed sigaction is a valid out-parameter.
    let mut current: libc::sigaction = unsafe { core::mem::zeroed() };
    // SAFETY: act is null so nothing is changed, current is a valid out-pointer.
    let rc = unsafe { libc::sigaction(event.as_raw(), core::ptr::null(), &raw mut current) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(current)
}

fn restore(event: Event, prior: &libc::sigaction) -> Result<()> {
    // SAFETY: prior was filled in by sigaction() itself, so it's a valid action.
    let rc = unsafe { libc::sigaction(event.as_raw(), prior, core::ptr::null_mut()) };
    if rc < 0 {
        return Err(install_failed(event, io::Error::last_os_error().to_string()));
    }
    Ok(())
}
