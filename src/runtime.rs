/*
 * runtime.rs
 *
 * The one context object. Owns the event registry, the signal bridge,
 * the timers and the option table, plus mode, debug flag and last error.
 *
 * Runtime is a cheap Clone over an Arc. The lifecycle driver builds one
 * and hands it to init; listeners and timer callbacks that need it
 * capture a clone.
 *
 * Error escalation: every public operation that fails goes through fail().
 * That records the message, dispatches LibraryError, and only then returns
 * the error to the caller. Until someone registers on LibraryError the
 * default handler is in place, and it prints the message and exits 3.
 */

use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{Config, Mode};
use crate::error::{BootError, Result, exit_codes};
use crate::event::{Event, EventCode};
use crate::logging::{self, LogHandle};
use crate::options::{OptionSpec, Options};
use crate::registry::{EventRegistry, ListenerId};
use crate::signal::SignalBridge;
use crate::timer::{TimerId, Timers};

/// Loop-mode step function, called with the time since the previous call.
pub type StepFn = Box<dyn FnMut(Duration) + Send + 'static>;

/// Where the process is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Starting = 0,
    Initializing = 1,
    Running = 2,
    Terminating = 3,
}

impl Phase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Initializing,
            2 => Self::Running,
            _ => Self::Terminating,
        }
    }
}

struct Inner {
    registry: EventRegistry,
    signals: SignalBridge,
    timers: Timers,
    options: Mutex<Options>,
    /* set while handlers run; the table is out of its mutex then */
    parsing: AtomicBool,
    mode: Mutex<Mode>,
    debug: AtomicBool,
    /* shared with the default LibraryError handler */
    last_error: Arc<Mutex<Option<String>>>,
    step: Mutex<Option<StepFn>>,
    phase: AtomicU8,
    log: Option<LogHandle>,
}

/* option table checked out for a parse; put back on drop, panics included */
struct Parsing<'a> {
    inner: &'a Inner,
    options: Options,
}

impl<'a> Parsing<'a> {
    fn begin(inner: &'a Inner) -> Self {
        let options = core::mem::take(&mut *inner.options.lock());
        inner.parsing.store(true, Ordering::Release);
        Self { inner, options }
    }
}

impl Drop for Parsing<'_> {
    fn drop(&mut self) {
        *self.inner.options.lock() = core::mem::take(&mut self.options);
        self.inner.parsing.store(false, Ordering::Release);
    }
}

/// Handle to the process runtime. Clones share everything.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Build the context: every slot empty, every signal's disposition
    /// captured, and the fatal default handler on LibraryError.
    ///
    /// Fails only when the signal pipe can't be created; there is no
    /// registry to escalate through yet, so the error comes straight back.
    pub fn new(config: Config) -> Result<Self> {
        let log = logging::init(config.debug);
        let registry = EventRegistry::new();
        let signals = SignalBridge::new()?;

        let last_error = Arc::new(Mutex::new(None::<String>));
        let fatal = Arc::clone(&last_error);
        registry.set_default(Event::LIB_ERROR, move |_| {
            let message = fatal.lock().clone().unwrap_or_default();
            eprintln!("\n[sigboot] Error: {message}");
            eprintln!("[sigboot] No error handler given.");
            eprintln!("[sigboot] Shutting down.");
            std::process::exit(i32::from(exit_codes::LIB_ERROR));
        })?;
        debug!(target: "sigboot", "default error handler installed");

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                signals,
                timers: Timers::new(),
                options: Mutex::new(Options::new()),
                parsing: AtomicBool::new(false),
                mode: Mutex::new(config.mode),
                debug: AtomicBool::new(config.debug),
                last_error,
                step: Mutex::new(None),
                phase: AtomicU8::new(Phase::Starting as u8),
                log,
            }),
        })
    }

    /// Record `err` as the last error and dispatch LibraryError.
    ///
    /// Returns `err` so callers can write `return Err(rt.fail(e))`.
    pub fn fail(&self, err: BootError) -> BootError {
        let message = err.to_string();
        warn!(target: "sigboot", error = %message, "library error");
        *self.inner.last_error.lock() = Some(message);
        let _ = self.inner.registry.dispatch(Event::LIB_ERROR);
        err
    }

    fn escalate<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.fail(err))
    }

    /// Message of the most recent failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /* --- events --- */

    /// Listen on `code`. See [`EventRegistry::register`].
    pub fn add_listener<F>(&self, code: impl EventCode, listener: F) -> Result<ListenerId>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.escalate(self.inner.registry.register(code, listener))
    }

    pub fn remove_listener(&self, code: impl EventCode, id: ListenerId) -> Result<()> {
        self.escalate(self.inner.registry.unregister(code, id))
    }

    /// Run every listener on `code` now, on this thread.
    pub fn dispatch(&self, code: impl EventCode) -> Result<()> {
        self.escalate(self.inner.registry.dispatch(code))
    }

    pub fn listener_count(&self, code: impl EventCode) -> Result<usize> {
        self.escalate(self.inner.registry.len(code))
    }

    /* --- signals --- */

    /// Deliver OS signal `code` as an event from now on.
    pub fn enable_signal(&self, code: impl EventCode) -> Result<()> {
        self.escalate(self.inner.signals.enable(code)).map(drop)
    }

    /// Give `code` back the disposition it had before the runtime existed.
    pub fn disable_signal(&self, code: impl EventCode) -> Result<()> {
        self.escalate(self.inner.signals.disable(code)).map(drop)
    }

    #[must_use]
    pub fn signal_enabled(&self, event: Event) -> bool {
        self.inner.signals.is_enabled(event)
    }

    /// The signal bridge, for inspecting dispositions.
    #[must_use]
    pub fn signals(&self) -> &SignalBridge {
        &self.inner.signals
    }

    /// Dispatch every signal delivered since the last pump. Never blocks.
    ///
    /// Returns how many were dispatched.
    pub fn pump(&self) -> usize {
        let events = self.inner.signals.drain();
        self.deliver(&events)
    }

    /// Like [`Runtime::pump`], but sleeps up to `timeout` for the first one.
    pub fn wait_for_signals(&self, timeout: Duration) -> usize {
        let events = self.inner.signals.wait(timeout);
        self.deliver(&events)
    }

    fn deliver(&self, events: &[Event]) -> usize {
        for &event in events {
            debug!(target: "sigboot", %event, "got signal, invoking listeners");
            let _ = self.dispatch(event);
        }
        events.len()
    }

    /* --- timers --- */

    /// A timer that raises signal `code` when it fires. Enable the signal
    /// first, or its default disposition applies.
    pub fn create_signal_timer(&self, code: impl EventCode) -> Result<TimerId> {
        self.escalate(self.inner.timers.create_signal_timer(code))
    }

    /// A timer that runs `callback` on a pool thread when it fires.
    pub fn create_thread_timer<F>(&self, callback: F) -> Result<TimerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.escalate(self.inner.timers.create_thread_timer(callback))
    }

    /// Fire once, `delay` from now.
    pub fn start_timer(&self, id: TimerId, delay: Duration) -> Result<()> {
        self.escalate(self.inner.timers.arm(id, delay))
    }

    /// Fire every `period`, first one `period` from now.
    pub fn start_interval(&self, id: TimerId, period: Duration) -> Result<()> {
        self.escalate(self.inner.timers.arm_interval(id, period))
    }

    pub fn stop_timer(&self, id: TimerId) -> Result<()> {
        self.escalate(self.inner.timers.disarm(id))
    }

    pub fn delete_timer(&self, id: TimerId) -> Result<()> {
        self.escalate(self.inner.timers.destroy(id))
    }

    /* --- options --- */

    pub fn add_option(&self, spec: OptionSpec) -> Result<()> {
        if self.inner.parsing.load(Ordering::Acquire) {
            return Err(self.fail(BootError::InvalidOption(format!(
                "{}: can't add options while parsing",
                spec.name()
            ))));
        }
        /* guard must be gone before LibraryError listeners run */
        let result = self.inner.options.lock().add(spec);
        self.escalate(result)
    }

    /// Parse the process's own arguments. Non-UTF-8 arguments are converted
    /// lossily.
    pub fn parse_options(&self) -> Result<usize> {
        self.parse_options_from(
            std::env::args_os().map(|arg: OsString| arg.to_string_lossy().into_owned()),
        )
    }

    /// Parse `args` (program name first) against the registered options.
    pub fn parse_options_from<I, S>(&self, args: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        /* handlers may call back into the runtime, so never hold the lock across them */
        let result = {
            let mut parsing = Parsing::begin(&self.inner);
            parsing.options.parse(args)
        };
        self.escalate(result)
    }

    /// Next positional argument from the last successful parse.
    #[must_use]
    pub fn next_argument(&self) -> Option<String> {
        self.inner.options.lock().next_argument()
    }

    /// How often `name` (long name or short letter) appeared in the last parse.
    #[must_use]
    pub fn option_seen(&self, name: &str) -> Option<u32> {
        self.inner.options.lock().seen(name)
    }

    /* --- settings --- */

    pub fn set_mode(&self, mode: Mode) {
        debug!(target: "sigboot", %mode, "mode set");
        *self.inner.mode.lock() = mode;
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.inner.mode.lock()
    }

    /// Turn diagnostic output on or off.
    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.store(debug, Ordering::Relaxed);
        if let Some(log) = &self.inner.log {
            log.set_debug(debug);
        }
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    /// Step function for loop mode. Replaces any earlier one.
    pub fn set_step<F>(&self, step: F)
    where
        F: FnMut(Duration) + Send + 'static,
    {
        *self.inner.step.lock() = Some(Box::new(step));
    }

    pub(crate) fn take_step(&self) -> Option<StepFn> {
        self.inner.step.lock().take()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        debug!(target: "sigboot", ?phase, "lifecycle");
        self.inner.phase.store(phase as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Arity;
    use std::sync::atomic::AtomicUsize;

    /* replaces the fatal default so failures don't end the test process */
    fn runtime() -> (Runtime, Arc<AtomicUsize>) {
        let rt = Runtime::new(Config::default()).unwrap();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        rt.add_listener(Event::LIB_ERROR, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (rt, errors)
    }

    #[test]
    fn test_new_runtime_defaults() {
        let rt = Runtime::new(Config::new().mode(Mode::Wait)).unwrap();
        assert_eq!(rt.phase(), Phase::Starting);
        assert_eq!(rt.mode(), Mode::Wait);
        assert!(!rt.debug());
        assert_eq!(rt.last_error(), None);
        assert_eq!(rt.listener_count(Event::LIB_ERROR).unwrap(), 1);
        assert_eq!(rt.listener_count(Event::SHUTDOWN).unwrap(), 0);
    }

    #[test]
    fn test_failure_escalates() {
        let (rt, errors) = runtime();
        assert_eq!(rt.add_listener(40u32, |_| {}), Err(BootError::InvalidEvent(40)));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(rt.last_error().as_deref(), Some("no such event: 40"));

        assert!(rt.enable_signal(Event::SHUTDOWN).is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(rt.last_error().as_deref(), Some("not a signal: 0"));
    }

    #[test]
    fn test_success_does_not_escalate() {
        let (rt, errors) = runtime();
        rt.add_listener(Event::SIGUSR2, |_| {}).unwrap();
        rt.dispatch(Event::SIGUSR2).unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_use_runtime() {
        let (rt, errors) = runtime();
        let inner = rt.clone();
        rt.add_listener(Event::SIGHUP, move |_| {
            let _ = inner.dispatch(99u32);
        })
        .unwrap();
        rt.dispatch(Event::SIGHUP).unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_option_handler_can_use_runtime() {
        let (rt, _errors) = runtime();
        let handle = rt.clone();
        rt.add_option(
            OptionSpec::new()
                .long("mode")
                .arity(Arity::Required)
                .handler(move |value| {
                    handle.set_mode(value.unwrap_or_default().parse()?);
                    Ok(())
                }),
        )
        .unwrap();
        assert_eq!(rt.parse_options_from(["prog", "--mode", "loop", "x"]), Ok(1));
        assert_eq!(rt.mode(), Mode::Loop);
        assert_eq!(rt.option_seen("mode"), Some(1));
        assert_eq!(rt.next_argument().as_deref(), Some("x"));
        assert_eq!(rt.next_argument(), None);
    }

    #[test]
    fn test_add_option_while_parsing_fails() {
        let (rt, errors) = runtime();
        let handle = rt.clone();
        rt.add_option(OptionSpec::new().short('a').handler(move |_| {
            handle
                .add_option(OptionSpec::new().short('b').handler(|_| Ok(())))
                .map_err(|err| err.to_string())
        }))
        .unwrap();
        assert!(matches!(
            rt.parse_options_from(["prog", "-a"]),
            Err(BootError::OptionHandlerError { .. })
        ));
        /* once for the refused add, once for the parse */
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        /* table survived */
        assert_eq!(rt.option_seen("a"), Some(1));
    }

    #[test]
    fn test_failed_add_option_lets_listener_read_options() {
        let rt = Runtime::new(Config::default()).unwrap();
        let handle = rt.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        rt.add_listener(Event::LIB_ERROR, move |_| {
            sink.lock().push(handle.option_seen("x"));
            let _ = handle.next_argument();
        })
        .unwrap();

        let (done, finished) = std::sync::mpsc::channel();
        let worker = rt.clone();
        std::thread::spawn(move || {
            /* no handler: rejected, escalated */
            let result = worker.add_option(OptionSpec::new().short('x'));
            let _ = done.send(result);
        });
        let result = finished
            .recv_timeout(Duration::from_secs(3))
            .expect("add_option returned");
        assert!(matches!(result, Err(BootError::InvalidOption(_))));
        assert_eq!(*seen.lock(), [None]);
    }

    #[test]
    fn test_panicking_handler_restores_option_table() {
        let (rt, _) = runtime();
        rt.add_option(
            OptionSpec::new()
                .short('p')
                .handler(|_| panic!("handler blew up")),
        )
        .unwrap();
        let parse = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            rt.parse_options_from(["prog", "-p"])
        }));
        assert!(parse.is_err());

        /* table is back and adding works again */
        assert_eq!(rt.option_seen("p"), Some(1));
        rt.add_option(OptionSpec::new().short('q').handler(|_| Ok(())))
            .unwrap();
        assert_eq!(rt.parse_options_from(["prog", "-q", "rest"]), Ok(1));
    }

    #[test]
    fn test_step_set_and_taken() {
        let (rt, _) = runtime();
        assert!(rt.take_step().is_none());
        rt.set_step(|_| {});
        assert!(rt.take_step().is_some());
        assert!(rt.take_step().is_none());
    }

    #[test]
    fn test_phase_transitions() {
        let (rt, _) = runtime();
        for phase in [Phase::Initializing, Phase::Running, Phase::Terminating] {
            rt.set_phase(phase);
            assert_eq!(rt.phase(), phase);
        }
    }

    #[test]
    fn test_set_debug_flag() {
        let (rt, _) = runtime();
        rt.set_debug(true);
        assert!(rt.debug());
        rt.set_debug(false);
        assert!(!rt.debug());
    }

    #[test]
    fn test_pump_with_nothing_pending() {
        let (rt, _) = runtime();
        /* other tests in this binary never raise signals */
        assert_eq!(rt.pump(), 0);
    }
}
