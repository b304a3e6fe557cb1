/*
 * lifecycle.rs
 *
 * Starting -> Initializing -> Running -> Terminating.
 *
 * Starting builds the Runtime (slots, captured dispositions, default
 * error handler) and registers the atexit hook. Initializing calls init
 * exactly once. Running depends on the mode:
 *
 *   once  pump whatever signals are pending, return
 *   loop  pump, call step(elapsed), repeat; never returns by itself
 *   wait  sleep on the signal pipe, wake to dispatch, repeat forever
 *
 * Terminating is reached only through process exit. The atexit hook
 * dispatches Shutdown once. Signals with no catchable disposition kill
 * the process without running it, and nothing here tries to change that.
 */

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock;
use crate::config::{Config, Mode};
use crate::error::{BootError, Result, exit_codes};
use crate::event::Event;
use crate::runtime::{Phase, Runtime, StepFn};

/* wait mode wakes at least this often even without signals */
const WAIT_TICK: Duration = Duration::from_secs(60);

/* runtime the atexit hook shuts down; the hook can't take arguments */
static EXIT_RUNTIME: Mutex<Option<Runtime>> = parking_lot::const_mutex(None);
static EXIT_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Entry point builder: init, optional step, config, run.
///
/// ```no_run
/// use sigboot::{Boot, Event, Mode};
///
/// fn main() -> std::process::ExitCode {
///     Boot::new(|rt| {
///         rt.set_mode(Mode::Wait);
///         rt.enable_signal(Event::SIGUSR1)?;
///         rt.add_listener(Event::SIGUSR1, |_| println!("Got SIGUSR1."))?;
///         Ok(())
///     })
///     .run()
/// }
/// ```
pub struct Boot<I> {
    init: I,
    config: Config,
    step: Option<StepFn>,
}

impl<I> Boot<I>
where
    I: FnOnce(&Runtime) -> Result<()>,
{
    /// Start from the environment's config (`SIGBOOT_MODE`, `SIGBOOT_DEBUG`).
    #[must_use]
    pub fn new(init: I) -> Self {
        Self {
            init,
            config: Config::from_env(),
            step: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Step function for loop mode. init may also set one.
    #[must_use]
    pub fn step<F>(mut self, step: F) -> Self
    where
        F: FnMut(Duration) + Send + 'static,
    {
        self.step = Some(Box::new(step));
        self
    }

    /// Run the lifecycle. Returns only in once mode or on failure.
    pub fn run(self) -> ExitCode {
        let rt = match Runtime::new(self.config) {
            Ok(rt) => rt,
            Err(err) => {
                eprintln!("[sigboot] Error: {err}");
                return ExitCode::from(err.exit_code());
            }
        };
        if let Some(step) = self.step {
            rt.set_step(step);
        }
        if let Err(err) = install_exit_hook(&rt) {
            rt.fail(err);
        }

        rt.set_phase(Phase::Initializing);
        if let Err(err) = (self.init)(&rt) {
            /* operations on rt have already escalated their own failures */
            warn!(target: "sigboot", error = %err, "init failed");
            return ExitCode::from(err.exit_code());
        }

        rt.set_phase(Phase::Running);
        let mode = rt.mode();
        debug!(target: "sigboot", %mode, "running");
        match mode {
            Mode::Once => {
                rt.pump();
            }
            Mode::Loop => match rt.take_step() {
                Some(step) => run_loop(&rt, step),
                None => return ExitCode::from(rt.fail(BootError::MissingStep).exit_code()),
            },
            Mode::Wait => loop {
                rt.wait_for_signals(WAIT_TICK);
            },
        }
        ExitCode::from(exit_codes::SUCCESS)
    }
}

/// `Boot::new(init).run()`.
pub fn run<I>(init: I) -> ExitCode
where
    I: FnOnce(&Runtime) -> Result<()>,
{
    Boot::new(init).run()
}

fn run_loop(rt: &Runtime, mut step: StepFn) -> ! {
    let mut last = clock::relative_time();
    loop {
        rt.pump();
        let now = clock::relative_time();
        /* monotonic, so None can't happen; treat it as no time passed */
        let elapsed = clock::elapsed_ns(last, now).unwrap_or(0);
        last = now;
        step(Duration::from_nanos(elapsed));
    }
}

/* point the hook at rt, registering it with atexit the first time */
fn install_exit_hook(rt: &Runtime) -> Result<()> {
    *EXIT_RUNTIME.lock() = Some(rt.clone());
    if EXIT_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    // SAFETY: on_exit is an extern "C" fn taking nothing and returning
    // nothing, which is what atexit expects.
    if unsafe { libc::atexit(on_exit) } != 0 {
        EXIT_HOOK_INSTALLED.store(false, Ordering::SeqCst);
        return Err(BootError::ExitHookFailed);
    }
    debug!(target: "sigboot", "exit handler installed");
    Ok(())
}

extern "C" fn on_exit() {
    /* take() so a second exit() from a Shutdown listener finds nothing */
    let runtime = EXIT_RUNTIME.lock().take();
    let Some(rt) = runtime else {
        return;
    };
    rt.set_phase(Phase::Terminating);
    let _ = rt.dispatch(Event::SHUTDOWN);
    /* the process is going away; dropping here could tear down the timer
     * pool from inside one of its own threads */
    core::mem::forget(rt);
}
