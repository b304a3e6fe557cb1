/*
 * main.rs
 *
 * sigboot-demo: a small host that pokes at every part of the library.
 * The integration tests drive it; nothing here is clever.
 *
 *   -t, --test [N]        print "Test-value is N."
 *   -m, --mode MODE       once | loop | wait
 *       --signal-timer MS raise SIGUSR1 once after MS
 *       --interval MS     raise SIGUSR1 every MS
 *       --thread-timer MS print "tick" every MS from a pool thread
 *   -x, --exit-after N    exit 0 after N SIGUSR1s, ticks or steps
 *       --fail            trigger a library error on purpose
 *   -d, --debug           diagnostics on stderr
 */

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use sigboot::{Arity, Boot, Event, OptionSpec, Result, Runtime, exit_codes};

#[derive(Debug, Default)]
struct Settings {
    test: i64,
    signal_timer: Option<u64>,
    interval: Option<u64>,
    thread_timer: Option<u64>,
    exit_after: Option<u32>,
    fail: bool,
}

fn number<T: std::str::FromStr>(value: Option<&str>) -> core::result::Result<T, String> {
    let raw = value.unwrap_or_default();
    raw.trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))
}

/* one more firing; exits the process once the limit is hit */
fn count(fired: &AtomicU32, limit: Option<u32>) -> u32 {
    let n = fired.fetch_add(1, Ordering::SeqCst) + 1;
    if limit.is_some_and(|limit| n >= limit) {
        std::process::exit(i32::from(exit_codes::SUCCESS));
    }
    n
}

fn add_options(rt: &Runtime, settings: &Arc<Mutex<Settings>>) -> Result<()> {
    let s = Arc::clone(settings);
    rt.add_option(
        OptionSpec::new()
            .short('t')
            .long("test")
            .arity(Arity::Optional)
            .handler(move |value| {
                if value.is_some() {
                    s.lock().test = number(value)?;
                }
                Ok(())
            }),
    )?;

    let handle = rt.clone();
    rt.add_option(
        OptionSpec::new()
            .short('m')
            .long("mode")
            .arity(Arity::Required)
            .handler(move |value| {
                handle.set_mode(value.unwrap_or_default().parse()?);
                Ok(())
            }),
    )?;

    let s = Arc::clone(settings);
    rt.add_option(
        OptionSpec::new()
            .long("signal-timer")
            .arity(Arity::Required)
            .handler(move |value| {
                s.lock().signal_timer = Some(number(value)?);
                Ok(())
            }),
    )?;

    let s = Arc::clone(settings);
    rt.add_option(
        OptionSpec::new()
            .long("interval")
            .arity(Arity::Required)
            .handler(move |value| {
                s.lock().interval = Some(number(value)?);
                Ok(())
            }),
    )?;

    let s = Arc::clone(settings);
    rt.add_option(
        OptionSpec::new()
            .long("thread-timer")
            .arity(Arity::Required)
            .handler(move |value| {
                s.lock().thread_timer = Some(number(value)?);
                Ok(())
            }),
    )?;

    let s = Arc::clone(settings);
    rt.add_option(
        OptionSpec::new()
            .short('x')
            .long("exit-after")
            .arity(Arity::Required)
            .handler(move |value| {
                s.lock().exit_after = Some(number(value)?);
                Ok(())
            }),
    )?;

    let s = Arc::clone(settings);
    rt.add_option(OptionSpec::new().long("fail").handler(move |_| {
        s.lock().fail = true;
        Ok(())
    }))?;

    let handle = rt.clone();
    rt.add_option(
        OptionSpec::new()
            .short('d')
            .long("debug")
            .handler(move |_| {
                handle.set_debug(true);
                Ok(())
            }),
    )
}

fn init(rt: &Runtime) -> Result<()> {
    println!("Hello World!");

    rt.add_listener(Event::SHUTDOWN, |_| eprintln!("Shutting down."))?;

    let settings = Arc::new(Mutex::new(Settings::default()));
    add_options(rt, &settings)?;
    rt.parse_options()?;

    let settings = core::mem::take(&mut *settings.lock());
    println!("Test-value is {}.", settings.test);
    while let Some(arg) = rt.next_argument() {
        println!("arg: {arg}");
    }

    if settings.fail {
        /* Shutdown is not a signal: escalates, default handler exits 3 */
        rt.enable_signal(Event::SHUTDOWN)?;
    }

    let limit = settings.exit_after;
    let signals = Arc::new(AtomicU32::new(0));
    rt.add_listener(Event::SIGUSR1, move |_| {
        println!("Got SIGUSR1.");
        count(&signals, limit);
    })?;
    rt.enable_signal(Event::SIGUSR1)?;

    if let Some(ms) = settings.signal_timer {
        let timer = rt.create_signal_timer(Event::SIGUSR1)?;
        rt.start_timer(timer, Duration::from_millis(ms))?;
    }
    if let Some(ms) = settings.interval {
        let timer = rt.create_signal_timer(Event::SIGUSR1)?;
        rt.start_interval(timer, Duration::from_millis(ms))?;
    }
    if let Some(ms) = settings.thread_timer {
        let ticks = Arc::new(AtomicU32::new(0));
        let timer = rt.create_thread_timer(move || {
            println!("tick");
            count(&ticks, limit);
        })?;
        rt.start_interval(timer, Duration::from_millis(ms))?;
    }

    let steps = AtomicU32::new(0);
    rt.set_step(move |_elapsed| {
        let n = steps.load(Ordering::SeqCst) + 1;
        println!("step {n}");
        std::thread::sleep(Duration::from_millis(10));
        count(&steps, limit);
    });

    Ok(())
}

fn main() -> ExitCode {
    Boot::new(init).run()
}
