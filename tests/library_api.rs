/*
 * library_api.rs
 *
 * integration-style tests exercising sigboot as a library.
 *
 * every runtime here claims LibraryError first, so failures are counted
 * instead of ending the test process through the default handler.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sigboot::{
    Arity, BootError, Config, Event, MAX_OPTIONS, Mode, OptionSpec, Runtime, event_name,
    parse_event,
};

fn runtime() -> (Runtime, Arc<AtomicUsize>) {
    let rt = Runtime::new(Config::default()).expect("runtime should build");
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    rt.add_listener(Event::LIB_ERROR, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    (rt, errors)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/* =========================================================================
 * EVENTS
 * ========================================================================= */

#[test]
fn library_listeners_fire_in_order() {
    let (rt, errors) = runtime();
    let log = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..5 {
        let log = Arc::clone(&log);
        rt.add_listener(Event::SIGUSR2, move |_| log.lock().unwrap().push(tag))
            .unwrap();
    }
    rt.dispatch(Event::SIGUSR2).unwrap();
    rt.dispatch(Event::SIGUSR1).unwrap();
    assert_eq!(*log.lock().unwrap(), [0, 1, 2, 3, 4]);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[test]
fn library_invalid_event_escalates_without_mutation() {
    let (rt, errors) = runtime();
    assert_eq!(
        rt.add_listener(33u32, |_| {}),
        Err(BootError::InvalidEvent(33))
    );
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(rt.last_error().as_deref(), Some("no such event: 33"));
    for event in Event::all() {
        let expected = usize::from(event == Event::LIB_ERROR);
        assert_eq!(rt.listener_count(event).unwrap(), expected);
    }
}

#[test]
fn library_remove_listener() {
    let (rt, errors) = runtime();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let id = rt
        .add_listener(Event::SIGHUP, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    rt.dispatch(Event::SIGHUP).unwrap();
    rt.remove_listener(Event::SIGHUP, id).unwrap();
    rt.dispatch(Event::SIGHUP).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(rt.remove_listener(Event::SIGHUP, id).is_err());
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn library_second_error_listener_appends() {
    let rt = Runtime::new(Config::default()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let log = Arc::clone(&log);
        rt.add_listener(Event::LIB_ERROR, move |_| log.lock().unwrap().push(tag))
            .unwrap();
    }
    assert_eq!(rt.listener_count(Event::LIB_ERROR).unwrap(), 2);
    let _ = rt.dispatch(50u32);
    assert_eq!(*log.lock().unwrap(), ["first", "second"]);
}

#[test]
fn library_event_names() {
    assert_eq!(event_name(Event::SHUTDOWN), "Shutdown");
    assert_eq!(event_name(Event::LIB_ERROR), "Lib-Error");
    assert_eq!(event_name(Event::SIGTERM), "SIGTERM");
    assert_eq!(parse_event("term").unwrap(), Event::SIGTERM);
    assert_eq!(parse_event("shutdown").unwrap(), Event::SHUTDOWN);
    assert!(parse_event("SIGNOPE").is_err());
}

/* =========================================================================
 * OPTIONS
 * ========================================================================= */

#[test]
fn library_option_parse_example() {
    let (rt, _) = runtime();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    rt.add_option(
        OptionSpec::new()
            .short('t')
            .long("test")
            .arity(Arity::Optional)
            .handler(move |value| {
                sink.lock().unwrap().push(value.map(str::to_string));
                Ok(())
            }),
    )
    .unwrap();

    assert_eq!(rt.parse_options_from(["prog", "-t", "7", "extra"]), Ok(1));
    assert_eq!(*calls.lock().unwrap(), [Some("7".to_string())]);
    assert_eq!(rt.next_argument().as_deref(), Some("extra"));
    assert_eq!(rt.next_argument(), None);
}

#[test]
fn library_option_long_and_short_share_spec() {
    let (rt, _) = runtime();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    rt.add_option(OptionSpec::new().short('v').long("verbose").handler(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
    .unwrap();
    rt.parse_options_from(["prog", "-v", "--verbose"]).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(rt.option_seen("verbose"), Some(2));
}

#[test]
fn library_option_missing_keeps_positionals_untouched() {
    let (rt, errors) = runtime();
    rt.add_option(
        OptionSpec::new()
            .long("name")
            .arity(Arity::Required)
            .required(true)
            .handler(|_| Ok(())),
    )
    .unwrap();
    assert_eq!(
        rt.parse_options_from(["prog", "a", "b"]),
        Err(BootError::OptionMissing("--name".to_string()))
    );
    assert_eq!(rt.next_argument(), None);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn library_unknown_option_stops_scan() {
    let (rt, errors) = runtime();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    rt.add_option(OptionSpec::new().short('a').handler(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
    .unwrap();
    assert_eq!(
        rt.parse_options_from(["prog", "-z", "-a"]),
        Err(BootError::OptionUnknown("-z".to_string()))
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn library_option_capacity() {
    let (rt, errors) = runtime();
    for i in 0..MAX_OPTIONS {
        rt.add_option(OptionSpec::new().long(format!("o{i}")).handler(|_| Ok(())))
            .unwrap();
    }
    assert_eq!(
        rt.add_option(OptionSpec::new().long("extra").handler(|_| Ok(()))),
        Err(BootError::TooManyOptions(MAX_OPTIONS))
    );
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn library_option_sets_mode() {
    let (rt, _) = runtime();
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
    rt.parse_options_from(["prog", "--mode=wait"]).unwrap();
    assert_eq!(rt.mode(), Mode::Wait);
    assert!(matches!(
        rt.parse_options_from(["prog", "--mode", "sideways"]),
        Err(BootError::OptionHandlerError { .. })
    ));
}

/* =========================================================================
 * THREAD TIMERS
 * ========================================================================= */

#[test]
fn library_thread_timer_one_shot() {
    let (rt, errors) = runtime();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let timer = rt
        .create_thread_timer(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    rt.start_timer(timer, Duration::from_millis(20)).unwrap();

    assert!(wait_until(Duration::from_secs(2), || fired.load(Ordering::SeqCst) == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    rt.delete_timer(timer).unwrap();
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[test]
fn library_thread_timer_interval_until_stopped() {
    let (rt, _) = runtime();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let timer = rt
        .create_thread_timer(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    rt.start_interval(timer, Duration::from_millis(10)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || fired.load(Ordering::SeqCst) >= 3));

    rt.stop_timer(timer).unwrap();
    /* a firing already in flight may still land */
    std::thread::sleep(Duration::from_millis(50));
    let settled = fired.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), settled);
}

#[test]
fn library_timer_use_after_delete_fails() {
    let (rt, errors) = runtime();
    let timer = rt.create_thread_timer(|| {}).unwrap();
    rt.delete_timer(timer).unwrap();

    assert!(matches!(
        rt.start_timer(timer, Duration::from_millis(5)),
        Err(BootError::TimerOperationFailed { .. })
    ));
    assert!(rt.stop_timer(timer).is_err());
    assert!(rt.delete_timer(timer).is_err());
    assert_eq!(errors.load(Ordering::SeqCst), 3);
}

#[test]
fn library_timer_callback_can_dispatch() {
    let (rt, _) = runtime();
    let got = Arc::new(AtomicUsize::new(0));
    let g = Arc::clone(&got);
    rt.add_listener(Event::SIGWINCH, move |_| {
        g.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let handle = rt.clone();
    let timer = rt
        .create_thread_timer(move || {
            let _ = handle.dispatch(Event::SIGWINCH);
        })
        .unwrap();
    rt.start_timer(timer, Duration::from_millis(10)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || got.load(Ordering::SeqCst) == 1));
}
