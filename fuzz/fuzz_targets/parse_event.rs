/*
 * fuzz_targets/parse_event.rs
 *
 * fuzz target for event-name parsing. parse_event must never panic on
 * arbitrary strings, and whatever it accepts must be a valid code.
 *
 * edge cases: "SIGFOO", "999", "-1", "sig", "lib-error", "  TERM  ", ""
 */

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = core::str::from_utf8(data)
        && let Ok(event) = sigboot::parse_event(s)
    {
        assert!(event.index() < sigboot::NUMBER_OF_EVENTS);
    }
});
