/*
 * fuzz_targets/parse_options.rs
 *
 * fuzz target for the option scanner. Options::parse must never panic on
 * any argument vector, only return errors.
 *
 * edge cases: "-abc" clusters, "--al" prefixes, "-b" with no value,
 * "--alpha=x" on a flag, "--", lone "-", non-ASCII clusters
 */

#![no_main]

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;
use libfuzzer_sys::fuzz_target;
use sigboot::options::{Arity, OptionSpec, Options};

fuzz_target!(|data: &[u8]| {
    /* split input on null bytes to simulate multiple arguments */
    let args: Vec<String> = core::iter::once(String::from("prog"))
        .chain(
            data.split(|&b| b == 0)
                .filter_map(|chunk| core::str::from_utf8(chunk).ok())
                .map(String::from),
        )
        .collect();

    let mut options = Options::new();
    let specs = [
        OptionSpec::new().short('a').long("alpha").handler(|_| Ok(())),
        OptionSpec::new()
            .short('b')
            .long("beta")
            .arity(Arity::Required)
            .handler(|_| Ok(())),
        OptionSpec::new()
            .short('c')
            .long("alps")
            .arity(Arity::Optional)
            .handler(|value| match value {
                Some("fail") => Err(String::from("refused")),
                _ => Ok(()),
            }),
    ];
    for spec in specs {
        if options.add(spec).is_err() {
            return;
        }
    }

    if let Ok(count) = options.parse(args) {
        let drained = core::iter::from_fn(|| options.next_argument()).count();
        assert_eq!(count, drained);
    }
});
