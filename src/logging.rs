/*
 * logging.rs
 *
 * Diagnostic output behind the debug flag.
 *
 * Everything the library logs goes through tracing with target "sigboot".
 * init() installs a stderr fmt subscriber whose level sits behind a
 * reload layer, so set_debug can flip between WARN and DEBUG while the
 * process runs.
 *
 * The subscriber is installed once per process and every later init gets
 * the same handle back. If the host already installed a subscriber we
 * leave theirs alone and return None; set_debug then only changes the
 * flag, not what gets printed.
 */

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt, reload};

/// Handle to the level of the subscriber installed by [`init`].
#[derive(Clone)]
pub struct LogHandle {
    level: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn set_debug(&self, debug: bool) {
        /* only fails once the subscriber is gone, i.e. at process exit */
        let _ = self.level.modify(|filter| *filter = level_for(debug));
    }

    #[must_use]
    pub fn level(&self) -> Option<LevelFilter> {
        self.level.clone_current()
    }
}

const fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    }
}

static INSTALLED: OnceLock<Option<LogHandle>> = OnceLock::new();

/// Install the global subscriber on first call, then set its level.
///
/// `None` if somebody else's subscriber was there first.
#[must_use]
pub fn init(debug: bool) -> Option<LogHandle> {
    let handle = INSTALLED.get_or_init(|| install(debug)).clone();
    if let Some(handle) = &handle {
        handle.set_debug(debug);
    }
    handle
}

fn install(debug: bool) -> Option<LogHandle> {
    let (filter, level) = reload::Layer::new(level_for(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_ansi(io::stderr().is_terminal())
                .without_time(),
        )
        .try_init()
        .ok()
        .map(|()| LogHandle { level })
}
