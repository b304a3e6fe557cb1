/*
 * config.rs
 *
 * Startup configuration: run mode and debug flag.
 *
 * Code sets these through Config (or Runtime::set_mode / set_debug once
 * running). The environment can seed them:
 *
 *   SIGBOOT_MODE   once | loop | wait
 *   SIGBOOT_DEBUG  1 | true | yes | on   (anything else means off)
 *
 * An unparseable SIGBOOT_MODE is reported and ignored, never fatal.
 */

use core::fmt;
use core::str::FromStr;

use tracing::warn;

pub const MODE_ENV: &str = "SIGBOOT_MODE";
pub const DEBUG_ENV: &str = "SIGBOOT_DEBUG";

/// What the lifecycle driver does after init returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Handle whatever is pending, then return.
    #[default]
    Once,
    /// Call the step function forever with the elapsed time.
    Loop,
    /// Sleep until signals arrive, forever.
    Wait,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Loop => "loop",
            Self::Wait => "wait",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Self::Once),
            "loop" => Ok(Self::Loop),
            "wait" => Ok(Self::Wait),
            other => Err(format!("invalid mode '{other}' (expected once, loop or wait)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub mode: Mode,
    pub debug: bool,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Defaults overridden by `SIGBOOT_MODE` and `SIGBOOT_DEBUG`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(MODE_ENV).ok().as_deref(),
            std::env::var(DEBUG_ENV).ok().as_deref(),
        )
    }

    /* split out so tests don't have to mutate the process environment */
    fn from_vars(mode: Option<&str>, debug: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = mode {
            match raw.parse() {
                Ok(mode) => config.mode = mode,
                Err(err) => warn!(target: "sigboot", var = MODE_ENV, "{err}, ignored"),
            }
        }
        config.debug = debug.is_some_and(truthy);
        config
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
