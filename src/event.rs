/*
 * event.rs
 *
 * Event codes: 1..=31 are the OS signal numbers as-is, 0 is Shutdown,
 * 32 is LibraryError. Nothing >= NUMBER_OF_EVENTS is ever dispatched.
 *
 * Parse "USR1", "SIGUSR1", "usr1", "10", "shutdown", "liberror". Same
 * rules as a signal spec on the kill(1) command line, plus the two
 * synthetic events.
 */

use core::fmt;

use crate::error::{BootError, Result};

/// Number of event slots. Signals 1..=31, Shutdown, LibraryError.
pub const NUMBER_OF_EVENTS: usize = 33;

/* highest signal number routed through the bridge */
const LAST_SIGNAL: u8 = 31;

/// One event code, always in `[0, NUMBER_OF_EVENTS)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event(u8);

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
impl Event {
    pub const SHUTDOWN: Self = Self(0);
    pub const LIB_ERROR: Self = Self(32);

    pub const SIGHUP: Self = Self(libc::SIGHUP as u8);
    pub const SIGINT: Self = Self(libc::SIGINT as u8);
    pub const SIGQUIT: Self = Self(libc::SIGQUIT as u8);
    pub const SIGILL: Self = Self(libc::SIGILL as u8);
    pub const SIGTRAP: Self = Self(libc::SIGTRAP as u8);
    pub const SIGABRT: Self = Self(libc::SIGABRT as u8);
    pub const SIGBUS: Self = Self(libc::SIGBUS as u8);
    pub const SIGFPE: Self = Self(libc::SIGFPE as u8);
    pub const SIGKILL: Self = Self(libc::SIGKILL as u8);
    pub const SIGUSR1: Self = Self(libc::SIGUSR1 as u8);
    pub const SIGSEGV: Self = Self(libc::SIGSEGV as u8);
    pub const SIGUSR2: Self = Self(libc::SIGUSR2 as u8);
    pub const SIGPIPE: Self = Self(libc::SIGPIPE as u8);
    pub const SIGALRM: Self = Self(libc::SIGALRM as u8);
    pub const SIGTERM: Self = Self(libc::SIGTERM as u8);
    pub const SIGSTKFLT: Self = Self(libc::SIGSTKFLT as u8);
    pub const SIGCHLD: Self = Self(libc::SIGCHLD as u8);
    pub const SIGCONT: Self = Self(libc::SIGCONT as u8);
    pub const SIGSTOP: Self = Self(libc::SIGSTOP as u8);
    pub const SIGTSTP: Self = Self(libc::SIGTSTP as u8);
    pub const SIGTTIN: Self = Self(libc::SIGTTIN as u8);
    pub const SIGTTOU: Self = Self(libc::SIGTTOU as u8);
    pub const SIGURG: Self = Self(libc::SIGURG as u8);
    pub const SIGXCPU: Self = Self(libc::SIGXCPU as u8);
    pub const SIGXFSZ: Self = Self(libc::SIGXFSZ as u8);
    pub const SIGVTALRM: Self = Self(libc::SIGVTALRM as u8);
    pub const SIGPROF: Self = Self(libc::SIGPROF as u8);
    pub const SIGWINCH: Self = Self(libc::SIGWINCH as u8);
    pub const SIGIO: Self = Self(libc::SIGIO as u8);
    pub const SIGPWR: Self = Self(libc::SIGPWR as u8);
    pub const SIGSYS: Self = Self(libc::SIGSYS as u8);

    /// Validate a raw code. `None` for anything `>= NUMBER_OF_EVENTS`.
    #[must_use]
    pub const fn new(code: u32) -> Option<Self> {
        if (code as usize) < NUMBER_OF_EVENTS {
            Some(Self(code as u8))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0
    }

    /* slot index into the registry tables */
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// True for the OS signal range `1..=31`.
    #[inline]
    #[must_use]
    pub const fn is_signal(self) -> bool {
        self.0 >= 1 && self.0 <= LAST_SIGNAL
    }

    /* raw signal number for libc calls */
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0 as i32
    }

    /// Every valid event, in code order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..NUMBER_OF_EVENTS as u8).map(Self)
    }

    /// Every signal-range event, in code order.
    pub fn signals() -> impl Iterator<Item = Self> {
        (1..=LAST_SIGNAL).map(Self)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, event_name(*self))
    }
}

impl TryFrom<u32> for Event {
    type Error = BootError;

    fn try_from(code: u32) -> Result<Self> {
        Self::new(code).ok_or(BootError::InvalidEvent(code))
    }
}

/// Anything that can name an event slot: [`Event`] itself or a raw integer.
///
/// Raw integers are validated at the call site, so out-of-range codes
/// reach the registry and get rejected there with `InvalidEvent`.
pub trait EventCode: Copy {
    fn raw_code(self) -> u32;
}

impl EventCode for Event {
    fn raw_code(self) -> u32 {
        u32::from(self.0)
    }
}

impl EventCode for u8 {
    fn raw_code(self) -> u32 {
        u32::from(self)
    }
}

impl EventCode for u32 {
    fn raw_code(self) -> u32 {
        self
    }
}

impl EventCode for i32 {
    /* negative codes map to u32::MAX so they fail validation */
    fn raw_code(self) -> u32 {
        u32::try_from(self).unwrap_or(u32::MAX)
    }
}

impl EventCode for usize {
    fn raw_code(self) -> u32 {
        u32::try_from(self).unwrap_or(u32::MAX)
    }
}

/* ordered by frequency: TERM/INT/HUP/USR1 cover most hosts */
const NAMES: &[(&str, Event)] = &[
    ("TERM", Event::SIGTERM),
    ("INT", Event::SIGINT),
    ("HUP", Event::SIGHUP),
    ("USR1", Event::SIGUSR1),
    ("USR2", Event::SIGUSR2),
    ("ALRM", Event::SIGALRM),
    ("QUIT", Event::SIGQUIT),
    ("CHLD", Event::SIGCHLD),
    ("CLD", Event::SIGCHLD),
    ("PIPE", Event::SIGPIPE),
    ("WINCH", Event::SIGWINCH),
    ("KILL", Event::SIGKILL),
    ("ABRT", Event::SIGABRT),
    ("IOT", Event::SIGABRT),
    ("CONT", Event::SIGCONT),
    ("STOP", Event::SIGSTOP),
    ("TSTP", Event::SIGTSTP),
    ("SEGV", Event::SIGSEGV),
    ("BUS", Event::SIGBUS),
    ("FPE", Event::SIGFPE),
    ("ILL", Event::SIGILL),
    ("TRAP", Event::SIGTRAP),
    ("STKFLT", Event::SIGSTKFLT),
    ("TTIN", Event::SIGTTIN),
    ("TTOU", Event::SIGTTOU),
    ("URG", Event::SIGURG),
    ("XCPU", Event::SIGXCPU),
    ("XFSZ", Event::SIGXFSZ),
    ("VTALRM", Event::SIGVTALRM),
    ("PROF", Event::SIGPROF),
    ("IO", Event::SIGIO),
    ("POLL", Event::SIGIO),
    ("PWR", Event::SIGPWR),
    ("SYS", Event::SIGSYS),
];

/// Parse "USR1", "SIGUSR1", "usr1", "10", "shutdown" - all the ways to name an event.
///
/// # Examples
///
/// ```
/// use sigboot::event::{parse_event, Event};
///
/// assert_eq!(parse_event("TERM").unwrap(), Event::SIGTERM);
/// assert_eq!(parse_event("sigusr1").unwrap(), Event::SIGUSR1);
/// assert_eq!(parse_event("15").unwrap(), Event::SIGTERM);
/// assert_eq!(parse_event("0").unwrap(), Event::SHUTDOWN);
/// assert_eq!(parse_event("liberror").unwrap(), Event::LIB_ERROR);
/// ```
pub fn parse_event(input: &str) -> Result<Event> {
    let input = input.trim();

    /* try as number first */
    if let Ok(num) = input.parse::<u32>() {
        return Event::try_from(num);
    }

    if input.eq_ignore_ascii_case("shutdown") {
        return Ok(Event::SHUTDOWN);
    }
    if input.eq_ignore_ascii_case("liberror") || input.eq_ignore_ascii_case("lib-error") {
        return Ok(Event::LIB_ERROR);
    }

    /* strip optional SIG prefix without allocation */
    let name = input
        .strip_prefix("SIG")
        .or_else(|| input.strip_prefix("sig"))
        .or_else(|| input.strip_prefix("Sig"))
        .unwrap_or(input);

    NAMES
        .iter()
        .find(|(candidate, _)| name.eq_ignore_ascii_case(candidate))
        .map(|&(_, event)| event)
        .ok_or(BootError::InvalidEvent(u32::MAX))
}

/* human-readable name for diagnostics */
#[must_use]
pub const fn event_name(event: Event) -> &'static str {
    match event.as_raw() {
        0 => "Shutdown",
        32 => "Lib-Error",
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGSTKFLT => "SIGSTKFLT",
        libc::SIGCHLD => "SIGCHLD",
        libc::SIGCONT => "SIGCONT",
        libc::SIGSTOP => "SIGSTOP",
        libc::SIGTSTP => "SIGTSTP",
        libc::SIGTTIN => "SIGTTIN",
        libc::SIGTTOU => "SIGTTOU",
        libc::SIGURG => "SIGURG",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGVTALRM => "SIGVTALRM",
        libc::SIGPROF => "SIGPROF",
        libc::SIGWINCH => "SIGWINCH",
        libc::SIGIO => "SIGIO",
        libc::SIGPWR => "SIGPWR",
        libc::SIGSYS => "SIGSYS",
        _ => "Unknown",
    }
}
