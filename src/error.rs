/*
 * error.rs
 *
 * Everything that can go wrong, and the one exit status we own.
 *
 * Errors never travel back to unrelated callers. Runtime::fail records the
 * message as the last error, dispatches LibraryError, and hands the error to
 * the direct caller so it can branch on it. Whoever listens on LibraryError
 * decides what happens next.
 */

use thiserror::Error;

use crate::event::Event;

/// exit codes. 3 is the framework's own fatal path, don't reuse it.
pub mod exit_codes {
    /// Normal termination
    pub const SUCCESS: u8 = 0;
    /// Unrecovered library error (default LibraryError handler)
    pub const LIB_ERROR: u8 = 3;
}

/* everything that can go wrong */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("no such event: {0}")]
    InvalidEvent(u32),
    #[error("not a signal: {0}")]
    NotASignal(u32),
    #[error("setting disposition for signal {signal} failed: {reason}")]
    DispositionInstallFailed { signal: Event, reason: String },
    #[error("timer creation failed: {0}")]
    TimerCreateFailed(String),
    #[error("timer {op} failed: {reason}")]
    TimerOperationFailed { op: &'static str, reason: String },
    #[error("no listener {id} on event {event}")]
    ListenerNotFound { event: Event, id: u64 },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("too many options (limit is {0})")]
    TooManyOptions(usize),
    #[error("unknown option: {0}")]
    OptionUnknown(String),
    #[error("missing required option: {0}")]
    OptionMissing(String),
    #[error("option {0} requires an argument")]
    OptionArgumentMissing(String),
    #[error("option {0} doesn't allow an argument")]
    OptionUnexpectedArgument(String),
    #[error("handler for option {option} failed: {reason}")]
    OptionHandlerError { option: String, reason: String },
    #[error("allocation failed: {0}")]
    AllocationFailed(String),
    #[error("setting exit handler failed (atexit)")]
    ExitHookFailed,
    #[error("no step function given for loop mode")]
    MissingStep,
}

impl BootError {
    /* every error that reaches the process boundary maps to the fatal code */
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        exit_codes::LIB_ERROR
    }

    /* option parsing failures, the ones a host usually reports as usage errors */
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::OptionUnknown(_)
                | Self::OptionMissing(_)
                | Self::OptionArgumentMissing(_)
                | Self::OptionUnexpectedArgument(_)
                | Self::OptionHandlerError { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_detail() {
        let err = BootError::TimerOperationFailed {
            op: "arm",
            reason: "timer destroyed".to_string(),
        };
        assert_eq!(err.to_string(), "timer arm failed: timer destroyed");

        let err = BootError::NotASignal(32);
        assert_eq!(err.to_string(), "not a signal: 32");

        let err = BootError::ListenerNotFound {
            event: Event::SIGUSR1,
            id: 7,
        };
        assert_eq!(err.to_string(), "no listener 7 on event 10 (SIGUSR1)");
    }

    #[test]
    fn test_exit_code_is_lib_error() {
        assert_eq!(BootError::MissingStep.exit_code(), exit_codes::LIB_ERROR);
        assert_eq!(BootError::InvalidEvent(99).exit_code(), 3);
    }

    #[test]
    fn test_usage_errors() {
        assert!(BootError::OptionUnknown("-z".into()).is_usage());
        assert!(BootError::OptionMissing("--test".into()).is_usage());
        assert!(!BootError::ExitHookFailed.is_usage());
    }
}
