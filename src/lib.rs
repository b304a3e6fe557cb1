/*
 * lib.rs
 *
 * Everything lives in the library; the demo binary is a thin host for
 * the integration tests.
 */

//! # sigboot
//!
//! Turn a plain `main` into an event-driven process. OS signals, timers and
//! command-line options all end up as calls to listeners registered on
//! small integer event codes.
//!
//! ## Quick Start
//!
//! ```rust
//! use sigboot::{Config, Event, Runtime, parse_event};
//!
//! let rt = Runtime::new(Config::default()).unwrap();
//! rt.add_listener(Event::LIB_ERROR, |_| { /* handle errors ourselves */ }).unwrap();
//! rt.add_listener(parse_event("USR1").unwrap(), |event| {
//!     println!("got {event}");
//! })
//! .unwrap();
//! rt.dispatch(Event::SIGUSR1).unwrap();
//! ```
//!
//! For a whole program use [`Boot`]: it builds the runtime, calls your init,
//! then runs once, loops or waits, and dispatches
//! [`Event::SHUTDOWN`] when the process exits.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod options;
pub mod registry;
pub mod runtime;
pub mod signal;
pub mod timer;

pub use config::{Config, Mode};
pub use error::{BootError, Result, exit_codes};
pub use event::{Event, EventCode, NUMBER_OF_EVENTS, event_name, parse_event};
pub use lifecycle::{Boot, run};
pub use options::{Arity, MAX_OPTIONS, OptionSpec};
pub use registry::ListenerId;
pub use runtime::{Phase, Runtime};
pub use timer::TimerId;
