/*!
* Welcome to `aflgo_bolts`: the plumbing shared by the `AFLGo` pass and its runtime.
*/
#![warn(clippy::cargo)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    unused_extern_crates,
    unused_import_braces,
    unused_must_use,
))]

pub mod fs;
pub mod rands;
pub mod region;

use core::{
    fmt::{self, Display},
    num::{ParseFloatError, ParseIntError},
    time,
};
use std::{
    io,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{Metadata, Record};

/// Main error struct for `AFLGo`
#[derive(Debug)]
pub enum Error {
    /// Serialization error
    Serialize(String),
    /// File related error
    File(io::Error),
    /// Key not in Map
    KeyNotFound(String),
    /// You're holding it wrong
    IllegalState(String),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String),
    /// Something else happened
    Unknown(String),
}

impl Error {
    /// Serialization error
    #[must_use]
    pub fn serialize<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Serialize(arg.into())
    }
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg)
    }
    /// Key not in Map
    #[must_use]
    pub fn key_not_found<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::KeyNotFound(arg.into())
    }
    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }
    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }
    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Serialize(s) => write!(f, "Error in Serialization: `{0}`", &s),
            Self::File(err) => write!(f, "File IO failed: {:?}", &err),
            Self::KeyNotFound(s) => write!(f, "Key `{0}` not found", &s),
            Self::IllegalState(s) => write!(f, "Illegal state: {0}", &s),
            Self::IllegalArgument(s) => write!(f, "Illegal argument: {0}", &s),
            Self::Unknown(s) => write!(f, "Unknown error: {0}", &s),
        }
    }
}

/// Stringify the json serializer error
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialize(format!("{err:?}"))
    }
}

/// Create an `AFLGo` Error from io Error
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Self::illegal_argument(format!("Failed to parse Int: {err:?}"))
    }
}

impl From<ParseFloatError> for Error {
    fn from(err: ParseFloatError) -> Self {
        Self::illegal_argument(format!("Failed to parse Float: {err:?}"))
    }
}

impl std::error::Error for Error {}

/// Current time
#[must_use]
#[inline]
pub fn current_time() -> time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Gets current nanoseconds since [`UNIX_EPOCH`]
#[must_use]
#[inline]
pub fn current_nanos() -> u64 {
    current_time().as_nanos() as u64
}

/// Stderr logger
pub static AFLGO_STDERR_LOGGER: SimpleStderrLogger = SimpleStderrLogger::new();

/// A simple logger struct that logs to stderr when used with [`log::set_logger`].
///
/// Compiler passes talk to the user on stderr, stdout may well be the
/// object file being produced.
#[derive(Debug)]
pub struct SimpleStderrLogger {}

impl Default for SimpleStderrLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleStderrLogger {
    /// Create a new [`log::Log`] logger that will write log to stderr
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// register stderr logger
    pub fn set_logger() -> Result<(), Error> {
        log::set_logger(&AFLGO_STDERR_LOGGER)
            .map_err(|_| Error::unknown("Failed to register logger"))
    }
}

impl log::Log for SimpleStderrLogger {
    #[inline]
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}
