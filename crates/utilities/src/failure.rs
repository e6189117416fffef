use core::{fmt::Display, panic::Location};

use tracing::{debug, error};

/// Logs the error with the message, then panics.
pub fn log_and_panic<Err: Display>(error: Err, message: &str) -> ! {
    error!("{message}: {error}");

    panic!("{message}: {error}");
}

/// Unwrapping with a logged reason, for binaries where a failure is unrecoverable.
pub trait Failure<T> {
    /// Returns the value or logs the failure and panics.
    fn report_and_panic(self, message: &str) -> T;

    /// Returns the value or logs the failure and returns `None`.
    fn report(self, message: &str) -> Option<T>;
}

/// Discards a result whose failure does not matter, leaving a trace in the debug log.
pub trait Ignore {
    /// Ignore the value.
    fn ignore(self);
}

impl<T, E: Display> Failure<T> for Result<T, E> {
    fn report_and_panic(self, message: &str) -> T {
        match self {
            Ok(value) => value,
            Err(error) => log_and_panic(error, message),
        }
    }

    fn report(self, message: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                error!("{message}: {error}");
                None
            }
        }
    }
}

impl<T> Failure<T> for Option<T> {
    fn report_and_panic(self, message: &str) -> T {
        match self {
            Some(value) => value,
            None => log_and_panic("Was None", message),
        }
    }

    fn report(self, message: &str) -> Self {
        if self.is_none() {
            error!("{message}: Was None");
        }

        self
    }
}

impl<T, E> Ignore for Result<T, E> {
    #[track_caller]
    fn ignore(self) {
        if self.is_err() {
            debug!("Ignoring error ({})", Location::caller());
        }
    }
}

impl<T> Ignore for Option<T> {
    #[track_caller]
    fn ignore(self) {
        if self.is_none() {
            debug!("Ignoring None ({})", Location::caller());
        }
    }
}
