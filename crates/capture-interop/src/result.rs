use core::fmt::Display;

use thiserror::Error;

/// A shortcut for `Result<T, BackendError>`.
pub type BackendResult<T> = Result<T, BackendError>;

/// A failed call into a display or compute backend, labelled with the call that failed.
#[derive(Debug, Error)]
pub struct BackendError {
    call: &'static str,
    #[source]
    source: BackendErrorSource,
}

/// Possible sources for a [`BackendError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendErrorSource {
    /// A native status code.
    #[error("Status code: {0}")]
    Code(i32),

    /// A backend provided description, e.g. a program build log.
    #[error("{0}")]
    Message(String),

    /// Access to the duplicated output was lost, the duplication must be recreated.
    #[error("Access to the output was lost")]
    AccessLost,

    /// The graphics device was removed or reset.
    #[error("The device was removed")]
    DeviceRemoved,

    /// Any other error.
    #[error(transparent)]
    Other(Box<dyn core::error::Error + Send + Sync>),
}

impl BackendError {
    /// Create a new BackendError from a source and a label.
    pub fn new(source: BackendErrorSource, call: &'static str) -> Self {
        Self { call, source }
    }

    /// Create a new BackendError from a native status code and a label.
    pub fn from_code(code: i32, call: &'static str) -> Self {
        Self::new(BackendErrorSource::Code(code), call)
    }

    /// Create a new BackendError from a message and a label.
    pub fn message<S: Into<String>>(message: S, call: &'static str) -> Self {
        Self::new(BackendErrorSource::Message(message.into()), call)
    }

    /// Create a new BackendError signalling that access to the output was lost.
    pub fn access_lost(call: &'static str) -> Self {
        Self::new(BackendErrorSource::AccessLost, call)
    }

    /// Create a new BackendError wrapping any other error.
    pub fn other<E>(error: E, call: &'static str) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        Self::new(BackendErrorSource::Other(Box::new(error)), call)
    }

    /// The call that failed.
    pub fn call(&self) -> &'static str {
        self.call
    }

    /// The source of the failure.
    pub fn kind(&self) -> &BackendErrorSource {
        &self.source
    }

    /// If the failure can be recovered from by recreating the duplication.
    pub fn is_access_lost(&self) -> bool {
        matches!(self.source, BackendErrorSource::AccessLost)
    }
}

impl Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} call failed:\n{}", self.call, self.source)
    }
}
