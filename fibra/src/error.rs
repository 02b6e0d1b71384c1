use std::any::Any;
use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

/// Result type returned by tasks, futures and the [`parallel`] combinator.
///
/// [`parallel`]: crate::parallel()
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A centralized error type for everything a task can observe while waiting.
///
/// The error is cheap to clone so a resolved [`FutureHandle`] can hand out its
/// stored error to every reader.
///
/// [`FutureHandle`]: crate::FutureHandle
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The wrapped callback-style operation reported a failure.
    #[error("{0}")]
    Producer(Arc<anyhow::Error>),

    /// A future was waited on for longer than its configured bound. The
    /// producer itself keeps running, only the waiter is released.
    #[error("future created at {location} timed out after {bound:?}")]
    Timeout {
        bound: Duration,
        location: &'static Location<'static>,
    },

    /// Keyed and positional callbacks were mixed within one `parallel` call.
    #[error("parallel cannot mix keyed callbacks with positional ones")]
    ModeMismatch,

    /// An operation that suspends the current task was invoked outside of one.
    #[error("`{op}` must be called from inside a task")]
    NotInTask { op: &'static str },

    /// The body of a spawned task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// A catch-all for any other type of unexpected error.
    #[error("unexpected error: {0}")]
    Other(Arc<anyhow::Error>),
}

impl Error {
    /// Wraps a producer failure. Errors that already are an [`Error`] (e.g. a
    /// timeout bubbling up through nested futures) keep their variant.
    pub(crate) fn from_producer(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => Error::Producer(Arc::new(err)),
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };

        Error::Panicked(msg)
    }

    pub(crate) fn other(err: anyhow::Error) -> Self {
        Error::Other(Arc::new(err))
    }

    /// Returns true if the error was produced by an expired future timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns true if the error signals misuse of the engine itself rather
    /// than a failure reported by a producer.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::ModeMismatch | Error::NotInTask { .. })
    }

    /// Returns true if the error carries the payload of a panicked task.
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panicked(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Producer(a), Self::Producer(b)) => a.to_string() == b.to_string(),
            (
                Self::Timeout {
                    bound: a,
                    location: la,
                },
                Self::Timeout {
                    bound: b,
                    location: lb,
                },
            ) => a == b && la == lb,
            (Self::ModeMismatch, Self::ModeMismatch) => true,
            (Self::NotInTask { op: a }, Self::NotInTask { op: b }) => a == b,
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            (Self::Other(a), Self::Other(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
