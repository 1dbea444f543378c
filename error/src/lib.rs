//! Provides the common error type and associated convenience macros for lazyflow.

use std::convert::Infallible;
use std::fmt;

/// A result of type `T`, or an [`LFError`]
pub type LFResult<T> = Result<T, LFError>;

#[derive(Clone)]
struct ErrorData {
    message: String,
    stack: Vec<String>,
}

impl<T> From<T> for ErrorData
where
    T: fmt::Display,
{
    fn from(message: T) -> Self {
        Self {
            message: message.to_string(),
            stack: vec![],
        }
    }
}

/// The category of an [`LFError`].
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorType {
    BadRequest,
    Conflict,
    CycleDetected,
    Internal,
    NotFound,
    NotReady,
    RegionOutOfBounds,
    TypeMismatch,
    UpstreamComputeFailure,
}

impl fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::BadRequest => "bad request",
            Self::Conflict => "conflict",
            Self::CycleDetected => "cycle detected",
            Self::Internal => "internal error",
            Self::NotFound => "not found",
            Self::NotReady => "not ready",
            Self::RegionOutOfBounds => "region out of bounds",
            Self::TypeMismatch => "type mismatch",
            Self::UpstreamComputeFailure => "upstream compute failure",
        })
    }
}

/// A general error description.
///
/// Errors are cheap to clone so that a single failure can be delivered to every
/// requester waiting on the same computation.
#[derive(Clone)]
pub struct LFError {
    code: ErrorType,
    data: ErrorData,
}

impl LFError {
    /// Returns a new error with the given code and message.
    pub fn new<I: fmt::Display>(code: ErrorType, message: I) -> Self {
        Self {
            code,
            data: message.into(),
        }
    }

    /// Reconstruct an [`LFError`] from its [`ErrorType`], message, and context stack.
    pub fn with_stack<I, S, SI>(code: ErrorType, message: I, stack: S) -> Self
    where
        I: fmt::Display,
        SI: fmt::Display,
        S: IntoIterator<Item = SI>,
    {
        Self {
            code,
            data: ErrorData {
                message: message.to_string(),
                stack: stack.into_iter().map(|msg| msg.to_string()).collect(),
            },
        }
    }

    /// Error indicating that the request is badly-constructed or nonsensical.
    pub fn bad_request<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::BadRequest, info)
    }

    /// Error indicating that a resource was modified concurrently too many times
    /// for the request to complete.
    pub fn conflict<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::Conflict, info)
    }

    /// Error indicating that a new connection would introduce a cycle into the graph.
    pub fn cycle_detected<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::CycleDetected, info)
    }

    /// A truly unexpected error, for which the calling application cannot define any specific
    /// handling behavior.
    pub fn internal<I: fmt::Display>(info: I) -> Self {
        log::error!("{}", info);
        Self::new(ErrorType::Internal, info)
    }

    /// Error indicating that the requested operator or slot does not exist.
    pub fn not_found<I: fmt::Display>(locator: I) -> Self {
        Self::new(ErrorType::NotFound, locator)
    }

    /// Error indicating that a slot has neither a value nor a connection.
    pub fn not_ready<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::NotReady, info)
    }

    /// Error indicating that a requested region is not contained in the declared shape.
    pub fn out_of_bounds<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::RegionOutOfBounds, info)
    }

    /// Error indicating that two slots cannot be connected, or a value does not fit a slot.
    pub fn type_mismatch<I: fmt::Display>(info: I) -> Self {
        Self::new(ErrorType::TypeMismatch, info)
    }

    /// Error raised by a compute kernel or data source.
    pub fn upstream<I: fmt::Display>(cause: I) -> Self {
        Self::new(ErrorType::UpstreamComputeFailure, cause)
    }

    pub fn code(&self) -> ErrorType {
        self.code
    }

    pub fn message(&'_ self) -> &'_ str {
        &self.data.message
    }

    pub fn stack(&'_ self) -> &'_ [String] {
        &self.data.stack
    }

    /// Push a frame of context onto this error's stack, preserving its [`ErrorType`].
    pub fn consume<I: fmt::Display>(mut self, info: I) -> Self {
        self.data.stack.push(info.to_string());
        self
    }
}

impl std::error::Error for LFError {}

impl From<Infallible> for LFError {
    fn from(_: Infallible) -> Self {
        Self::internal("an unanticipated error occurred--please file a bug report")
    }
}

impl fmt::Debug for LFError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)?;

        for frame in &self.data.stack {
            write!(f, "\n  {}", frame)?;
        }

        Ok(())
    }
}

impl fmt::Display for LFError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.data.message)
    }
}

#[macro_export]
macro_rules! bad_request {
    ($($t:tt)*) => {{
        $crate::LFError::bad_request(format!($($t)*))
    }}
}

#[macro_export]
macro_rules! internal {
    ($($t:tt)*) => {{
        $crate::LFError::internal(format!($($t)*))
    }}
}

#[macro_export]
macro_rules! not_found {
    ($($t:tt)*) => {{
        $crate::LFError::not_found(format!($($t)*))
    }}
}

#[macro_export]
macro_rules! not_ready {
    ($($t:tt)*) => {{
        $crate::LFError::not_ready(format!($($t)*))
    }}
}

#[macro_export]
macro_rules! out_of_bounds {
    ($($t:tt)*) => {{
        $crate::LFError::out_of_bounds(format!($($t)*))
    }}
}

#[macro_export]
macro_rules! type_mismatch {
    ($($t:tt)*) => {{
        $crate::LFError::type_mismatch(format!($($t)*))
    }}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_keeps_code() {
        let err = LFError::upstream("disk on fire")
            .consume("while computing block [0, 1]")
            .consume("while reading slot Output");

        assert_eq!(err.code(), ErrorType::UpstreamComputeFailure);
        assert_eq!(err.message(), "disk on fire");
        assert_eq!(err.stack().len(), 2);
        assert_eq!(err.to_string(), "upstream compute failure: disk on fire");
    }

    #[test]
    fn test_macros() {
        let err = out_of_bounds!("{} does not contain {}", "[4]", "[3..5]");
        assert_eq!(err.code(), ErrorType::RegionOutOfBounds);
        assert_eq!(err.message(), "[4] does not contain [3..5]");

        let err = type_mismatch!("expected {}", "u8");
        assert_eq!(err.code(), ErrorType::TypeMismatch);
    }
}
