use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::types::ConsumerId;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to the engine WebSocket (open failure, socket error, supervisor gone)
    Transport,
    /// A consumer could not be reached during delivery
    Delivery,
    /// Error related to an unsupported control-surface operation
    Operation,
    /// Error reported by the key-value store backend
    Store,
    /// Error related to invalid input such as a malformed endpoint
    Validation,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        StoreFailure {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn unreachable(consumer: ConsumerId) -> Self {
        Unreachable { consumer }.into()
    }

    pub fn unrecognized_operation<S: Into<String>>(operation: S) -> Self {
        UnrecognizedOperation {
            operation: operation.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl StdError for Validation {}

/// The key-value backend failed to complete a request.
#[non_exhaustive]
#[derive(Debug)]
pub struct StoreFailure {
    pub reason: String,
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store failure: {}", self.reason)
    }
}

impl StdError for StoreFailure {}

/// A consumer that no longer accepts deliveries.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct Unreachable {
    pub consumer: ConsumerId,
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer {} is unreachable", self.consumer)
    }
}

impl StdError for Unreachable {}

#[non_exhaustive]
#[derive(Debug)]
pub struct UnrecognizedOperation {
    pub operation: String,
}

impl fmt::Display for UnrecognizedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized operation: {}", self.operation)
    }
}

impl StdError for UnrecognizedOperation {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<StoreFailure> for Error {
    fn from(err: StoreFailure) -> Self {
        Error::with_source(Kind::Store, err)
    }
}

impl From<Unreachable> for Error {
    fn from(err: Unreachable) -> Self {
        Error::with_source(Kind::Delivery, err)
    }
}

impl From<UnrecognizedOperation> for Error {
    fn from(err: UnrecognizedOperation) -> Self {
        Error::with_source(Kind::Operation, err)
    }
}
