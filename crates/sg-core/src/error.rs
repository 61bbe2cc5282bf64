use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    /// Submission's logger identifier fails the allow-listed pattern.
    #[error("malformed logger identifier")]
    MalformedIdentifier,
    /// Logger not found or not yet creatable; submission stays pending.
    #[error("unresolvable logger")]
    UnresolvableLogger,
    /// Per-line timestamp parse failure in the delimited format.
    #[error("timestamp parse error")]
    TimestampParse,
    /// Value parse failure; fatal to the whole submission, retryable.
    #[error("value parse error")]
    ValueParse,
    /// Payload structure error (bad JSON, undecodable compression, ...).
    #[error("payload decode error")]
    Decode,
    /// Formula expression compile or evaluation error.
    #[error("expression evaluation error")]
    ExpressionEval,
    /// Storage boundary error.
    #[error("store error")]
    Store,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::MalformedIdentifier => 1001,
            Self::UnresolvableLogger => 1002,
            Self::TimestampParse => 1003,
            Self::ValueParse => 1004,
            Self::Decode => 1005,
            Self::ExpressionEval => 1006,
            Self::Store => 1007,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
