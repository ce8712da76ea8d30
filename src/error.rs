//! The closed error taxonomy shared by every fallible operation in the crate.
//!
//! Every failure mode in the crate funnels into one `thiserror` enum so
//! callers never have to handle more than one error type.

use std::fmt;

use crate::node::PortHandle;

/// The closed set of error kinds every fallible operation maps onto. Every
/// [`ExecutionError`] maps to exactly one kind via [`ExecutionError::kind`],
/// so callers that only care about the category (e.g. routing a failed
/// message to a node's error port) never need to match the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigInvalid,
    RequiredFieldMissing,
    DuplicateType,
    NotFound,
    NotInitialized,
    LineBusy,
    NotPwm,
    Timeout,
    CtxCancelled,
    IoFailure,
    ProtocolFailure,
    AuthFailure,
    UnsupportedType,
    RuleInvalid,
    SequenceMismatch,
    HalUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::RequiredFieldMissing => "required-field-missing",
            ErrorKind::DuplicateType => "duplicate-type",
            ErrorKind::NotFound => "not-found",
            ErrorKind::NotInitialized => "not-initialized",
            ErrorKind::LineBusy => "line-busy",
            ErrorKind::NotPwm => "not-pwm",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CtxCancelled => "ctx-cancelled",
            ErrorKind::IoFailure => "io-failure",
            ErrorKind::ProtocolFailure => "protocol-failure",
            ErrorKind::AuthFailure => "auth-failure",
            ErrorKind::UnsupportedType => "unsupported-type",
            ErrorKind::RuleInvalid => "rule-invalid",
            ErrorKind::SequenceMismatch => "sequence-mismatch",
            ErrorKind::HalUnavailable => "hal-unavailable",
        };
        f.write_str(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("required field missing: {0}")]
    RequiredFieldMissing(String),

    #[error("node type already registered: {0}")]
    DuplicateType(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("gpio line busy: bcm{0}")]
    LineBusy(u32),

    #[error("pin bcm{0} is not configured for pwm")]
    NotPwm(u32),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("context cancelled")]
    CtxCancelled,

    #[error("i/o failure: {0}")]
    IoFailure(String),

    #[error("protocol failure: {0}")]
    ProtocolFailure(String),

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("unsupported payload type for this operation: {0}")]
    UnsupportedType(String),

    #[error("invalid router rule: {0}")]
    RuleInvalid(String),

    #[error("sequence part mismatch: {0}")]
    SequenceMismatch(String),

    #[error("hal not initialized")]
    HalUnavailable,

    #[error("invalid port handle: {0}")]
    InvalidPortHandle(PortHandle),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Maps this error onto the closed [`ErrorKind`] taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            ExecutionError::RequiredFieldMissing(_) => ErrorKind::RequiredFieldMissing,
            ExecutionError::DuplicateType(_) => ErrorKind::DuplicateType,
            ExecutionError::NotFound(_) => ErrorKind::NotFound,
            ExecutionError::NotInitialized(_) => ErrorKind::NotInitialized,
            ExecutionError::LineBusy(_) => ErrorKind::LineBusy,
            ExecutionError::NotPwm(_) => ErrorKind::NotPwm,
            ExecutionError::Timeout(_) => ErrorKind::Timeout,
            ExecutionError::CtxCancelled => ErrorKind::CtxCancelled,
            ExecutionError::IoFailure(_) => ErrorKind::IoFailure,
            ExecutionError::ProtocolFailure(_) => ErrorKind::ProtocolFailure,
            ExecutionError::AuthFailure(_) => ErrorKind::AuthFailure,
            ExecutionError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            ExecutionError::RuleInvalid(_) => ErrorKind::RuleInvalid,
            ExecutionError::SequenceMismatch(_) => ErrorKind::SequenceMismatch,
            ExecutionError::HalUnavailable => ErrorKind::HalUnavailable,
            ExecutionError::InvalidPortHandle(_) => ErrorKind::NotFound,
            ExecutionError::Io(_) => ErrorKind::IoFailure,
        }
    }

    /// `ctx-cancelled` is the one kind the engine must never log as an
    /// error (propagation policy) — it signals clean shutdown.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecutionError::CtxCancelled)
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
