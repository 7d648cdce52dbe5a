//! Stable error taxonomy.
//!
//! Callers match on [`ErrorKind`], never on a specific struct or error message -
//! wire errors, validation failures, and crypto failures all normalize down to one
//! of these ten kinds. The structured per-component error enums below exist so that
//! `?` still carries a useful `Display`/source chain; [`Error::kind`] is what
//! application code should actually branch on.

use miette::Diagnostic;
use thiserror::Error;

/// The stable, matchable kind of a DynamORM error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ItemNotFound,
    ConditionFailed,
    InvalidModel,
    MissingPrimaryKey,
    InvalidOperator,
    InvalidField,
    EncryptionNotConfigured,
    InvalidEncryptedEnvelope,
    Decode,
    IndexNotUsable,
    Transport,
}

/// Error raised by [`crate::registry::SchemaRegistry::register`] when a record
/// type's `#[dynamorm(...)]` tags are inconsistent.
#[derive(Error, Diagnostic, Debug)]
#[error("invalid model `{type_name}`: {reason}")]
pub struct ModelError {
    pub type_name: &'static str,
    pub reason: String,
}

/// Error raised while converting a native record to or from an attribute-value map.
#[derive(Error, Diagnostic, Debug)]
pub enum MarshalError {
    #[error("field `{0}` could not be decoded: type mismatch")]
    Decode(String),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Error raised by the envelope encryption service.
#[derive(Error, Diagnostic, Debug)]
pub enum CryptoError {
    #[error("model has encrypted fields but no KMS key reference is configured")]
    EncryptionNotConfigured,
    #[error("encrypted envelope is invalid: {0}")]
    InvalidEnvelope(String),
    #[error("KMS returned a plaintext data key of {0} bytes, expected 32")]
    BadDataKeyLength(usize),
    #[error("update expression is not supported for encrypted field `{0}`: {1}")]
    UnsupportedUpdateExpression(String, &'static str),
    #[error("KMS request failed: {0}")]
    Kms(String),
}

/// Error raised by the expression builder's hardening rules.
#[derive(Error, Diagnostic, Debug)]
pub enum ExpressionError {
    #[error("invalid operator `{0}`")]
    InvalidOperator(String),
    #[error("invalid field name `{0}`: {1}")]
    InvalidField(String, &'static str),
    #[error("value for `{0}` exceeds the allowed length")]
    ValueTooLarge(String),
    #[error("`IN` accepts at most 100 values, got {0}")]
    TooManyInValues(usize),
    #[error("string contains a disallowed pattern: `{0}`")]
    DangerousPattern(String),
}

/// Error raised when the query planner cannot satisfy a predicate set.
#[derive(Error, Diagnostic, Debug)]
pub enum PlannerError {
    #[error("index `{0}` cannot satisfy the given predicates: {1}")]
    IndexNotUsable(String, String),
}

/// A single failing action inside a cancelled `TransactWriteItems` call.
#[derive(Debug, Clone)]
pub struct TransactionFailure {
    pub operation_index: usize,
    pub operation_kind: String,
    pub reason_code: String,
}

/// Error raised by transactional writes when DynamoDB cancels the transaction.
#[derive(Error, Diagnostic, Debug)]
#[error("transaction cancelled at action {}: {} ({})", .0.operation_index, .0.operation_kind, .0.reason_code)]
pub struct TransactionError(pub TransactionFailure);

/// Error raised by the operation executor.
#[derive(Error, Diagnostic, Debug)]
pub enum ExecutorError {
    #[error("item not found")]
    ItemNotFound,
    #[error("conditional write failed")]
    ConditionFailed,
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("primary key is incomplete for this operation")]
    MissingPrimaryKey,
    #[error("caller-supplied version must be non-zero for update()")]
    ZeroVersion,
    #[error("wire transport error (retriable={retriable}): {message}")]
    Transport { message: String, retriable: bool },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
}

/// The top-level error type returned by every public DynamORM operation.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl Error {
    /// The stable kind this error belongs to, for match-by-kind error handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Model(_) => ErrorKind::InvalidModel,
            Error::Marshal(MarshalError::Model(_)) => ErrorKind::InvalidModel,
            Error::Marshal(_) => ErrorKind::Decode,
            Error::Crypto(CryptoError::EncryptionNotConfigured) => {
                ErrorKind::EncryptionNotConfigured
            }
            Error::Crypto(CryptoError::InvalidEnvelope(_)) => ErrorKind::InvalidEncryptedEnvelope,
            Error::Crypto(CryptoError::BadDataKeyLength(_)) => {
                ErrorKind::InvalidEncryptedEnvelope
            }
            Error::Crypto(CryptoError::UnsupportedUpdateExpression(..)) => {
                ErrorKind::InvalidModel
            }
            Error::Crypto(CryptoError::Kms(_)) => ErrorKind::Transport,
            Error::Expression(ExpressionError::InvalidOperator(_)) => ErrorKind::InvalidOperator,
            Error::Expression(ExpressionError::TooManyInValues(_)) => ErrorKind::InvalidOperator,
            Error::Expression(_) => ErrorKind::InvalidField,
            Error::Planner(PlannerError::IndexNotUsable(..)) => ErrorKind::IndexNotUsable,
            Error::Executor(ExecutorError::ItemNotFound) => ErrorKind::ItemNotFound,
            Error::Executor(ExecutorError::ConditionFailed) => ErrorKind::ConditionFailed,
            Error::Executor(ExecutorError::Transaction(_)) => ErrorKind::ConditionFailed,
            Error::Executor(ExecutorError::MissingPrimaryKey) => ErrorKind::MissingPrimaryKey,
            Error::Executor(ExecutorError::ZeroVersion) => ErrorKind::MissingPrimaryKey,
            Error::Executor(ExecutorError::Transport { .. }) => ErrorKind::Transport,
            Error::Executor(ExecutorError::Model(_)) => ErrorKind::InvalidModel,
            Error::Executor(ExecutorError::Marshal(_)) => ErrorKind::Decode,
            Error::Executor(ExecutorError::Crypto(inner)) => {
                Error::Crypto(match inner {
                    CryptoError::EncryptionNotConfigured => CryptoError::EncryptionNotConfigured,
                    CryptoError::InvalidEnvelope(s) => CryptoError::InvalidEnvelope(s.clone()),
                    CryptoError::BadDataKeyLength(n) => CryptoError::BadDataKeyLength(*n),
                    CryptoError::UnsupportedUpdateExpression(f, r) => {
                        CryptoError::UnsupportedUpdateExpression(f.clone(), r)
                    }
                    CryptoError::Kms(s) => CryptoError::Kms(s.clone()),
                })
                .kind()
            }
            Error::Executor(ExecutorError::Expression(_)) => ErrorKind::InvalidField,
            Error::Executor(ExecutorError::Planner(_)) => ErrorKind::IndexNotUsable,
        }
    }

    /// Whether this error is safe to retry at the wire layer. Only `Transport`
    /// errors flagged retriable by the transport normalization in
    /// [`crate::executor`] are retriable; conditional failures never are.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Executor(ExecutorError::Transport {
                retriable: true,
                ..
            })
        )
    }
}

/// Normalizes a raw transport-layer failure message into an [`ExecutorError`]:
/// throttling/5xx are retriable transport errors,
/// `ConditionalCheckFailedException` becomes [`ExecutorError::ConditionFailed`],
/// `ResourceNotFoundException` becomes [`ExecutorError::ItemNotFound`] only when it
/// names the specific item (the caller tells us this via `item_specific`).
pub fn normalize_transport_error(code: &str, message: String, item_specific: bool) -> ExecutorError {
    match code {
        "ConditionalCheckFailedException" => ExecutorError::ConditionFailed,
        "ResourceNotFoundException" if item_specific => ExecutorError::ItemNotFound,
        "ProvisionedThroughputExceededException"
        | "ThrottlingException"
        | "RequestLimitExceeded"
        | "InternalServerError" => ExecutorError::Transport {
            message,
            retriable: true,
        },
        _ => ExecutorError::Transport {
            message,
            retriable: false,
        },
    }
}
