//! Snapshot error taxonomy.
//!
//! Every variant is fatal to the read or write it occurred in; a snapshot is
//! never partially applied. Signature problems get their own variants,
//! distinct from decode and strategy failures, because they are
//! non-retryable: retrying the same bytes against the same keys can never
//! succeed, and callers may want to alert on them separately.

use baton_types::EngineError;
use thiserror::Error;

/// Error raised while writing or reading a snapshot.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// Envelope or payload bytes did not parse.
    #[error("malformed snapshot: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Reading from a stream failed before parsing began.
    #[error("snapshot read failed: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot's strategy table names a strategy the registry does not
    /// hold. Fail-fast on read, before any payload field is decoded.
    #[error("no marshalling strategy registered under '{0}'")]
    UnknownStrategy(String),

    /// No registered strategy accepts a value being written.
    #[error("no marshalling strategy accepts variable '{0}'")]
    UnsupportedVariable(String),

    /// A variable references a strategy index missing from the envelope's
    /// table.
    #[error("strategy index {0} is not in the snapshot's strategy table")]
    BadStrategyIndex(u32),

    /// A strategy failed to encode or decode one variable.
    #[error("strategy '{strategy}' failed on variable '{name}': {reason}")]
    Strategy {
        strategy: String,
        name: String,
        reason: String,
    },

    /// Signing is configured but the snapshot carries no signature.
    #[error("signing is configured but the snapshot carries no signature")]
    SignatureAbsent,

    /// The snapshot is signed but the reader is not configured for signing.
    #[error("snapshot carries a signature but signing is not configured")]
    SignatureUnexpected,

    /// The signature bytes did not verify against the payload.
    #[error("snapshot signature verification failed for key alias '{0}'")]
    SignatureInvalid(String),

    /// The snapshot names a signing key the reader does not hold.
    #[error("snapshot signed under unknown key alias '{0}'")]
    UnknownKeyAlias(String),

    /// A decoded field held a value the domain model cannot represent.
    #[error("malformed snapshot field: {0}")]
    Malformed(String),
}

impl MarshalError {
    /// Signature variants are never worth retrying against the same bytes.
    pub fn is_signature_failure(&self) -> bool {
        matches!(
            self,
            MarshalError::SignatureAbsent
                | MarshalError::SignatureUnexpected
                | MarshalError::SignatureInvalid(_)
                | MarshalError::UnknownKeyAlias(_)
        )
    }
}

/// Snapshot-backed stores surface marshalling failures through the engine's
/// error type.
impl From<MarshalError> for EngineError {
    fn from(err: MarshalError) -> Self {
        EngineError::IllegalState(err.to_string())
    }
}

pub type MarshalResult<T> = Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_variants_are_flagged_non_retryable() {
        assert!(MarshalError::SignatureAbsent.is_signature_failure());
        assert!(MarshalError::SignatureUnexpected.is_signature_failure());
        assert!(MarshalError::SignatureInvalid("prod".to_string()).is_signature_failure());
        assert!(MarshalError::UnknownKeyAlias("old".to_string()).is_signature_failure());
        assert!(!MarshalError::UnknownStrategy("json".to_string()).is_signature_failure());
    }

    #[test]
    fn test_bridges_into_engine_error() {
        let err: EngineError = MarshalError::UnknownStrategy("json".to_string()).into();
        assert!(matches!(err, EngineError::IllegalState(_)));
        assert!(err.to_string().contains("json"));
    }
}
