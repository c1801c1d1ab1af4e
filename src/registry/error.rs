use thiserror::Error;

use crate::version::VersionParseError;

/// Primary error type for registry operations.
///
/// The first seven variants are client errors (4xx): their display strings
/// are safe to return to the caller verbatim. The rest are server errors
/// (5xx) whose detail is logged but redacted in production responses.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid {field} version: {source}")]
    InvalidVersion {
        field: &'static str,
        source: VersionParseError,
    },

    #[error("a release with version {version} already exists for this module")]
    DuplicateVersion { version: String },

    #[error("you must be signed in to do that")]
    Unauthenticated,

    #[error("you do not have permission to do that")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl RegistryError {
    /// Whether this error is attributable to the caller (4xx).
    pub fn is_client(&self) -> bool {
        !matches!(
            self,
            Self::Store(_) | Self::Artifact(_) | Self::Invariant(_)
        )
    }

    /// HTTP-style status code for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParameter(_) | Self::InvalidVersion { .. } => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::DuplicateVersion { .. } | Self::Conflict(_) => 409,
            Self::Store(_) | Self::Artifact(_) | Self::Invariant(_) => 500,
        }
    }

    /// Message safe to hand to the caller.
    ///
    /// Client errors are returned verbatim. Server errors are redacted when
    /// `production` is set; the full detail goes to the log either way.
    pub fn public_message(&self, production: bool) -> String {
        if self.is_client() || !production {
            self.to_string()
        } else {
            "internal server error".to_string()
        }
    }
}

/// Errors from reading, writing or rewriting release artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive has no metadata.json entry")]
    MissingMetadata,

    #[error("metadata.json is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from best-effort side channels (moderation announcements,
/// notification delivery). Never propagated as a primary result; logged at
/// the call site instead.
#[derive(Debug, Error)]
pub enum SideEffectError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message_in_production() {
        let err = RegistryError::DuplicateVersion {
            version: "1.0.0".to_string(),
        };
        assert!(err.is_client());
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            err.public_message(true),
            "a release with version 1.0.0 already exists for this module"
        );
    }

    #[test]
    fn server_errors_are_redacted_in_production_only() {
        let err = RegistryError::Invariant("module has no owner".to_string());
        assert!(!err.is_client());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(true), "internal server error");
        assert_eq!(
            err.public_message(false),
            "invariant violation: module has no owner"
        );
    }

    #[test]
    fn not_found_variants_carry_distinct_messages() {
        let module = RegistryError::NotFound("module not found");
        let release = RegistryError::NotFound("no matching release");
        assert_ne!(module.to_string(), release.to_string());
        assert_eq!(module.status_code(), 404);
        assert_eq!(release.status_code(), 404);
    }
}
