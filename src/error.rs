//! Error taxonomy for the registry engine and its components.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The single error type returned by every library-level operation.
///
/// Variants map onto both an OCI Distribution error body (`code`/`message`)
/// and a control-plane HTTP status, via [`RegistryError::oci_code`] and
/// [`RegistryError::status_code`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("client validation failed: {0}")]
    ClientValidation(String),

    #[error("repository or manifest not found: {0}")]
    NotFound(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("quota exceeded: used {used} bytes of {quota} byte quota")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("tag is immutable: {0}")]
    TagImmutable(String),

    #[error("transient infrastructure failure: {0}")]
    Transient(String),

    #[error("internal fault: {0}")]
    Fatal(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// OCI Distribution error code, for error bodies of shape
    /// `{"errors":[{"code":...,"message":...}]}`.
    pub fn oci_code(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => "NAME_UNKNOWN",
            RegistryError::TagImmutable(_) => "TAG_INVALID",
            RegistryError::Unauthorized
            | RegistryError::Forbidden(_)
            | RegistryError::QuotaExceeded { .. }
            | RegistryError::PolicyDenied(_) => "DENIED",
            _ => "UNKNOWN",
        }
    }

    /// HTTP status code for this error on both the OCI data path and the
    /// control plane.
    pub fn status_code(&self) -> u16 {
        match self {
            RegistryError::ClientValidation(_) => 400,
            RegistryError::Unauthorized => 401,
            RegistryError::Forbidden(_)
            | RegistryError::QuotaExceeded { .. }
            | RegistryError::PolicyDenied(_)
            | RegistryError::TagImmutable(_) => 403,
            RegistryError::NotFound(_) => 404,
            RegistryError::Transient(_) => 503,
            RegistryError::Fatal(_)
            | RegistryError::Storage(_)
            | RegistryError::Serialization(_)
            | RegistryError::Network(_)
            | RegistryError::Io(_) => 500,
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for RegistryError {
    fn from(e: tokio_postgres::Error) -> Self {
        RegistryError::Fatal(format!("postgres: {e}"))
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for RegistryError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        RegistryError::Transient(format!("postgres pool: {e}"))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for RegistryError {
    fn from(e: redis::RedisError) -> Self {
        RegistryError::Transient(format!("redis: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oci_codes() {
        assert_eq!(
            RegistryError::NotFound("x".into()).oci_code(),
            "NAME_UNKNOWN"
        );
        assert_eq!(
            RegistryError::TagImmutable("x".into()).oci_code(),
            "TAG_INVALID"
        );
        assert_eq!(RegistryError::Unauthorized.oci_code(), "DENIED");
        assert_eq!(
            RegistryError::QuotaExceeded { used: 1, quota: 1 }.oci_code(),
            "DENIED"
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(RegistryError::Unauthorized.status_code(), 401);
        assert_eq!(RegistryError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(RegistryError::NotFound("x".into()).status_code(), 404);
        assert_eq!(RegistryError::Fatal("x".into()).status_code(), 500);
    }
}
