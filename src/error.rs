// Error handling module
// Defines the error taxonomy surfaced to the interface layer

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating identity or uploading
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed application identity, bad endpoint configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Credential expired, revoked or refresh rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation attempted under an insufficient tier
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Timeouts, connection failures and 5xx responses after retries ran out
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// User-initiated cancellation
    #[error("Upload cancelled by user")]
    Cancelled,

    /// The task or its input cannot be processed as given
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Non-retryable rejection from the platform
    #[error("Platform rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Local credential artifact could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Flat classification of [`Error`] for callers that only need the category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Permission,
    TransientNetwork,
    Cancelled,
    InvalidInput,
    Rejected,
    Storage,
}

/// What the user should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Run interactive consent again
    ReLogin,
    /// Retry the whole operation once the network is back
    CheckNetwork,
    /// The file or metadata must change before retrying
    FixInput,
    /// Operator must fix the application identity or settings
    FixConfiguration,
    /// Nothing to do (e.g. user cancelled)
    None,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Permission(_) => ErrorKind::Permission,
            Error::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Map the error to the remediation the interface should offer
    pub fn remediation(&self) -> Remediation {
        match self.kind() {
            ErrorKind::Authentication => Remediation::ReLogin,
            ErrorKind::TransientNetwork => Remediation::CheckNetwork,
            ErrorKind::InvalidInput | ErrorKind::Rejected | ErrorKind::Permission => {
                Remediation::FixInput
            }
            ErrorKind::Configuration | ErrorKind::Storage => Remediation::FixConfiguration,
            ErrorKind::Cancelled => Remediation::None,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientNetwork(_))
    }
}

/// Why a token refresh did not produce a usable credential
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshFailed {
    /// Platform answered `invalid_grant`; the persisted credential was cleared
    #[error("refresh token was revoked: {0}")]
    Revoked(String),

    /// Network failure, 5xx or malformed response; persisted credential kept
    #[error("token refresh failed: {0}")]
    Transient(String),

    /// Credential carries no refresh token (offline access was denied)
    #[error("credential has no refresh token")]
    NoRefreshToken,
}

impl From<RefreshFailed> for Error {
    fn from(e: RefreshFailed) -> Self {
        Error::Authentication(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_distinguishes_relogin_network_and_input() {
        assert_eq!(
            Error::Authentication("expired".into()).remediation(),
            Remediation::ReLogin
        );
        assert_eq!(
            Error::TransientNetwork("timeout".into()).remediation(),
            Remediation::CheckNetwork
        );
        assert_eq!(
            Error::Rejected {
                status: 400,
                message: "bad video".into()
            }
            .remediation(),
            Remediation::FixInput
        );
        assert_eq!(Error::Cancelled.remediation(), Remediation::None);
    }

    #[test]
    fn test_refresh_failure_maps_to_authentication() {
        let err: Error = RefreshFailed::Revoked("invalid_grant".into()).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err: Error = RefreshFailed::Transient("timeout".into()).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Rejected {
            status: 403,
            message: "quotaExceeded".into(),
        };
        assert_eq!(
            err.to_string(),
            "Platform rejected request: 403 - quotaExceeded"
        );
        assert_eq!(Error::Cancelled.to_string(), "Upload cancelled by user");
    }
}
