use crate::acme::error::{Error as AcmeError, Problem};
use std::path::PathBuf;

pub type IssueResult<T> = Result<T, IssuanceError>;

/// Everything that can go wrong while driving an issuance session.
///
/// None of the operations retry internally. Use [`IssuanceError::is_retryable`] to decide
/// whether a polling loop should try again.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Required input is missing or malformed. Raised before any network call.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The CA's terms of service were not accepted.
    #[error("{0}")]
    Policy(String),
    /// An operation was invoked out of order (e.g. finalize before the order is ready).
    #[error("operation not possible in the current state: {0}")]
    State(String),
    /// A file that an earlier step should have persisted does not exist.
    #[error("{what} not found at {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },
    #[error("{context}")]
    TransientNetwork {
        context: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{context}: {problem}")]
    CertificateAuthority { context: String, problem: Problem },
    #[error("{context}: {message}")]
    Protocol { context: String, message: String },
    /// The dynamic DNS provider rejected an operation.
    #[error("DNS provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
    #[error("failed to access {}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}")]
    Crypto {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl IssuanceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IssuanceError::TransientNetwork { .. } | IssuanceError::TimedOut(_) => true,
            IssuanceError::CertificateAuthority { problem, .. } => {
                problem.is_rate_limit() || problem.is_server_failure() || problem.is_bad_nonce()
            }
            _ => false,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IssuanceError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn crypto(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        IssuanceError::Crypto {
            context,
            source: source.into(),
        }
    }

    pub(crate) fn from_acme(context: impl Into<String>, err: AcmeError) -> Self {
        let context = context.into();
        match err {
            AcmeError::AcmeProblem(problem) => {
                IssuanceError::CertificateAuthority { context, problem }
            }
            AcmeError::ProtocolViolation(message) => IssuanceError::Protocol {
                context,
                message: message.to_string(),
            },
            AcmeError::Transport(source) => IssuanceError::TransientNetwork { context, source },
        }
    }
}

/// Attach an operation description to results of the ACME collaborator.
pub trait AcmeContext<T> {
    fn acme_context(self, context: &str) -> IssueResult<T>;

    fn with_acme_context<C, F>(self, context: F) -> IssueResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> AcmeContext<T> for Result<T, AcmeError> {
    fn acme_context(self, context: &str) -> IssueResult<T> {
        self.map_err(|err| IssuanceError::from_acme(context, err))
    }

    fn with_acme_context<C, F>(self, context: F) -> IssueResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| IssuanceError::from_acme(context(), err))
    }
}
