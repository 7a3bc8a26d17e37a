use crate::acme::object::Identifier;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type ProtocolResult<T> = Result<T, Error>;

/// Failure reported by an [`AcmeProtocol`](crate::acme::client::AcmeProtocol) implementation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The CA reported a problem: {0}")]
    AcmeProblem(Problem),
    #[error("ACME protocol specification violated: {0}")]
    ProtocolViolation(&'static str),
    /// HTTP, TLS, or any other failure to reach the CA.
    #[error(transparent)]
    Transport(anyhow::Error),
}

impl From<Problem> for Error {
    fn from(err: Problem) -> Error {
        Error::AcmeProblem(err)
    }
}

pub const ACME_URN: &str = "urn:ietf:params:acme:error:";
pub const ACME_BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";
pub const ACME_RATE_LIMITED: &str = "urn:ietf:params:acme:error:rateLimited";
pub const ACME_SERVER_INTERNAL: &str = "urn:ietf:params:acme:error:serverInternal";

/// An RFC 7807 problem document as returned by ACME servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

impl Problem {
    pub fn new(typ: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            typ: typ.into(),
            detail: Some(detail.into()),
            subproblems: Vec::new(),
        }
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.typ == ACME_BAD_NONCE || self.subproblems.iter().any(|sub| sub.typ == ACME_BAD_NONCE)
    }

    pub fn is_rate_limit(&self) -> bool {
        self.typ == ACME_RATE_LIMITED
            || self.subproblems.iter().any(|sub| sub.typ == ACME_RATE_LIMITED)
    }

    pub fn is_server_failure(&self) -> bool {
        self.typ == ACME_SERVER_INTERNAL
            || self
                .subproblems
                .iter()
                .any(|sub| sub.typ == ACME_SERVER_INTERNAL)
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let typ = self.typ.strip_prefix(ACME_URN).unwrap_or(&self.typ);
        if let Some(detail) = &self.detail {
            write!(f, "{detail} ({typ})")?;
        } else {
            write!(f, "{typ}")?;
        }
        for subproblem in &self.subproblems {
            write!(f, "\nadditionally, the server reported:\n{subproblem}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

impl Display for Subproblem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let typ = self.typ.strip_prefix(ACME_URN).unwrap_or(&self.typ);
        if let Some(identifier) = &self.identifier {
            write!(f, "{identifier}: ")?;
        }
        match &self.detail {
            Some(detail) => write!(f, "{detail} ({typ})"),
            None => write!(f, "{typ}"),
        }
    }
}
