//! Unattended ACME (RFC 8555) certificate issuance with DNS-01 challenges.
//!
//! A [`SessionBuilder`] registers or loads an account and creates or loads an order. The
//! resulting [`IssuanceSession`] is then driven one step at a time: publish the TXT records
//! (by hand or through a [`DynamicDnsProvider`]), check propagation, trigger validation,
//! finalize, export. The ACME transport itself is supplied by the caller through
//! [`AcmeConnector`].

pub mod acme;
pub mod builder;
pub mod cert;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod error;
pub mod poll;
pub mod session;
pub mod state;

pub use acme::client::{AccountKey, AcmeConnector, AcmeProtocol};
pub use builder::{SessionBuilder, fetch_terms_of_service};
pub use config::{Environment, KeyAlgorithm, SessionConfig};
pub use dns::automation::{DynamicDnsOutcome, DynamicDnsProvider};
pub use error::{IssuanceError, IssueResult};
pub use session::{AuthorizationChallenge, ExportedCertificate, IssuanceSession};

pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
