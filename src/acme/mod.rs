//! ACME protocol surface.
//!
//! The RFC 8555 resources as serde types, the error type of protocol operations, and the traits
//! an ACME client implementation has to provide. Nothing in here talks HTTP: nonce handling,
//! JWS signing and transport are the job of the [`client::AcmeProtocol`] implementation.

pub mod client;
pub mod error;
pub mod object;
