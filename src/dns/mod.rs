//! DNS side of DNS-01 issuance: names, public TXT lookups, and record publication through a
//! dynamic DNS provider.

pub mod automation;
pub mod name;
pub mod resolver;
