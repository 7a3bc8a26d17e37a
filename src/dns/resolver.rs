use crate::dns::name::DnsName;
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::lookup::Lookup;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Public DNS TXT lookups.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// All TXT strings published at `name`. Multi-string records are concatenated.
    async fn query_txt(&self, name: &DnsName) -> Result<Vec<String>, Error>;
}

#[derive(Debug)]
pub struct Resolver {
    resolver: hickory_resolver::Resolver<TokioConnectionProvider>,
}

impl Resolver {
    /// Create a new DNS resolver with default settings. The resolver will use the system configuration (`/etc/resolv.conf` or equivalent)
    /// if available, otherwise it falls back to a compiled-in default (currently Cloudflare DNS).
    pub fn new() -> Self {
        let resolver = hickory_resolver::Resolver::builder_tokio()
            .unwrap_or_else(|e| {
                warn!("Failed to create DNS resolver using system configuration, using default servers instead: {e:#}");
                hickory_resolver::Resolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
            })
            .build();
        Self { resolver }
    }

    async fn lookup_generic(&self, source: &DnsName, rtype: RecordType) -> Result<Lookup, Error> {
        let name: hickory_resolver::Name = source.clone().into();
        match self.resolver.lookup(name, rtype).await {
            Ok(lookup) => Ok(lookup),
            // Note: Order matters, because is_no_records_found includes is_nx_domain
            Err(e) if e.is_nx_domain() => Err(Error::NxDomain),
            Err(e) if e.is_no_records_found() => Err(Error::NoRecords(rtype)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtLookup for Resolver {
    async fn query_txt(&self, name: &DnsName) -> Result<Vec<String>, Error> {
        let lookup = self.lookup_generic(name, RecordType::TXT).await?;
        let values = lookup
            .record_iter()
            .filter_map(|record| record.data().as_txt())
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect::<String>()
            })
            .collect();
        Ok(values)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the domain does not exist (NXDOMAIN)")]
    NxDomain,
    #[error("No DNS records found for RR type {0}")]
    NoRecords(RecordType),
    #[error("DNS resolution failed")]
    LookupFailure(#[from] hickory_resolver::ResolveError),
}

/// Looks at the public view of challenge TXT records.
///
/// Lookup failures are never reported: an unreachable resolver and a record that has not
/// propagated yet both mean "not provable yet" to the caller.
pub struct DnsChallengeResolver {
    lookup: Box<dyn TxtLookup>,
}

impl DnsChallengeResolver {
    pub fn new(lookup: Box<dyn TxtLookup>) -> Self {
        Self { lookup }
    }

    pub async fn query_txt_records(&self, name: &DnsName) -> Vec<String> {
        match self.lookup.query_txt(name).await {
            Ok(values) => {
                debug!("Found {} TXT record(s) at {name}", values.len());
                values
            }
            Err(e @ (Error::NxDomain | Error::NoRecords(_))) => {
                debug!("No TXT records at {name}: {e}");
                Vec::new()
            }
            Err(e) => {
                warn!("TXT lookup for {name} failed, treating as no records: {e:#}");
                Vec::new()
            }
        }
    }
}

impl Default for DnsChallengeResolver {
    fn default() -> Self {
        Self::new(Box::new(Resolver::new()))
    }
}

impl std::fmt::Debug for DnsChallengeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsChallengeResolver").finish_non_exhaustive()
    }
}

/// Whether every expected value is among the observed ones. Extra observed values are ignored.
pub fn proof_complete<E, O>(expected: &[E], observed: &[O]) -> bool
where
    E: AsRef<str>,
    O: AsRef<str>,
{
    let observed: HashSet<&str> = observed.iter().map(AsRef::as_ref).collect();
    expected
        .iter()
        .all(|value| observed.contains(value.as_ref()))
}
