use hickory_resolver::Name;
use std::fmt::{Display, Formatter};

/// The label DNS-01 TXT records are published under.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

const TOP_DOMAIN_LABELS: usize = 2;

/// A DNS name, lowercased and treated as fully qualified. Displays without the trailing dot.
#[derive(Debug, Clone, Eq)]
pub struct DnsName {
    inner: Name,
    ascii: String,
    utf8: String,
}

impl DnsName {
    fn trimmed_ascii(name: &Name) -> String {
        let ascii = name.to_ascii();
        ascii
            .strip_suffix(".")
            .map(ToString::to_string)
            .unwrap_or(ascii)
    }

    fn trimmed_utf8(name: &Name) -> String {
        let utf8 = name.to_utf8();
        utf8.strip_suffix(".")
            .map(ToString::to_string)
            .unwrap_or(utf8)
    }

    pub fn as_ascii(&self) -> &str {
        &self.ascii
    }

    pub fn as_utf8(&self) -> &str {
        &self.utf8
    }

    pub fn is_wildcard(&self) -> bool {
        self.inner.is_wildcard()
    }

    /// The registrable domain this name belongs to, approximated as its last two labels
    /// (`www.example.com` becomes `example.com`). Names with fewer labels are returned as they are.
    ///
    /// All DNS-01 proofs below the same top domain share one TXT record name.
    pub fn top_domain(&self) -> DnsName {
        let base = if self.is_wildcard() {
            self.inner.base_name()
        } else {
            self.inner.clone()
        };
        base.trim_to(TOP_DOMAIN_LABELS).into()
    }

    /// `_acme-challenge.<name>`, where a wildcard name loses its `*` label first.
    pub fn to_acme_challenge_name(&self) -> Result<Self, ParseError> {
        let base = if self.is_wildcard() {
            &self.inner.base_name()
        } else {
            &self.inner
        };
        let acme_challenge_name = base.prepend_label(ACME_CHALLENGE_LABEL)?;
        Ok(acme_challenge_name.into())
    }
}

impl PartialEq<Self> for DnsName {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq(&other.inner)
    }
}

impl Display for DnsName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_utf8())
    }
}

impl From<&Name> for DnsName {
    fn from(value: &Name) -> Self {
        // Lowercased and absolute: certificate SANs and TXT record names compare that way
        let mut normalized = value.to_lowercase();
        normalized.set_fqdn(true);
        let ascii = Self::trimmed_ascii(&normalized);
        let utf8 = Self::trimmed_utf8(&normalized);
        Self {
            inner: normalized,
            ascii,
            utf8,
        }
    }
}

impl From<Name> for DnsName {
    fn from(value: Name) -> Self {
        (&value).into()
    }
}

impl From<DnsName> for Name {
    fn from(value: DnsName) -> Self {
        value.inner
    }
}

impl TryFrom<&str> for DnsName {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Name::from_str_relaxed(value)?.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    ParseFailure(#[from] hickory_resolver::proto::ProtoError),
}
