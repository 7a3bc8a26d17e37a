use crate::acme::client::AccountKey;
use crate::error::{IssuanceError, IssueResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

mod toml;

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Which CA directory a session talks to. There is no default: every session
/// must state whether it runs against the rate-limited production CA.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn default_directory(&self) -> &'static str {
        match self {
            Environment::Staging => LETS_ENCRYPT_STAGING,
            Environment::Production => LETS_ENCRYPT_PRODUCTION,
        }
    }
}

/// Key type of the certificate (not the account) key generated at finalization.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

/// Everything needed to build an [`IssuanceSession`](crate::session::IssuanceSession).
///
/// Fields may be set directly or through the chained helpers. Nothing is validated until
/// [`SessionBuilder::new`](crate::builder::SessionBuilder::new) and
/// [`SessionBuilder::build`](crate::builder::SessionBuilder::build) see the config as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub work_dir: PathBuf,
    pub environment: Environment,
    #[serde(default)]
    pub accept_terms_of_service: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    /// Overrides the Let's Encrypt directory of `environment` (private CAs, Pebble, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_url: Option<Url>,
    /// Load `account.key` and, if present, `order.uri` from the work directory.
    #[serde(default)]
    pub resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_location: Option<Url>,
    #[serde(skip)]
    pub account_key: Option<AccountKey>,
    #[serde(default)]
    pub certificate_key: KeyAlgorithm,
}

impl SessionConfig {
    pub fn new(work_dir: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            work_dir: work_dir.into(),
            environment,
            accept_terms_of_service: false,
            emails: Vec::new(),
            domains: Vec::new(),
            directory_url: None,
            resume: false,
            order_location: None,
            account_key: None,
            certificate_key: KeyAlgorithm::default(),
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        push_unique(&mut self.emails, email.into().trim().to_string());
        self
    }

    pub fn emails<I, S>(self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        emails
            .into_iter()
            .fold(self, |config, email| config.email(email))
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        push_unique(&mut self.domains, domain.into().trim().to_lowercase());
        self
    }

    pub fn domains<I, S>(self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        domains
            .into_iter()
            .fold(self, |config, domain| config.domain(domain))
    }

    pub fn account_key(mut self, key: AccountKey) -> Self {
        self.account_key = Some(key);
        self
    }

    pub fn order_location(mut self, location: Url) -> Self {
        self.order_location = Some(location);
        self
    }

    pub fn resume_from_store(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn accept_terms_of_service(mut self, accept: bool) -> Self {
        self.accept_terms_of_service = accept;
        self
    }

    pub fn directory_url(mut self, url: Url) -> Self {
        self.directory_url = Some(url);
        self
    }

    pub fn certificate_key(mut self, algorithm: KeyAlgorithm) -> Self {
        self.certificate_key = algorithm;
        self
    }

    /// The CA directory this config points at.
    pub fn directory(&self) -> IssueResult<Url> {
        resolve_directory(self.environment, self.directory_url.as_ref())
    }

    /// Contact URLs for account registration. Plain addresses become `mailto:` URIs.
    pub fn contact_urls(&self) -> IssueResult<Vec<Url>> {
        self.emails.iter().map(|email| mailto(email)).collect()
    }

    pub(crate) fn normalize(&mut self) {
        let emails = std::mem::take(&mut self.emails);
        for email in emails {
            push_unique(&mut self.emails, email.trim().to_string());
        }
        let domains = std::mem::take(&mut self.domains);
        for domain in domains {
            push_unique(&mut self.domains, domain.trim().to_lowercase());
        }
    }
}

pub(crate) fn resolve_directory(
    environment: Environment,
    directory_url: Option<&Url>,
) -> IssueResult<Url> {
    match directory_url {
        Some(url) => Ok(url.clone()),
        None => Url::parse(environment.default_directory()).map_err(|e| {
            IssuanceError::Configuration(format!("invalid {environment} directory URL: {e}"))
        }),
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

fn mailto(email: &str) -> IssueResult<Url> {
    let address = email.strip_prefix("mailto:").unwrap_or(email);
    let valid = match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(IssuanceError::Configuration(format!(
            "{email} is not a valid email address"
        )));
    }
    Url::parse(&format!("mailto:{address}")).map_err(|e| {
        IssuanceError::Configuration(format!("{email} is not a valid email address: {e}"))
    })
}

/// Load a [`SessionConfig`] from a TOML file.
pub fn load<P: AsRef<Path>>(file: P) -> IssueResult<SessionConfig> {
    let mut config = toml::load_toml(file.as_ref())?;
    config.normalize();
    Ok(config)
}

/// Write a [`SessionConfig`] as TOML. The account key is not part of the file.
pub fn save<P: AsRef<Path>>(config: &SessionConfig, file: P) -> IssueResult<()> {
    let file = file.as_ref();
    let rendered = toml::to_toml(config)?;
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IssuanceError::storage(parent, e))?;
    }
    std::fs::write(file, rendered).map_err(|e| IssuanceError::storage(file, e))
}
