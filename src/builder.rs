use crate::acme::client::{AccountHandle, AccountKey, AcmeConnector, AcmeProtocol};
use crate::acme::object::{AccountStatus, NewOrderRequest, Order};
use crate::config::{Environment, SessionConfig, resolve_directory};
use crate::dns::resolver::{DnsChallengeResolver, TxtLookup};
use crate::error::{AcmeContext, IssuanceError, IssueResult};
use crate::session::IssuanceSession;
use crate::state::{IdentityStore, WorkDirLock};
use std::sync::Arc;
use tracing::{debug, error, info, info_span};
use url::Url;

/// Fetch the terms of service of a CA, so that they can be shown before
/// [`SessionConfig::accept_terms_of_service`] is set.
pub async fn fetch_terms_of_service(
    connector: &dyn AcmeConnector,
    environment: Environment,
    directory_url: Option<&Url>,
) -> IssueResult<Option<Url>> {
    let directory = resolve_directory(environment, directory_url)?;
    let protocol = connector
        .connect(&directory)
        .await
        .with_acme_context(|| format!("Failed to reach CA directory {directory}"))?;
    protocol
        .terms_of_service()
        .await
        .acme_context("Failed to fetch terms of service")
}

/// Turns a [`SessionConfig`] into a bound [`IssuanceSession`].
///
/// Either a new account is registered (emails and domains required) or an existing account key
/// is used, taken from the config or, with [`SessionConfig::resume`], from the work directory.
///
/// A newly registered account key is written to `account.key` right after registration and
/// never again by anything else. If that write fails the account exists at the CA but is lost
/// locally; the error is logged with the account URL and returned. Registration is refused
/// before contacting the CA when the work directory already holds an `account.key`.
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Arc<dyn AcmeConnector>,
    txt_lookup: Option<Box<dyn TxtLookup>>,
}

enum AccountSource {
    Register { contacts: Vec<Url> },
    Existing(AccountKey),
}

impl SessionBuilder {
    /// Fails with [`IssuanceError::Policy`] unless the terms of service were accepted. Nothing
    /// touches the network or the work directory before that check.
    pub fn new(mut config: SessionConfig, connector: Arc<dyn AcmeConnector>) -> IssueResult<Self> {
        if !config.accept_terms_of_service {
            return Err(IssuanceError::Policy(
                "the terms of service of the CA must be accepted before issuing certificates"
                    .to_string(),
            ));
        }
        config.normalize();
        Ok(Self {
            config,
            connector,
            txt_lookup: None,
        })
    }

    /// Use `lookup` instead of the system resolver for DNS proof checks.
    pub fn with_txt_lookup(mut self, lookup: Box<dyn TxtLookup>) -> Self {
        self.txt_lookup = Some(lookup);
        self
    }

    pub async fn build(self) -> IssueResult<IssuanceSession> {
        let config = self.config;
        let directory = config.directory()?;
        let registering = config.account_key.is_none() && !config.resume;
        if registering {
            validate_registration(&config)?;
        }

        let store = IdentityStore::new(&config.work_dir);
        store.create_work_dir().await?;
        let lock = WorkDirLock::acquire(store.work_dir()).await?;

        let account_source = match (config.account_key.clone(), config.resume) {
            (Some(key), _) => AccountSource::Existing(key),
            (None, true) => AccountSource::Existing(store.load_account_key().await?),
            (None, false) => {
                if store.has_account_key().await? {
                    return Err(IssuanceError::Configuration(format!(
                        "{} already holds an account key; use resume_from_store() or \
                         account_key(..) instead of registering a new account",
                        store.account_key_path().display()
                    )));
                }
                AccountSource::Register {
                    contacts: config.contact_urls()?,
                }
            }
        };
        let order_location = match &config.order_location {
            Some(location) => Some(location.clone()),
            None if config.resume => store.load_order_location().await?,
            None => None,
        };
        if order_location.is_none() && config.domains.is_empty() {
            return Err(IssuanceError::Configuration(
                "at least one domain is required to create an order".to_string(),
            ));
        }

        info!("Using {} CA directory {directory}", config.environment);
        let protocol = self
            .connector
            .connect(&directory)
            .await
            .with_acme_context(|| format!("Failed to reach CA directory {directory}"))?;

        let account = match account_source {
            AccountSource::Register { contacts } => {
                register_account(protocol.as_ref(), &store, &contacts).await?
            }
            AccountSource::Existing(key) => load_account(protocol.as_ref(), key).await?,
        };

        let (order_location, order) = match order_location {
            Some(location) => {
                debug!("Loading existing order {location}");
                let order = protocol
                    .get_order(&account, &location)
                    .await
                    .with_acme_context(|| format!("Failed to load order {location}"))?;
                (location, order)
            }
            None => create_order(protocol.as_ref(), &account, &config.domains).await?,
        };
        store.save_order_location(&order_location).await?;
        info!(
            "Order {order_location} for {} is {}",
            order.domains().join(", "),
            order.status
        );

        let span = info_span!("issuance_session", order = %order_location);
        let resolver = match self.txt_lookup {
            Some(lookup) => DnsChallengeResolver::new(lookup),
            None => DnsChallengeResolver::default(),
        };
        Ok(IssuanceSession::new(
            protocol,
            account,
            order_location,
            order,
            store,
            resolver,
            config.certificate_key,
            span,
            lock,
        ))
    }
}

fn validate_registration(config: &SessionConfig) -> IssueResult<()> {
    if config.domains.is_empty() {
        return Err(IssuanceError::Configuration(
            "at least one domain is required to register a new account".to_string(),
        ));
    }
    if config.emails.is_empty() {
        return Err(IssuanceError::Configuration(
            "at least one email address is required to register a new account".to_string(),
        ));
    }
    config.contact_urls().map(|_| ())
}

async fn register_account(
    protocol: &dyn AcmeProtocol,
    store: &IdentityStore,
    contacts: &[Url],
) -> IssueResult<AccountHandle> {
    let (account, _) = protocol
        .new_account(contacts, true)
        .await
        .acme_context("Failed to register a new account")?;
    info!("Registered new account {}", account.url);
    if let Err(e) = store.save_account_key(&account.key).await {
        error!(
            "Account {} was registered at the CA, but its key could not be stored and is lost: {e}",
            account.url
        );
        return Err(e);
    }
    debug!("Stored account key in {}", store.account_key_path().display());
    Ok(account)
}

async fn load_account(protocol: &dyn AcmeProtocol, key: AccountKey) -> IssueResult<AccountHandle> {
    let (account, resource) = protocol
        .load_account(&key)
        .await
        .acme_context("Failed to load the existing account")?;
    if resource.status != AccountStatus::Valid {
        return Err(IssuanceError::State(format!(
            "account {} is {}",
            account.url, resource.status
        )));
    }
    info!("Loaded existing account {}", account.url);
    Ok(account)
}

async fn create_order(
    protocol: &dyn AcmeProtocol,
    account: &AccountHandle,
    domains: &[String],
) -> IssueResult<(Url, Order)> {
    let request = NewOrderRequest::for_domains(domains.iter().cloned());
    let (location, order) = protocol
        .new_order(account, &request)
        .await
        .acme_context("Failed to create a new order")?;
    debug!("Order URL: {location}");
    Ok((location, order))
}
