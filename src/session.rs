use crate::acme::client::{AccountHandle, AcmeProtocol};
use crate::acme::error::Problem;
use crate::acme::object::{
    AccountStatus, Authorization, AuthorizationStatus, ChallengeStatus, Identifier, Order,
    OrderStatus,
};
use crate::cert;
use crate::config::KeyAlgorithm;
use crate::dns::automation::{DynamicDnsOutcome, DynamicDnsProvider, publish_challenges};
use crate::dns::name::{ACME_CHALLENGE_LABEL, DnsName};
use crate::dns::resolver::{DnsChallengeResolver, proof_complete};
use crate::error::{AcmeContext, IssuanceError, IssueResult};
use crate::state::{IdentityStore, WorkDirLock};
use hickory_resolver::proto::rr::RecordType;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::{Span, debug, info, instrument};
use url::Url;

/// Status of one DNS-01 proof, combining the authorization and its dns-01 challenge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProofStatus {
    Pending,
    /// Validation was triggered and the CA has not decided yet.
    Processing,
    Valid,
    Invalid,
    Expired,
    Revoked,
    Deactivated,
}

impl ProofStatus {
    fn new(authorization: AuthorizationStatus, challenge: ChallengeStatus) -> Self {
        match (authorization, challenge) {
            (AuthorizationStatus::Pending, ChallengeStatus::Processing) => ProofStatus::Processing,
            (AuthorizationStatus::Pending, _) => ProofStatus::Pending,
            (AuthorizationStatus::Valid, _) => ProofStatus::Valid,
            (AuthorizationStatus::Invalid, _) => ProofStatus::Invalid,
            (AuthorizationStatus::Expired, _) => ProofStatus::Expired,
            (AuthorizationStatus::Revoked, _) => ProofStatus::Revoked,
            (AuthorizationStatus::Deactivated, _) => ProofStatus::Deactivated,
        }
    }
}

/// One TXT record the CA expects to see for one identifier of the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationChallenge {
    /// The identifier being authorized, `*.`-prefixed for wildcards.
    pub domain: String,
    pub top_domain: DnsName,
    /// Always `_acme-challenge.<top_domain>`
    pub challenge_name: DnsName,
    pub record_type: RecordType,
    pub expected_value: String,
    pub status: ProofStatus,
    pub authorization_url: Url,
    pub challenge_url: Url,
}

impl AuthorizationChallenge {
    /// The record label below the top domain.
    pub fn sub_label(&self) -> &'static str {
        ACME_CHALLENGE_LABEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub url: Url,
    pub status: AccountStatus,
    /// Contact addresses without the `mailto:` scheme, in the order the CA returned them.
    pub contacts: Vec<String>,
    pub terms_of_service_agreed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    pub location: Url,
    pub domains: Vec<String>,
    pub status: OrderStatus,
    pub expires: Option<OffsetDateTime>,
    pub certificate: Option<Url>,
    pub error: Option<Problem>,
}

impl OrderInfo {
    fn new(location: &Url, order: &Order) -> Self {
        Self {
            location: location.clone(),
            domains: order.domains(),
            status: order.status,
            expires: order.expires,
            certificate: order.certificate.clone(),
            error: order.error.clone(),
        }
    }
}

/// Files written by an export, plus a summary of the issued leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedCertificate {
    pub chain_path: PathBuf,
    pub key_path: PathBuf,
    pub pfx_path: PathBuf,
    pub password_path: PathBuf,
    pub subject: String,
    pub dns_names: Vec<String>,
    pub not_after: OffsetDateTime,
}

/// One account, one order, driven step by step.
///
/// Every operation is a single round of requests and returns as soon as the CA answered.
/// Waiting for authorizations, order readiness or DNS propagation is up to the caller (see
/// [`crate::poll`]). Operations must not run concurrently on one session.
pub struct IssuanceSession {
    protocol: Arc<dyn AcmeProtocol>,
    account: AccountHandle,
    order_location: Url,
    /// Last fetched order. Only used to derive the top domain, never to make decisions.
    order: Mutex<Order>,
    top_domain: OnceCell<DnsName>,
    store: IdentityStore,
    resolver: DnsChallengeResolver,
    certificate_key: KeyAlgorithm,
    span: Span,
    _lock: WorkDirLock,
}

impl std::fmt::Debug for IssuanceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuanceSession")
            .field("account", &self.account.url)
            .field("order", &self.order_location)
            .field("work_dir", &self.store.work_dir())
            .finish_non_exhaustive()
    }
}

impl IssuanceSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        protocol: Arc<dyn AcmeProtocol>,
        account: AccountHandle,
        order_location: Url,
        order: Order,
        store: IdentityStore,
        resolver: DnsChallengeResolver,
        certificate_key: KeyAlgorithm,
        span: Span,
        lock: WorkDirLock,
    ) -> Self {
        Self {
            protocol,
            account,
            order_location,
            order: Mutex::new(order),
            top_domain: OnceCell::new(),
            store,
            resolver,
            certificate_key,
            span,
            _lock: lock,
        }
    }

    pub fn account_url(&self) -> &Url {
        &self.account.url
    }

    pub fn order_location(&self) -> &Url {
        &self.order_location
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    /// The registrable domain of the order's first identifier. Computed once per session.
    pub async fn top_domain(&self) -> IssueResult<&DnsName> {
        self.top_domain
            .get_or_try_init(|| async {
                let first = self.order.lock().domains().into_iter().next();
                let first = first.ok_or_else(|| IssuanceError::Protocol {
                    context: format!("Order {}", self.order_location),
                    message: "the order contains no DNS identifier".to_string(),
                })?;
                let name = DnsName::try_from(first.as_str()).map_err(|e| {
                    IssuanceError::Protocol {
                        context: format!("Order {}", self.order_location),
                        message: format!("{first} is not a valid domain name: {e}"),
                    }
                })?;
                let top_domain = name.top_domain();
                debug!("Top domain of this order is {top_domain}");
                Ok::<_, IssuanceError>(top_domain)
            })
            .await
    }

    async fn refresh_order(&self) -> IssueResult<Order> {
        let order = self
            .protocol
            .get_order(&self.account, &self.order_location)
            .await
            .with_acme_context(|| format!("Failed to fetch order {}", self.order_location))?;
        *self.order.lock() = order.clone();
        Ok(order)
    }

    #[instrument(parent = &self.span, skip_all)]
    pub async fn account_info(&self) -> IssueResult<AccountInfo> {
        let account = self
            .protocol
            .get_account(&self.account)
            .await
            .acme_context("Failed to fetch account")?;
        let contacts = account
            .contact
            .iter()
            .map(|contact| {
                let contact = contact.as_str();
                contact
                    .strip_prefix("mailto:")
                    .unwrap_or(contact)
                    .to_string()
            })
            .collect();
        Ok(AccountInfo {
            url: self.account.url.clone(),
            status: account.status,
            contacts,
            terms_of_service_agreed: account.terms_of_service_agreed.unwrap_or(false),
        })
    }

    #[instrument(parent = &self.span, skip_all)]
    pub async fn order_info(&self) -> IssueResult<OrderInfo> {
        let order = self.refresh_order().await?;
        Ok(OrderInfo::new(&self.order_location, &order))
    }

    /// The DNS-01 proofs of every authorization of the order, freshly fetched.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn authorizations(&self) -> IssueResult<Vec<AuthorizationChallenge>> {
        let order = self.refresh_order().await?;
        let top_domain = self.top_domain().await?.clone();
        let challenge_name =
            top_domain
                .to_acme_challenge_name()
                .map_err(|e| IssuanceError::Protocol {
                    context: format!("Top domain {top_domain}"),
                    message: e.to_string(),
                })?;
        let mut challenges = Vec::with_capacity(order.authorizations.len());
        for authz_url in &order.authorizations {
            debug!("Fetching authorization {authz_url}");
            let authz = self
                .protocol
                .get_authorization(&self.account, authz_url)
                .await
                .with_acme_context(|| format!("Failed to fetch authorization {authz_url}"))?;
            challenges.push(self.challenge_for(
                authz_url,
                &authz,
                &top_domain,
                &challenge_name,
            )?);
        }
        Ok(challenges)
    }

    fn challenge_for(
        &self,
        authz_url: &Url,
        authz: &Authorization,
        top_domain: &DnsName,
        challenge_name: &DnsName,
    ) -> IssueResult<AuthorizationChallenge> {
        let domain = match (&authz.identifier, authz.wildcard) {
            (Identifier::Dns { value }, true) => format!("*.{value}"),
            (identifier, _) => identifier.to_string(),
        };
        let (challenge, dns) = authz.dns_challenge().ok_or_else(|| IssuanceError::Protocol {
            context: format!("Authorization {authz_url}"),
            message: format!("the CA offered no dns-01 challenge for {domain}"),
        })?;
        let expected_value = self
            .protocol
            .dns_txt_value(&self.account.key, &dns.token)
            .with_acme_context(|| format!("Failed to compute the TXT value for {domain}"))?;
        Ok(AuthorizationChallenge {
            domain,
            top_domain: top_domain.clone(),
            challenge_name: challenge_name.clone(),
            record_type: RecordType::TXT,
            expected_value,
            status: ProofStatus::new(authz.status, challenge.status),
            authorization_url: authz_url.clone(),
            challenge_url: challenge.url.clone(),
        })
    }

    /// Ask the CA to validate every dns-01 challenge that is not already valid. Does not wait
    /// for the outcome. Returns the number of challenges triggered.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn trigger_validation(&self) -> IssueResult<usize> {
        let mut triggered = 0;
        for challenge in self.authorizations().await? {
            if challenge.status == ProofStatus::Valid {
                debug!("Authorization for {} is already valid", challenge.domain);
                continue;
            }
            let acknowledged = self
                .protocol
                .validate_challenge(&self.account, &challenge.challenge_url)
                .await
                .with_acme_context(|| {
                    format!("Failed to trigger validation for {}", challenge.domain)
                })?;
            info!(
                "Triggered validation for {} (challenge is {})",
                challenge.domain, acknowledged.status
            );
            triggered += 1;
        }
        Ok(triggered)
    }

    /// Generate a certificate key and CSR and submit it. The order must be `ready`.
    ///
    /// The key is written to `<top>-key.pem` before the CSR is submitted.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn finalize_order(&self) -> IssueResult<OrderInfo> {
        let order = self.refresh_order().await?;
        match order.status {
            OrderStatus::Ready => {}
            OrderStatus::Processing | OrderStatus::Valid => {
                return Err(IssuanceError::State(format!(
                    "order {} is already finalized ({})",
                    self.order_location, order.status
                )));
            }
            OrderStatus::Pending => {
                return Err(IssuanceError::State(format!(
                    "order {} is still pending, all authorizations must be valid before finalizing",
                    self.order_location
                )));
            }
            OrderStatus::Invalid => {
                let reason = order
                    .error
                    .as_ref()
                    .map(|problem| format!(": {problem}"))
                    .unwrap_or_default();
                return Err(IssuanceError::State(format!(
                    "order {} is invalid{reason}",
                    self.order_location
                )));
            }
        }

        let top_domain = self.top_domain().await?;
        let domains = order.domains();
        let common_name = if domains.iter().any(|d| d == top_domain.as_ascii()) {
            top_domain.as_ascii().to_string()
        } else {
            domains.first().cloned().unwrap_or_default()
        };
        debug!(
            "Creating {} CSR for {} (CN={common_name})",
            self.certificate_key,
            domains.join(", ")
        );
        let csr = cert::create_csr(self.certificate_key, &common_name, &domains)
            .map_err(|e| IssuanceError::crypto("Failed to create the CSR", e))?;
        let key_path = self
            .store
            .save_certificate_key(top_domain, &csr.key_pem)
            .await?;
        debug!("Stored certificate key in {}", key_path.display());

        let finalized = self
            .protocol
            .finalize_order(&self.account, &order, &csr.der)
            .await
            .with_acme_context(|| format!("Failed to finalize order {}", self.order_location))?;
        info!("Submitted CSR, order is now {}", finalized.status);
        let info = OrderInfo::new(&self.order_location, &finalized);
        *self.order.lock() = finalized;
        Ok(info)
    }

    /// Download the issued chain and write it as PEM, then bundle it with the key from
    /// [`finalize_order`](Self::finalize_order) into a PKCS#12 archive protected by `password`.
    ///
    /// The key is read back from the work directory, so this works in a later process too.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn export_certificate(&self, password: &str) -> IssueResult<ExportedCertificate> {
        let order = self.refresh_order().await?;
        let Some(certificate_url) = order.certificate else {
            return Err(IssuanceError::State(format!(
                "order {} has no certificate yet ({})",
                self.order_location, order.status
            )));
        };
        let top_domain = self.top_domain().await?;

        debug!("Downloading certificate from {certificate_url}");
        let downloaded = self
            .protocol
            .download_certificate(&self.account, &certificate_url)
            .await
            .with_acme_context(|| format!("Failed to download certificate {certificate_url}"))?;
        if !downloaded.alternate_chains.is_empty() {
            debug!(
                "CA offers {} alternate chain(s), using the default one",
                downloaded.alternate_chains.len()
            );
        }
        let chain_path = self.store.save_chain(top_domain, &downloaded.pem).await?;

        let key_pem = self.store.load_certificate_key(top_domain).await?;
        let chain = cert::parse_chain(&downloaded.pem)
            .map_err(|e| IssuanceError::crypto("Failed to parse the certificate chain", e))?;
        let archive = cert::build_pkcs12(&downloaded.pem, &key_pem, password, top_domain.as_ascii())
            .map_err(|e| IssuanceError::crypto("Failed to build the PKCS#12 archive", e))?;
        let pfx_path = self.store.save_pfx(top_domain, &archive).await?;
        let password_path = self.store.save_pfx_password(top_domain, password).await?;

        let leaf = chain
            .into_iter()
            .next()
            .ok_or_else(|| IssuanceError::Protocol {
                context: format!("Certificate {certificate_url}"),
                message: "the chain is empty".to_string(),
            })?;
        info!(
            "Exported certificate for {} (valid until {}) to {}",
            leaf.dns_names.join(", "),
            leaf.not_after,
            pfx_path.display()
        );
        Ok(ExportedCertificate {
            chain_path,
            key_path: self.store.certificate_key_path(top_domain),
            pfx_path,
            password_path,
            subject: leaf.subject,
            dns_names: leaf.dns_names,
            not_after: leaf.not_after,
        })
    }

    /// [`export_certificate`](Self::export_certificate) with a random password. The password
    /// ends up in `<top>.pfx.pass`.
    pub async fn export_certificate_with_generated_password(
        &self,
    ) -> IssueResult<ExportedCertificate> {
        let password = cert::generate_password();
        self.export_certificate(&password).await
    }

    /// The TXT values currently visible in public DNS at the challenge name.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn dns_txt_records(&self) -> IssueResult<Vec<String>> {
        let top_domain = self.top_domain().await?;
        let challenge_name =
            top_domain
                .to_acme_challenge_name()
                .map_err(|e| IssuanceError::Protocol {
                    context: format!("Top domain {top_domain}"),
                    message: e.to_string(),
                })?;
        Ok(self.resolver.query_txt_records(&challenge_name).await)
    }

    /// Whether every expected TXT value is publicly visible. Tells the CA nothing; use it to
    /// decide when [`trigger_validation`](Self::trigger_validation) is worth calling.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn check_dns_proof(&self) -> IssueResult<bool> {
        let challenges = self.authorizations().await?;
        if challenges.is_empty() {
            return Ok(true);
        }
        let expected: Vec<&str> = challenges
            .iter()
            .map(|challenge| challenge.expected_value.as_str())
            .collect();
        let observed = self.dns_txt_records().await?;
        let complete = proof_complete(&expected, &observed);
        debug!(
            "Expecting {} TXT value(s), observed {}: proof complete = {complete}",
            expected.len(),
            observed.len()
        );
        Ok(complete)
    }

    /// Publish the expected TXT records through `provider`. Provider failures are reported in
    /// the outcome; fetching the authorizations can still fail with an error.
    #[instrument(parent = &self.span, skip_all, fields(provider = provider.name()))]
    pub async fn automate_dns_proof(
        &self,
        provider: &dyn DynamicDnsProvider,
    ) -> IssueResult<DynamicDnsOutcome> {
        let challenges = self.authorizations().await?;
        Ok(publish_challenges(provider, &challenges).await)
    }
}
