use crate::acme::error::{Error, ProtocolResult};
use crate::acme::object::{Account, Authorization, Challenge, NewOrderRequest, Order, Token};
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use url::Url;

/// PEM-encoded private key of an ACME account. The CA identifies an account by this key,
/// so it is the one secret an operator must keep.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey {
    pem: String,
}

impl AccountKey {
    pub fn from_pem(pem: impl Into<String>) -> ProtocolResult<Self> {
        let pem = pem.into();
        let block = ::pem::parse(pem.as_bytes())
            .map_err(|_| Error::ProtocolViolation("account key is not PEM-encoded"))?;
        if !block.tag().ends_with("PRIVATE KEY") {
            return Err(Error::ProtocolViolation(
                "account key PEM does not contain a private key",
            ));
        }
        Ok(Self { pem })
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// An account known to the CA: its key plus the account URL (the JWS `kid`).
#[derive(Debug, Clone)]
pub struct AccountHandle {
    pub key: AccountKey,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct DownloadedCertificate {
    /// The certificate chain, leaf first, as PEM.
    pub pem: String,
    pub alternate_chains: Vec<Url>,
}

/// Binds an [`AcmeProtocol`] client to one CA directory.
#[async_trait]
pub trait AcmeConnector: Send + Sync {
    async fn connect(&self, directory_url: &Url) -> ProtocolResult<Arc<dyn AcmeProtocol>>;
}

/// The low-level ACME (RFC 8555) operations consumed by the issuance orchestrator.
///
/// Implementations own the HTTP transport, nonce handling and JWS signing. None of the
/// operations are expected to poll: `validate_challenge` and `finalize_order` return the
/// resource as the CA reported it right after the request.
#[async_trait]
pub trait AcmeProtocol: Send + Sync {
    async fn terms_of_service(&self) -> ProtocolResult<Option<Url>>;

    /// Register a new account with a freshly generated key.
    async fn new_account(
        &self,
        contact: &[Url],
        terms_of_service_agreed: bool,
    ) -> ProtocolResult<(AccountHandle, Account)>;

    /// Look up the existing account identified by `key`.
    async fn load_account(&self, key: &AccountKey) -> ProtocolResult<(AccountHandle, Account)>;

    async fn get_account(&self, account: &AccountHandle) -> ProtocolResult<Account>;

    async fn new_order(
        &self,
        account: &AccountHandle,
        request: &NewOrderRequest,
    ) -> ProtocolResult<(Url, Order)>;

    async fn get_order(&self, account: &AccountHandle, order_url: &Url) -> ProtocolResult<Order>;

    async fn get_authorization(
        &self,
        account: &AccountHandle,
        authz_url: &Url,
    ) -> ProtocolResult<Authorization>;

    /// The TXT record value proving control for `token` (RFC 8555, section 8.4).
    /// See [`crate::crypto::dns01_txt_value`].
    fn dns_txt_value(&self, account_key: &AccountKey, token: &Token) -> ProtocolResult<String>;

    async fn validate_challenge(
        &self,
        account: &AccountHandle,
        challenge_url: &Url,
    ) -> ProtocolResult<Challenge>;

    async fn finalize_order(
        &self,
        account: &AccountHandle,
        order: &Order,
        csr_der: &[u8],
    ) -> ProtocolResult<Order>;

    async fn download_certificate(
        &self,
        account: &AccountHandle,
        certificate_url: &Url,
    ) -> ProtocolResult<DownloadedCertificate>;
}
