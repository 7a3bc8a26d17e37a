#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use certwright::acme::client::{
    AccountHandle, AccountKey, AcmeConnector, AcmeProtocol, DownloadedCertificate,
};
use certwright::acme::error::{Error, Problem, ProtocolResult};
use certwright::acme::object::{
    Account, AccountStatus, Authorization, AuthorizationStatus, Challenge, ChallengeStatus,
    DnsChallenge, Identifier, InnerChallenge, NewOrderRequest, Order, OrderStatus, Token,
};
use certwright::crypto::{dns01_txt_value, sha256};
use certwright::dns::automation::DynamicDnsProvider;
use certwright::dns::name::DnsName;
use certwright::dns::resolver::{self, TxtLookup};
use certwright::{Environment, SessionConfig};
use hickory_resolver::proto::rr::RecordType;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509, X509NameBuilder, X509Req};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub const DIRECTORY: &str = "https://ca.test/directory";
pub const TERMS_OF_SERVICE: &str = "https://ca.test/terms-v1.pdf";

pub fn test_config(work_dir: &Path) -> SessionConfig {
    SessionConfig::new(work_dir, Environment::Staging)
        .directory_url(Url::parse(DIRECTORY).unwrap())
        .accept_terms_of_service(true)
}

fn url(path: String) -> Url {
    Url::parse(&format!("https://ca.test/{path}")).unwrap()
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn thumbprint(key: &AccountKey) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(sha256(key.as_pem().as_bytes()))
}

#[derive(Default)]
struct FakeCaState {
    next_id: usize,
    accounts: Vec<(AccountHandle, Account)>,
    orders: HashMap<Url, Order>,
    authorizations: HashMap<Url, Authorization>,
    certificates: HashMap<Url, String>,
    calls: Vec<String>,
    connected_to: Vec<Url>,
}

impl FakeCaState {
    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn check_account(&self, account: &AccountHandle) -> ProtocolResult<()> {
        if self.accounts.iter().any(|(known, _)| known.url == account.url) {
            Ok(())
        } else {
            Err(Problem::new(
                "urn:ietf:params:acme:error:accountDoesNotExist",
                "unknown account",
            )
            .into())
        }
    }

    fn refresh_order_status(&mut self, location: &Url) {
        let Some(order) = self.orders.get(location) else {
            return;
        };
        if order.status != OrderStatus::Pending {
            return;
        }
        let all_valid = order.authorizations.iter().all(|authz_url| {
            self.authorizations
                .get(authz_url)
                .is_some_and(|authz| authz.status == AuthorizationStatus::Valid)
        });
        if all_valid {
            if let Some(order) = self.orders.get_mut(location) {
                order.status = OrderStatus::Ready;
            }
        }
    }
}

/// An in-memory ACME CA. Validation succeeds instantly, finalization issues a real certificate
/// signed by a throwaway CA key.
pub struct FakeCa {
    state: Mutex<FakeCaState>,
    ca_key: PKey<Private>,
    ca_cert: X509,
}

impl FakeCa {
    pub fn new() -> Arc<Self> {
        let ca_key = ec_key();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Fake CA").unwrap();
        let name = name.build();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&ca_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder.sign(&ca_key, MessageDigest::sha256()).unwrap();
        Arc::new(Self {
            state: Mutex::new(FakeCaState::default()),
            ca_key,
            ca_cert: builder.build(),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn AcmeConnector> {
        Arc::new(FakeConnector { ca: self.clone() })
    }

    /// Every protocol call so far, by operation name.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| *call == operation)
            .count()
    }

    pub fn connected_to(&self) -> Vec<Url> {
        self.state.lock().connected_to.clone()
    }

    /// Make an order look like one whose identifiers were all authorized earlier.
    pub fn drop_authorizations(&self, location: &Url) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(location) {
            order.authorizations.clear();
            order.status = OrderStatus::Ready;
        }
    }

    fn record(&self, operation: &str) {
        self.state.lock().calls.push(operation.to_string());
    }

    fn issue(&self, request: &X509Req, domains: &[String]) -> String {
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = rand::random::<u32>();
        builder
            .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(request.subject_name()).unwrap();
        builder
            .set_issuer_name(self.ca_cert.subject_name())
            .unwrap();
        builder
            .set_pubkey(&request.public_key().unwrap())
            .unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(90).unwrap())
            .unwrap();
        let mut san = SubjectAlternativeName::new();
        for domain in domains {
            san.dns(domain);
        }
        let san = san
            .build(&builder.x509v3_context(Some(&self.ca_cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&self.ca_key, MessageDigest::sha256()).unwrap();
        let leaf = builder.build();
        let mut pem = String::from_utf8(leaf.to_pem().unwrap()).unwrap();
        pem.push_str(&String::from_utf8(self.ca_cert.to_pem().unwrap()).unwrap());
        pem
    }
}

struct FakeConnector {
    ca: Arc<FakeCa>,
}

#[async_trait]
impl AcmeConnector for FakeConnector {
    async fn connect(&self, directory_url: &Url) -> ProtocolResult<Arc<dyn AcmeProtocol>> {
        let mut state = self.ca.state.lock();
        state.calls.push("connect".to_string());
        state.connected_to.push(directory_url.clone());
        Ok(self.ca.clone())
    }
}

#[async_trait]
impl AcmeProtocol for FakeCa {
    async fn terms_of_service(&self) -> ProtocolResult<Option<Url>> {
        self.record("terms_of_service");
        Ok(Some(Url::parse(TERMS_OF_SERVICE).unwrap()))
    }

    async fn new_account(
        &self,
        contact: &[Url],
        terms_of_service_agreed: bool,
    ) -> ProtocolResult<(AccountHandle, Account)> {
        self.record("new_account");
        let pem = ec_key().private_key_to_pem_pkcs8().unwrap();
        let key = AccountKey::from_pem(String::from_utf8(pem).unwrap())?;
        let mut state = self.state.lock();
        let id = state.next_id();
        let handle = AccountHandle {
            key,
            url: url(format!("acct/{id}")),
        };
        let account = Account {
            status: AccountStatus::Valid,
            contact: contact.to_vec(),
            terms_of_service_agreed: Some(terms_of_service_agreed),
            orders: None,
        };
        state.accounts.push((handle.clone(), account.clone()));
        Ok((handle, account))
    }

    async fn load_account(&self, key: &AccountKey) -> ProtocolResult<(AccountHandle, Account)> {
        self.record("load_account");
        self.state
            .lock()
            .accounts
            .iter()
            .find(|(handle, _)| &handle.key == key)
            .cloned()
            .ok_or_else(|| {
                Problem::new(
                    "urn:ietf:params:acme:error:accountDoesNotExist",
                    "no account with this key",
                )
                .into()
            })
    }

    async fn get_account(&self, account: &AccountHandle) -> ProtocolResult<Account> {
        self.record("get_account");
        let state = self.state.lock();
        state.check_account(account)?;
        state
            .accounts
            .iter()
            .find(|(handle, _)| handle.url == account.url)
            .map(|(_, account)| account.clone())
            .ok_or(Error::ProtocolViolation("account vanished"))
    }

    async fn new_order(
        &self,
        account: &AccountHandle,
        request: &NewOrderRequest,
    ) -> ProtocolResult<(Url, Order)> {
        self.record("new_order");
        let mut state = self.state.lock();
        state.check_account(account)?;
        let order_id = state.next_id();
        let mut authorizations = Vec::new();
        for identifier in &request.identifiers {
            let id = state.next_id();
            let authz_url = url(format!("authz/{id}"));
            let token = Token::try_from(format!("token-{id}")).unwrap();
            // Wildcard authorizations carry the base name
            let (identifier, wildcard) = match identifier.as_dns() {
                Some(value) if value.starts_with("*.") => {
                    (Identifier::dns(&value[2..]), true)
                }
                _ => (identifier.clone(), false),
            };
            let authz = Authorization {
                identifier,
                status: AuthorizationStatus::Pending,
                expires: None,
                challenges: vec![
                    Challenge {
                        url: url(format!("chall/{id}/http")),
                        status: ChallengeStatus::Pending,
                        validated: None,
                        error: None,
                        inner_challenge: InnerChallenge::Unsupported,
                    },
                    Challenge {
                        url: url(format!("chall/{id}/dns")),
                        status: ChallengeStatus::Pending,
                        validated: None,
                        error: None,
                        inner_challenge: InnerChallenge::Dns(DnsChallenge { token }),
                    },
                ],
                wildcard,
            };
            state.authorizations.insert(authz_url.clone(), authz);
            authorizations.push(authz_url);
        }
        let location = url(format!("order/{order_id}"));
        let order = Order {
            status: OrderStatus::Pending,
            expires: None,
            identifiers: request.identifiers.clone(),
            error: None,
            authorizations,
            finalize: url(format!("order/{order_id}/finalize")),
            certificate: None,
        };
        state.orders.insert(location.clone(), order.clone());
        Ok((location, order))
    }

    async fn get_order(&self, account: &AccountHandle, order_url: &Url) -> ProtocolResult<Order> {
        self.record("get_order");
        let mut state = self.state.lock();
        state.check_account(account)?;
        state.refresh_order_status(order_url);
        state.orders.get(order_url).cloned().ok_or_else(|| {
            Problem::new("urn:ietf:params:acme:error:malformed", "no such order").into()
        })
    }

    async fn get_authorization(
        &self,
        account: &AccountHandle,
        authz_url: &Url,
    ) -> ProtocolResult<Authorization> {
        self.record("get_authorization");
        let state = self.state.lock();
        state.check_account(account)?;
        state
            .authorizations
            .get(authz_url)
            .cloned()
            .ok_or_else(|| {
                Problem::new("urn:ietf:params:acme:error:malformed", "no such authz").into()
            })
    }

    fn dns_txt_value(&self, account_key: &AccountKey, token: &Token) -> ProtocolResult<String> {
        Ok(dns01_txt_value(token, &thumbprint(account_key)))
    }

    async fn validate_challenge(
        &self,
        account: &AccountHandle,
        challenge_url: &Url,
    ) -> ProtocolResult<Challenge> {
        self.record("validate_challenge");
        let mut state = self.state.lock();
        state.check_account(account)?;
        for authz in state.authorizations.values_mut() {
            if let Some(challenge) = authz
                .challenges
                .iter_mut()
                .find(|challenge| &challenge.url == challenge_url)
            {
                challenge.status = ChallengeStatus::Valid;
                let challenge = challenge.clone();
                authz.status = AuthorizationStatus::Valid;
                return Ok(challenge);
            }
        }
        Err(Problem::new("urn:ietf:params:acme:error:malformed", "no such challenge").into())
    }

    async fn finalize_order(
        &self,
        account: &AccountHandle,
        order: &Order,
        csr_der: &[u8],
    ) -> ProtocolResult<Order> {
        self.record("finalize_order");
        let request = X509Req::from_der(csr_der)
            .map_err(|e| Error::Transport(anyhow::anyhow!("bad CSR: {e}")))?;
        let domains = order.domains();
        let pem = self.issue(&request, &domains);
        let mut state = self.state.lock();
        state.check_account(account)?;
        let location = state
            .orders
            .iter()
            .find(|(_, known)| known.finalize == order.finalize)
            .map(|(location, _)| location.clone())
            .ok_or(Error::ProtocolViolation("unknown order"))?;
        state.refresh_order_status(&location);
        let cert_id = state.next_id();
        let cert_url = url(format!("cert/{cert_id}"));
        let Some(stored) = state.orders.get_mut(&location) else {
            return Err(Error::ProtocolViolation("unknown order"));
        };
        if stored.status != OrderStatus::Ready {
            return Err(Problem::new(
                "urn:ietf:params:acme:error:orderNotReady",
                "order is not ready",
            )
            .into());
        }
        stored.status = OrderStatus::Valid;
        stored.certificate = Some(cert_url.clone());
        let stored = stored.clone();
        state.certificates.insert(cert_url, pem);
        Ok(stored)
    }

    async fn download_certificate(
        &self,
        account: &AccountHandle,
        certificate_url: &Url,
    ) -> ProtocolResult<DownloadedCertificate> {
        self.record("download_certificate");
        let state = self.state.lock();
        state.check_account(account)?;
        let pem = state
            .certificates
            .get(certificate_url)
            .cloned()
            .ok_or(Error::ProtocolViolation("unknown certificate"))?;
        Ok(DownloadedCertificate {
            pem,
            alternate_chains: Vec::new(),
        })
    }
}

/// TXT lookup answering from a shared, mutable record set.
#[derive(Clone, Default)]
pub struct StubTxtLookup {
    records: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl StubTxtLookup {
    pub fn publish(&self, name: &str, value: &str) {
        self.records
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn clear(&self, name: &str) {
        self.records.lock().remove(name);
    }
}

#[async_trait]
impl TxtLookup for StubTxtLookup {
    async fn query_txt(&self, name: &DnsName) -> Result<Vec<String>, resolver::Error> {
        match self.records.lock().get(name.as_ascii()) {
            Some(values) if !values.is_empty() => Ok(values.clone()),
            Some(_) => Err(resolver::Error::NoRecords(RecordType::TXT)),
            None => Err(resolver::Error::NxDomain),
        }
    }
}

/// TXT lookup whose resolver is never reachable.
pub struct UnreachableTxtLookup;

#[async_trait]
impl TxtLookup for UnreachableTxtLookup {
    async fn query_txt(&self, _name: &DnsName) -> Result<Vec<String>, resolver::Error> {
        Err(resolver::Error::LookupFailure(
            hickory_resolver::ResolveError::from("network unreachable"),
        ))
    }
}

/// Dynamic DNS provider that records every call and writes added records into a
/// [`StubTxtLookup`], so published values become "visible" immediately.
pub struct RecordingProvider {
    dns: StubTxtLookup,
    calls: Mutex<Vec<String>>,
    fail_on_add: Option<(usize, &'static str)>,
    adds: Mutex<usize>,
}

impl RecordingProvider {
    pub fn new(dns: StubTxtLookup) -> Self {
        Self {
            dns,
            calls: Mutex::new(Vec::new()),
            fail_on_add: None,
            adds: Mutex::new(0),
        }
    }

    /// Fail the `nth` add call (1-based) with `message`.
    pub fn failing_on_add(mut self, nth: usize, message: &'static str) -> Self {
        self.fail_on_add = Some((nth, message));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DynamicDnsProvider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn delete(&self, domain: &DnsName, sub_label: &str) -> anyhow::Result<()> {
        let name = format!("{sub_label}.{}", domain.as_ascii());
        self.calls.lock().push(format!("delete {name}"));
        self.dns.clear(&name);
        Ok(())
    }

    async fn add(
        &self,
        domain: &DnsName,
        sub_label: &str,
        record_type: RecordType,
        value: &str,
    ) -> anyhow::Result<()> {
        let name = format!("{sub_label}.{}", domain.as_ascii());
        self.calls
            .lock()
            .push(format!("add {name} {record_type} {value}"));
        let attempt = {
            let mut adds = self.adds.lock();
            *adds += 1;
            *adds
        };
        if let Some((nth, message)) = self.fail_on_add {
            if attempt == nth {
                anyhow::bail!(message);
            }
        }
        self.dns.publish(&name, value);
        Ok(())
    }
}

/// The DER SubjectPublicKeyInfo of a PEM private key.
pub fn public_key_of(key_pem: &str) -> Vec<u8> {
    PKey::private_key_from_pem(key_pem.as_bytes())
        .unwrap()
        .public_key_to_der()
        .unwrap()
}
