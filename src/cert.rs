use crate::config::KeyAlgorithm;
use anyhow::{Context, Error, bail};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use rand::Rng;
use rand::distr::Alphanumeric;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use time::OffsetDateTime;
use tracing::warn;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;

/// The maximum number of certificates we will parse in a PEM-array of certificates
const MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

pub const GENERATED_PASSWORD_LENGTH: usize = 24;

/// A DER-encoded CSR together with the freshly generated key that signed it.
pub struct SignedCsr {
    pub der: Vec<u8>,
    pub key_pem: String,
}

impl std::fmt::Debug for SignedCsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedCsr")
            .field("der_len", &self.der.len())
            .finish_non_exhaustive()
    }
}

/// Generate a new certificate key and a CSR for `domains` signed by it.
///
/// `common_name` goes into the subject; every entry of `domains` (the common name included)
/// becomes a DNS subject alternative name.
pub fn create_csr(
    algorithm: KeyAlgorithm,
    common_name: &str,
    domains: &[String],
) -> Result<SignedCsr, Error> {
    let key_pair = match algorithm {
        KeyAlgorithm::EcdsaP256 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256),
        KeyAlgorithm::EcdsaP384 => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384),
    }
    .context("Key generation failed")?;
    let mut cert_params =
        CertificateParams::new(domains.to_vec()).context("CSR generation failed")?;
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, common_name);
    cert_params.distinguished_name = distinguished_name;
    let csr = cert_params
        .serialize_request(&key_pair)
        .context("Signing CSR failed")?;
    let der: &[u8] = csr.der().as_ref();
    Ok(SignedCsr {
        der: der.to_vec(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub subject: String,
    pub issuer: String,
    pub dns_names: Vec<String>,
    pub not_after: OffsetDateTime,
}

/// Parse a PEM certificate chain, leaf first.
pub fn parse_chain(pem: &str) -> Result<Vec<ParsedCertificate>, Error> {
    let mut certificates = Vec::new();
    for block in Pem::iter_from_buffer(pem.as_bytes()).take(MAX_CERTIFICATE_CHAIN_LENGTH) {
        let block = block.context("Reading PEM block failed")?;
        certificates.push(parse_certificate(&block.contents)?);
    }
    if certificates.is_empty() {
        bail!("No certificate found in PEM data");
    }
    Ok(certificates)
}

fn parse_certificate(der: &[u8]) -> Result<ParsedCertificate, Error> {
    let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(der)
        .context("Reading X.509 structure: Decoding DER failed")?;
    let mut dns_names = Vec::new();
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for general_name in &san.general_names {
                match general_name {
                    GeneralName::DNSName(dns_name) => dns_names.push((*dns_name).to_string()),
                    unsupported => {
                        warn!("Found unsupported general name {unsupported} in certificate");
                    }
                }
            }
        }
    }
    Ok(ParsedCertificate {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        dns_names,
        not_after: cert.validity().not_after.to_datetime(),
    })
}

/// Bundle a PEM chain (leaf first) and its PEM private key into a password-protected PKCS#12
/// archive. Fails if the key does not belong to the leaf certificate.
pub fn build_pkcs12(
    chain_pem: &str,
    key_pem: &str,
    password: &str,
    friendly_name: &str,
) -> Result<Vec<u8>, Error> {
    let mut certs = X509::stack_from_pem(chain_pem.as_bytes()).context("Parsing chain failed")?;
    if certs.is_empty() {
        bail!("No certificate found in PEM chain");
    }
    let leaf = certs.remove(0);
    let key =
        PKey::private_key_from_pem(key_pem.as_bytes()).context("Parsing private key failed")?;
    if !leaf.public_key()?.public_eq(&key) {
        bail!("The certificate does not belong to the private key");
    }
    let mut ca = Stack::new()?;
    for cert in certs {
        ca.push(cert)?;
    }
    let mut builder = Pkcs12::builder();
    builder.name(friendly_name).pkey(&key).cert(&leaf);
    if !ca.is_empty() {
        builder.ca(ca);
    }
    let archive = builder.build2(password).context("Building PKCS#12 failed")?;
    Ok(archive.to_der()?)
}

/// A random alphanumeric password for exported archives.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}
