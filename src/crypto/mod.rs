use crate::acme::object::Token;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;

pub const SHA256_LENGTH: usize = 32;

/// Computes the SHA2-256 digest over the provided byte slice.
pub fn sha256(input: &[u8]) -> [u8; SHA256_LENGTH] {
    let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, input);
    let mut out = [0u8; SHA256_LENGTH];
    out.copy_from_slice(digest.as_ref());
    out
}

/// The key authorization of RFC 8555, section 8.1: `token || '.' || base64url(JWK_Thumbprint(accountKey))`.
///
/// `thumbprint` is the base64url-encoded RFC 7638 thumbprint of the account's public key.
pub fn key_authorization(token: &Token, thumbprint: &str) -> String {
    format!("{}.{}", token.as_str(), thumbprint)
}

/// The TXT record value for a DNS-01 challenge: the base64url-encoded SHA-256 digest of the key
/// authorization.
pub fn dns01_txt_value(token: &Token, thumbprint: &str) -> String {
    let key_authorization = key_authorization(token, thumbprint);
    BASE64_URL_SAFE_NO_PAD.encode(sha256(key_authorization.as_bytes()))
}
