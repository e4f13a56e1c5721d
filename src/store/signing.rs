//! HMAC-SHA256 signed download URLs.
//!
//! String to sign: `GET\n{bucket}\n{name}\n{expires}` where `expires` is the
//! unix timestamp the URL stops being valid at.
//! URL: `{base_url}/download/{bucket}/{name}?expires=..&key_id=..&signature=..`
//! with the signature encoded as base64url without padding.
//!
//! The gateway's own `/download` route does not check these parameters, so
//! expiry is only enforced where a fronting layer calls [`UrlSigner::verify`]
//! before forwarding the request.

use super::{ObjectRef, StoreError, StoreResult};
use crate::credentials::Credentials;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signed url expired")]
    Expired,
    #[error("unknown key id `{0}`")]
    UnknownKey(String),
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Clone)]
pub struct UrlSigner {
    key_id: String,
    secret: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("key_id", &self.key_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(credentials: &Credentials, base_url: impl Into<String>) -> Self {
        Self {
            key_id: credentials.key_id.clone(),
            secret: credentials.secret.as_bytes().to_vec(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn sign(&self, object: &ObjectRef, expires_at: DateTime<Utc>) -> StoreResult<String> {
        let expires = expires_at.timestamp();
        let signature = self.signature(object, expires)?;

        Ok(format!(
            "{}/download/{}/{}?expires={}&key_id={}&signature={}",
            self.base_url,
            urlencoding::encode(&object.bucket),
            encode_path(&object.name),
            expires,
            urlencoding::encode(&self.key_id),
            signature
        ))
    }

    /// Check the `expires`, `key_id` and `signature` query values of a URL
    /// issued by [`UrlSigner::sign`] for `object`, as of `now`.
    pub fn verify(
        &self,
        object: &ObjectRef,
        expires: i64,
        key_id: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        if key_id != self.key_id {
            return Err(SignatureError::UnknownKey(key_id.to_string()));
        }
        if now.timestamp() >= expires {
            return Err(SignatureError::Expired);
        }
        let tag = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Mismatch)?;
        self.mac(object, expires)
            .map_err(|_| SignatureError::Mismatch)?
            .verify_slice(&tag)
            .map_err(|_| SignatureError::Mismatch)
    }

    fn mac(&self, object: &ObjectRef, expires: i64) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| StoreError::Signing(err.to_string()))?;
        mac.update(string_to_sign(object, expires).as_bytes());
        Ok(mac)
    }

    fn signature(&self, object: &ObjectRef, expires: i64) -> StoreResult<String> {
        let tag = self.mac(object, expires)?.finalize().into_bytes();
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag))
    }
}

fn string_to_sign(object: &ObjectRef, expires: i64) -> String {
    format!("GET\n{}\n{}\n{}", object.bucket, object.name, expires)
}

/// Percent-encode each path segment, keeping `/` separators.
fn encode_path(name: &str) -> String {
    name.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
