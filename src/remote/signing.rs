//! Request signing for the remote transcoding API.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::TranscodeError;

type HmacSha256 = Hmac<Sha256>;

/// Percent-encodes a string for the canonical query string.
///
/// Unreserved characters (`A-Z a-z 0-9 - _ . ~`) pass through. Everything
/// else, including space and `/`, is encoded as uppercase `%XX` over the
/// UTF-8 bytes.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Builds the canonical, key-sorted query string used for signing.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Formats a timestamp the way the service expects it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Account credentials for one cloud.
#[derive(Clone)]
pub struct Credentials {
    pub cloud_id: String,
    pub access_key: String,
    secret_key: String,
}

impl Credentials {
    /// Creates credentials, returning `None` if any part is blank.
    pub fn new(
        cloud_id: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Option<Self> {
        let creds = Self {
            cloud_id: cloud_id.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        };
        let blank = [&creds.cloud_id, &creds.access_key, &creds.secret_key]
            .iter()
            .any(|s| s.trim().is_empty());
        (!blank).then_some(creds)
    }

    /// Short stable fingerprint of the credential set, safe to log.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cloud_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.access_key.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.secret_key.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Returns `params` extended with the auth fields and signature.
    pub fn sign(
        &self,
        method: &str,
        host: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<String, String>, TranscodeError> {
        let mut signed = params.clone();
        signed.insert("cloud_id".to_string(), self.cloud_id.clone());
        signed.insert("access_key".to_string(), self.access_key.clone());
        signed.insert("timestamp".to_string(), format_timestamp(at));

        let signature = self.signature(method, host, path, &signed)?;
        signed.insert("signature".to_string(), signature);
        Ok(signed)
    }

    fn signature(
        &self,
        method: &str,
        host: &str,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, TranscodeError> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            method.to_uppercase(),
            host.to_lowercase(),
            path,
            canonical_query(params)
        );
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| TranscodeError::Configuration(format!("invalid secret key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("cloud_id", &self.cloud_id)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
