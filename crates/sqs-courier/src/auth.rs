//! Signature Version 4 request signing.
//!
//! Everything in this module is a pure function of its inputs: the same
//! [`SigningRequest`] (including its timestamp) always produces the same
//! canonical request, string to sign and authorization header. No I/O happens
//! here and the clock is never read; callers capture the timestamp once and
//! store it on the request.
//!
//! ## Signing Process
//!
//! 1. Build the canonical request (method, path, query, headers, payload hash)
//! 2. Build the string to sign (algorithm, timestamp, scope, request hash)
//! 3. Derive the signing key (4-level HMAC chain)
//! 4. Sign and format the `Authorization` header
//!
//! ## References
//!
//! - [Signature V4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)

use crate::config::Credentials;
use crate::error::ConfigurationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm identifier placed in the string to sign and the header
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Header carrying the signing timestamp
pub const DATE_HEADER: &str = "x-amz-date";

const KEY_PREFIX: &str = "AWS4";
const SCOPE_TERMINATOR: &str = "aws4_request";

/// Percent-encode a value for query strings and form bodies.
///
/// Every byte except `A-Z a-z 0-9 - . _ ~` is written as `%XX` with
/// uppercase hex digits. The server decodes with exactly this rule, so any
/// deviation breaks signature verification.
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Encode key/value pairs as `k=v&k=v`, sorted by encoded key then value.
pub fn encode_pairs<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut encoded: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Format a timestamp as `yyyymmddThhmmssZ`
pub fn format_amz_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%dT%H%M%SZ").to_string()
}

fn format_date_stamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%d").to_string()
}

/// Everything the signer needs to know about one request
#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub method: Method,
    /// Target URL; only scheme, host, port and path are used, the query
    /// string travels separately in `query`
    pub url: Url,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub region: String,
    pub service: String,
    pub credentials: Credentials,
    pub timestamp: DateTime<Utc>,
}

impl SigningRequest {
    /// Reject inputs that would otherwise sign garbage.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let required = [
            ("region", self.region.as_str()),
            ("service", self.service.as_str()),
            ("credentials.access_key", self.credentials.access_key()),
            ("credentials.secret_key", self.credentials.secret_key()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: key.to_string(),
                });
            }
        }

        if self.url.host_str().is_none() {
            return Err(ConfigurationError::Invalid {
                message: format!("request URL '{}' has no host", self.url),
            });
        }

        Ok(())
    }

    /// Host header value derived from the URL, including a non-default port
    pub fn host(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Credential scope (`date/region/service/aws4_request`)
    pub fn credential_scope(&self) -> String {
        credential_scope(&self.timestamp, &self.region, &self.service)
    }
}

/// Fixed-format serialization of a request used as signing input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub method: String,
    pub canonical_path: String,
    pub canonical_query: String,
    /// Header lines, each `name:value` and terminated by `\n`
    pub canonical_headers: String,
    pub signed_headers: String,
    pub payload_hash: String,
}

impl fmt::Display for CanonicalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.canonical_path,
            self.canonical_query,
            self.canonical_headers,
            self.signed_headers,
            self.payload_hash
        )
    }
}

/// Build the canonical request.
///
/// Headers are lowercased and sorted; `host` is injected from the URL when
/// absent and any `authorization` header is left out.
pub fn canonical_request(request: &SigningRequest) -> Result<CanonicalRequest, ConfigurationError> {
    request.validate()?;

    let mut headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(name, _)| name != "authorization")
        .collect();

    if !headers.contains_key("host") {
        if let Some(host) = request.host() {
            headers.insert("host".to_string(), host);
        }
    }

    let canonical_headers = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect::<String>();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical_path = match request.url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    Ok(CanonicalRequest {
        method: request.method.as_str().to_ascii_uppercase(),
        canonical_path,
        canonical_query: encode_pairs(&request.query),
        canonical_headers,
        signed_headers,
        payload_hash: hex::encode(Sha256::digest(&request.body)),
    })
}

pub fn credential_scope(timestamp: &DateTime<Utc>, region: &str, service: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        format_date_stamp(timestamp),
        region,
        service,
        SCOPE_TERMINATOR
    )
}

pub fn string_to_sign(timestamp: &DateTime<Utc>, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        format_amz_date(timestamp),
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

/// Derive the signing key.
///
/// 1. kSecret = "AWS4" + secret_key
/// 2. kDate = HMAC(kSecret, date)
/// 3. kRegion = HMAC(kDate, region)
/// 4. kService = HMAC(kRegion, service)
/// 5. kSigning = HMAC(kService, "aws4_request")
pub fn signing_key(secret_key: &str, timestamp: &DateTime<Utc>, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("{}{}", KEY_PREFIX, secret_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), format_date_stamp(timestamp).as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

/// Hex HMAC of the string to sign
pub fn signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

pub fn authorization_header(
    access_key: &str,
    scope: &str,
    signed_headers: &str,
    signature: &str,
) -> String {
    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, access_key, scope, signed_headers, signature
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Output of one signing pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedParts {
    pub canonical_request: String,
    pub string_to_sign: String,
    pub signature: String,
    pub authorization: String,
    pub amz_date: String,
}

/// Sign a request in a single pass using its stored timestamp.
pub fn sign(request: &SigningRequest) -> Result<SignedParts, ConfigurationError> {
    let canonical = canonical_request(request)?;
    let canonical_text = canonical.to_string();

    let scope = request.credential_scope();
    let string_to_sign = string_to_sign(&request.timestamp, &scope, &canonical_text);

    let key = signing_key(
        request.credentials.secret_key(),
        &request.timestamp,
        &request.region,
        &request.service,
    );
    let signature = signature(&key, &string_to_sign);

    let authorization = authorization_header(
        request.credentials.access_key(),
        &scope,
        &canonical.signed_headers,
        &signature,
    );

    Ok(SignedParts {
        canonical_request: canonical_text,
        string_to_sign,
        signature,
        authorization,
        amz_date: format_amz_date(&request.timestamp),
    })
}
