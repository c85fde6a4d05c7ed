//! AWS Signature Version 4.
//!
//! [`sign`] computes the headers that authenticate one request. The
//! canonical request covers the method, path, query, every header passed in
//! plus `host`, `x-amz-date` and `x-amz-content-sha256`, and the payload hash.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Access key, secret and optional session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Long-term credentials.
    #[must_use]
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Adds a session token.
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
    /// `AWS_SESSION_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the key id or secret is missing.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
        };
        let access_key_id = var("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| Error::configuration("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = var("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| Error::configuration("AWS_SECRET_ACCESS_KEY is not set"))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: var("AWS_SESSION_TOKEN"),
        })
    }
}

/// Percent-encodes everything except unreserved characters (and `/` unless
/// `encode_slash`).
#[must_use]
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Hex SHA-256 of a payload.
#[must_use]
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

fn canonical_uri(url: &Url, service: &str) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    if service == "s3" {
        path.to_string()
    } else {
        uri_encode(path, false)
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the canonical request and the signed header list.
///
/// Header names must be lowercase.
#[must_use]
pub fn canonical_request(
    method: &str,
    url: &Url,
    service: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let mut merged: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        merged
            .entry(name.as_str())
            .or_default()
            .push(value.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    let canonical_headers: String = merged
        .iter()
        .map(|(name, values)| format!("{name}:{}\n", values.join(",")))
        .collect();
    let signed_headers = merged.keys().copied().collect::<Vec<_>>().join(";");

    let request = format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        canonical_uri(url, service),
        canonical_query(url),
    );
    (request, signed_headers)
}

/// `{date}/{region}/{service}/aws4_request`.
#[must_use]
pub fn scope(date: &str, region: &str, service: &str) -> String {
    format!("{date}/{region}/{service}/aws4_request")
}

/// The string that is signed.
#[must_use]
pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        payload_hash(canonical_request.as_bytes())
    )
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    // HMAC-SHA256 accepts keys of any length, so this never fails.
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Derives the signing key for one day, region and service.
#[must_use]
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    hmac(&k_service, "aws4_request")
}

fn host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Signs a request made at `now`.
///
/// Returns the headers to add: `x-amz-date`, `x-amz-content-sha256`,
/// `x-amz-security-token` when there is a session token, and
/// `authorization`. `headers` must use lowercase names and must not contain
/// any of those.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn sign(
    credentials: &Credentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    payload: &[u8],
) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let body_hash = payload_hash(payload);

    let mut added = vec![
        ("x-amz-date".to_string(), amz_date.clone()),
        ("x-amz-content-sha256".to_string(), body_hash.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        added.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let mut all: Vec<(String, String)> = headers.to_vec();
    all.push(("host".to_string(), host(url)));
    all.extend(added.iter().cloned());

    let (request, signed_headers) = canonical_request(method, url, service, &all, &body_hash);
    let scope = scope(&date, region, service);
    let to_sign = string_to_sign(&amz_date, &scope, &request);
    let key = signing_key(&credentials.secret_access_key, &date, region, service);
    let signature = hex::encode(hmac(&key, &to_sign));

    added.push((
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    ));
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("url")
    }

    #[test]
    fn encoding_keeps_unreserved_characters() {
        assert_eq!(uri_encode("a-b_c.d~e", true), "a-b_c.d~e");
        assert_eq!(uri_encode("a b/c+d", true), "a%20b%2Fc%2Bd");
        assert_eq!(uri_encode("a b/c", false), "a%20b/c");
    }

    #[test]
    fn canonical_request_layout() {
        let headers = vec![
            ("x-amz-date".to_string(), "20150830T123600Z".to_string()),
            ("host".to_string(), "example.amazonaws.com".to_string()),
            ("my-header".to_string(), "  a   b  ".to_string()),
        ];
        let (request, signed) = canonical_request(
            "GET",
            &url("https://example.amazonaws.com/?b=2&a=1%201"),
            "service",
            &headers,
            "UNSIGNED",
        );
        assert_eq!(signed, "host;my-header;x-amz-date");
        assert_eq!(
            request,
            "GET\n/\na=1%201&b=2\nhost:example.amazonaws.com\nmy-header:a b\nx-amz-date:20150830T123600Z\n\nhost;my-header;x-amz-date\nUNSIGNED"
        );
    }

    #[test]
    fn s3_paths_are_not_double_encoded() {
        let u = url("https://bucket.s3.amazonaws.com/a%20b/c.tif");
        let (s3, _) = canonical_request("GET", &u, "s3", &[], "h");
        let (other, _) = canonical_request("GET", &u, "sqs", &[], "h");
        assert!(s3.starts_with("GET\n/a%20b/c.tif\n"));
        assert!(other.starts_with("GET\n/a%2520b/c.tif\n"));
    }

    #[test]
    fn signature_is_deterministic_and_covers_the_payload() {
        let creds = Credentials::new("AKIDEXAMPLE", "secret").with_session_token("token");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let u = url("https://sqs.ap-southeast-2.amazonaws.com/");
        let sign_body = |body: &[u8]| sign(&creds, "ap-southeast-2", "sqs", now, "POST", &u, &[], body);

        let first = sign_body(b"{}");
        assert_eq!(first, sign_body(b"{}"));
        assert_ne!(first, sign_body(b"{ }"));

        let names: Vec<&str> = first.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            ["x-amz-date", "x-amz-content-sha256", "x-amz-security-token", "authorization"]
        );
        let auth = &first[3].1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240301/ap-southeast-2/sqs/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token, Signature="
        ));
        let signature = auth.rsplit('=').next().expect("signature");
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn signing_key_depends_on_every_scope_part() {
        let base = signing_key("secret", "20240301", "ap-southeast-2", "s3");
        assert_eq!(base.len(), 32);
        assert_ne!(base, signing_key("secret", "20240302", "ap-southeast-2", "s3"));
        assert_ne!(base, signing_key("secret", "20240301", "us-east-1", "s3"));
        assert_ne!(base, signing_key("secret", "20240301", "ap-southeast-2", "sqs"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("AKID", "hunter2").with_session_token("tok");
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("tok\""));
    }
}
