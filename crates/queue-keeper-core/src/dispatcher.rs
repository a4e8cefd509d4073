//! HTTP signing, dispatch, and response classification (§4.E).
//!
//! Signs outgoing payloads with HMAC-SHA256 and classifies the response (or
//! transport failure) into one of the delivery outcomes the state machine
//! (§4.G) understands: `Success`, `Retry` (with an optional `Retry-After`),
//! or `Discard`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration as StdDuration;

type HmacSha256 = Hmac<Sha256>;

/// Signing schemes supported for outbound webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
}

impl SignatureScheme {
    /// The scheme label used as the `<scheme>=<hex>` prefix in the
    /// `X-Convoy-Signature` header (§6).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac-sha256",
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hmac-sha256" | "sha256" => Ok(Self::HmacSha256),
            other => Err(DispatchError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Errors that can occur while dispatching a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request build failed: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported signing scheme: {0}")]
    UnsupportedScheme(String),
}

impl DispatchError {
    /// Whether the caller should retry rather than discard the delivery.
    /// A bad signing scheme is a subscription misconfiguration, not a
    /// transient condition, and retrying it would never succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Outcome of a single dispatch attempt, already classified per §4.E/§4.G.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// 2xx (or a terminal 3xx) response: delivery succeeded.
    Success { status: u16 },
    /// 408/425/429, 5xx, or a transport-level failure: retry.
    Retry {
        status: Option<u16>,
        retry_after: Option<StdDuration>,
        reason: String,
    },
    /// Any other 4xx: the endpoint has rejected the payload permanently.
    Discard { status: u16, reason: String },
}

/// Sign `body` with `secret` under `scheme`, returning a
/// `<scheme>=<hex>`-formatted signature header value (§6).
pub fn sign_payload(scheme: SignatureScheme, secret: &str, body: &[u8]) -> String {
    match scheme {
        SignatureScheme::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(body);
            let digest = mac.finalize().into_bytes();
            format!("{}={}", scheme.as_str(), hex::encode(digest))
        }
    }
}

/// Classify an HTTP response status (and optional `Retry-After` header value
/// in seconds) into a dispatch outcome.
pub fn classify_response(status: u16, retry_after_secs: Option<u64>) -> DispatchOutcome {
    match status {
        200..=299 => DispatchOutcome::Success { status },
        300..=399 => DispatchOutcome::Success { status },
        408 | 425 | 429 => DispatchOutcome::Retry {
            status: Some(status),
            retry_after: retry_after_secs.map(StdDuration::from_secs),
            reason: format!("endpoint returned {status}"),
        },
        400..=499 => DispatchOutcome::Discard {
            status,
            reason: format!("endpoint rejected payload with {status}"),
        },
        500..=599 => DispatchOutcome::Retry {
            status: Some(status),
            retry_after: retry_after_secs.map(StdDuration::from_secs),
            reason: format!("endpoint returned {status}"),
        },
        other => DispatchOutcome::Retry {
            status: Some(other),
            retry_after: None,
            reason: format!("unexpected status {other}"),
        },
    }
}

/// Pooled HTTP dispatcher for webhook endpoint delivery.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    /// Build a dispatcher with a connection-pooled client.
    pub fn new() -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .map_err(|e| DispatchError::Build(e.to_string()))?;
        Ok(Self { client })
    }

    /// Send a signed POST request to `url` with the given `body` and
    /// `custom_headers`, classifying the result.
    pub async fn dispatch(
        &self,
        url: &str,
        secret: &str,
        signing_scheme: &str,
        body: &[u8],
        custom_headers: &std::collections::HashMap<String, String>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let scheme = signing_scheme.parse::<SignatureScheme>()?;
        let signature = sign_payload(scheme, secret, body);

        let mut request = self
            .client
            .post(url)
            .header("X-Convoy-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body.to_vec());

        for (key, value) in custom_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        Ok(classify_response(status, retry_after))
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new().expect("default reqwest client configuration is always valid")
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
