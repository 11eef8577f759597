//! Upstream request signing.
//!
//! The upstream accepts a chat call only when it carries an `X-Signature`
//! derived from the request id, timestamp, user id and the latest user
//! prompt. The key for the second HMAC stage rotates every five minutes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// 内置兜底密钥；运营方可通过 `ZAI_SECRET_KEY` / `upstream.signing_secret` 覆盖
pub const DEFAULT_SECRET_KEY: &str = "key-@@@@)))()((9))-xxxx&&&%%%%%";

const WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing required parameter for signature generation: {0}")]
    MissingParameter(&'static str),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("hmac error: {0}")]
    Hmac(String),
}

#[derive(Debug, Clone, Default)]
pub struct SignatureParams {
    pub request_id: Option<String>,
    /// Epoch milliseconds, as sent in the `timestamp` query parameter.
    pub timestamp: Option<String>,
    pub user_id: Option<String>,
}

impl SignatureParams {
    pub fn new(
        request_id: impl Into<String>,
        timestamp: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            timestamp: Some(timestamp.into()),
            user_id: Some(user_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureResult {
    /// 64 位小写十六进制
    pub signature: String,
    pub timestamp: i64,
}

pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        params: &SignatureParams,
        last_user_message: &str,
    ) -> Result<SignatureResult, SignatureError>;
}

#[derive(Clone)]
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Uses `secret` when it is set and non-blank, the built-in key otherwise.
    pub fn with_override(secret: Option<&str>) -> Self {
        match secret.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Self::new(s),
            None => Self::new(DEFAULT_SECRET_KEY),
        }
    }
}

impl Default for HmacSigner {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_KEY)
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, SignatureError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(SignatureError::MissingParameter(name))
}

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SignatureError::Hmac(e.to_string()))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl RequestSigner for HmacSigner {
    fn sign(
        &self,
        params: &SignatureParams,
        last_user_message: &str,
    ) -> Result<SignatureResult, SignatureError> {
        let request_id = required(&params.request_id, "requestId")?;
        let timestamp_raw = required(&params.timestamp, "timestamp")?;
        let user_id = required(&params.user_id, "user_id")?;

        let timestamp: i64 = timestamp_raw
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                SignatureError::InvalidTimestamp(format!("{}: {}", timestamp_raw, e))
            })?;

        let canonical = format!(
            "requestId,{},timestamp,{},user_id,{}",
            request_id, timestamp, user_id
        );
        let encoded_prompt = B64_STANDARD.encode(last_user_message.as_bytes());
        // 注意：第三段使用原始时间戳字符串
        let payload = format!("{}|{}|{}", canonical, encoded_prompt, timestamp_raw);

        let window = (timestamp / WINDOW_MS).to_string();
        let window_key = hmac_sha256_hex(self.secret.as_bytes(), window.as_bytes())?;
        let signature = hmac_sha256_hex(window_key.as_bytes(), payload.as_bytes())?;

        Ok(SignatureResult {
            signature,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SignatureParams {
        SignatureParams::new("req-1", "1700000000000", "user-1")
    }

    fn is_lower_hex_64(s: &str) -> bool {
        s.len() == 64 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    #[test]
    fn matches_known_vector() {
        let out = HmacSigner::default().sign(&params(), "Hello").unwrap();
        assert_eq!(
            out.signature,
            "6f09fc7b82ce550068bbd387b8018c093ab95015dd605234b2db6845b3f7c240"
        );
        assert_eq!(out.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn matches_known_vector_for_non_ascii_prompt() {
        let out = HmacSigner::default()
            .sign(&params(), "Привет, мир")
            .unwrap();
        assert_eq!(
            out.signature,
            "ea6ee4f792a63ee4126c4c698a1420e42cce41a5a53aa48b65ccfde8d511dc9a"
        );
    }

    #[test]
    fn secret_override_changes_signature() {
        let out = HmacSigner::with_override(Some("custom"))
            .sign(&params(), "Hello")
            .unwrap();
        assert_eq!(
            out.signature,
            "8d734b953760c59f5018dbff6aadbbc309ed8d263d079fcd9ca0158d0db59706"
        );

        let blank = HmacSigner::with_override(Some("   "))
            .sign(&params(), "Hello")
            .unwrap();
        let default = HmacSigner::default().sign(&params(), "Hello").unwrap();
        assert_eq!(blank, default);
    }

    #[test]
    fn deterministic_and_input_sensitive() {
        let signer = HmacSigner::default();
        let base = signer.sign(&params(), "Hello").unwrap();
        assert_eq!(base, signer.sign(&params(), "Hello").unwrap());
        assert!(is_lower_hex_64(&base.signature));

        let variants = [
            (SignatureParams::new("req-2", "1700000000000", "user-1"), "Hello"),
            (SignatureParams::new("req-1", "1700000000001", "user-1"), "Hello"),
            (SignatureParams::new("req-1", "1700000000000", "user-2"), "Hello"),
            (params(), "Hello!"),
        ];
        for (p, msg) in variants {
            let other = signer.sign(&p, msg).unwrap();
            assert!(is_lower_hex_64(&other.signature));
            assert_ne!(other.signature, base.signature);
        }
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let signer = HmacSigner::default();

        let mut p = params();
        p.request_id = None;
        assert_eq!(
            signer.sign(&p, "x"),
            Err(SignatureError::MissingParameter("requestId"))
        );

        let mut p = params();
        p.timestamp = Some(String::new());
        assert_eq!(
            signer.sign(&p, "x"),
            Err(SignatureError::MissingParameter("timestamp"))
        );

        let mut p = params();
        p.user_id = None;
        assert_eq!(
            signer.sign(&p, "x"),
            Err(SignatureError::MissingParameter("user_id"))
        );
    }

    #[test]
    fn non_numeric_timestamp_is_rejected() {
        let p = SignatureParams::new("req-1", "yesterday", "user-1");
        assert!(matches!(
            HmacSigner::default().sign(&p, "x"),
            Err(SignatureError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn empty_prompt_is_allowed() {
        let out = HmacSigner::default().sign(&params(), "").unwrap();
        assert!(is_lower_hex_64(&out.signature));
    }
}
