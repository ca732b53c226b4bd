//! Stateless, time-bounded request tokens
//!
//! A token is `"<issued_at>.<signature>"` where `issued_at` is Unix epoch
//! seconds and `signature` is the hex HMAC-SHA256 of `issued_at` under the
//! server secret. Nothing is stored server-side, so a token can be replayed
//! until it expires.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime (one day)
pub const TOKEN_TTL_SECS: u64 = 86_400;

/// Tolerated clock skew for tokens stamped slightly in the future
const MAX_FUTURE_SKEW_SECS: u64 = 60;

const DELIMITER: char = '.';

/// Why a token was rejected. Logged, never shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("token missing")]
    Missing,
    #[error("token malformed")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Parsed auth token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub issued_at: u64,
    pub signature: String,
}

impl AuthToken {
    /// Parse `"<issued_at>.<signature>"`, splitting on the last delimiter.
    pub fn parse(raw: &str) -> std::result::Result<Self, AuthFailure> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthFailure::Missing);
        }
        let (ts, signature) = raw.rsplit_once(DELIMITER).ok_or(AuthFailure::Malformed)?;
        if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) || signature.is_empty() {
            return Err(AuthFailure::Malformed);
        }
        let issued_at = ts.parse().map_err(|_| AuthFailure::Malformed)?;
        Ok(AuthToken {
            issued_at,
            signature: signature.to_string(),
        })
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.issued_at, DELIMITER, self.signature)
    }
}

/// Issues and verifies auth tokens with a process-wide secret.
///
/// Built without a secret the tokenizer is inert: it issues nothing and
/// every verification reports [`Error::Unconfigured`].
#[derive(Clone)]
pub struct AuthTokenizer {
    secret: Option<String>,
    ttl_secs: u64,
}

impl fmt::Debug for AuthTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokenizer")
            .field("configured", &self.is_configured())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl AuthTokenizer {
    pub fn new(secret: Option<String>) -> Self {
        AuthTokenizer {
            secret: secret.filter(|s| !s.is_empty()),
            ttl_secs: TOKEN_TTL_SECS,
        }
    }

    /// Override the token lifetime
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Issue a token bound to the current time
    pub fn issue(&self) -> Result<AuthToken> {
        self.issue_at(now_secs())
    }

    /// Issue a token bound to `issued_at`
    pub fn issue_at(&self, issued_at: u64) -> Result<AuthToken> {
        let secret = self.secret()?;
        Ok(AuthToken {
            issued_at,
            signature: sign(secret, issued_at)?,
        })
    }

    /// Verify a serialized token against the current time
    pub fn verify(&self, token: &str) -> Result<()> {
        self.verify_at(token, now_secs())
    }

    /// Verify a serialized token as of `now`.
    ///
    /// Fails closed: any parse error, signature mismatch or an age above the
    /// TTL is an [`Error::Auth`]. Without a secret the result is
    /// [`Error::Unconfigured`] regardless of the token.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<()> {
        let secret = self.secret()?;
        let token = AuthToken::parse(token).map_err(Error::Auth)?;

        let expected =
            hex::decode(&token.signature).map_err(|_| Error::Auth(AuthFailure::BadSignature))?;
        // verify_slice compares in constant time
        mac_for(secret, token.issued_at)?
            .verify_slice(&expected)
            .map_err(|_| Error::Auth(AuthFailure::BadSignature))?;

        if token.issued_at > now.saturating_add(MAX_FUTURE_SKEW_SECS) {
            return Err(Error::Auth(AuthFailure::Expired));
        }
        if now.saturating_sub(token.issued_at) > self.ttl_secs {
            return Err(Error::Auth(AuthFailure::Expired));
        }
        Ok(())
    }

    /// Convenience wrapper returning only the verdict
    pub fn is_valid(&self, token: &str) -> bool {
        self.verify(token).is_ok()
    }

    fn secret(&self) -> Result<&str> {
        self.secret
            .as_deref()
            .ok_or_else(|| Error::Unconfigured("no token secret".to_string()))
    }
}

fn mac_for(secret: &str, issued_at: u64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid token secret: {}", e)))?;
    mac.update(issued_at.to_string().as_bytes());
    Ok(mac)
}

fn sign(secret: &str, issued_at: u64) -> Result<String> {
    Ok(hex::encode(mac_for(secret, issued_at)?.finalize().into_bytes()))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_760_000_000;

    fn tokenizer() -> AuthTokenizer {
        AuthTokenizer::new(Some("server-secret".to_string()))
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let t = tokenizer();
        let token = t.issue().unwrap();
        assert_eq!(token.signature.len(), 64);
        assert!(t.is_valid(&token.to_string()));
    }

    #[test]
    fn test_token_within_ttl_is_valid() {
        let t = tokenizer();
        for age in [0, 1, 3600, TOKEN_TTL_SECS] {
            let token = t.issue_at(NOW - age).unwrap().to_string();
            assert!(t.verify_at(&token, NOW).is_ok(), "age {}", age);
        }
    }

    #[test]
    fn test_token_one_second_past_ttl_is_rejected() {
        let t = tokenizer();
        let token = t.issue_at(NOW - TOKEN_TTL_SECS - 1).unwrap().to_string();
        let err = t.verify_at(&token, NOW).unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::Expired)));
    }

    #[test]
    fn test_custom_ttl() {
        let t = tokenizer().with_ttl(600);
        let token = t.issue_at(NOW - 601).unwrap().to_string();
        assert!(t.verify_at(&token, NOW).is_err());
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let t = tokenizer();
        let mut token = t.issue_at(NOW).unwrap();
        let first = if token.signature.starts_with('0') { "1" } else { "0" };
        token.signature.replace_range(0..1, first);
        let err = t.verify_at(&token.to_string(), NOW).unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::BadSignature)));
    }

    #[test]
    fn test_tampered_timestamp_is_rejected() {
        let t = tokenizer();
        let token = t.issue_at(NOW - 10).unwrap();
        let forged = format!("{}.{}", NOW, token.signature);
        assert!(t.verify_at(&forged, NOW).is_err());
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let token = tokenizer().issue_at(NOW).unwrap().to_string();
        let other = AuthTokenizer::new(Some("another".to_string()));
        assert!(other.verify_at(&token, NOW).is_err());
    }

    #[test]
    fn test_malformed_tokens() {
        let t = tokenizer();
        for raw in ["", "   ", "nodelimiter", ".abc", "12a.abc", "-5.abc", "123."] {
            let err = t.verify_at(raw, NOW).unwrap_err();
            assert!(matches!(err, Error::Auth(_)), "{:?}", raw);
        }
        assert_eq!(AuthToken::parse(""), Err(AuthFailure::Missing));
        assert_eq!(AuthToken::parse("1.2.3"), Err(AuthFailure::Malformed));
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        let t = tokenizer();
        let err = t.verify_at(&format!("{}.zz", NOW), NOW).unwrap_err();
        assert!(matches!(err, Error::Auth(AuthFailure::BadSignature)));
    }

    #[test]
    fn test_far_future_token_is_rejected() {
        let t = tokenizer();
        let token = t.issue_at(NOW + 3600).unwrap().to_string();
        assert!(t.verify_at(&token, NOW).is_err());
        let skewed = t.issue_at(NOW + 30).unwrap().to_string();
        assert!(t.verify_at(&skewed, NOW).is_ok());
    }

    #[test]
    fn test_unconfigured_is_distinct_from_rejection() {
        let t = AuthTokenizer::new(None);
        assert!(!t.is_configured());
        assert!(matches!(t.issue(), Err(Error::Unconfigured(_))));
        let err = t.verify_at("123.abc", NOW).unwrap_err();
        assert!(matches!(err, Error::Unconfigured(_)));
        assert!(!AuthTokenizer::new(Some(String::new())).is_configured());
    }

    #[test]
    fn test_parse_splits_on_last_delimiter() {
        let token = AuthToken::parse("1700000000.deadbeef").unwrap();
        assert_eq!(token.issued_at, 1_700_000_000);
        assert_eq!(token.signature, "deadbeef");
        assert_eq!(token.to_string(), "1700000000.deadbeef");
    }
}
