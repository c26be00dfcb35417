//! Handshake authentication.
//!
//! A connection proves who it is once, during the handshake. The bearer
//! credential is looked up in a fixed order and handed to an
//! [`IdentityVerifier`], which is supplied by the embedding application.

use crate::identity::UserIdentity;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Name of the session cookie carrying the credential.
pub const AUTH_COOKIE: &str = "jwt";

/// Prefix of an `Authorization` header carrying a bearer token.
const BEARER_PREFIX: &str = "Bearer ";

/// Reasons a handshake credential did not produce an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// No credential in any handshake source.
    #[error("Not authorized, no token")]
    MissingCredential,

    /// Credential could not be parsed.
    #[error("Malformed credential: {0}")]
    Malformed(String),

    /// Credential is past its expiry.
    #[error("Credential has expired")]
    Expired,

    /// Credential parsed but failed verification.
    #[error("Credential rejected: {0}")]
    Rejected(String),

    /// Credential is valid but its user no longer exists.
    #[error("User not found: {0}")]
    UnknownIdentity(String),

    /// The handshake did not complete in time.
    #[error("Handshake timed out")]
    Timeout,

    /// The verifier's backing store failed.
    #[error("Verifier unavailable: {0}")]
    Backend(String),
}

impl VerificationError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::MissingCredential => "missing",
            VerificationError::Malformed(_) => "malformed",
            VerificationError::Expired => "expired",
            VerificationError::Rejected(_) => "rejected",
            VerificationError::UnknownIdentity(_) => "unknown_identity",
            VerificationError::Timeout => "timeout",
            VerificationError::Backend(_) => "backend",
        }
    }
}

/// Turns a bearer credential into a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential.
    ///
    /// Called exactly once per handshake.
    async fn verify(&self, credential: &str) -> Result<UserIdentity, VerificationError>;
}

/// What a client presented when opening a connection.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Token from the explicit auth payload, if any.
    pub auth_token: Option<String>,
    /// Request headers, keyed by lowercase name.
    headers: HashMap<String, String>,
}

impl Handshake {
    /// Create an empty handshake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the auth payload token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Add a header in place.
    ///
    /// Repeated headers are combined into one value, `; `-separated for
    /// `cookie` and `, `-separated otherwise.
    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.headers.get_mut(&name) {
            Some(existing) => {
                existing.push_str(if name == "cookie" { "; " } else { ", " });
                existing.push_str(&value);
            }
            None => {
                self.headers.insert(name, value);
            }
        }
    }

    /// Look up a header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    AuthPayload,
    AuthorizationHeader,
    Cookie,
}

impl CredentialSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::AuthPayload => "auth_payload",
            CredentialSource::AuthorizationHeader => "authorization_header",
            CredentialSource::Cookie => "cookie",
        }
    }
}

/// A bearer credential taken from a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

/// Extract the bearer credential from a handshake.
///
/// Sources are checked in order: auth payload, `Authorization: Bearer`
/// header, then the `jwt` cookie. The first non-empty match wins and later
/// sources are not looked at.
#[must_use]
pub fn extract_credential(handshake: &Handshake) -> Option<Credential> {
    if let Some(token) = handshake.auth_token.as_deref().filter(|t| !t.is_empty()) {
        return Some(Credential {
            token: token.to_string(),
            source: CredentialSource::AuthPayload,
        });
    }

    if let Some(token) = handshake.header("authorization").and_then(bearer_token) {
        return Some(Credential {
            token: token.to_string(),
            source: CredentialSource::AuthorizationHeader,
        });
    }

    handshake
        .header("cookie")
        .and_then(|cookies| cookie_value(cookies, AUTH_COOKIE))
        .map(|token| Credential {
            token: token.to_string(),
            source: CredentialSource::Cookie,
        })
}

/// Token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Value of the named cookie in a `Cookie` header.
#[must_use]
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_cookie_headers_combined() {
        let handshake = Handshake::new()
            .with_header("Cookie", "jwt=tok")
            .with_header("cookie", "theme=dark");

        assert_eq!(handshake.header("cookie"), Some("jwt=tok; theme=dark"));
        let credential = extract_credential(&handshake).unwrap();
        assert_eq!(credential.token, "tok");
        assert_eq!(credential.source, CredentialSource::Cookie);

        let handshake = Handshake::new()
            .with_header("accept", "a")
            .with_header("Accept", "b");
        assert_eq!(handshake.header("accept"), Some("a, b"));
    }

    #[test]
    fn test_auth_payload_wins() {
        let handshake = Handshake::new()
            .with_auth_token("payload")
            .with_header("Authorization", "Bearer header")
            .with_header("Cookie", "jwt=cookie");

        let credential = extract_credential(&handshake).unwrap();
        assert_eq!(credential.token, "payload");
        assert_eq!(credential.source, CredentialSource::AuthPayload);
    }

    #[test]
    fn test_header_before_cookie() {
        let handshake = Handshake::new()
            .with_header("authorization", "Bearer header")
            .with_header("cookie", "jwt=cookie");

        let credential = extract_credential(&handshake).unwrap();
        assert_eq!(credential.token, "header");
        assert_eq!(credential.source, CredentialSource::AuthorizationHeader);
    }

    #[test]
    fn test_cookie_fallback() {
        let handshake = Handshake::new()
            .with_header("Authorization", "Basic dXNlcjpwYXNz")
            .with_header("Cookie", "io=abc; jwt=cookie-token; theme=dark");

        let credential = extract_credential(&handshake).unwrap();
        assert_eq!(credential.token, "cookie-token");
        assert_eq!(credential.source, CredentialSource::Cookie);
    }

    #[test]
    fn test_empty_sources_do_not_match() {
        let handshake = Handshake::new()
            .with_auth_token("")
            .with_header("Authorization", "Bearer ")
            .with_header("Cookie", "jwt=");

        assert!(extract_credential(&handshake).is_none());
    }

    #[test]
    fn test_no_credential() {
        assert!(extract_credential(&Handshake::new()).is_none());

        // Cookie names must match exactly.
        let handshake = Handshake::new().with_header("Cookie", "xjwt=a; jwt_old=b");
        assert!(extract_credential(&handshake).is_none());
    }

    #[test]
    fn test_verification_reasons() {
        assert_eq!(VerificationError::MissingCredential.reason(), "missing");
        assert_eq!(VerificationError::Timeout.reason(), "timeout");
        assert_eq!(
            VerificationError::UnknownIdentity("u1".into()).reason(),
            "unknown_identity"
        );
    }
}
