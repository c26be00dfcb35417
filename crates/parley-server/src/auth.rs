//! JWT identity verification.
//!
//! Tokens are HS256-signed and carry the user id in either an `id` or a
//! `userId` claim. A token only yields an identity if that user still
//! exists in the directory.

use crate::store::UserDirectory;
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use parley_core::{IdentityVerifier, UserIdentity, VerificationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

impl Claims {
    /// The user id, preferring `id` over `userId`.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.user_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// Verifies HS256 tokens against a user directory.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    users: Arc<dyn UserDirectory>,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str, users: Arc<dyn UserDirectory>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 5;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            users,
        }
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, VerificationError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerificationError::Expired,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => VerificationError::Malformed(e.to_string()),
                _ => VerificationError::Rejected(e.to_string()),
            })
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<UserIdentity, VerificationError> {
        let claims = self.decode_claims(credential)?;
        let id = claims
            .subject()
            .ok_or_else(|| VerificationError::Malformed("Invalid token format".into()))?;
        let identity = UserIdentity::new(id);

        let found = self
            .users
            .find_user(&identity)
            .await
            .map_err(|e| VerificationError::Backend(e.to_string()))?;
        if found.is_none() {
            debug!(user = %identity, "Token subject has no user");
            return Err(VerificationError::UnknownIdentity(identity.into_inner()));
        }

        Ok(identity)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Claims;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub const SECRET: &str = "test-secret";

    /// Sign claims with the test secret.
    pub fn sign(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    /// A token for `user` valid for an hour.
    pub fn token_for(user: &str) -> String {
        sign(&Claims {
            id: Some(user.to_string()),
            user_id: None,
            exp: now() + 3600,
        })
    }

    pub fn now() -> u64 {
        jsonwebtoken::get_current_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{now, sign, token_for, SECRET};
    use super::*;
    use crate::store::{MemoryStore, User};

    fn verifier() -> JwtVerifier {
        let store = MemoryStore::with_users([User {
            id: "u1".into(),
            full_name: "User One".into(),
            email: "u1@example.com".into(),
            profile_pic: String::new(),
        }]);
        JwtVerifier::new(SECRET, Arc::new(store))
    }

    #[tokio::test]
    async fn test_valid_token() {
        let identity = verifier().verify(&token_for("u1")).await.unwrap();
        assert_eq!(identity.as_str(), "u1");
    }

    #[tokio::test]
    async fn test_user_id_claim() {
        let token = sign(&Claims {
            id: None,
            user_id: Some("u1".into()),
            exp: now() + 60,
        });
        assert_eq!(verifier().verify(&token).await.unwrap().as_str(), "u1");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let token = sign(&Claims {
            id: Some("u1".into()),
            user_id: None,
            exp: now() - 3600,
        });
        assert_eq!(
            verifier().verify(&token).await.unwrap_err(),
            VerificationError::Expired
        );
    }

    #[tokio::test]
    async fn test_missing_subject() {
        let token = sign(&Claims {
            id: None,
            user_id: None,
            exp: now() + 60,
        });
        assert!(matches!(
            verifier().verify(&token).await.unwrap_err(),
            VerificationError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_garbage_and_wrong_secret() {
        let err = verifier().verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, VerificationError::Malformed(_)));

        let other = JwtVerifier::new("other-secret", Arc::new(MemoryStore::new()));
        let err = other.verify(&token_for("u1")).await.unwrap_err();
        assert!(matches!(err, VerificationError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let err = verifier().verify(&token_for("ghost")).await.unwrap_err();
        assert_eq!(err, VerificationError::UnknownIdentity("ghost".into()));
    }
}
