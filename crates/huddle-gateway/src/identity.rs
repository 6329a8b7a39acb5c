use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use huddle_types::api::Claims;

/// Authenticated user behind a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
        }
    }
}

/// Issues and checks the HS256 tokens handed out at login.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Arc<str>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        username: &str,
        ttl: chrono::Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn claims(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| debug!("Rejected token: {}", e))
        .ok()
        .map(|data| data.claims)
    }

    pub fn verify(&self, token: &str) -> Option<Identity> {
        self.claims(token).map(Identity::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let verifier = TokenVerifier::new("test-secret");
        let id = Uuid::new_v4();
        let token = verifier.issue(id, "Bossm", chrono::Duration::hours(1)).unwrap();

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.user_id, id);
        assert_eq!(identity.username, "Bossm");
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let verifier = TokenVerifier::new("test-secret");
        let other = TokenVerifier::new("other-secret");
        let id = Uuid::new_v4();

        let foreign = other.issue(id, "Jam", chrono::Duration::hours(1)).unwrap();
        assert!(verifier.verify(&foreign).is_none());

        let expired = verifier.issue(id, "Jam", chrono::Duration::hours(-2)).unwrap();
        assert!(verifier.verify(&expired).is_none());

        assert!(verifier.verify("not-a-token").is_none());
    }
}
