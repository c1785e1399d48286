//! Token verification for the `HELLO` handshake. The REST layer issues
//! tokens; this module only verifies them and extracts the identity, role,
//! tenant, and (for students) team claims the Message Router needs.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token is not authorized for session {0}")]
    WrongSession(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
}

/// The claims a `HELLO` token must carry. `session_id` binds the token to
/// one session; a token minted for session A is rejected on session B's
/// connection even if otherwise valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub tenant_id: String,
    pub session_id: String,
    pub team_id: Option<String>,
    pub exp: usize,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        TokenVerifier {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str, expected_session_id: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;
        if data.claims.session_id != expected_session_id {
            return Err(AuthError::WrongSession(expected_session_id.to_string()));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(session_id: &str, secret: &str) -> String {
        let claims = Claims {
            sub: "student-1".into(),
            role: Role::Student,
            tenant_id: "tenant-1".into(),
            session_id: session_id.into(),
            team_id: None,
            exp: 9_999_999_999,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn verifies_a_token_minted_for_the_expected_session() {
        let verifier = TokenVerifier::new("secret");
        let token = token_for("sess1", "secret");
        let claims = verifier.verify(&token, "sess1").unwrap();
        assert_eq!(claims.sub, "student-1");
    }

    #[test]
    fn rejects_a_token_minted_for_a_different_session() {
        let verifier = TokenVerifier::new("secret");
        let token = token_for("sess1", "secret");
        let err = verifier.verify(&token, "sess2").unwrap_err();
        assert!(matches!(err, AuthError::WrongSession(_)));
    }

    #[test]
    fn rejects_a_token_signed_with_the_wrong_secret() {
        let verifier = TokenVerifier::new("secret");
        let token = token_for("sess1", "other-secret");
        assert!(verifier.verify(&token, "sess1").is_err());
    }
}
