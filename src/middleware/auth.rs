use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::User;
use crate::AppState;

/// Token header used by the browser client alongside `Authorization`.
pub const LEGACY_TOKEN_HEADER: &str = "x-auth-token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct AuthConfig {
    jwt_secret: String,
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, token_ttl: Duration) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl,
        }
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + self.token_ttl.as_secs() as i64,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized("Token is not valid".to_string()))
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// `false` for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Extractor for authenticated requests.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(token.trim());
        }
        return None;
    }

    parts
        .headers
        .get(LEGACY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("No token, authorization denied".to_string()))?;

        let claims = state.auth.validate_token(token)?;

        Ok(AuthUser { id: claims.sub })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, TaskStats};
    use axum::http::Request;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            profile_pic: String::new(),
            role: Role::User,
            created_at: Utc::now(),
            task_stats: TaskStats::default(),
            ratings: Vec::new(),
        }
    }

    fn config() -> AuthConfig {
        AuthConfig::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn issued_tokens_validate() {
        let user = user();
        let token = config().issue_token(&user).unwrap();
        let claims = config().validate_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "grace@example.com");
    }

    #[test]
    fn wrong_secret_and_expired_tokens_fail() {
        let token = config().issue_token(&user()).unwrap();
        let other = AuthConfig::new("other-secret", Duration::from_secs(3600));
        assert!(matches!(other.validate_token(&token), Err(AppError::Unauthorized(_))));

        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: Uuid::new_v4(),
            name: "Old".into(),
            email: "old@example.com".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let expired = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret("test-secret".as_bytes()),
        )
        .unwrap();
        assert!(config().validate_token(&expired).is_err());
    }

    #[test]
    fn passwords_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-phc-string"));
    }

    #[test]
    fn token_is_read_from_either_header() {
        let (parts, _) = Request::builder()
            .header("Authorization", "Bearer abc.def")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc.def"));

        let (parts, _) = Request::builder()
            .header(LEGACY_TOKEN_HEADER, "xyz")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("xyz"));

        let (parts, _) = Request::builder()
            .header("Authorization", "Basic Zm9v")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), None);
    }

    #[tokio::test]
    async fn extractor_yields_the_token_subject() {
        let state = AppState::new(
            std::sync::Arc::new(crate::store::MemoryStore::new()),
            crate::services::RewardCalculator::offline(),
            crate::services::OwnershipPolicy::strict(),
            config(),
        );
        let user = user();
        let token = state.auth.issue_token(&user).unwrap();

        let (mut parts, _) = Request::builder()
            .header(LEGACY_TOKEN_HEADER, token)
            .body(())
            .unwrap()
            .into_parts();
        let auth = AuthUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(auth.id, user.id);

        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let err = AuthUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
