use std::{collections::HashSet, sync::Arc};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{event, Level};

use crate::{
    domain::{new_id, Role, User},
    error::AppError,
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub token_type: TokenType,
    pub jti: String,
    pub exp: usize,
    pub iat: usize,
}

/// Caller identity resolved by [`authentication_middleware`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("This action requires the {:?} role", role)))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(String::from("This action requires an administrator")))
        }
    }
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        AuthenticatedUser {
            id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(String::from("Authentication credentials were not provided")))
    }
}

pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies HS256 bearer tokens and tracks revoked refresh tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    revoked: Mutex<HashSet<String>>,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        TokenService {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_secs,
            refresh_ttl_secs,
            revoked: Mutex::new(HashSet::new()),
        }
    }

    fn issue(&self, user: &User, token_type: TokenType, ttl_secs: i64) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            token_type,
            jti: new_id(),
            iat: now as usize,
            exp: (now + ttl_secs) as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access: self.issue(user, TokenType::Access, self.access_ttl_secs)?,
            refresh: self.issue(user, TokenType::Refresh, self.refresh_ttl_secs)?,
        })
    }

    pub fn issue_access(&self, user: &User) -> Result<String, AppError> {
        self.issue(user, TokenType::Access, self.access_ttl_secs)
    }

    pub async fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => token_data.claims,
            Err(e) => {
                event!(Level::DEBUG, "Failed to decode token: {}", e);
                return Err(AppError::Unauthorized(String::from("Token is invalid or expired")));
            }
        };

        if claims.token_type != expected {
            return Err(AppError::Unauthorized(String::from("Token has wrong type")));
        }

        if expected == TokenType::Refresh && self.revoked.lock().await.contains(&claims.jti) {
            return Err(AppError::Unauthorized(String::from("Token is blacklisted")));
        }

        Ok(claims)
    }

    pub async fn revoke(&self, claims: &Claims) {
        let mut lock = self.revoked.lock().await;
        lock.insert(claims.jti.clone());
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to generate salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            event!(Level::WARN, "Stored password hash is malformed: {}", e);
            false
        }
    }
}

fn bearer_token(request: &Request) -> Result<&str, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized(String::from("Authentication credentials were not provided")))?;

    let header = header
        .to_str()
        .map_err(|_| AppError::Unauthorized(String::from("Authorization header is malformed")))?;

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AppError::Unauthorized(String::from("Authorization header must be 'Bearer <token>'"))),
    }
}

pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?;
    let claims = state.token_service.verify(token, TokenType::Access).await?;

    // role is read from the store so it reflects changes made after the token was issued
    let user = match state.repositories.users.read(&claims.sub).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized(String::from("User not found"))),
        Err(e) => return Err(e),
    };

    if !user.is_active {
        return Err(AppError::Unauthorized(String::from("User is inactive")));
    }

    request.extensions_mut().insert(AuthenticatedUser::from(&user));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: new_id(),
            username: String::from("thandi"),
            username_lower: String::from("thandi"),
            email: String::from("thandi@example.com"),
            password_hash: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            display_name: String::from("Thandi"),
            phone_number: None,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn issued_tokens_verify_with_their_own_type_only() {
        let service = TokenService::new("secret", 300, 3600);
        let pair = service.issue_pair(&user(Role::Customer)).unwrap();

        let claims = service.verify(&pair.access, TokenType::Access).await.unwrap();
        assert_eq!(claims.username, "thandi");
        assert!(service.verify(&pair.access, TokenType::Refresh).await.is_err());
        assert!(service.verify(&pair.refresh, TokenType::Refresh).await.is_ok());
    }

    #[tokio::test]
    async fn expired_and_foreign_tokens_are_rejected() {
        let expired = TokenService::new("secret", -10, -10);
        let pair = expired.issue_pair(&user(Role::Customer)).unwrap();
        assert!(matches!(
            expired.verify(&pair.access, TokenType::Access).await,
            Err(AppError::Unauthorized(_))
        ));

        let other = TokenService::new("other-secret", 300, 300);
        let foreign = other.issue_access(&user(Role::Admin)).unwrap();
        assert!(expired.verify(&foreign, TokenType::Access).await.is_err());
    }

    #[tokio::test]
    async fn revoked_refresh_tokens_are_rejected() {
        let service = TokenService::new("secret", 300, 3600);
        let pair = service.issue_pair(&user(Role::Vendor)).unwrap();
        let claims = service.verify(&pair.refresh, TokenType::Refresh).await.unwrap();

        service.revoke(&claims).await;

        assert!(service.verify(&pair.refresh, TokenType::Refresh).await.is_err());
    }

    #[test]
    fn password_hash_verifies_only_the_original_password() {
        let hash = hash_password("correct horse").unwrap();

        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[test]
    fn role_checks_let_admins_through() {
        let admin = AuthenticatedUser::from(&user(Role::Admin));
        let customer = AuthenticatedUser::from(&user(Role::Customer));

        assert!(admin.require_role(Role::Vendor).is_ok());
        assert!(customer.require_role(Role::Vendor).is_err());
        assert!(customer.require_admin().is_err());
    }
}
