//! Authentication: password storage and bearer tokens.
//!
//! Passwords are hashed with PBKDF2-HMAC-SHA256 and stored as
//! `base64(salt):base64(hash)`. Bearer tokens are HS256 JWTs carrying
//! `{sub, iat, exp}`; there is no server-side session state, validation
//! needs only the HMAC key.

use crate::{config::AuthConfig, repository::Repository, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

/// PBKDF2-HMAC-SHA256 iteration count (OWASP 2023).
const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Bearer tokens are valid for 24 hours from issuance.
const TOKEN_TTL_HOURS: i64 = 24;

/// Hash a password into a storable `base64(salt):base64(hash)` string.
pub fn hash_password(password: &str) -> Result<String> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| anyhow::anyhow!("failed to generate random salt"))?;

    let mut hash = [0u8; KEY_LEN];
    pbkdf2::derive(
        PBKDF2_ALG,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("iteration count is non-zero"),
        &salt,
        password.as_bytes(),
        &mut hash,
    );

    Ok(format!("{}:{}", BASE64.encode(salt), BASE64.encode(hash)))
}

/// Verify a password against a stored `base64(salt):base64(hash)` string.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let Some((salt_part, hash_part)) = stored.split_once(':') else {
        return Err(anyhow::anyhow!("malformed password hash").into());
    };

    let salt = BASE64
        .decode(salt_part)
        .map_err(|_| anyhow::anyhow!("malformed password hash salt"))?;
    let expected = BASE64
        .decode(hash_part)
        .map_err(|_| anyhow::anyhow!("malformed password hash digest"))?;

    Ok(pbkdf2::verify(
        PBKDF2_ALG,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("iteration count is non-zero"),
        &salt,
        password.as_bytes(),
        &expected,
    )
    .is_ok())
}

/// JWT claims carried by every bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Owner login.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenManager {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// Mint a token for a login; returns the token and its expiry.
    pub fn mint(&self, login: &str) -> Result<(String, DateTime<Utc>)> {
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::hours(TOKEN_TTL_HOURS);
        let claims = Claims {
            sub: login.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Verify a token's signature and expiry; returns the subject login.
    pub fn verify(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims.sub)
    }
}

/// Shared state for the bearer-token middleware.
#[derive(Clone)]
pub struct AuthState {
    pub tokens: TokenManager,
    pub repository: Arc<dyn Repository>,
}

/// Login of the authenticated caller, injected into request extensions by
/// `auth_middleware`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Bearer-token middleware for the protected API routes.
///
/// 401 on a missing, malformed, or invalid token; 403 when the token is
/// valid but its subject no longer exists.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, Response> {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(&headers) else {
        warn!("missing bearer token for {}", path);
        return Err(unauthorized());
    };

    let login = match state.tokens.verify(token) {
        Ok(login) => login,
        Err(err) => {
            warn!("rejected token for {}: {}", path, err);
            return Err(unauthorized());
        }
    };

    match state.repository.find_user(&login).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("token subject {} no longer exists", login);
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({"error": "user not found"})),
            )
                .into_response());
        }
        Err(err) => {
            warn!("user lookup failed for {}: {}", login, err);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            )
                .into_response());
        }
    }

    request.extensions_mut().insert(CurrentUser(login));
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized"})),
    )
        .into_response()
}
