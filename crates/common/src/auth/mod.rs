//! Authentication and authorization utilities
//!
//! Provides:
//! - JWT token generation and validation (HS256, `sub` = user id)
//! - Bearer-token user extraction for handlers
//! - The subscription paywall check

use crate::config::AuthConfig;
use crate::db::SubscriptionStore;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl JwtClaims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidToken)
    }
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    /// Manager from configuration. Fails when no secret is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "auth.jwt_secret (or JWT_SECRET) is not set".to_string(),
            })?;
        Ok(Self::new(secret, config.jwt_expiration_secs))
    }

    /// Manager with a random per-process secret, for local development
    pub fn ephemeral(expiration_secs: u64) -> Self {
        let bytes: [u8; 32] = rand::random();
        Self::new(&hex::encode(bytes), expiration_secs)
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, user_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticated caller, resolved from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must be a bearer token".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let user_id = jwt.validate_token(token)?.user_id()?;

        Ok(AuthUser { user_id })
    }
}

/// Paywall: decides whether a user may run paid operations
#[derive(Clone)]
pub struct SubscriptionGate {
    store: Arc<dyn SubscriptionStore>,
    required: bool,
}

impl SubscriptionGate {
    pub fn new(store: Arc<dyn SubscriptionStore>, required: bool) -> Self {
        Self { store, required }
    }

    /// Ok when the user has an active or trialing subscription, or when the
    /// paywall is disabled
    pub async fn check(&self, user_id: Uuid) -> Result<()> {
        if !self.required {
            return Ok(());
        }
        match self.store.find_subscription(user_id).await? {
            Some(subscription) if subscription.is_active() => Ok(()),
            _ => Err(AppError::SubscriptionInactive {
                user_id: user_id.to_string(),
            }),
        }
    }
}

/// Authenticated caller that also passed the paywall. Use on mutating
/// routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber(pub AuthUser);

impl Subscriber {
    pub fn user_id(&self) -> Uuid {
        self.0.user_id
    }
}

impl<S> FromRequestParts<S> for Subscriber
where
    Arc<JwtManager>: FromRef<S>,
    SubscriptionGate: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        SubscriptionGate::from_ref(state).check(user.user_id).await?;
        Ok(Subscriber(user))
    }
}
