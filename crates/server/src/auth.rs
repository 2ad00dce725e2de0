use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use supabase_jwt::{Claims, JwksCache};

use crate::{AppState, error::AppError};

/// Resolves a bearer token to the subject it was issued for.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn subject(&self, token: &str) -> Option<String>;
}

pub struct SupabaseAuth {
    jwks_cache: JwksCache,
}

impl SupabaseAuth {
    pub fn new(supabase_url: &str) -> Self {
        let jwks_url = format!(
            "{}/auth/v1/.well-known/jwks.json",
            supabase_url.trim_end_matches('/')
        );
        Self {
            jwks_cache: JwksCache::new(&jwks_url),
        }
    }
}

fn is_expired(exp: i64) -> bool {
    Utc::now().timestamp() > exp
}

#[async_trait]
impl Authenticator for SupabaseAuth {
    async fn subject(&self, token: &str) -> Option<String> {
        match Claims::from_token(token, &self.jwks_cache).await {
            Err(_) => {
                tracing::debug!("Rejected bearer token");
                None
            }
            Ok(claims) if is_expired(claims.exp as i64) => None,
            Ok(claims) => Some(claims.sub),
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticated voter id for the request.
pub async fn verify_voter(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let token = bearer(headers).ok_or(AppError::Unauthorized)?;
    state
        .auth
        .subject(token)
        .await
        .ok_or(AppError::Unauthorized)
}

/// Authenticated subject that must also be a configured admin.
pub async fn verify_admin(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let subject = verify_voter(state, headers).await?;
    if !state.config.is_admin(&subject) {
        tracing::warn!("Non-admin subject {} tried an admin route", subject);
        return Err(AppError::Forbidden);
    }
    Ok(subject)
}
