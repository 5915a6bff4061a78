use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    error::ApiError,
    gate::Actor,
    repository::RepositoryState,
};

pub const SESSION_COOKIE: &str = "session";
pub const FLASH_COOKIE: &str = "flash";

/// Claims
///
/// Payload of a session token. The token travels in the `session` cookie
/// (browser) or in an `Authorization: Bearer` header (API clients).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: i64,
    /// Expiration time (seconds since epoch).
    pub exp: usize,
    /// Issued at.
    pub iat: usize,
}

/// Signs a session token for `user_id`, valid for the configured TTL.
pub fn issue_token(config: &AppConfig, user_id: i64) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        exp: (now + Duration::hours(config.session_ttl_hours)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("failed to sign session token: {e}")))
}

/// Returns the user id of a valid, unexpired token.
pub fn verify_token(config: &AppConfig, token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    ) {
        Ok(data) => Some(data.claims.sub),
        Err(e) => {
            tracing::debug!("rejected session token: {}", e);
            None
        }
    }
}

// --- Cookies ---

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn cookie(name: &str, value: &str, max_age: i64) -> HeaderValue {
    let raw = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    // Values are tokens or percent-encoded text, both valid header characters.
    HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn session_cookie(config: &AppConfig, token: &str) -> HeaderValue {
    cookie(SESSION_COOKIE, token, config.session_ttl_hours * 3600)
}

pub fn clear_session_cookie() -> HeaderValue {
    cookie(SESSION_COOKIE, "", 0)
}

/// A one-shot message shown on the next rendered page.
pub fn flash_cookie(message: &str) -> HeaderValue {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    cookie(FLASH_COOKIE, &encoded, 60)
}

pub fn clear_flash_cookie() -> HeaderValue {
    cookie(FLASH_COOKIE, "", 0)
}

/// The pending flash message, decoded.
pub fn read_flash(headers: &HeaderMap) -> Option<String> {
    let raw = read_cookie(headers, FLASH_COOKIE)?;
    let decoded = url::form_urlencoded::parse(format!("m={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())?;
    (!decoded.is_empty()).then_some(decoded)
}

// --- Actor Resolution ---

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// resolve_actor
///
/// Finds the session token (bearer header first, then cookie), verifies it, and
/// loads the user with their ownership index. `Ok(None)` means anonymous.
/// The result is cached in the request extensions so stacked extractors load it once.
pub async fn resolve_actor(
    parts: &mut Parts,
    repo: &RepositoryState,
    config: &AppConfig,
) -> Result<Option<Actor>, ApiError> {
    if let Some(actor) = parts.extensions.get::<Actor>() {
        return Ok(Some(actor.clone()));
    }

    let Some(token) =
        bearer_token(&parts.headers).or_else(|| read_cookie(&parts.headers, SESSION_COOKIE))
    else {
        return Ok(None);
    };
    let Some(user_id) = verify_token(config, &token) else {
        return Ok(None);
    };
    // A valid token for a user that no longer exists is treated as anonymous.
    let Some(user) = repo.get_user(user_id).await? else {
        return Ok(None);
    };

    let owned = repo.owned_vm_ids(user.id).await?;
    let actor = Actor::new(&user, owned);
    parts.extensions.insert(actor.clone());
    Ok(Some(actor))
}

/// AuthUser
///
/// Extractor for the JSON API. Rejects with a `401` JSON body when there is no
/// valid session.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        resolve_actor(parts, &repo, &config)
            .await?
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

/// SessionUser
///
/// Extractor for HTML pages. Redirects to `/login` when there is no valid session.
#[derive(Debug, Clone)]
pub struct SessionUser(pub Actor);

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        match resolve_actor(parts, &repo, &config).await {
            Ok(Some(actor)) => Ok(SessionUser(actor)),
            Ok(None) => Err(Redirect::to("/login").into_response()),
            Err(e) => Err(e.into_response()),
        }
    }
}

/// MaybeUser
///
/// The actor when a session exists, for pages that anonymous visitors may see too.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Actor>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        Ok(MaybeUser(resolve_actor(parts, &repo, &config).await?))
    }
}
