//! Server-side session handling on top of `tower-sessions`.
//!
//! The session record lives in the store behind [`SessionManagerLayer`]; the
//! client only holds the opaque id cookie. Handlers never touch the store
//! directly, they go through [`UserSession`].

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tower_sessions::{
    Expiry, Session, SessionManagerLayer, SessionStore,
    cookie::{SameSite, time::Duration},
};

use crate::config::AppConfig;
use crate::models::{User, UserType};
use crate::store::Id;

pub const USER_ID_KEY: &str = "user_id";
pub const USER_TYPE_KEY: &str = "user_type";
pub const USER_STATUS_KEY: &str = "user_status";
pub const USER_NAME_KEY: &str = "user_name";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(#[from] tower_sessions::session::Error),
    #[error("session has no user id")]
    MissingUserId,
    #[error("session user id is not a valid identity: {0}")]
    InvalidUserId(Value),
    #[error("session has no user type")]
    MissingUserType,
    #[error("session user type is not recognised: {0}")]
    InvalidUserType(Value),
}

/// SessionClaims
///
/// The identity written into the session on login.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub user_id: Id,
    pub user_type: UserType,
    pub user_status: bool,
    pub user_name: String,
}

impl From<&User> for SessionClaims {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            user_type: user.user_type,
            user_status: user.status,
            user_name: user.name.clone(),
        }
    }
}

/// Normalizes a stored `user_id` to an [`Id`].
///
/// Accepts positive integers in any JSON numeric encoding, including floats
/// with no fractional part. Zero, negatives, fractions and non-numbers fail.
pub fn user_id_from_value(value: &Value) -> Result<Id, SessionError> {
    let invalid = || SessionError::InvalidUserId(value.clone());

    let Value::Number(number) = value else {
        return Err(invalid());
    };

    let id = if let Some(id) = number.as_u64() {
        id
    } else if let Some(id) = number.as_i64() {
        Id::try_from(id).map_err(|_| invalid())?
    } else if let Some(id) = number.as_f64() {
        if !id.is_finite() || id.fract() != 0.0 || id < 1.0 || id > Id::MAX as f64 {
            return Err(invalid());
        }
        id as Id
    } else {
        return Err(invalid());
    };

    if id == 0 {
        return Err(invalid());
    }
    Ok(id)
}

pub fn user_type_from_value(value: &Value) -> Result<UserType, SessionError> {
    value
        .as_str()
        .and_then(UserType::parse)
        .ok_or_else(|| SessionError::InvalidUserType(value.clone()))
}

/// UserSession
///
/// The session of the current request. Extracting it resolves (or lazily
/// creates) the record; it fails only when the session layer is missing.
#[derive(Debug, Clone)]
pub struct UserSession(Session);

impl UserSession {
    pub fn new(session: Session) -> Self {
        Self(session)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        Ok(self.0.get(key).await?)
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.0.get_value(key).await?)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: T) -> Result<(), SessionError> {
        Ok(self.0.insert(key, value).await?)
    }

    pub async fn save(&self) -> Result<(), SessionError> {
        Ok(self.0.save().await?)
    }

    /// Clears the data and deletes the record; the cookie is removed on response.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        Ok(self.0.flush().await?)
    }

    /// Issues a new id for the same record.
    pub async fn rotate(&self) -> Result<(), SessionError> {
        Ok(self.0.cycle_id().await?)
    }

    /// No user id has been written, so no login happened in this session.
    pub async fn is_anonymous(&self) -> Result<bool, SessionError> {
        Ok(self.get_value(USER_ID_KEY).await?.is_none())
    }

    pub async fn user_id(&self) -> Result<Id, SessionError> {
        let value = self
            .get_value(USER_ID_KEY)
            .await?
            .ok_or(SessionError::MissingUserId)?;
        user_id_from_value(&value)
    }

    pub async fn user_type(&self) -> Result<UserType, SessionError> {
        let value = self
            .get_value(USER_TYPE_KEY)
            .await?
            .ok_or(SessionError::MissingUserType)?;
        user_type_from_value(&value)
    }

    /// Login: rotates the id, then writes and saves the claims.
    pub async fn start(&self, claims: &SessionClaims) -> Result<(), SessionError> {
        self.rotate().await?;
        self.write_claims(claims).await
    }

    /// Writes all four claims and persists them.
    pub async fn write_claims(&self, claims: &SessionClaims) -> Result<(), SessionError> {
        self.set(USER_ID_KEY, claims.user_id).await?;
        self.set(USER_TYPE_KEY, claims.user_type.as_str()).await?;
        self.set(USER_STATUS_KEY, claims.user_status).await?;
        self.set(USER_NAME_KEY, &claims.user_name).await?;
        self.save().await
    }
}

impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Session::from_request_parts(parts, state).await.map(UserSession)
    }
}

/// session_layer
///
/// Cookie and expiry policy for every session. The record expires after
/// `session_ttl_minutes` without a request.
pub fn session_layer<Store>(store: Store, config: &AppConfig) -> SessionManagerLayer<Store>
where
    Store: SessionStore + Clone,
{
    SessionManagerLayer::new(store)
        .with_name(config.session_cookie_name.clone())
        .with_secure(config.session_secure)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(Duration::minutes(
            config.session_ttl_minutes,
        )))
}
