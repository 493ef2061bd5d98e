use axum::{
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tokio_util::sync::CancellationToken;

use crate::{
    auth_service::{AuthError, AuthState},
    config::AppConfig,
    error::AppError,
    models::{User, UserType},
    scope::RequestScope,
    session::{SessionError, UserSession},
    store::Id,
};

pub const LOGIN_PATH: &str = "/auth/login";

/// CurrentUser
///
/// The resolved identity of an authenticated request, taken from the live
/// profile rather than from the session claims.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: Id,
    pub name: String,
    pub user_type: UserType,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            user_type: user.user_type,
        }
    }
}

/// CurrentUser Extractor Implementation
///
/// Reads the identity placed in the request extensions by [`require_session`].
/// A handler mounted without that middleware gets 401.
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

pub fn to_login() -> Response {
    Redirect::to(LOGIN_PATH).into_response()
}

/// Destroys the session and sends the client to the login page. A destroy
/// failure is logged; the redirect happens either way.
pub async fn end_session(session: &UserSession, reason: &'static str) -> Response {
    if let Err(e) = session.destroy().await {
        tracing::error!(reason, error = %e, "failed to destroy session");
    }
    to_login()
}

/// require_session
///
/// The session state machine for every protected route.
///
/// 1. No user id in the session: the request is anonymous and goes to the
///    login page. There is nothing to destroy.
/// 2. A user id that does not normalize to a valid identity, a profile that
///    no longer resolves, an inactive profile, or a failed lookup: the session
///    is destroyed before the redirect.
/// 3. Otherwise the request continues with a [`RequestScope`] carrying the
///    actor, the configured deadline and a cancellation token that fires once
///    the request is finished or dropped, plus the [`CurrentUser`].
pub async fn require_session(
    State(auth): State<AuthState>,
    State(config): State<AppConfig>,
    session: UserSession,
    mut request: Request,
    next: Next,
) -> Response {
    let user_id = match session.user_id().await {
        Ok(id) => id,
        Err(SessionError::MissingUserId) => return to_login(),
        Err(SessionError::Store(e)) => {
            tracing::error!(error = %e, "session store unavailable");
            return to_login();
        }
        Err(e) => {
            tracing::warn!(error = %e, "invalid identity in session");
            return end_session(&session, "invalid identity").await;
        }
    };

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let scope = RequestScope::for_actor(user_id)
        .with_timeout(config.request_timeout())
        .with_cancellation(cancel);

    let user = match auth.get_user_profile(&scope, user_id).await {
        Ok(user) => user,
        Err(AuthError::UserNotFound) => {
            tracing::warn!(user_id, "session refers to a missing user, possible stale session");
            return end_session(&session, "user not found").await;
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "profile lookup failed");
            return end_session(&session, "profile lookup failed").await;
        }
    };

    if !user.status {
        tracing::info!(user_id, "session belongs to an inactive user");
        return end_session(&session, "user inactive").await;
    }

    request.extensions_mut().insert(CurrentUser::from(&user));
    request.extensions_mut().insert(scope);
    next.run(request).await
}

/// require_panel
///
/// Route guard for `/panel/*`. A Dashboard user gets 403; the session stays.
pub async fn require_panel(current: CurrentUser, request: Request, next: Next) -> Response {
    require_type(UserType::Panel, current, request, next).await
}

/// require_dashboard
///
/// Route guard for `/dashboard/*`.
pub async fn require_dashboard(current: CurrentUser, request: Request, next: Next) -> Response {
    require_type(UserType::Dashboard, current, request, next).await
}

async fn require_type(
    expected: UserType,
    current: CurrentUser,
    request: Request,
    next: Next,
) -> Response {
    if current.user_type != expected {
        tracing::info!(
            user_id = current.id,
            user_type = current.user_type.as_str(),
            required = expected.as_str(),
            "user type not allowed on this surface"
        );
        return AppError::Forbidden.into_response();
    }
    next.run(request).await
}
