use crate::{
    auth::{CurrentUser, LOGIN_PATH, to_login},
    auth_service::{AuthError, AuthState},
    config::AppConfig,
    error::{AppError, ErrorResponse},
    models::{
        AuthResponse, BulkResult, BulkStatusRequest, CreateUserRequest, HomeResponse,
        LoginRequest, Paginated, UpdatePasswordRequest, UpdateUserRequest, User, UserCondition,
        UserProfile, UserType,
    },
    query_params::ListParams,
    repository::{AuditFields, RepoError, RepositoryState},
    scope::RequestScope,
    session::{SessionClaims, UserSession},
    store::{FieldMap, Id},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::Value;

// --- Auth Handlers ---

/// login
///
/// [Public Route] Exchanges an account and password for an authenticated
/// session. The session id is rotated before the claims are written, so an id
/// planted before login is never promoted.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 400, description = "Missing fields", body = ErrorResponse),
        (status = 401, description = "Invalid account or password", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse)
    )
)]
pub async fn login(
    State(auth): State<AuthState>,
    State(config): State<AppConfig>,
    session: UserSession,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let account = payload.account.trim();
    if account.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest(
            "Please fill in the account and password fields.".to_string(),
        ));
    }

    let scope = RequestScope::anonymous().with_timeout(config.request_timeout());
    let user = match auth.authenticate(&scope, account, &payload.password).await {
        Ok(user) => user,
        Err(
            e @ (AuthError::InvalidCredentials | AuthError::UserNotFound | AuthError::UserInactive),
        ) => return Err(e.into()),
        Err(e) => {
            tracing::error!(account, error = %e, "authentication failed unexpectedly");
            return Err(e.into());
        }
    };

    if let Err(e) = session.start(&SessionClaims::from(&user)).await {
        tracing::error!(user_id = user.id, account, error = %e, "failed to start session");
        return Err(e.into());
    }

    tracing::info!(user_id = user.id, user_type = user.user_type.as_str(), "user logged in");
    Ok(Json(AuthResponse {
        message: "Logged in successfully.".to_string(),
        redirect: user.user_type.home_path().to_string(),
    }))
}

/// logout
///
/// [Public Route] Destroys the current session, if any. Always succeeds from
/// the client's point of view.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Logged out", body = AuthResponse))
)]
pub async fn logout(session: UserSession) -> Json<AuthResponse> {
    let message = match session.destroy().await {
        Ok(()) => "Logged out successfully.",
        Err(e) => {
            tracing::error!(error = %e, "failed to destroy session on logout");
            "Logged out, but the session could not be cleared."
        }
    };

    Json(AuthResponse {
        message: message.to_string(),
        redirect: LOGIN_PATH.to_string(),
    })
}

/// profile
///
/// [Authenticated Route] The current user's profile, read fresh from the store.
#[utoipa::path(
    get,
    path = "/auth/profile",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Session ended", body = ErrorResponse)
    )
)]
pub async fn profile(
    current: CurrentUser,
    scope: RequestScope,
    State(auth): State<AuthState>,
    session: UserSession,
) -> Result<Json<UserProfile>, AppError> {
    match auth.get_user_profile(&scope, current.id).await {
        Ok(user) => Ok(Json(UserProfile::from(&user))),
        Err(AuthError::UserNotFound) => {
            tracing::warn!(user_id = current.id, "profile vanished during request");
            destroy_quietly(&session, current.id).await;
            Err(AppError::SessionEnded)
        }
        Err(e) => Err(e.into()),
    }
}

/// update_password
///
/// [Authenticated Route] Changes the current user's password. On success the
/// session is destroyed and the user must log in again.
#[utoipa::path(
    put,
    path = "/auth/password",
    request_body = UpdatePasswordRequest,
    responses(
        (status = 200, description = "Password changed, session ended", body = AuthResponse),
        (status = 400, description = "Rejected password", body = ErrorResponse),
        (status = 401, description = "Session ended", body = ErrorResponse)
    )
)]
pub async fn update_password(
    current: CurrentUser,
    scope: RequestScope,
    State(auth): State<AuthState>,
    session: UserSession,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if payload.current_password.is_empty()
        || payload.new_password.is_empty()
        || payload.confirm_password.is_empty()
    {
        return Err(AppError::BadRequest(
            "Please fill in all password fields.".to_string(),
        ));
    }
    if payload.new_password != payload.confirm_password {
        return Err(AppError::BadRequest("New passwords do not match.".to_string()));
    }

    match auth
        .update_password(
            &scope,
            current.id,
            &payload.current_password,
            &payload.new_password,
        )
        .await
    {
        Ok(()) => {}
        Err(AuthError::UserNotFound) => {
            tracing::warn!(user_id = current.id, "password change for a missing user");
            destroy_quietly(&session, current.id).await;
            return Err(AppError::SessionEnded);
        }
        Err(e) => return Err(e.into()),
    }

    let message = match session.destroy().await {
        Ok(()) => "Password updated. Please log in again with your new password.",
        Err(e) => {
            tracing::error!(user_id = current.id, error = %e, "password updated but session not destroyed");
            "Password updated, but the current session could not be ended. Please log in again."
        }
    };

    Ok(Json(AuthResponse {
        message: message.to_string(),
        redirect: LOGIN_PATH.to_string(),
    }))
}

async fn destroy_quietly(session: &UserSession, user_id: Id) {
    if let Err(e) = session.destroy().await {
        tracing::error!(user_id, error = %e, "failed to destroy session");
    }
}

/// root_redirect
///
/// [Public Route] Sends a logged-in user to the home page of their surface
/// and everyone else to the login page. Reads the session claims only.
pub async fn root_redirect(session: UserSession) -> Response {
    if session.user_id().await.is_err() {
        return to_login();
    }
    match session.user_type().await {
        Ok(user_type) => Redirect::to(user_type.home_path()).into_response(),
        Err(_) => to_login(),
    }
}

// --- Surface Home Handlers ---

/// panel_home
///
/// [Panel Route] Landing payload for panel users.
#[utoipa::path(
    get,
    path = "/panel/home",
    responses(
        (status = 200, description = "Panel home", body = HomeResponse),
        (status = 403, description = "Not a panel user", body = ErrorResponse)
    )
)]
pub async fn panel_home(current: CurrentUser) -> Json<HomeResponse> {
    home(UserType::Panel, current)
}

/// dashboard_home
///
/// [Dashboard Route] Landing payload for dashboard users.
#[utoipa::path(
    get,
    path = "/dashboard/home",
    responses(
        (status = 200, description = "Dashboard home", body = HomeResponse),
        (status = 403, description = "Not a dashboard user", body = ErrorResponse)
    )
)]
pub async fn dashboard_home(current: CurrentUser) -> Json<HomeResponse> {
    home(UserType::Dashboard, current)
}

fn home(surface: UserType, current: CurrentUser) -> Json<HomeResponse> {
    Json(HomeResponse {
        surface,
        user_id: current.id,
        user_name: current.name,
    })
}

// --- Panel User Administration ---

/// list_users
///
/// [Panel Route] Filtered, sorted and paginated user listing. Bad paging or
/// sort input is normalized, never rejected.
#[utoipa::path(
    get,
    path = "/panel/users",
    params(ListParams),
    responses((status = 200, description = "Users", body = Paginated<UserProfile>))
)]
pub async fn list_users(
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paginated<UserProfile>>, AppError> {
    let (items, total) = users.get_all(&scope, &params).await?;

    Ok(Json(Paginated {
        items: items.iter().map(UserProfile::from).collect(),
        total,
        page: params.page(),
        per_page: params.per_page(),
        total_pages: params.total_pages(total),
    }))
}

/// get_user
///
/// [Panel Route] A single live user.
#[utoipa::path(
    get,
    path = "/panel/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserProfile),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn get_user(
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Path(id): Path<Id>,
) -> Result<Json<UserProfile>, AppError> {
    let user = users.get_by_id(&scope, id).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// create_user
///
/// [Panel Route] Creates an account. The password is hashed with the same
/// policy the auth service applies to password changes.
#[utoipa::path(
    post,
    path = "/panel/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserProfile),
        (status = 400, description = "Invalid input", body = ErrorResponse)
    )
)]
pub async fn create_user(
    scope: RequestScope,
    State(auth): State<AuthState>,
    State(users): State<RepositoryState<User>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = payload.name.trim();
    let account = payload.account.trim();
    if name.is_empty() || account.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest(
            "Name, account and password are required.".to_string(),
        ));
    }

    let min = auth.min_password_length();
    if payload.password.chars().count() < min {
        return Err(AuthError::PasswordTooShort { min }.into());
    }

    if account_owner(&scope, &users, account).await?.is_some() {
        return Err(account_taken());
    }

    let mut user = User {
        id: 0,
        name: name.to_string(),
        account: account.to_string(),
        password: auth.hash_password(&payload.password).await?,
        status: payload.status,
        user_type: payload.user_type,
        audit: AuditFields::default(),
    };
    users.create(&scope, &mut user).await?;

    tracing::info!(user_id = user.id, actor_id = ?scope.actor_id(), "user created");
    Ok((StatusCode::CREATED, Json(UserProfile::from(&user))))
}

/// Id of the live user holding `account`, if any.
async fn account_owner(
    scope: &RequestScope,
    users: &RepositoryState<User>,
    account: &str,
) -> Result<Option<Id>, AppError> {
    let mut condition = FieldMap::new();
    condition.insert("account".to_string(), Value::from(account));

    match users.find_one(scope, &condition).await {
        Ok(user) => Ok(Some(user.id)),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn account_taken() -> AppError {
    AppError::BadRequest("An account with this name already exists.".to_string())
}

/// update_user
///
/// [Panel Route] Partial update; the acting user is stamped as `updated_by`.
/// Users cannot deactivate their own account or change its type.
#[utoipa::path(
    put,
    path = "/panel/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserProfile),
        (status = 400, description = "Nothing to update, or own account deactivated", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn update_user(
    current: CurrentUser,
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Path(id): Path<Id>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserProfile>, AppError> {
    let fields = payload.to_fields();
    if fields.is_empty() {
        return Err(AppError::BadRequest("Nothing to update.".to_string()));
    }

    if id == current.id {
        if payload.status == Some(false) {
            return Err(own_deactivation());
        }
        if payload.user_type.is_some_and(|t| t != current.user_type) {
            return Err(AppError::BadRequest(
                "You cannot change the type of your own account.".to_string(),
            ));
        }
    }

    if let Some(account) = payload.account.as_deref() {
        let owner = account_owner(&scope, &users, account).await?;
        if owner.is_some_and(|owner| owner != id) {
            return Err(account_taken());
        }
    }

    users.update(&scope, id, fields, current.id).await?;
    let user = users.get_by_id(&scope, id).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// delete_user
///
/// [Panel Route] Soft-deletes a user, stamping the acting user as `deleted_by`.
/// Deleting your own account is refused.
#[utoipa::path(
    delete,
    path = "/panel/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Own account", body = ErrorResponse),
        (status = 404, description = "Not Found", body = ErrorResponse)
    )
)]
pub async fn delete_user(
    current: CurrentUser,
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Path(id): Path<Id>,
) -> Result<StatusCode, AppError> {
    if id == current.id {
        return Err(own_deletion());
    }
    users.delete(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// bulk_update_status
///
/// [Panel Route] Sets `status` on every user matching the condition. A
/// deactivation whose condition would select the acting user is refused.
#[utoipa::path(
    put,
    path = "/panel/users/status",
    request_body = BulkStatusRequest,
    responses(
        (status = 200, description = "Rows updated", body = BulkResult),
        (status = 400, description = "Empty condition or own account", body = ErrorResponse)
    )
)]
pub async fn bulk_update_status(
    current: CurrentUser,
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Json(payload): Json<BulkStatusRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let condition = payload.condition.to_fields();
    // An empty condition is refused by the repository itself.
    if !payload.status && !condition.is_empty() && selects_current(&payload.condition, &current) {
        return Err(own_deactivation());
    }

    let mut fields = FieldMap::new();
    fields.insert("status".to_string(), Value::from(payload.status));

    let affected = users
        .bulk_update(&scope, &condition, fields, current.id)
        .await?;
    Ok(Json(BulkResult { affected }))
}

/// bulk_delete_users
///
/// [Panel Route] Soft-deletes every user matching the condition, one row at a
/// time. On failure the rows handled before it stay deleted. A condition
/// that would select the acting user is refused before anything is written.
#[utoipa::path(
    post,
    path = "/panel/users/bulk-delete",
    request_body = UserCondition,
    responses(
        (status = 200, description = "Rows deleted", body = BulkResult),
        (status = 400, description = "Empty condition or own account", body = ErrorResponse)
    )
)]
pub async fn bulk_delete_users(
    current: CurrentUser,
    scope: RequestScope,
    State(users): State<RepositoryState<User>>,
    Json(condition): Json<UserCondition>,
) -> Result<Json<BulkResult>, AppError> {
    let fields = condition.to_fields();
    if !fields.is_empty() && selects_current(&condition, &current) {
        return Err(own_deletion());
    }

    let deleted = users.bulk_delete(&scope, &fields).await?;
    Ok(Json(BulkResult {
        affected: deleted as u64,
    }))
}

/// The acting user passed `require_session`, so their row is live and active.
fn selects_current(condition: &UserCondition, current: &CurrentUser) -> bool {
    condition.matches(true, current.user_type)
}

fn own_deletion() -> AppError {
    AppError::BadRequest("You cannot delete your own account.".to_string())
}

fn own_deactivation() -> AppError {
    AppError::BadRequest("You cannot deactivate your own account.".to_string())
}
