use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::models::User;
use crate::password::Passwords;
use crate::repository::{RepoError, RepositoryState};
use crate::scope::RequestScope;
use crate::store::{FieldMap, Id};

pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;

// Verified against on unknown accounts so that path pays for one Argon2 run too.
const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

/// AuthError
///
/// The six recoverable authentication outcomes, plus the infrastructure
/// failures underneath them.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user is not active")]
    UserInactive,
    #[error("user not found")]
    UserNotFound,
    #[error("current password is incorrect")]
    CurrentPasswordIncorrect,
    #[error("new password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("new password must differ from the current one")]
    PasswordSameAsOld,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// AuthService
///
/// Turns credentials into a trusted [`User`] and guards password changes.
/// Holds no per-request state; shared as [`AuthState`].
pub struct AuthService {
    users: RepositoryState<User>,
    passwords: Passwords,
    min_password_length: usize,
    dummy_hash: String,
}

/// AuthState
///
/// How the auth service is shared through the application state.
pub type AuthState = Arc<AuthService>;

impl AuthService {
    /// Hashes the dummy password once up front, hence fallible.
    pub fn new(
        users: RepositoryState<User>,
        passwords: Passwords,
        min_password_length: usize,
    ) -> Result<Self, AuthError> {
        let dummy_hash = passwords
            .hash(DUMMY_PASSWORD)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(Self {
            users,
            passwords,
            min_password_length,
            dummy_hash,
        })
    }

    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    /// Looks the account up and checks the password, then the status flag.
    ///
    /// The status is only revealed to a caller that knows the password.
    pub async fn authenticate(
        &self,
        scope: &RequestScope,
        account: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let mut condition = FieldMap::new();
        condition.insert("account".to_string(), Value::from(account));

        let user = match self.users.find_one(scope, &condition).await {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                self.verify(password, &self.dummy_hash).await?;
                tracing::info!(account, "login attempt for unknown account");
                return Err(AuthError::UserNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !self.verify(password, &user.password).await? {
            tracing::info!(user_id = user.id, account, "login attempt with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.status {
            tracing::info!(user_id = user.id, account, "login attempt on inactive account");
            return Err(AuthError::UserInactive);
        }

        Ok(user)
    }

    /// The live profile behind `user_id`. Missing and soft-deleted rows are
    /// both [`AuthError::UserNotFound`].
    pub async fn get_user_profile(
        &self,
        scope: &RequestScope,
        user_id: Id,
    ) -> Result<User, AuthError> {
        match self.users.get_by_id(scope, user_id).await {
            Ok(user) => Ok(user),
            Err(RepoError::NotFound) => Err(AuthError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the stored hash. Writes the `password` column only; ending the
    /// session afterwards is up to the caller.
    pub async fn update_password(
        &self,
        scope: &RequestScope,
        user_id: Id,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.get_user_profile(scope, user_id).await?;

        if !self.verify(current_password, &user.password).await? {
            return Err(AuthError::CurrentPasswordIncorrect);
        }

        if new_password.chars().count() < self.min_password_length {
            return Err(AuthError::PasswordTooShort {
                min: self.min_password_length,
            });
        }

        if self.verify(new_password, &user.password).await? {
            return Err(AuthError::PasswordSameAsOld);
        }

        let hash = self.hash_password(new_password).await?;
        let mut fields = FieldMap::new();
        fields.insert("password".to_string(), Value::from(hash));

        match self.users.update(scope, user_id, fields, 0).await {
            Ok(()) => {
                tracing::info!(user_id, "password updated");
                Ok(())
            }
            Err(RepoError::NotFound) => Err(AuthError::UserNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Argon2 on the blocking pool.
    pub async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    async fn verify(&self, password: &str, phc: &str) -> Result<bool, AuthError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        let phc = phc.to_string();
        tokio::task::spawn_blocking(move || passwords.verify(&password, &phc))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }
}
