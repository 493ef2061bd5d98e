use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::repository::RepoError;
use crate::store::{Id, StoreError};

/// RequestScope
///
/// The per-request value passed explicitly into every repository and auth
/// call. It carries the authenticated actor (for audit stamping) and the
/// request's cancellation signal and deadline.
///
/// The auth middleware builds one per authenticated request and stores it in the
/// request extensions; handlers pull it back out with the extractor below.
#[derive(Debug, Clone)]
pub struct RequestScope {
    actor_id: Option<Id>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl RequestScope {
    /// A scope with no actor. Reads and creates work; deletes are refused.
    pub fn anonymous() -> Self {
        Self {
            actor_id: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn for_actor(actor_id: Id) -> Self {
        Self {
            actor_id: Some(actor_id),
            ..Self::anonymous()
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn actor_id(&self) -> Option<Id> {
        self.actor_id
    }

    /// The acting user, or [`RepoError::MissingActor`]. A zero id never counts.
    pub fn actor(&self) -> Result<Id, RepoError> {
        match self.actor_id {
            Some(id) if id > 0 => Ok(id),
            _ => Err(RepoError::MissingActor),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs one store operation under this scope's cancellation and deadline.
    ///
    /// An already-cancelled or expired scope never starts the operation.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, RepoError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.check()?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RepoError::Cancelled),
            _ = sleep_until(self.deadline) => Err(RepoError::DeadlineExceeded),
            result = operation => result.map_err(RepoError::from),
        }
    }

    /// Fails fast if the scope is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), RepoError> {
        if self.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(RepoError::DeadlineExceeded);
        }
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handlers behind the auth middleware get the authenticated scope; anything
/// else gets an anonymous one.
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestScope>()
            .cloned()
            .unwrap_or_else(RequestScope::anonymous))
    }
}
