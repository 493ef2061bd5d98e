#![allow(dead_code)]

use admin_panel::{
    AppConfig, AppState, create_router,
    auth_service::{AuthService, AuthState},
    models::{USER_SORT_COLUMNS, User, UserType},
    password::Passwords,
    repository::{AuditFields, BaseRepository, Entity, Repository, RepositoryState},
    scope::RequestScope,
    session::session_layer,
    store::{Id, MemoryStore, StoreState},
};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const PASSWORD: &str = "correct-horse";

/// Cheapest Argon2id cost the library accepts, so tests stay fast.
pub fn fast_passwords() -> Passwords {
    Passwords::with_cost(8, 1, 1).expect("valid argon2 params")
}

// --- Generic entity used by repository tests ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for Task {
    const TABLE: &'static str = "tasks";

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

pub fn task(name: &str, status: &str) -> Task {
    Task {
        name: name.to_string(),
        status: status.to_string(),
        kind: "chore".to_string(),
        ..Task::default()
    }
}

pub fn task_repo(store: &Arc<MemoryStore>) -> BaseRepository<Task> {
    BaseRepository::new(store.clone() as StoreState)
}

pub async fn seed_tasks(repo: &BaseRepository<Task>, tasks: &[(&str, &str)]) -> Vec<Task> {
    let mut created = Vec::new();
    for (name, status) in tasks {
        let mut t = task(name, status);
        repo.create(&RequestScope::anonymous(), &mut t)
            .await
            .expect("seed task");
        created.push(t);
    }
    created
}

// --- Users and the auth stack ---

pub fn user_repo(store: &Arc<MemoryStore>) -> RepositoryState<User> {
    Arc::new(
        BaseRepository::<User>::new(store.clone() as StoreState).with_sort_columns(USER_SORT_COLUMNS),
    )
}

pub fn auth_service(users: RepositoryState<User>) -> AuthState {
    Arc::new(AuthService::new(users, fast_passwords(), 8).expect("auth service"))
}

pub async fn seed_user(
    users: &RepositoryState<User>,
    account: &str,
    password: &str,
    user_type: UserType,
    status: bool,
) -> User {
    let mut user = User {
        id: 0,
        name: format!("{account} name"),
        account: account.to_string(),
        password: fast_passwords().hash(password).expect("hash"),
        status,
        user_type,
        audit: AuditFields::default(),
    };
    users
        .create(&RequestScope::anonymous(), &mut user)
        .await
        .expect("seed user");
    user
}

/// The full router over in-memory stores, as `main` wires it over Postgres.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub users: RepositoryState<User>,
}

pub fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let users = user_repo(&store);
    let config = AppConfig::default();

    let sessions = session_layer(tower_sessions::MemoryStore::default(), &config);
    let state = AppState {
        users: users.clone(),
        auth: auth_service(users.clone()),
        config,
    };

    TestApp {
        router: create_router(state, sessions),
        store,
        users,
    }
}
