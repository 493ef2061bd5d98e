use admin_panel::{
    cli::DbArgs,
    config::AppConfig,
    models::{User, UserType},
    password::Passwords,
    repository::{AuditFields, BaseRepository, RepoError, Repository, fields},
    scope::RequestScope,
    store::{PostgresStore, StoreState},
};
use clap::Parser;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// db
///
/// Database maintenance entry point.
///
/// `--migrate` applies the embedded migrations. `--seed` creates the first
/// Panel account from `SEED_ACCOUNT` / `SEED_PASSWORD` (and optional
/// `SEED_NAME`) unless a live account with that name already exists.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "db=info,admin_panel=info,sqlx=warn".into()),
        )
        .init();

    let DbArgs { migrate, seed } = DbArgs::parse();

    let config = AppConfig::load();
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    tracing::info!("Running database initialisation...");

    if migrate {
        sqlx::migrate!()
            .run(&pool)
            .await
            .expect("FATAL: Failed to apply database migrations.");
        tracing::info!("Migrations applied.");
    }

    if seed {
        let account = std::env::var("SEED_ACCOUNT").expect("FATAL: SEED_ACCOUNT required for --seed");
        let password =
            std::env::var("SEED_PASSWORD").expect("FATAL: SEED_PASSWORD required for --seed");
        let name = std::env::var("SEED_NAME").unwrap_or_else(|_| "Administrator".to_string());

        let store = Arc::new(PostgresStore::new(pool.clone())) as StoreState;
        let users = BaseRepository::<User>::new(store);

        if let Err(e) = seed_panel_user(&users, &config, name, account, password).await {
            tracing::error!(error = %e, "Seeding failed.");
            std::process::exit(1);
        }
    }

    pool.close().await;
    tracing::info!("Database initialisation finished.");
}

async fn seed_panel_user(
    users: &BaseRepository<User>,
    config: &AppConfig,
    name: String,
    account: String,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let scope = RequestScope::anonymous();

    match users.find_one(&scope, &fields(json!({ "account": account }))?).await {
        Ok(existing) => {
            tracing::info!(user_id = existing.id, account = %account, "Seed account already exists, skipping.");
            return Ok(());
        }
        Err(RepoError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    if password.chars().count() < config.min_password_length {
        return Err(format!(
            "SEED_PASSWORD must be at least {} characters",
            config.min_password_length
        )
        .into());
    }

    let mut user = User {
        id: 0,
        name,
        account,
        password: Passwords::default().hash(&password)?,
        status: true,
        user_type: UserType::Panel,
        audit: AuditFields::default(),
    };
    users.create(&scope, &mut user).await?;

    tracing::info!(user_id = user.id, account = %user.account, "Seed panel account created.");
    Ok(())
}
