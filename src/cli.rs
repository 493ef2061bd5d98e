use clap::{ArgGroup, Parser};

/// DbArgs
///
/// Command line of the `db` maintenance binary. At least one action is
/// required; both may be given, and migrations always run first.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "db", about = "Database maintenance for the admin panel")]
#[command(group(ArgGroup::new("action").required(true).multiple(true).args(["migrate", "seed"])))]
pub struct DbArgs {
    /// Apply the embedded migrations.
    #[arg(long)]
    pub migrate: bool,

    /// Create the first Panel account from SEED_ACCOUNT / SEED_PASSWORD (optional SEED_NAME).
    #[arg(long)]
    pub seed: bool,
}
