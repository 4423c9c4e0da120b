//! Account Administration CLI
//!
//! Inspects and moderates user accounts directly in Postgres, without going
//! through the HTTP API.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;

use auth_service::{
    database::DatabaseConfig,
    models::user::User,
    store::{PgUserStore, StoreError, UserStore},
};

/// Account administration CLI
#[derive(Parser)]
#[command(name = "auth-admin", about = "Account administration CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user and their linked identities
    Show(UserArgs),
    /// Ban a user; banned users cannot sign in or refresh tokens
    Ban(UserArgs),
    /// Lift a ban
    Unban(UserArgs),
    /// Soft-delete a user
    Delete(UserArgs),
    /// Clear a soft-delete marker
    Restore(UserArgs),
}

#[derive(Args)]
struct UserArgs {
    /// User ID
    id: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let db_config = DatabaseConfig::from_env().context("Failed to load database configuration")?;
    let pool = db_config
        .create_pool()
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store = PgUserStore::new(pool);

    match cli.command {
        Commands::Show(args) => show_user(&store, args.id).await?,
        Commands::Ban(args) => {
            update(&store, args.id, "banned", store.set_banned(args.id, true)).await?
        }
        Commands::Unban(args) => {
            update(&store, args.id, "unbanned", store.set_banned(args.id, false)).await?
        }
        Commands::Delete(args) => {
            update(&store, args.id, "soft-deleted", store.set_deleted(args.id, true)).await?
        }
        Commands::Restore(args) => {
            update(&store, args.id, "restored", store.set_deleted(args.id, false)).await?
        }
    }

    Ok(())
}

async fn load_user(store: &PgUserStore, id: i64) -> Result<User> {
    match store.find_by_id(id).await? {
        Some(record) => Ok(record.into()),
        None => bail!("User {} not found", id),
    }
}

async fn show_user(store: &PgUserStore, id: i64) -> Result<()> {
    let user = load_user(store, id).await?;
    let identities = store.list_identities(id).await?;

    println!("User {}", user.id);
    println!("  Email:          {}", user.email.as_deref().unwrap_or("-"));
    println!("  Email verified: {}", user.email_verified);
    println!("  Phone:          {}", user.phone.as_deref().unwrap_or("-"));
    println!("  Name:           {}", user.name.as_deref().unwrap_or("-"));
    println!("  Password:       {}", if user.has_password { "set" } else { "none" });
    println!("  Status:         {:?}", user.status());
    if let Some(deleted_at) = user.deleted_at {
        println!("  Deleted at:     {}", deleted_at);
    }
    println!("  Created:        {}", user.created_at);
    println!("  Updated:        {}", user.updated_at);

    if identities.is_empty() {
        println!("  Linked identities: none");
    } else {
        println!("  Linked identities:");
        for identity in identities {
            println!(
                "    - {} {} (linked {})",
                identity.provider, identity.subject, identity.created_at
            );
        }
    }

    Ok(())
}

async fn update(
    store: &PgUserStore,
    id: i64,
    action: &str,
    operation: impl std::future::Future<Output = Result<(), StoreError>>,
) -> Result<()> {
    match operation.await {
        Ok(()) => {
            let user = load_user(store, id).await?;
            println!("User {} {} (status: {:?})", user.id, action, user.status());
            Ok(())
        }
        Err(StoreError::NotFound) => bail!("User {} not found", id),
        Err(e) => Err(e).context(format!("Failed to update user {}", id)),
    }
}
