use anyhow::Context;
use clap::{Parser, Subcommand};
use modshelf::config::{self, RegistryConfig};
use modshelf::registry::Registry;
use modshelf::registry::models::{NewUser, Rank};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "modshelf")]
#[command(version, about = "Module registry administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data directory, database and an initial admin user
    Init {
        /// Admin user name
        #[arg(long)]
        admin: String,
        /// Admin contact email
        #[arg(long)]
        email: String,
    },
    /// Show registry counters
    Stats,
    /// List releases awaiting verification
    Pending,
    /// Approve a pending release
    Approve {
        /// Release id
        release: Uuid,
        /// User name to act as (must be trusted or admin)
        #[arg(long)]
        moderator: String,
    },
    /// Reject and delete a pending release
    Reject {
        /// Release id
        release: Uuid,
        /// User name to act as (must be trusted or admin)
        #[arg(long)]
        moderator: String,
        /// Reason forwarded to the module owner
        #[arg(long)]
        reason: String,
    },
    /// Toggle a user's trusted rank
    Trust {
        /// Target user name
        user: String,
        /// Demote instead of promote (admin moderator only)
        #[arg(long)]
        revoke: bool,
        /// User name to act as
        #[arg(long)]
        moderator: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RegistryConfig::default();
    init_logging()?;
    let registry = Registry::local(&config)?;

    match cli.command {
        Command::Init { admin, email } => {
            let user = registry.create_user(NewUser {
                name: admin,
                email,
                password_hash: String::new(),
                rank: Rank::Admin,
                email_verified: true,
            })?;
            println!("registry initialized at {}", config::data_dir().display());
            println!("admin user {} ({})", user.name, user.id);
        }
        Command::Stats => {
            let stats = registry.stats()?;
            println!("users:            {}", stats.users);
            println!("modules:          {}", stats.modules);
            println!("releases:         {}", stats.releases);
            println!("pending releases: {}", stats.pending_releases);
        }
        Command::Pending => {
            for (release, module_name) in registry.store().pending_releases()? {
                println!(
                    "{}  {}  {} (mod {})",
                    release.id, module_name, release.release_version, release.mod_version,
                );
            }
        }
        Command::Approve { release, moderator } => {
            let caller = load_caller(&registry, &moderator)?;
            let release = registry.approve_release(Some(&caller), release).await?;
            println!("approved {} {}", release.id, release.release_version);
        }
        Command::Reject {
            release,
            moderator,
            reason,
        } => {
            let caller = load_caller(&registry, &moderator)?;
            registry.reject_release(Some(&caller), release, &reason).await?;
            println!("rejected {release}");
        }
        Command::Trust {
            user,
            revoke,
            moderator,
        } => {
            let caller = load_caller(&registry, &moderator)?;
            let user = registry.set_user_trusted(Some(&caller), &user, !revoke)?;
            println!("{} is now {}", user.name, user.rank.as_str());
        }
    }
    Ok(())
}

fn load_caller(
    registry: &Registry,
    name: &str,
) -> anyhow::Result<modshelf::registry::models::Caller> {
    let user = registry
        .store()
        .user_by_name(name)?
        .with_context(|| format!("no such user: {name}"))?;
    Ok(user.caller())
}

fn init_logging() -> anyhow::Result<()> {
    let log_path = config::log_path();
    let log_dir = log_path
        .parent()
        .context("log path has no parent directory")?;
    std::fs::create_dir_all(log_dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    // Keep flushing until the process exits.
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modshelf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(())
}
