use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sigil::{
    AppState, Config,
    repositories::UserRepository,
    services::reaper,
    validation::auth::{validate_public_key, validate_user_name},
};

/// Passwordless login service: apps delegate sign-in to a signed QR handshake.
#[derive(Parser, Debug)]
#[command(name = "sigil", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server and the session reaper (default).
    Serve,
    /// Create a user subscribed to the admin app, then exit.
    AddAdminUser {
        /// Display name of the user.
        name: String,
        /// Hex secp256k1 public key, 128 characters, without the `04` prefix.
        public_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::AddAdminUser { name, public_key } => {
            add_admin_user(&state, &name, &public_key).await
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();

    let reaper = reaper::spawn(
        state.store.clone(),
        config.session_lifetimes,
        config.reaper_interval,
    );

    let app = sigil::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Server listening on http://{}{}", config.bind_addr, config.api_base);
    tracing::info!("✅ All systems operational");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.stop().await;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("🛑 Shutdown requested"),
        Err(e) => tracing::error!("❌ Failed to listen for Ctrl-C: {}", e),
    }
}

/// Registers `public_key` as a user and subscribes it to the admin app.
///
/// Re-running with a known key only (re)subscribes the existing user.
async fn add_admin_user(state: &AppState, name: &str, public_key: &str) -> anyhow::Result<()> {
    validate_user_name(name)?;
    validate_public_key(public_key)?;

    if state.config.database_url.is_none() {
        tracing::warn!("⚠️ No DATABASE_URL: the user will be lost on exit");
    }

    let admin = state.bootstrap_admin_app().await?;

    let user = match state.store.find_user_by_public_key(public_key).await? {
        Some(user) => {
            tracing::info!("ℹ️ User {} already exists", user.id);
            user
        }
        None => state.store.insert_user(name.trim(), public_key, None).await?,
    };

    state.store.subscribe_user_to_app(user.id, admin.id).await?;
    tracing::info!("✅ User {} subscribed to {}", user.id, admin.slug);
    Ok(())
}
