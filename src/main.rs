use clap::{Parser, Subcommand};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vm_manager::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    password::hash_password,
    repository::{PostgresRepository, Repository, RepositoryState},
};

#[derive(Debug, Parser)]
#[command(name = "vm-manager", about = "Virtual machine inventory with per-user ownership")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run migrations and start the HTTP server (default)
    Serve,
    /// Apply database migrations and exit
    InitDb,
    /// Create or promote the account named by ADMIN_EMAIL / ADMIN_PASSWORD
    EnsureAdmin,
}

/// main
///
/// Loads configuration and logging, connects to Postgres, then runs the
/// requested command.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = AppConfig::load();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vm_manager=debug,tower_http=info,axum=trace".into());

    // Pretty output for local debugging, JSON lines for log aggregation.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitDb => migrate(&pool).await,
        Command::EnsureAdmin => {
            migrate(&pool).await;
            ensure_admin(pool, &config).await;
        }
        Command::Serve => {
            migrate(&pool).await;
            serve(pool, config).await;
        }
    }
}

async fn migrate(pool: &PgPool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");
    tracing::info!("Database schema is up to date.");
}

async fn ensure_admin(pool: PgPool, config: &AppConfig) {
    let repo = PostgresRepository::new(pool);
    let password_hash =
        hash_password(&config.admin_password).expect("FATAL: Failed to hash ADMIN_PASSWORD.");

    let (admin, created) = repo
        .ensure_admin(&config.admin_email, &password_hash)
        .await
        .expect("FATAL: Failed to create the administrator account.");

    if created {
        tracing::info!(user_id = admin.id, email = %admin.email, "administrator created");
    } else {
        tracing::info!(user_id = admin.id, email = %admin.email, "administrator ensured");
    }
}

async fn serve(pool: PgPool, config: AppConfig) {
    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;
    let port = config.port;

    let app = create_router(AppState { repo, config });

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener.");

    tracing::info!("Listening on {}", addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
