use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::{postgres::PgPoolOptions, sqlite::SqlitePoolOptions};
use tokio::net::TcpListener;
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing_subscriber::EnvFilter;

mod auth;
mod cli;
mod config;
mod errors;
mod handlers;
mod models;
mod repository;
mod routes;
mod services;
mod state;
mod storage;

use auth::{
    secret_store::{FileSecretStore, InlineSecretStore, SecretStore},
    sigv4::SigV4Verifier,
};
use cli::{Cli, Command};
use config::{AppConfig, AuthConfig, AwsScope, DatabaseConfig, DatabaseKind, Policy};
use repository::{MetadataRepository, postgres_repository::PostgresRepository, sqlite_repository::SqliteRepository};
use services::object_service::ObjectService;
use state::AppState;
use storage::blob_store::BlobStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let cfg = config::load(cli.config.as_ref(), args.into_overrides())?;
            run_serve(cfg).await
        }
        Command::Init => {
            let cfg = config::load(cli.config.as_ref(), Default::default())?;
            run_init(cfg).await
        }
        Command::Cleanup(args) => {
            let cfg = config::load(cli.config.as_ref(), Default::default())?;
            run_cleanup(cfg, args).await
        }
        Command::Add(args) => {
            let cfg = config::load(cli.config.as_ref(), Default::default())?;
            run_add(cfg, args).await
        }
        Command::Remove(args) => {
            let cfg = config::load(cli.config.as_ref(), Default::default())?;
            run_remove(cfg, args).await
        }
    }
}

/// `serve`: validate the existing schema (fails fast — `init` is what
/// creates it), build the router, bind, and serve with a graceful,
/// bounded-drain shutdown on SIGINT/SIGTERM.
async fn run_serve(cfg: AppConfig) -> Result<()> {
    tracing::info!(?cfg, "starting objectd");

    let repo = build_repository(&cfg.database).await?;
    repo.validate()
        .await
        .context("schema validation failed — run `objectd init` first")?;

    let blobs = Arc::new(BlobStore::open(&cfg.storage_path).await.with_context(|| {
        format!("opening storage root `{}`", cfg.storage_path.display())
    })?);

    let object_service = ObjectService::new(repo, blobs, cfg.mode);

    let secrets = build_secret_store(&cfg.auth)?;
    let read_verifier = build_verifier(cfg.auth.read, &cfg.auth.aws, secrets.clone());
    let write_verifier = build_verifier(cfg.auth.write, &cfg.auth.aws, secrets);

    let state = AppState {
        object_service,
        read_verifier,
        write_verifier,
    };

    let cors = routes::routes::build_cors_layer(&cfg.cors)?;
    let app = routes::routes::build_router(state, cors)?;

    let addr = cfg.addr()?;
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == std::io::ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "permission denied binding to {} ({}); falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("listening on http://{}", listener.local_addr()?);
    let app = app.layer(tower_http::trace::TraceLayer::new_for_http());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `init`: create the schema (table + indexes) if missing and exit.
async fn run_init(cfg: AppConfig) -> Result<()> {
    let repo = build_repository(&cfg.database).await?;
    repo.migrate().await.context("running schema migration")?;
    println!("schema ready on table `{}`", cfg.database.table);
    Ok(())
}

/// `cleanup`: one batch of phase-2 soft-delete cleanup, bounded by
/// `--timeout-secs`. On timeout the ambient cancellation token is
/// cancelled (rather than the future simply being detached) so any
/// in-flight blob delete / DB round-trip unwinds per its own contract.
async fn run_cleanup(cfg: AppConfig, args: cli::CleanupArgs) -> Result<()> {
    let repo = build_repository(&cfg.database).await?;
    let blobs = Arc::new(BlobStore::open(&cfg.storage_path).await?);
    let service = ObjectService::new(repo, blobs, cfg.mode);

    let token = CancellationToken::new();
    let timeout = Duration::from_secs(args.timeout_secs);
    let work = service.tombstone(args.limit, &token);
    tokio::pin!(work);

    let cleaned = tokio::select! {
        res = &mut work => res.context("running cleanup batch")?,
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(?timeout, "cleanup batch exceeded timeout, cancelling");
            token.cancel();
            match tokio::time::timeout(Duration::from_secs(5), work).await {
                Ok(res) => res.context("running cleanup batch after cancellation")?,
                Err(_) => anyhow::bail!("cleanup did not unwind within 5s of cancellation"),
            }
        }
    };

    println!("cleaned {cleaned} object(s)");
    Ok(())
}

/// `add`: stream a local file into the store through the same
/// `ObjectService::create` path an HTTP `PUT` uses, bypassing auth since
/// the operator already has filesystem access.
async fn run_add(cfg: AppConfig, args: cli::AddArgs) -> Result<()> {
    let repo = build_repository(&cfg.database).await?;
    let blobs = Arc::new(BlobStore::open(&cfg.storage_path).await?);
    let service = ObjectService::new(repo, blobs, cfg.mode);

    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("opening local file `{}`", args.file.display()))?;
    let stream = ReaderStream::new(file);

    let token = CancellationToken::new();
    let meta = service
        .create(&args.path, args.content_type, None, stream, &token)
        .await
        .with_context(|| format!("writing object `{}`", args.path))?;

    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

/// `remove`: soft-delete an object by path, bypassing HTTP and auth.
async fn run_remove(cfg: AppConfig, args: cli::RemoveArgs) -> Result<()> {
    let repo = build_repository(&cfg.database).await?;
    let blobs = Arc::new(BlobStore::open(&cfg.storage_path).await?);
    let service = ObjectService::new(repo, blobs, cfg.mode);

    let token = CancellationToken::new();
    service
        .delete(&args.path, &token)
        .await
        .with_context(|| format!("deleting object `{}`", args.path))?;

    println!("deleted {}", args.path);
    Ok(())
}

/// Connect the configured database driver and wrap it behind the shared
/// `MetadataRepository` trait object.
async fn build_repository(cfg: &DatabaseConfig) -> Result<Arc<dyn MetadataRepository>> {
    match cfg.kind {
        DatabaseKind::Sqlite => {
            if let Some(path) = cfg
                .dsn
                .trim_start_matches("sqlite://")
                .trim_start_matches("file:")
                .split('?')
                .next()
                .map(Path::new)
            {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("creating database directory `{}`", parent.display())
                        })?;
                    }
                }
            }
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&format!("{}?mode=rwc", cfg.dsn))
                .await
                .with_context(|| format!("connecting to sqlite dsn `{}`", cfg.dsn))?;
            Ok(Arc::new(SqliteRepository::new(pool, cfg.table.clone())))
        }
        DatabaseKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&cfg.dsn)
                .await
                .with_context(|| format!("connecting to postgres dsn `{}`", cfg.dsn))?;
            Ok(Arc::new(PostgresRepository::new(pool, cfg.table.clone())))
        }
    }
}

/// Load the configured key list, preferring a file-backed store when
/// `auth.keys_file` is set, otherwise the inline `auth.keys` list.
fn build_secret_store(cfg: &AuthConfig) -> Result<Arc<dyn SecretStore>> {
    if let Some(path) = &cfg.keys_file {
        Ok(Arc::new(FileSecretStore::load(path)?))
    } else {
        Ok(Arc::new(InlineSecretStore::new(cfg.keys.clone())?))
    }
}

/// `None` when the policy is public — the corresponding routes then run
/// unauthenticated.
fn build_verifier(
    policy: Policy,
    aws: &AwsScope,
    secrets: Arc<dyn SecretStore>,
) -> Option<Arc<SigV4Verifier>> {
    match policy {
        Policy::Public => None,
        Policy::Private => Some(Arc::new(SigV4Verifier::new(
            aws.region.clone(),
            aws.service.clone(),
            secrets,
        ))),
    }
}

/// Resolves on SIGINT or SIGTERM; `axum::serve`'s graceful shutdown then
/// stops accepting new connections and waits for in-flight ones to drain
/// (spec's 30s drain budget).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
