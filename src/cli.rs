//! CLI / process entrypoint (C8): the binary's subcommand surface —
//! `serve`, `init`, `cleanup`, `add`, `remove` — over `clap::Parser`,
//! generalizing the single flag-driven entrypoint into one binary with
//! several explicit process modes.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lightweight HTTP object-storage server")]
pub struct Cli {
    /// Path to a TOML config file (defaults to `objectd.toml` in the
    /// working directory if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeArgs),
    /// Create the metadata schema and exit.
    Init,
    /// Run one batch of tombstone cleanup (phase 2 of soft-delete) and exit.
    Cleanup(CleanupArgs),
    /// Stream a local file into the store, bypassing HTTP and auth.
    Add(AddArgs),
    /// Soft-delete an object by path, bypassing HTTP and auth.
    Remove(RemoveArgs),
}

/// Flag overrides accepted by `serve` (highest precedence over env/file —
/// see [`ConfigOverrides`]).
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Overrides `server.host` (not a config key; convenience bind override).
    #[arg(long)]
    pub host: Option<String>,
    /// Overrides `server.port`.
    #[arg(long)]
    pub port: Option<u16>,
    /// Overrides `server.mode` (`store`|`static`|`spa`).
    #[arg(long)]
    pub mode: Option<String>,
    /// Overrides `storage.path`.
    #[arg(long)]
    pub storage_path: Option<String>,
    /// Overrides `database.type` (`sqlite`|`postgres`).
    #[arg(long)]
    pub database_type: Option<String>,
    /// Overrides `database.dsn`.
    #[arg(long)]
    pub database_dsn: Option<String>,
}

impl ServeArgs {
    pub fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host,
            port: self.port,
            mode: self.mode,
            storage_path: self.storage_path,
            database_type: self.database_type,
            database_dsn: self.database_dsn,
        }
    }
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Maximum number of pending tombstones to process in this batch.
    #[arg(long, default_value_t = 100)]
    pub limit: u32,
    /// Abort (and cancel in-flight work) if the batch hasn't finished
    /// within this many seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Object key to write to.
    pub path: String,
    /// Local file whose bytes are streamed in.
    pub file: PathBuf,
    /// Content-Type to record; derived from `path`'s extension if omitted.
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Object key to soft-delete.
    pub path: String,
}
