//! Configuration (C9): a TOML file layer merged with environment-variable
//! fallbacks and CLI flag overrides, in that precedence order (CLI > env >
//! file > default), validated once at startup into [`AppConfig`].

use std::{env, fs, net::ToSocketAddrs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::{auth::secret_store::KeyPair, models::metadata::Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl FromStr for DatabaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            other => Err(format!("unknown database.type `{other}` (expected sqlite|postgres)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Public,
    Private,
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Policy::Public),
            "private" => Ok(Policy::Private),
            other => Err(format!("unknown auth policy `{other}` (expected public|private)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    pub dsn: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct AwsScope {
    pub region: String,
    pub service: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub read: Policy,
    pub write: Policy,
    pub aws: AwsScope,
    pub keys: Vec<KeyPair>,
    pub keys_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    pub storage_path: PathBuf,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
}

impl AppConfig {
    pub fn addr(&self) -> Result<String> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.to_socket_addrs()
            .with_context(|| format!("resolving bind address `{addr}`"))?;
        Ok(addr)
    }

    /// Validate the merged configuration. Called once at startup; any
    /// failure here is fatal (matches the teacher's treatment of config
    /// parse failures as an `anyhow::Error` bubbling out of `main`).
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("server.port must be in 1..=65535");
        }
        if !self.storage_path.exists() || !self.storage_path.is_dir() {
            bail!(
                "storage.path `{}` must exist and be a directory",
                self.storage_path.display()
            );
        }
        if self.database.table.trim().is_empty() {
            bail!("database.tables.meta_data must not be empty");
        }
        if self.auth.keys.is_empty()
            && self.auth.keys_file.is_none()
            && (matches!(self.auth.read, Policy::Private) || matches!(self.auth.write, Policy::Private))
        {
            bail!("auth.read or auth.write is `private` but no auth.keys or auth.keys_file were configured");
        }
        Ok(())
    }
}

/// Raw, fully-optional mirror of the TOML file shape. Every field merges
/// with an `OBJECT_STORE_*` environment fallback and then a CLI override.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server: Option<FileServer>,
    storage: Option<FileStorage>,
    database: Option<FileDatabase>,
    auth: Option<FileAuth>,
    cors: Option<FileCors>,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    host: Option<String>,
    port: Option<u16>,
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileStorage {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    #[serde(rename = "type")]
    kind: Option<String>,
    dsn: Option<String>,
    tables: Option<FileDatabaseTables>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabaseTables {
    meta_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileAuth {
    read: Option<String>,
    write: Option<String>,
    aws: Option<FileAwsScope>,
    keys: Option<Vec<KeyPair>>,
    keys_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileAwsScope {
    region: Option<String>,
    service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCors {
    enabled: Option<bool>,
    allowed_origins: Option<Vec<String>>,
    allowed_methods: Option<Vec<String>>,
    allowed_headers: Option<Vec<String>>,
    exposed_headers: Option<Vec<String>>,
    allow_credentials: Option<bool>,
    max_age: Option<u64>,
}

/// CLI-flag overrides accepted by the `serve`/`init` subcommands. Every
/// field is optional — `None` falls through to the env/file/default chain.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<String>,
    pub storage_path: Option<String>,
    pub database_type: Option<String>,
    pub database_dsn: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("OBJECT_STORE_{name}")).ok()
}

fn pick<T>(cli: Option<T>, env: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(env).or(file).unwrap_or(default)
}

fn pick_opt<T>(cli: Option<T>, env: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(env).or(file)
}

/// Load `config_path` (if given, else `objectd.toml` in the working
/// directory if it exists), merge env-var fallbacks and `overrides`, and
/// validate the result.
pub fn load(config_path: Option<&PathBuf>, overrides: ConfigOverrides) -> Result<AppConfig> {
    let default_path = PathBuf::from("objectd.toml");
    let path = config_path.cloned().or_else(|| {
        if default_path.exists() {
            Some(default_path.clone())
        } else {
            None
        }
    });

    let file: FileConfig = match &path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file `{}`", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config file `{}`", path.display()))?
        }
        None => FileConfig::default(),
    };

    let file_server = file.server.unwrap_or_default();
    let file_storage = file.storage.unwrap_or_default();
    let file_database = file.database.unwrap_or_default();
    let file_auth = file.auth.unwrap_or_default();
    let file_cors = file.cors.unwrap_or_default();
    let file_tables = file_database.tables.unwrap_or_default();
    let file_aws = file_auth.aws.unwrap_or_default();

    let host = pick(overrides.host, env_var("HOST"), file_server.host, "0.0.0.0".to_string());
    let port = pick(
        overrides.port,
        env_var("PORT").and_then(|v| v.parse().ok()),
        file_server.port,
        9000,
    );
    let mode_str = pick(
        overrides.mode,
        env_var("MODE"),
        file_server.mode,
        "store".to_string(),
    );
    let mode = Mode::from_str(&mode_str).map_err(anyhow::Error::msg)?;

    let storage_path = PathBuf::from(pick(
        overrides.storage_path,
        env_var("STORAGE_DIR"),
        file_storage.path,
        "./data/objects".to_string(),
    ));

    let database_kind_str = pick(
        overrides.database_type,
        env_var("DATABASE_TYPE"),
        file_database.kind,
        "sqlite".to_string(),
    );
    let database_kind = DatabaseKind::from_str(&database_kind_str).map_err(anyhow::Error::msg)?;
    let database_dsn = pick(
        overrides.database_dsn,
        env_var("DATABASE_URL"),
        file_database.dsn,
        "sqlite://./data/meta/object_store.db".to_string(),
    );
    let database_table = pick(
        None,
        env_var("DATABASE_TABLE"),
        file_tables.meta_data,
        "metadata".to_string(),
    );

    let read_policy = Policy::from_str(&pick(
        None,
        env_var("AUTH_READ"),
        file_auth.read,
        "public".to_string(),
    ))
    .map_err(anyhow::Error::msg)?;
    let write_policy = Policy::from_str(&pick(
        None,
        env_var("AUTH_WRITE"),
        file_auth.write,
        "private".to_string(),
    ))
    .map_err(anyhow::Error::msg)?;
    let aws_region = pick(None, env_var("AWS_REGION"), file_aws.region, "us-east-1".to_string());
    let aws_service = pick(None, env_var("AWS_SERVICE"), file_aws.service, "s3".to_string());
    let keys_file = pick_opt(None, env_var("AUTH_KEYS_FILE"), file_auth.keys_file).map(PathBuf::from);
    let keys = file_auth.keys.unwrap_or_default();

    let cors_enabled = pick(
        None,
        env_var("CORS_ENABLED").map(|v| v == "true"),
        file_cors.enabled,
        false,
    );
    let cors_allowed_origins = file_cors.allowed_origins.unwrap_or_default();
    let cors_allowed_methods = file_cors.allowed_methods.unwrap_or_default();
    let cors_allowed_headers = file_cors.allowed_headers.unwrap_or_default();
    let cors_exposed_headers = file_cors.exposed_headers.unwrap_or_default();
    let cors_allow_credentials = file_cors.allow_credentials.unwrap_or(false);
    let cors_max_age = file_cors.max_age.unwrap_or(600);

    let config = AppConfig {
        host,
        port,
        mode,
        storage_path,
        database: DatabaseConfig {
            kind: database_kind,
            dsn: database_dsn,
            table: database_table,
        },
        auth: AuthConfig {
            read: read_policy,
            write: write_policy,
            aws: AwsScope {
                region: aws_region,
                service: aws_service,
            },
            keys,
            keys_file,
        },
        cors: CorsConfig {
            enabled: cors_enabled,
            allowed_origins: cors_allowed_origins,
            allowed_methods: cors_allowed_methods,
            allowed_headers: cors_allowed_headers,
            exposed_headers: cors_exposed_headers,
            allow_credentials: cors_allow_credentials,
            max_age: cors_max_age,
        },
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_override_wins_over_env_and_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            port: Some(4242),
            storage_path: Some(dir.path().to_str().unwrap().to_string()),
            ..Default::default()
        };
        unsafe {
            env::set_var("OBJECT_STORE_PORT", "5555");
        }
        let cfg = load(None, overrides).unwrap();
        assert_eq!(cfg.port, 4242);
        unsafe {
            env::remove_var("OBJECT_STORE_PORT");
        }
    }

    #[test]
    fn rejects_missing_storage_dir() {
        let overrides = ConfigOverrides {
            storage_path: Some("/definitely/does/not/exist/anywhere".to_string()),
            ..Default::default()
        };
        assert!(load(None, overrides).is_err());
    }
}
