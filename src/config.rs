use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use sqlx::postgres::PgConnectOptions;
use std::{env, fmt, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub db_max_connections: u32,
    pub storage: StorageConfig,
    pub key_prefix: String,
    pub max_upload_bytes: usize,
    pub cleanup_orphans: bool,
    pub cors_origins: Vec<String>,
}

/// How to reach Postgres: a full URL, or the discrete `DB_*` settings.
///
/// Discrete settings are never spliced into a URL, so credentials may hold
/// any character.
#[derive(Clone)]
pub enum DatabaseConfig {
    Url(String),
    Parts {
        host: String,
        port: u16,
        name: String,
        user: String,
        password: Option<String>,
    },
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match self {
            DatabaseConfig::Url(url) => PgConnectOptions::from_str(url)
                .with_context(|| format!("parsing database URL `{}`", redact_url(url))),
            DatabaseConfig::Parts {
                host,
                port,
                name,
                user,
                password,
            } => {
                let options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(name)
                    .username(user);
                Ok(match password {
                    Some(password) => options.password(password),
                    None => options,
                })
            }
        }
    }
}

/// Where uploaded bytes go.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    Disk { dir: PathBuf },
    S3(S3Config),
}

#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    S3,
    Disk,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload ingestion gateway")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DATABASE_URL and the DB_* variables)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Blob backend (overrides UPLOAD_GATEWAY_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Directory for the disk backend (overrides UPLOAD_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// S3 bucket (overrides S3_BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values found through `lookup`.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = args
            .host
            .or_else(|| lookup("UPLOAD_GATEWAY_HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&lookup, "UPLOAD_GATEWAY_PORT", 5000)?,
        };

        let database = match args.database_url.or_else(|| lookup("DATABASE_URL")) {
            Some(url) => DatabaseConfig::Url(url),
            None => database_from_parts(&lookup)?,
        };

        let backend = match args.storage_backend {
            Some(backend) => backend,
            None => match lookup("UPLOAD_GATEWAY_STORAGE_BACKEND") {
                Some(value) => <StorageBackend as ValueEnum>::from_str(&value, true)
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| {
                        format!("parsing UPLOAD_GATEWAY_STORAGE_BACKEND value `{}`", value)
                    })?,
                None => StorageBackend::S3,
            },
        };

        let storage = match backend {
            StorageBackend::Disk => StorageConfig::Disk {
                dir: args
                    .storage_dir
                    .or_else(|| lookup("UPLOAD_GATEWAY_STORAGE_DIR").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from("./data/objects")),
            },
            StorageBackend::S3 => {
                let Some(bucket) = args.bucket.or_else(|| lookup("S3_BUCKET_NAME")) else {
                    bail!("S3_BUCKET_NAME must be set for the s3 storage backend");
                };
                StorageConfig::S3(S3Config {
                    bucket,
                    region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".into()),
                    endpoint_url: lookup("S3_ENDPOINT_URL"),
                    access_key_id: lookup("AWS_ACCESS_KEY_ID"),
                    secret_access_key: lookup("AWS_SECRET_ACCESS_KEY"),
                })
            }
        };

        let cors_origins = lookup("UPLOAD_GATEWAY_CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            database,
            db_max_connections: parse_var(&lookup, "UPLOAD_GATEWAY_DB_MAX_CONNECTIONS", 5)?,
            storage,
            key_prefix: lookup("UPLOAD_GATEWAY_KEY_PREFIX").unwrap_or_else(|| "uploads".into()),
            max_upload_bytes: parse_var(
                &lookup,
                "UPLOAD_GATEWAY_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            cleanup_orphans: parse_var(&lookup, "UPLOAD_GATEWAY_CLEANUP_ORPHANS", true)?,
            cors_origins,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

/// Connection settings from the `DB_*` variables.
fn database_from_parts(lookup: &impl Fn(&str) -> Option<String>) -> Result<DatabaseConfig> {
    let required = |name: &str| {
        lookup(name).with_context(|| format!("{} must be set when DATABASE_URL is not", name))
    };
    let host = required("DB_HOST")?;
    let name = required("DB_NAME")?;
    let user = required("DB_USER")?;
    let port: u16 = parse_var(lookup, "DB_PORT", 5432)?;

    Ok(DatabaseConfig::Parts {
        host,
        port,
        name,
        user,
        password: lookup("DB_PASSWORD"),
    })
}

/// Replace the password segment of a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, location)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{location}"),
        None => url.to_string(),
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("db_max_connections", &self.db_max_connections)
            .field("storage", &self.storage)
            .field("key_prefix", &self.key_prefix)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("cleanup_orphans", &self.cleanup_orphans)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(url) => write!(f, "{}", redact_url(url)),
            DatabaseConfig::Parts {
                host,
                port,
                name,
                user,
                password,
            } => {
                let secret = if password.is_some() { ":***" } else { "" };
                write!(f, "postgres://{user}{secret}@{host}:{port}/{name}")
            }
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .finish()
    }
}
