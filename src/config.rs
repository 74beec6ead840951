use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Base URL of the storage service (S3 and admin API).
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Random bytes per generated secret key (hex doubles the length).
    pub credential_bytes: usize,
    /// Upper bound on a single reconcile invocation.
    pub reconcile_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Storage bucket, policy and user operator")]
pub struct Args {
    /// Host to bind to (overrides STORAGE_OPERATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides STORAGE_OPERATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides STORAGE_OPERATOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage service URL (overrides STORAGE_OPERATOR_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Storage service region (overrides STORAGE_OPERATOR_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Admin access key (overrides STORAGE_OPERATOR_ACCESS_KEY)
    #[arg(long)]
    pub access_key: Option<String>,

    /// Secret key length in bytes (overrides STORAGE_OPERATOR_CREDENTIAL_BYTES)
    #[arg(long)]
    pub credential_bytes: Option<usize>,

    /// Reconcile deadline in seconds (overrides STORAGE_OPERATOR_RECONCILE_TIMEOUT_SECS)
    #[arg(long)]
    pub reconcile_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("STORAGE_OPERATOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("STORAGE_OPERATOR_PORT", 3000u16)?;
        let env_db = env::var("STORAGE_OPERATOR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/operator.db".into());
        let env_endpoint = env::var("STORAGE_OPERATOR_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:9000".into());
        let env_region =
            env::var("STORAGE_OPERATOR_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_access_key = env::var("STORAGE_OPERATOR_ACCESS_KEY").ok();
        // The secret is read from the environment only.
        let env_secret_key = env::var("STORAGE_OPERATOR_SECRET_KEY").ok();
        let env_bytes = env_or("STORAGE_OPERATOR_CREDENTIAL_BYTES", 32usize)?;
        let env_timeout = env_or("STORAGE_OPERATOR_RECONCILE_TIMEOUT_SECS", 30u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            endpoint: args.endpoint.unwrap_or(env_endpoint),
            region: args.region.unwrap_or(env_region),
            access_key: args.access_key.or(env_access_key).unwrap_or_default(),
            secret_key: env_secret_key.unwrap_or_default(),
            credential_bytes: args.credential_bytes.unwrap_or(env_bytes),
            reconcile_timeout: Duration::from_secs(
                args.reconcile_timeout_secs.unwrap_or(env_timeout),
            ),
        };

        if cfg.credential_bytes == 0 {
            anyhow::bail!("credential length must be at least one byte");
        }
        // Only serving talks to the storage service.
        if !args.migrate {
            if cfg.access_key.is_empty() {
                anyhow::bail!("STORAGE_OPERATOR_ACCESS_KEY or --access-key is required");
            }
            if cfg.secret_key.is_empty() {
                anyhow::bail!("STORAGE_OPERATOR_SECRET_KEY is required");
            }
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("credential_bytes", &self.credential_bytes)
            .field("reconcile_timeout", &self.reconcile_timeout)
            .finish()
    }
}

/// Read and parse `name`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_secret_key() {
        let cfg = AppConfig {
            host: "0.0.0.0".into(),
            port: 3000,
            database_url: "sqlite::memory:".into(),
            endpoint: "http://127.0.0.1:9000".into(),
            region: "us-east-1".into(),
            access_key: "operator".into(),
            secret_key: "do-not-log-me".into(),
            credential_bytes: 32,
            reconcile_timeout: Duration::from_secs(30),
        };
        let rendered = format!("{:?}", cfg);
        assert!(rendered.contains("operator"));
        assert!(rendered.contains("http://127.0.0.1:9000"));
        assert!(!rendered.contains("do-not-log-me"));
    }
}
