use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use core_runtime::config::{
    Credentials, EndpointSource, MirrorConfig, RunMode, DEFAULT_COLLECTION_SUFFIX,
    DEFAULT_DATABASE_PATH, DEFAULT_LOCK_TTL_SECS, DEFAULT_MAX_ATTEMPTS, DEFAULT_PAGE_SIZE,
};
use core_runtime::logging::{LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "collection-mirror",
    version,
    about = "Mirror schema-discovered GraphQL collections into SQLite"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level for workspace crates (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Log format (pretty, json, compact)
    #[arg(long, env = "LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Raw tracing filter, overrides --log-level
    #[arg(long, env = "LOG_FILTER", global = true)]
    pub log_filter: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mirror every selected collection
    Run(RunArgs),
    /// List collections found in the schema
    Discover(DiscoverArgs),
    /// Show stored cursors and leases
    Status(DatabaseArgs),
    /// Forget a collection's cursor so it is mirrored from the start
    Reset {
        /// Collection type name, e.g. WidgetCollection
        collection: String,

        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = DEFAULT_DATABASE_PATH)]
    pub database_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// URL serving the schema document
    #[arg(long, env = "SCHEMA_URL")]
    pub schema_url: String,

    /// Type-name suffix marking collection types
    #[arg(long, env = "COLLECTION_SUFFIX", default_value = DEFAULT_COLLECTION_SUFFIX)]
    pub collection_suffix: String,

    /// Also print the page query for each collection
    #[arg(long)]
    pub show_queries: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// URL serving the schema document
    #[arg(long, env = "SCHEMA_URL")]
    pub schema_url: String,

    /// Data endpoint URL
    #[arg(long, env = "DATA_ENDPOINT")]
    pub data_endpoint: Option<String>,

    /// Directory service listing per-account endpoints
    #[arg(long, env = "DIRECTORY_URL", conflicts_with = "data_endpoint")]
    pub directory_url: Option<String>,

    /// Account to look up in the directory
    #[arg(long, env = "ACCOUNT_NAME", requires = "directory_url")]
    pub account_name: Option<String>,

    /// Pre-issued bearer token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// OAuth2 token endpoint for the client-credentials grant
    #[arg(long, env = "TOKEN_ENDPOINT")]
    pub token_endpoint: Option<String>,

    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Items requested per page
    #[arg(long, env = "PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Pause between pages in milliseconds
    #[arg(long, env = "PAGE_DELAY_MS", default_value_t = 500)]
    pub page_delay_ms: u64,

    /// Lease lifetime in seconds
    #[arg(long, env = "LOCK_TTL_SECS", default_value_t = DEFAULT_LOCK_TTL_SECS)]
    pub lock_ttl_secs: i64,

    /// Requests per page before giving up
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Repeat the cycle every N seconds until interrupted
    #[arg(long, env = "INTERVAL_SECS")]
    pub interval_secs: Option<u64>,

    /// Only mirror these collections (repeatable or comma separated)
    #[arg(long = "collection", env = "COLLECTIONS", value_delimiter = ',')]
    pub collections: Vec<String>,

    /// Type-name suffix marking collection types
    #[arg(long, env = "COLLECTION_SUFFIX", default_value = DEFAULT_COLLECTION_SUFFIX)]
    pub collection_suffix: String,

    /// Print progress events as JSON lines on stdout
    #[arg(long)]
    pub events: bool,
}

impl RunArgs {
    pub fn endpoint_source(&self) -> Result<EndpointSource> {
        match (&self.data_endpoint, &self.directory_url, &self.account_name) {
            (Some(url), _, _) => Ok(EndpointSource::Static(url.clone())),
            (None, Some(url), Some(account)) => Ok(EndpointSource::Directory {
                url: url.clone(),
                account: account.clone(),
            }),
            (None, Some(_), None) => bail!("--directory-url needs --account-name"),
            (None, None, _) => bail!("either --data-endpoint or --directory-url is required"),
        }
    }

    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = &self.access_token {
            return Ok(Credentials::Static(token.clone()));
        }

        match (&self.token_endpoint, &self.client_id, &self.client_secret) {
            (Some(token_url), Some(client_id), Some(client_secret)) => {
                Ok(Credentials::ClientCredentials {
                    token_url: token_url.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                })
            }
            _ => bail!(
                "either --access-token or all of --token-endpoint, --client-id and \
                 --client-secret are required"
            ),
        }
    }

    pub fn mode(&self) -> RunMode {
        match self.interval_secs {
            Some(secs) => RunMode::Continuous {
                interval: Duration::from_secs(secs),
            },
            None => RunMode::OneShot,
        }
    }

    pub fn to_config(&self) -> Result<MirrorConfig> {
        let config = MirrorConfig::builder()
            .schema_url(self.schema_url.clone())
            .endpoint(self.endpoint_source()?)
            .credentials(self.credentials()?)
            .database_path(self.database.database_path.clone())
            .page_size(self.page_size)
            .page_delay(Duration::from_millis(self.page_delay_ms))
            .lock_ttl_secs(self.lock_ttl_secs)
            .max_attempts(self.max_attempts)
            .mode(self.mode())
            .collections(self.collections.iter().cloned())
            .collection_suffix(self.collection_suffix.clone())
            .build()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "collection-mirror",
            "run",
            "--schema-url",
            "https://api.example.com/schema.graphql",
        ];
        argv.extend_from_slice(extra);

        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_static_endpoint_and_token() {
        let config = run_args(&[
            "--data-endpoint",
            "https://api.example.com/graphql",
            "--access-token",
            "tok",
            "--collection",
            "WidgetCollection,GadgetCollection",
        ])
        .to_config()
        .unwrap();

        assert_eq!(
            config.endpoint,
            EndpointSource::Static("https://api.example.com/graphql".to_string())
        );
        assert_eq!(config.credentials, Credentials::Static("tok".to_string()));
        assert_eq!(config.collections, vec!["WidgetCollection", "GadgetCollection"]);
        assert_eq!(config.mode, RunMode::OneShot);
    }

    #[test]
    fn test_directory_and_client_credentials() {
        let args = run_args(&[
            "--directory-url",
            "https://directory.example.com/agencies",
            "--account-name",
            "acme",
            "--token-endpoint",
            "https://auth.example.com/token",
            "--client-id",
            "id",
            "--client-secret",
            "secret",
            "--interval-secs",
            "60",
        ]);

        assert_eq!(
            args.endpoint_source().unwrap(),
            EndpointSource::Directory {
                url: "https://directory.example.com/agencies".to_string(),
                account: "acme".to_string(),
            }
        );
        assert!(matches!(
            args.credentials().unwrap(),
            Credentials::ClientCredentials { ref client_id, .. } if client_id == "id"
        ));
        assert_eq!(
            args.mode(),
            RunMode::Continuous {
                interval: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let args = run_args(&["--data-endpoint", "https://api.example.com/graphql"]);
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let args = run_args(&[
            "--data-endpoint",
            "https://api.example.com/graphql",
            "--access-token",
            "tok",
            "--page-size",
            "0",
        ]);
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_status_defaults() {
        let cli = Cli::try_parse_from(["collection-mirror", "status"]).unwrap();
        match cli.command {
            Command::Status(args) => {
                assert_eq!(args.database_path, PathBuf::from(DEFAULT_DATABASE_PATH))
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.log_level, LogLevel::Info);
    }
}
