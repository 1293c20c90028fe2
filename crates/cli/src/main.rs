mod auth_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context as _,
    clap::{Parser, Subcommand},
    drivelink_api::{ApiCaller, ApiError, ApiRequestSpec, Session},
    drivelink_config::DrivelinkConfig,
    drivelink_oauth::{CredentialStore, FileCredentialStore, SharedCredential, TokenExchanger},
    serde_json::Value,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "drivelink", about = "drivelink: vehicle API client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Path to drivelink.toml (defaults to the user config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the credential file (defaults to the user data directory).
    #[arg(long, global = true, env = "DRIVELINK_CREDENTIALS")]
    credentials: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorization and stored credentials.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// GET a resource and print the JSON response.
    Get {
        /// Resource path relative to the API base URL (e.g. /v1/vehicles).
        path: String,
        /// Query parameter as key=value; may be repeated.
        #[arg(long = "query", short = 'q')]
        query: Vec<String>,
        /// Stored account to use.
        #[arg(long, default_value = "default")]
        account: String,
    },
}

/// What every command needs: where config and credentials live.
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub store: FileCredentialStore,
}

impl Context {
    pub fn load_config(&self) -> anyhow::Result<DrivelinkConfig> {
        drivelink_config::load_config(self.config_path.as_deref()).context("loading configuration")
    }
}

/// Token exchanger bounded by the same timeout as API requests.
pub fn exchanger_for(config: &DrivelinkConfig) -> TokenExchanger {
    TokenExchanger::new(config.oauth_config()).with_timeout(config.api.timeout())
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "drivelink starting");

    let store_path = match cli.credentials.clone() {
        Some(path) => path,
        None => FileCredentialStore::default_path()?,
    };
    debug!(path = %store_path.display(), "credential store");
    let ctx = Context {
        config_path: cli.config.clone(),
        store: FileCredentialStore::new(store_path),
    };

    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(action, &ctx).await,
        Commands::Get {
            path,
            query,
            account,
        } => get(&ctx, &account, &path, &query).await,
    }
}

async fn get(ctx: &Context, account: &str, path: &str, query: &[String]) -> anyhow::Result<()> {
    let config = ctx.load_config()?;
    let Some(credential) = ctx.store.load(account)? else {
        anyhow::bail!("account '{account}' is not logged in; run `drivelink auth login`");
    };

    let mut spec = ApiRequestSpec::<Value>::get(path);
    for pair in query {
        let (key, value) = parse_query_pair(pair)?;
        spec = spec.with_query(key, value);
    }

    let caller = ApiCaller::with_timeout(config.api.base_url.clone(), config.api.timeout())?
        .with_retry(config.api.retry_policy());
    let session = Session::new(
        caller,
        Arc::new(exchanger_for(&config)),
        Arc::new(SharedCredential::new(credential.clone())),
    )
    .with_refresh_skew(config.api.refresh_skew_secs);

    let result = session.call(&spec).await;

    // Persist a rotated credential even when the call itself failed.
    let current = session.credential().await;
    if !current.is_same_grant(&credential) {
        ctx.store.save(account, &current)?;
        debug!(account, "saved refreshed credential");
    }

    match result {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        },
        Err(ApiError::Auth(e)) if e.requires_reauthorization() => {
            anyhow::bail!("{e}; run `drivelink auth login --account {account}`")
        },
        Err(e) => Err(e.into()),
    }
}

fn parse_query_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => anyhow::bail!("invalid query parameter '{pair}', expected key=value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_pair() {
        assert_eq!(parse_query_pair("limit=10").unwrap(), ("limit", "10"));
        assert_eq!(parse_query_pair("q=a=b").unwrap(), ("q", "a=b"));
        assert_eq!(parse_query_pair("flag=").unwrap(), ("flag", ""));
        assert!(parse_query_pair("novalue").is_err());
        assert!(parse_query_pair("=x").is_err());
    }

    #[test]
    fn test_cli_parses_get_with_queries() {
        let cli = Cli::try_parse_from([
            "drivelink",
            "get",
            "/v1/trips",
            "-q",
            "limit=5",
            "--query",
            "since=2024-01-01",
            "--account",
            "work",
        ])
        .unwrap();
        match cli.command {
            Commands::Get {
                path,
                query,
                account,
            } => {
                assert_eq!(path, "/v1/trips");
                assert_eq!(query, vec!["limit=5", "since=2024-01-01"]);
                assert_eq!(account, "work");
            },
            Commands::Auth { .. } => panic!("expected get"),
        }
    }
}
