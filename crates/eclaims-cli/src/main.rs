use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ec_crypto::envelope::{decode_legacy, encode_legacy};
use ec_crypto::EnvelopeCodec;
use ec_link::handlers::LoggingNavigator;
use ec_link::store::MemoryStore;
use ec_link::{
    Action, DispatchOutcome, LinkConfig, LinkParams, LinkParser, LinkRuntime, LoggingNotifier,
    SecureLinkOptions,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

const DEFAULT_LOG_FILTER: &str = "ec_link=info,ec_crypto=info,eclaims_link=info";

#[derive(Parser)]
#[command(name = "eclaims-link")]
#[command(about = "Encrypt, mint, parse and dry-run eClaims secure links", long_about = None)]
struct Cli {
    /// JSON config file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Shared secret, overriding config and ECLAIMS_SHARED_SECRET
    #[arg(long, global = true)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a JSON payload in a secure envelope
    Encrypt {
        json: String,
        /// Emit the legacy plain base64 form instead
        #[arg(long)]
        legacy: bool,
    },

    /// Open an envelope (or legacy base64) and print the payload
    Decrypt {
        data: String,
        /// Accept either form, like vehicle-data links do
        #[arg(long)]
        smart: bool,
    },

    /// Mint a self-issued secure token
    MintToken {
        user_id: String,
        #[arg(long, default_value = "1.0")]
        hours: f64,
        #[arg(long)]
        scope: Vec<String>,
    },

    /// Verify a secure token and print header and claims
    VerifyToken { token: String },

    /// Normalize any accepted token encoding
    ParseToken { token: String },

    /// Parse a universal link
    Parse { url: String },

    /// Build a plain link
    BuildLink {
        action: Action,
        /// key=value, repeatable, kept in order
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        #[arg(long)]
        token: Option<String>,
    },

    /// Build a link carrying a freshly minted token
    SecureLink {
        action: Action,
        user_id: String,
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        #[arg(long, default_value = "60")]
        minutes: u32,
        #[arg(long)]
        scope: Vec<String>,
    },

    /// Build a vehicles link carrying vehicle data
    VehicleLink {
        json: String,
        #[arg(long)]
        legacy: bool,
    },

    /// Run a link through the dispatcher with headless collaborators
    Dispatch {
        url: String,
        /// Start with an authenticated session
        #[arg(long)]
        authenticated: bool,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_config(path: Option<&PathBuf>, secret: Option<String>) -> Result<LinkConfig> {
    let mut config = match path {
        Some(path) => LinkConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .apply_env(),
        None => LinkConfig::from_env(),
    };
    if let Some(secret) = secret {
        config.shared_secret = secret;
    }
    config.validate()?;
    debug!(hosts = ?config.hosts, "config loaded");
    Ok(config)
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("argument is not valid JSON")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn outcome_json(outcome: &DispatchOutcome) -> Value {
    match outcome {
        DispatchOutcome::Invoked {
            action,
            token_authenticated,
        } => json!({"outcome": "invoked", "action": action, "tokenAuthenticated": token_authenticated}),
        DispatchOutcome::LoginRequired {
            action,
            pending_stored,
        } => json!({"outcome": "login_required", "action": action, "pendingStored": pending_stored}),
        DispatchOutcome::Rejected(err) => {
            json!({"outcome": "rejected", "title": err.title(), "message": err.to_string()})
        }
    }
}

async fn run(command: Commands, config: LinkConfig) -> Result<()> {
    let tokens = Arc::new(config.token_codec());

    match command {
        Commands::Encrypt { json, legacy } => {
            let payload = parse_json(&json)?;
            let sealed = if legacy {
                encode_legacy(&payload)?
            } else {
                tokens.envelope().encrypt(&payload)?
            };
            println!("{sealed}");
        }
        Commands::Decrypt { data, smart } => {
            let payload = if smart {
                tokens
                    .envelope()
                    .smart_extract_vehicle_data(&data)
                    .ok_or_else(|| anyhow!("data could not be read in either form"))?
            } else if EnvelopeCodec::is_encrypted_envelope(&data) {
                tokens.envelope().decrypt(&data)?
            } else {
                decode_legacy(&data)?
            };
            print_json(&payload)?;
        }
        Commands::MintToken {
            user_id,
            hours,
            scope,
        } => {
            let mut payload = Map::new();
            payload.insert("userId".into(), Value::from(user_id));
            if !scope.is_empty() {
                payload.insert("scope".into(), Value::from(scope.join(" ")));
            }
            println!("{}", tokens.create_token(&payload, hours)?);
        }
        Commands::VerifyToken { token } => {
            let verified = tokens.inspect_token(&token)?;
            print_json(&json!({"header": verified.header, "payload": verified.payload}))?;
        }
        Commands::ParseToken { token } => {
            let parsed = tokens
                .parse_auth_token(&token)
                .ok_or_else(|| anyhow!("empty token"))?;
            print_json(&parsed)?;
        }
        Commands::Parse { url } => {
            let parser = LinkParser::from_config(&config, tokens);
            let report = parser.try_parse(&url)?;
            print_json(&json!({
                "link": report.link,
                "fallback": report.fallback.map(|f| f.to_string()),
            }))?;
        }
        Commands::BuildLink {
            action,
            params,
            token,
        } => {
            let generator = ec_link::LinkGenerator::from_config(&config, tokens);
            let params: LinkParams = params.into_iter().collect();
            println!("{}", generator.build_link(action, &params, token.as_deref()));
        }
        Commands::SecureLink {
            action,
            user_id,
            params,
            minutes,
            scope,
        } => {
            let generator = ec_link::LinkGenerator::from_config(&config, tokens);
            let params: LinkParams = params.into_iter().collect();
            let options = SecureLinkOptions {
                expires_in_minutes: minutes,
                scope,
            };
            println!(
                "{}",
                generator.build_secure_link(action, &user_id, &params, &options)?
            );
        }
        Commands::VehicleLink { json, legacy } => {
            let generator = ec_link::LinkGenerator::from_config(&config, tokens);
            let vehicle = parse_json(&json)?;
            println!("{}", generator.build_vehicle_link(&vehicle, !legacy, None)?);
        }
        Commands::Dispatch { url, authenticated } => {
            let runtime = LinkRuntime::from_config(
                config,
                Arc::new(LoggingNavigator),
                Arc::new(MemoryStore::new()),
                Arc::new(LoggingNotifier),
            )?;
            runtime.session().set_navigation_ready(true);
            runtime.session().set_authenticated(authenticated);

            let outcome = runtime.handle_url(&url).await;
            print_json(&outcome_json(&outcome))?;
            if let DispatchOutcome::Rejected(err) = outcome {
                bail!("link rejected: {err}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref(), cli.secret)?;
    info!(primary_host = %config.primary_host, "eclaims-link starting");
    run(cli.command, config).await
}
