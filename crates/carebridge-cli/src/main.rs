//! Carebridge CLI
//!
//! Drives the Carebridge client stack from the command line: unified API
//! requests (plain, Zoho proxy, Catalyst function), token issuance and device
//! fingerprints.
//!
//! Usage:
//! ```bash
//! # Zoho proxy call with a service token
//! SERVICE_API_TOKEN=... carebridge zoho /crm/v2/Leads
//!
//! # Catalyst function, authenticating through a stored session
//! carebridge --session-file ~/.carebridge/session.json \
//!   catalyst patient-intake --body '{"patientId": "p-1"}'
//!
//! # With a config file (env vars override it)
//! carebridge --config carebridge.yaml request GET /health
//! ```

mod config;

use anyhow::Context;
use carebridge_audit::{AuditEmitter, build_from_config};
use carebridge_core::AuditContext;
use carebridge_egress::{
    ApiRequestOptions, ApiResponse, HttpClientConfig, ReqwestTransport, StaticTokenProvider,
    Transport, UnifiedApiClient,
};
use carebridge_session::{
    DeviceFingerprint, FileSessionStore, TokenGuard, TokenIssuer, access_cookie,
    refresh_cookie, resolve_refresh_url,
};
use clap::{Parser, Subcommand};
use config::CarebridgeConfig;
use reqwest::Method;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "carebridge")]
#[command(about = "Carebridge - audited API client for the care portal", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session file used to authenticate requests (refreshed as needed)
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a request through the unified API client
    Request {
        /// HTTP method
        method: String,
        /// Absolute URL or path relative to the base URL
        url: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        /// Attach a bearer token
        #[arg(long)]
        auth: bool,
        /// Extra header as `Name: value` (repeatable)
        #[arg(long = "header", value_name = "K:V")]
        headers: Vec<String>,
        /// Audit action prefix
        #[arg(long, default_value = "API")]
        action: String,
        /// Audited resource (defaults to the URL)
        #[arg(long)]
        resource: Option<String>,
        /// Acting user recorded on audit events
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Call an endpoint through the Zoho proxy
    Zoho {
        endpoint: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Invoke a Catalyst function
    Catalyst {
        function: String,
        #[arg(long)]
        body: Option<String>,
    },
    /// Issue a signed token pair
    IssueToken {
        user_id: String,
        #[arg(long, default_value = "patient")]
        role: String,
    },
    /// Compute a device fingerprint
    Fingerprint {
        #[arg(long)]
        user_agent: String,
        #[arg(long, default_value = "en-US")]
        language: String,
        #[arg(long, default_value = "1920")]
        width: u32,
        #[arg(long, default_value = "1080")]
        height: u32,
        /// Further client signal, such as a canvas hash
        #[arg(long, default_value = "")]
        extra: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CarebridgeConfig::from_file(path)?,
        None => CarebridgeConfig::default(),
    };
    let env_warnings = config.merge_env();
    if let Some(path) = &cli.session_file {
        config.auth.session_file = Some(path.clone());
    }
    if cli.json {
        config.logging.json = true;
    }

    init_tracing(&config)?;
    for warning in env_warnings {
        warn!("{}", warning);
    }
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Commands::Request {
            method,
            url,
            body,
            auth,
            headers,
            action,
            resource,
            user_id,
        } => {
            let mut context = AuditContext::new(action, resource.unwrap_or_else(|| url.clone()));
            if let Some(user_id) = user_id {
                context = context.with_user_id(user_id);
            }

            let mut options = ApiRequestOptions::new(parse_method(&method)?, url).with_audit(context);
            if let Some(body) = body {
                options = options.body(parse_body(&body)?);
            }
            for header in headers {
                let (name, value) = parse_header(&header)?;
                options = options.header(name, value);
            }
            if auth {
                options = options.with_auth();
            }

            run_request(&config, |client| async move { client.request(options).await }).await
        }
        Commands::Zoho {
            endpoint,
            method,
            body,
        } => {
            let mut options = ApiRequestOptions::new(parse_method(&method)?, "")
                .with_audit(AuditContext::new("ZOHO", endpoint.clone()));
            if let Some(body) = body {
                options = options.body(parse_body(&body)?);
            }

            run_request(&config, |client| async move {
                client.zoho_request(&endpoint, options).await
            })
            .await
        }
        Commands::Catalyst { function, body } => {
            let data = match body {
                Some(body) => parse_body(&body)?,
                None => json!({}),
            };
            let options = ApiRequestOptions::new(Method::POST, "")
                .with_audit(AuditContext::new("CATALYST", function.clone()));

            run_request(&config, |client| async move {
                client.catalyst_request(&function, data, options).await
            })
            .await
        }
        Commands::IssueToken { user_id, role } => {
            let secret = config
                .auth
                .signing_secret
                .as_deref()
                .context("SESSION_SIGNING_SECRET is not set")?;
            let emitter = build_emitter(&config)?;

            let mut issuer = TokenIssuer::new(secret)?;
            if let Some(emitter) = &emitter {
                issuer = issuer.with_audit(emitter.clone());
            }
            let tokens = issuer.issue(&user_id, &role)?;
            drop(issuer);

            print_json(&json!({
                "tokens": tokens,
                "cookies": [
                    refresh_cookie(&tokens.refresh_token),
                    access_cookie(&tokens.access_token),
                ],
            }))?;
            shutdown_emitter(emitter).await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fingerprint {
            user_agent,
            language,
            width,
            height,
            extra,
        } => {
            let fingerprint =
                DeviceFingerprint::from_traits(&user_agent, &language, width, height, &extra);
            println!("{}", fingerprint);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(config: &CarebridgeConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so stdout carries only command output
    if config.logging.json {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn build_emitter(config: &CarebridgeConfig) -> anyhow::Result<Option<Arc<AuditEmitter>>> {
    let emitter = build_from_config(&config.audit).context("Failed to set up audit sinks")?;
    Ok(emitter.map(Arc::new))
}

async fn shutdown_emitter(emitter: Option<Arc<AuditEmitter>>) {
    let Some(emitter) = emitter else {
        return;
    };
    match Arc::try_unwrap(emitter) {
        Ok(emitter) => {
            if let Err(e) = emitter.shutdown().await {
                warn!("Audit emitter did not shut down cleanly: {}", e);
            }
        }
        Err(_) => warn!("Audit emitter still shared at exit, pending events may be lost"),
    }
}

/// Build a client from config, run `call`, print the envelope and flush audit events
async fn run_request<F, Fut>(config: &CarebridgeConfig, call: F) -> anyhow::Result<ExitCode>
where
    F: FnOnce(UnifiedApiClient) -> Fut,
    Fut: std::future::Future<Output = ApiResponse>,
{
    let transport: Arc<dyn Transport> =
        Arc::new(ReqwestTransport::new(&HttpClientConfig::default())?);
    let emitter = build_emitter(config)?;

    let mut client = UnifiedApiClient::new(config.client.clone(), transport.clone());
    if let Some(emitter) = &emitter {
        client = client.with_audit(emitter.clone());
    }

    if let Some(session_file) = &config.auth.session_file {
        let store = FileSessionStore::new(session_file)?;
        debug!("Authenticating with session file {}", store.path().display());
        let refresh_url = resolve_refresh_url(&config.client.base_url, &config.auth.refresh_url)?;
        let guard = TokenGuard::new(Arc::new(store), transport, refresh_url);
        client = client.with_token_provider(Arc::new(guard));
    } else if let Some(token) = &config.auth.service_token {
        client = client.with_token_provider(Arc::new(StaticTokenProvider::new(token.clone())));
    }

    let response = call(client).await;
    print_json(&serde_json::to_value(&response.envelope)?)?;
    shutdown_emitter(emitter).await;

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_method(method: &str) -> anyhow::Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", method))
}

fn parse_body(body: &str) -> anyhow::Result<Value> {
    serde_json::from_str(body).context("--body must be valid JSON")
}

fn parse_header(header: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = header
        .split_once(':')
        .with_context(|| format!("Header '{}' must look like 'Name: value'", header))?;
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "Header '{}' has an empty name", header);
    Ok((name.to_string(), value.trim().to_string()))
}
