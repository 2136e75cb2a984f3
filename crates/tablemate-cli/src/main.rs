//! tablemate - command-line client for the tablemate dinner-matching service.
//!
//! Logs in once, keeps the issued token in the OS keychain, and talks to
//! the API through the same authenticated client the apps use.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use tablemate_core::auth::KeyringStorage;
use tablemate_core::{ApiClient, ClientConfig, Request, UnauthenticatedSignal};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Keychain account the session token is stored under
const KEYRING_ACCOUNT: &str = "session";

/// Directory for rolling log files, when set
const ENV_LOG_DIR: &str = "TABLEMATE_LOG_DIR";

const USAGE: &str = "\
Usage: tablemate <command>

Commands:
  login <email>   Log in and store the session token
  logout          Log out and forget the session token
  profile         Show the logged-in profile
  events          List upcoming events
  get <path>      GET an arbitrary API path and print the response";

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tablemate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn build_client(config: ClientConfig) -> Result<ApiClient> {
    let client = ApiClient::builder(config)
        .storage(Box::new(KeyringStorage::new(KEYRING_ACCOUNT)))
        .on_unauthenticated(Arc::new(|signal: &UnauthenticatedSignal| {
            eprintln!(
                "Session expired ({} {} -> {}). Run `tablemate login <email>` again.",
                signal.method, signal.path, signal.status
            );
        }))
        .build()?;

    // The cookie jar lives only as long as this process, so a stored
    // token is the only session that survives between invocations.
    if client.credentials().get().is_some() {
        client.context().set_force_bearer(true);
    }
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    info!("tablemate starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = ClientConfig::load()?;
    let client = build_client(config)?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["login", email] => {
            let password = rpassword::prompt_password("Password: ")?;
            client.login(email, &password).await?;
            if client.credentials().get().is_none() {
                eprintln!("Logged in, but the server issued no token; the session ends with this process.");
            } else {
                eprintln!("Logged in as {}", email);
            }
        }
        ["logout"] => {
            client.logout().await?;
            eprintln!("Logged out");
        }
        ["profile"] => {
            let profile = client.fetch_profile().await?;
            println!("{} <{}>", profile.display_name(), profile.email);
        }
        ["events"] => {
            let now = Utc::now();
            for event in client.fetch_events().await? {
                let state = if event.is_registration_open(now) { "open" } else { "closed" };
                println!(
                    "{:>6}  {}  {:<40}  {}",
                    event.id,
                    event.starts_at.format("%Y-%m-%d %H:%M"),
                    event.title,
                    state
                );
            }
        }
        ["get", path] => {
            let response = client.fetch(Request::get(*path)).await?;
            eprintln!("{}", response.status());
            match response.json::<serde_json::Value>() {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", response.text()),
            }
        }
        _ => bail!("{}", USAGE),
    }

    info!("tablemate done");
    Ok(())
}
