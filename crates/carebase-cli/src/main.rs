//! carebase - terminal driver for the carebase session core.
//!
//! Signs in against the identity backend, inspects the persisted session and
//! watches it expire, exercising the same session manager the web front-end
//! embeds.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use carebase_core::api::AuthClient;
use carebase_core::auth::{
    AccessDecision, ActivityEvent, InactivityMonitor, SessionManager, SystemClock,
};
use carebase_core::Config;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prefix of the daily rolling log file in the data directory
const LOG_FILE_PREFIX: &str = "carebase.log";

const USAGE: &str = "\
Usage: carebase <command>

Commands:
  status           Show the stored session (default)
  login [email]    Sign in against the identity backend
  token <value>    Install a bearer token directly
  logout           Clear the stored session
  watch            Keep the session open; each stdin line is an activity event
                   (an event name such as `click` or `scroll`, empty for a keypress)

Environment:
  CAREBASE_API_URL    Identity backend base URL
  CAREBASE_EMAIL      Email used by `login`
  CAREBASE_PASSWORD   Password used by `login`
  RUST_LOG            Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
/// Logs go to stderr and, when a log directory is available, to a daily file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("status");
    if matches!(command, "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let loaded = Config::load();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    let _log_guard = init_tracing(config.data_dir().ok().as_deref());
    if let Err(e) = &loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    if let Ok(url) = std::env::var("CAREBASE_API_URL") {
        config.api_base_url = Some(url);
    }

    let storage = config.session_storage()?;
    let manager = SessionManager::new(storage, Arc::new(SystemClock), config.session.timeouts());
    manager.hydrate().await;

    match command {
        "status" => print_status(&manager),
        "login" => {
            login(&mut config, &manager, args.get(2).cloned()).await?;
            print_status(&manager);
        }
        "token" => {
            let token = args.get(2).context("Usage: carebase token <value>")?;
            manager.set_token(Some(token.clone()));
            print_status(&manager);
        }
        "logout" => {
            manager.logout();
            println!("Signed out.");
        }
        "watch" => watch(&manager).await?,
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other);
        }
    }

    Ok(())
}

fn print_status(manager: &SessionManager) {
    let snapshot = manager.snapshot();
    let decision = AccessDecision::from_snapshot(&snapshot);
    println!("{}", decision.message());

    if let AccessDecision::Authenticated { .. } = decision {
        let now = manager.now();
        if let Some(at) = snapshot.last_activity() {
            println!("Last activity: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!(
            "Expires in:    {} min",
            snapshot.session.minutes_until_expiry(now, manager.timeouts())
        );
        if let Some(user) = snapshot.user() {
            println!(
                "User:          {}",
                serde_json::to_string(user).unwrap_or_else(|_| "<unprintable>".to_string())
            );
        }
    }
}

async fn login(config: &mut Config, manager: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| std::env::var("CAREBASE_EMAIL").ok()) {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        bail!("Email required");
    }

    let password = match std::env::var("CAREBASE_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    let client = AuthClient::new(config.api_base_url())?;
    println!("Signing in to {}...", client.base_url());
    client.sign_in(manager, &email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

async fn watch(manager: &SessionManager) -> Result<()> {
    if !manager.snapshot().is_authenticated() {
        println!("{}", AccessDecision::from_snapshot(&manager.snapshot()).message());
        return Ok(());
    }

    let monitor = InactivityMonitor::spawn(manager.clone());
    let activity = monitor.activity();

    // Blocking stdin reads live on their own thread so shutdown never waits on them
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "" => ActivityEvent::KeyDown,
                name => match name.parse::<ActivityEvent>() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Ignoring input");
                        continue;
                    }
                },
            };
            if !activity.notify(event) {
                break;
            }
        }
    });

    println!("Watching session. Press Enter to register activity, Ctrl-C to stop.");
    let mut updates = manager.subscribe();
    let mut warned = false;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let decision = AccessDecision::from_snapshot(&updates.borrow_and_update());
                match decision {
                    AccessDecision::Authenticated { warning } if warning != warned => {
                        warned = warning;
                        println!("{}", decision.message());
                    }
                    AccessDecision::SignIn { .. } => {
                        println!("{}", decision.message());
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving session in place");
                break;
            }
        }
    }

    monitor.shutdown();
    Ok(())
}
