#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::env;
use std::path::PathBuf;

mod utils;

use skylink::credentials::{CredentialStore, Credentials};
use skylink::models::Notification;
use skylink::{ClientConfig, SkypeClient};

/// Command line arguments for skylink
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "skylink: a command-line Skype client.",
    long_about = "skylink logs in to Skype, loads the contact list and prints incoming events.\n\n\
    Credentials are read from SKYPE_USERNAME / SKYPE_PASSWORD, then from the cached\n\
    credentials file, then prompted for."
)]
struct Args {
    /// JSON client configuration (endpoints, timeouts, worker count)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the log here instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read config {}", path.display()))?;
            let config = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(ClientConfig::default()),
    }
}

/// Credentials from the environment, the cache or the terminal. The flag is
/// true when they were typed in and should be cached after a good login.
fn obtain_credentials(store: &CredentialStore) -> Result<(String, String, bool)> {
    if let (Ok(username), Ok(password)) = (env::var("SKYPE_USERNAME"), env::var("SKYPE_PASSWORD")) {
        return Ok((username, password, false));
    }

    if let Some(creds) = store.load()? {
        info!("Using cached credentials for {}", creds.username);
        let password = match creds.get_password() {
            Some(password) => password,
            None => {
                eprintln!("Enter password for {}:", creds.username);
                utils::read_line()?
            }
        };
        return Ok((creds.username, password, false));
    }

    eprintln!("Enter Skype username:");
    let username = utils::read_line()?;
    eprintln!("Enter password:");
    let password = utils::read_line()?;
    Ok((username, password, true))
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::MessageReceived(message) => format!(
            "[{}] {}: {}",
            message.conversation_id.as_deref().unwrap_or("?"),
            message
                .sender_name
                .as_deref()
                .or(message.sender_id.as_deref())
                .unwrap_or("unknown"),
            message.content
        ),
        Notification::Typing { sender_id, active, .. } => format!(
            "{} {} typing",
            sender_id.as_deref().unwrap_or("someone"),
            if *active { "is" } else { "stopped" }
        ),
        Notification::StatusChanged { user_id, status } => format!("{} is now {}", user_id, status),
        Notification::EndpointPresence(presence) => {
            format!("{} is present on endpoint {}", presence.user_id, presence.endpoint_id)
        }
        Notification::ContactBlocked { contact_id, blocked } => {
            format!("{} {}", contact_id, if *blocked { "blocked" } else { "unblocked" })
        }
        Notification::ContactRequestReceived(request) => format!(
            "Contact request from {}: {}",
            request.sender_id, request.greeting_message
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_file = args.log_file.as_ref().and_then(|p| p.to_str());
    utils::setup_logging(log_file, level)?;
    info!("System information: {} {}", env::consts::OS, env::consts::ARCH);

    let config = load_config(args.config.as_ref())?;
    let store = CredentialStore::default_location()?;
    let (username, password, prompted) = obtain_credentials(&store)?;

    let (client, mut notifications) = SkypeClient::new(config)?;
    println!("Logging in as {}... please wait...\n", username);

    let report = match client.login(&username, &password).await {
        Ok(report) => report,
        Err(e) => {
            error!("Login failed: {}", e);
            return Err(e.into());
        }
    };
    if prompted {
        if let Err(e) = store.save(&Credentials::new(&username, &password)) {
            warn!("Could not cache credentials in {}: {}", store.path().display(), e);
        }
    }
    for (task, err) in &report.failures {
        eprintln!("Warning: {} failed during login: {}", task, err);
    }

    let contacts = client.contacts().await;
    println!("{} contacts:", contacts.len());
    for contact in &contacts {
        println!(
            "  {} ({}){}",
            contact.display_name.as_deref().unwrap_or(&contact.person_id),
            contact.status,
            if contact.is_blocked { " [blocked]" } else { "" }
        );
    }
    for request in client.contact_requests().await {
        println!("Pending contact request from {}", request.sender_id);
    }
    println!("\nListening for events, press Ctrl-C to quit.");

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(notification) => println!("{}", describe(&notification)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, logging out");
                break;
            }
        }
    }

    client.logout().await;
    Ok(())
}
