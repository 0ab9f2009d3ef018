//! Formcast CLI - serve the submission fan-out, watch it, or submit to it.
//!
//! This is the main binary entry point. See the `formcast` library for the
//! core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formcast::channel::{ConnectionState, PubSubSession, Submission};
use formcast::client::SubmissionClient;
use formcast::constants::APP_ROOT_PATH;
use formcast::notifications::{
    BrowserHost, DeliveryAgent, NotificationBackend, PermissionStore, ServiceWorkerLifecycle,
    TerminalBackend,
};
use formcast::{server, Config, HttpCredentialSource, Viewer};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "formcast")]
#[command(version)]
#[command(about = "Real-time form submission notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP + realtime server until Ctrl-C
    Serve,
    /// Watch for submissions and raise desktop alerts
    Listen {
        /// Ask for notification permission before listening
        #[arg(long)]
        request_permission: bool,
        /// Never raise alerts, only print
        #[arg(long)]
        quiet: bool,
    },
    /// Submit a form
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        message: String,
    },
    /// Print the effective configuration
    Config {
        /// Write it to config.json (secrets are never written)
        #[arg(long)]
        save: bool,
    },
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_listen(config: &Config, request_permission: bool, quiet: bool) -> Result<()> {
    let backend: Arc<dyn NotificationBackend> = Arc::new(TerminalBackend::new());
    let permissions = Arc::new(PermissionStore::new(Arc::clone(&backend)));

    let mut viewer = if quiet {
        Viewer::without_alerts()
    } else {
        if request_permission {
            let state = permissions.request_consent().await;
            println!("Notification permission: {state}");
        }

        let app_url = format!("{}{}", config.server_url.trim_end_matches('/'), APP_ROOT_PATH);
        let worker = Arc::new(ServiceWorkerLifecycle::new(
            Arc::clone(&backend),
            Arc::new(BrowserHost),
            app_url,
        ));
        if let Err(e) = worker.register() {
            log::info!("Showing alerts without background worker: {}", e);
        }

        Viewer::new(DeliveryAgent::new(Arc::clone(&permissions), backend).with_worker(worker))
    };

    let credentials = HttpCredentialSource::new(&config.server_url)?;
    let mut session = PubSubSession::builder()
        .server_url(config.server_url.clone())
        .credentials(Arc::new(credentials))
        .channel(config.channel.clone())
        .build()?;
    session.open()?;

    let mut states = session.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => println!("Connected, waiting for submissions..."),
                ConnectionState::Failed(reason) => eprintln!("Connection failed: {reason}"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = viewer.run_with(&mut session, |record| {
            let time = chrono::DateTime::from_timestamp_millis(record.timestamp)
                .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                .unwrap_or_default();
            println!("[{time}] {}", record.message);
        }) => {}
        () = shutdown_signal() => println!("Shutting down..."),
    }

    session.close().await;
    if let ConnectionState::Failed(reason) = session.state() {
        anyhow::bail!("Session failed: {reason}");
    }
    Ok(())
}

async fn run_submit(config: &Config, submission: Submission) -> Result<()> {
    let client = SubmissionClient::new(&config.server_url)?;
    let message = client.submit(&submission).await?;
    println!("{message}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve => {
            log::info!(
                "Starting formcast v{} ({})",
                env!("CARGO_PKG_VERSION"),
                formcast::env::Environment::current()
            );
            server::run(&config, shutdown_signal()).await?;
        }
        Commands::Listen {
            request_permission,
            quiet,
        } => run_listen(&config, request_permission, quiet).await?,
        Commands::Submit {
            name,
            email,
            message,
        } => {
            run_submit(
                &config,
                Submission {
                    name,
                    email,
                    message,
                },
            )
            .await?;
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to {}", Config::config_dir()?.join("config.json").display());
            }
        }
    }

    Ok(())
}
