use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use vetchat::app::{App, AppResult, save_settings};
use vetchat::settings::SettingsStore;

/// Terminal client for the vet chat assistant.
#[derive(Debug, Parser)]
#[command(name = "vetchat", version)]
struct Cli {
    /// Settings file; defaults to the user config directory.
    #[arg(long, env = "VETCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Agent server base address, overriding the settings file.
    #[arg(long)]
    base_address: Option<String>,

    /// Identity provider API key, overriding the settings file.
    #[arg(long)]
    api_key: Option<String>,

    /// Pet key to chat about once signed in.
    #[arg(long)]
    pet: Option<String>,

    /// Write the effective settings to the settings file before starting.
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the transcript, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vetchat=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(error) = run(Cli::parse()).await {
        eprintln!("Error: {error}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> AppResult<()> {
    let store = SettingsStore::new(cli.config.unwrap_or_else(SettingsStore::default_config_path));
    if let Some(base_address) = cli.base_address {
        store.override_with(|settings| settings.base_address = base_address);
    }
    if let Some(api_key) = cli.api_key {
        store.override_with(|settings| settings.identity.api_key = api_key);
    }
    if cli.save {
        save_settings(&store)?;
    }
    let settings = store.settings();
    tracing::info!(
        config = ?store.config_path(),
        base_address = %settings.base_address,
        "loaded settings"
    );

    let mut app = App::from_settings(&settings, std::io::stdout())?;
    if let Some(pet) = cli.pet {
        app.preselect_pet(&pet);
    }

    app.run(BufReader::new(tokio::io::stdin()), wait_for_interrupt)
        .await
}

async fn wait_for_interrupt() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
