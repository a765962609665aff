//! Main module for the SecureSupport CLI application (secsup).
//!
//! Handles command parsing, configuration loading and initialization, and invokes the
//! [`SecureSupport`] facade for the requested command.
//!
//! # Examples
//!
//! ```sh
//! secsup init
//! secsup generate -n 100 --seed 7
//! secsup index tickets.json
//! secsup ask "How do I fix error code 5412?"
//! secsup reset --yes
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::{error::Error, fs, io::stdout, path::PathBuf, process::ExitCode};
use tracing::{debug, info, warn};

use secure_support::{
    SecureSupport, config_dir,
    commands::{Cli, Commands},
    config::{SecureSupportConfig, load_config},
    display,
    template::{AnswerTemplate, DEFAULT_TEMPLATE_NAME},
    tickets::{generate_tickets, write_tickets},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> ExitCode {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", path.display());
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Parse the command line and execute the requested command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails. Errors
/// from the facade carry the stage (initialization, search, generation) they came from.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            debug!("Initializing configuration");
            init()?;
        }
        Commands::Generate {
            count,
            output,
            seed,
        } => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let tickets = generate_tickets(count, &mut rng);
            write_tickets(&output, &tickets)?;
            println!("Generated {} tickets in {}", tickets.len(), output.display());
        }
        Commands::Index { path } => {
            let config = config(cli.config)?;
            let path = path
                .or_else(|| config.tickets_path.clone())
                .ok_or("No ticket file given and no tickets_path configured")?;
            let support = SecureSupport::connect(&config).await?;
            let count = support.load_tickets(&path).await?;
            println!("Indexed {count} tickets from {}", path.display());
        }
        Commands::Search { query, top_k } => {
            let config = config(cli.config)?;
            let support = SecureSupport::connect(&config).await?;
            let top_k = top_k.unwrap_or(support.default_top_k());
            let response = support.search(&query, top_k).await?;
            display::print_search(&mut stdout(), &query, &response)?;
        }
        Commands::Ask { question, top_k } => {
            let config = config(cli.config)?;
            let support = SecureSupport::connect(&config).await?;
            let top_k = top_k.unwrap_or(support.default_top_k());
            let answer = support.ask(&question, top_k).await?;
            display::print_answer(&mut stdout(), &question, &answer)?;
        }
        Commands::Reset { yes } => {
            if !yes {
                warn!("Refusing to reset without --yes");
                println!(
                    "Reset replaces the encryption key and rebuilds the index. \
                     Data encrypted under the old key becomes unreadable. \
                     Re-run with --yes to continue."
                );
                return Ok(());
            }
            let config = config(cli.config)?;
            let support = SecureSupport::connect(&config).await?;
            support.reset().await?;
            display::print_status(&mut stdout(), &support.status().await)?;
        }
        Commands::Status => {
            let config = config(cli.config)?;
            let report = SecureSupport::inspect(&config).await?;
            display::print_report(&mut stdout(), &report)?;
        }
    }

    Ok(())
}

/// Load the configuration from `path` or `<config_dir>/config.yaml`, then apply
/// environment overrides.
fn config(path: Option<PathBuf>) -> Result<SecureSupportConfig, Box<dyn Error>> {
    let path = match path {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };
    debug!("Loading config from: {}", path.display());
    let mut config = load_config(path.to_str().ok_or("Config path is not valid UTF-8")?)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Initializes the application's configuration and answer template.
///
/// Existing files are left untouched so API keys are never overwritten.
///
/// # Errors
///
/// Returns an error if there is an issue creating the directories or files, or
/// serializing the configuration and template to YAML.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = config_dir()?;
    let path = config_dir.join("templates");
    info!("Creating template config directory: {}", path.display());
    fs::create_dir_all(path)?;

    let template_path = config_dir.join(format!("templates/{DEFAULT_TEMPLATE_NAME}.yaml"));
    if template_path.exists() {
        info!("Keeping existing template: {}", template_path.display());
    } else {
        info!("Creating template file: {}", template_path.display());
        let template = AnswerTemplate {
            system_prompt: Some(
                "You are a telecom customer support assistant. Answer only from the tickets."
                    .to_string(),
            ),
            ..AnswerTemplate::default()
        };
        fs::write(&template_path, serde_yaml::to_string(&template)?)?;
    }

    let config_path = config_dir.join("config.yaml");
    if config_path.exists() {
        info!("Keeping existing config: {}", config_path.display());
    } else {
        info!("Creating config file: {}", config_path.display());
        let config = SecureSupportConfig {
            template: Some(DEFAULT_TEMPLATE_NAME.to_string()),
            ..SecureSupportConfig::default()
        };
        fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    }

    println!("Configuration written to {}", config_dir.display());
    Ok(())
}
