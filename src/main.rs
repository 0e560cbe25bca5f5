use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use userlist_vault::config::{default_config_path, LoggingConfig, ResolvedConfig};
use userlist_vault::options::OptionsUpdate;
use userlist_vault::secrets::SecretPayload;
use userlist_vault::{CallerIdentity, CredentialService, ReadMode};

#[derive(Parser)]
#[command(name = "userlist-vault")]
#[command(about = "Store secrets and hash them into HAProxy userlist files")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Caller token; secrets are namespaced by it
    #[arg(long, env = "USERLIST_VAULT_CALLER", hide_env_values = true, default_value = "")]
    caller: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read, write or delete a secret
    #[command(subcommand)]
    Secret(SecretCommand),

    /// Show, set or clear the service options
    #[command(subcommand)]
    Options(OptionsCommand),

    /// Show the resolved configuration
    Config,
}

#[derive(Subcommand)]
enum SecretCommand {
    /// Print the payload stored at PATH
    Read { path: String },

    /// Store KEY=VALUE fields at PATH and hash the `password` (or only) field
    Write {
        path: String,
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Delete the payload stored at PATH
    Delete { path: String },
}

#[derive(Subcommand)]
enum OptionsCommand {
    /// Print the current options
    Show,

    /// Change one or more options
    Set(SetOptionsArgs),

    /// Clear one field, or every option when FIELD is omitted
    Clear { field: Option<String> },
}

#[derive(Args)]
struct SetOptionsArgs {
    /// Return the hash instead of patching a userlist
    #[arg(long)]
    output: Option<bool>,

    /// URL of the template userlist
    #[arg(long, conflicts_with = "local")]
    remote: Option<String>,

    /// Local path of the template userlist
    #[arg(long)]
    local: Option<PathBuf>,

    /// Hash algorithm (sha256 or sha512)
    #[arg(long)]
    algorithm: Option<String>,

    /// Fixed crypt salt (1-16 characters of [./0-9A-Za-z])
    #[arg(long)]
    salt: Option<String>,

    /// Keep options (and secrets) in durable storage
    #[arg(long)]
    persist: Option<bool>,

    /// Where the patched userlist is written
    #[arg(long)]
    target: Option<PathBuf>,
}

impl From<SetOptionsArgs> for OptionsUpdate {
    fn from(args: SetOptionsArgs) -> Self {
        OptionsUpdate {
            output_enabled: args.output,
            remote_source: args.remote,
            local_source: args.local,
            hash_algorithm: args.algorithm,
            salt: args.salt,
            persist: args.persist,
            target_path: args.target,
        }
    }
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = ResolvedConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    init_logging(&config.logging);

    if let Command::Config = cli.command {
        println!("Config file: {}", config_path.display());
        println!("Data directory: {}", config.data_dir.display());
        println!("Storage: {:?}", config.storage);
        println!("Secret durability: {:?}", config.secret_durability);
        return Ok(());
    }

    let source = Arc::new(config.build_file_source()?);
    let service =
        CredentialService::open(config.build_storage(), source, config.secret_durability).await?;
    let caller = CallerIdentity::new(cli.caller);

    match cli.command {
        Command::Secret(SecretCommand::Read { path }) => {
            match service.read_secret(&caller, &path, ReadMode::Durable).await? {
                Some(payload) => print_json(&payload)?,
                None => anyhow::bail!("No value at {path}"),
            }
        }
        Command::Secret(SecretCommand::Write { path, fields }) => {
            let payload: SecretPayload = fields
                .into_iter()
                .map(|(key, value)| (key, serde_json::Value::String(value)))
                .collect();
            let outcome = service.write_secret(&caller, &path, payload).await?;
            print_json(&outcome)?;
        }
        Command::Secret(SecretCommand::Delete { path }) => {
            service.delete_secret(&caller, &path).await?;
        }
        Command::Options(OptionsCommand::Show) => match service.read_options(&caller)? {
            Some(options) => print_json(&options)?,
            None => anyhow::bail!("No options configured"),
        },
        Command::Options(OptionsCommand::Set(args)) => {
            let record = service.set_options(&caller, &args.into()).await?;
            if !record.persist {
                tracing::warn!("Options are not persisted; they only last for this process");
            }
            print_json(&record)?;
        }
        Command::Options(OptionsCommand::Clear { field }) => {
            service.delete_options(&caller, field.as_deref()).await?;
        }
        Command::Config => {}
    }

    Ok(())
}
