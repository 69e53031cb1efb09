//! Configuration management commands.

use clap::Args;
use jwsapi_core::{paths, ClientConfig};
use serde_json::Value;
use std::path::Path;

/// Config command arguments.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (dot-separated path, e.g. queues.events)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set (parsed as JSON, falling back to a string)
        value: String,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// Run the config command against `file`, or the default location.
pub async fn run(args: ConfigArgs, file: Option<&Path>) -> anyhow::Result<()> {
    let path = match file {
        Some(path) => path.to_path_buf(),
        None => paths::config_file()?,
    };

    match args.command {
        ConfigCommand::Show => {
            let config = load_or_default(&path)?;
            println!("{}", config.to_json5()?);
        }

        ConfigCommand::Get { key } => {
            let json = serde_json::to_value(load_or_default(&path)?)?;
            match get_path(&json, &key) {
                Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }

        ConfigCommand::Set { key, value } => {
            let updated = set_path(&load_or_default(&path)?, &key, &value)?;
            updated.validate()?;
            updated.save(&path)?;
            println!("Set {} = {}", key, value);
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {:?}. Use --force to overwrite.",
                    path
                );
            }
            ClientConfig::default().save(&path)?;
            println!("Created config file: {:?}", path);
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Validate => match ClientConfig::load(&path) {
            Ok(config) => match config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => anyhow::bail!("Configuration error: {}", e),
            },
            Err(e) => anyhow::bail!("Failed to load config: {}", e),
        },
    }

    Ok(())
}

fn load_or_default(path: &Path) -> anyhow::Result<ClientConfig> {
    if path.exists() {
        Ok(ClientConfig::load(path)?)
    } else {
        Ok(ClientConfig::default())
    }
}

/// Walk a dot-separated key path.
pub fn get_path<'a>(json: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(json, |acc, k| acc.get(k))
}

/// Return `config` with the value at `key` replaced. The value is parsed as
/// JSON first so numbers and booleans keep their type.
pub fn set_path(config: &ClientConfig, key: &str, value: &str) -> anyhow::Result<ClientConfig> {
    let mut json = serde_json::to_value(config)?;

    let parts: Vec<&str> = key.split('.').collect();
    let mut current = &mut json;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            let parsed: Value =
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            current[part] = parsed;
        } else {
            if !current.get(part).is_some_and(Value::is_object) {
                current[part] = serde_json::json!({});
            }
            current = &mut current[part];
        }
    }

    serde_json::from_value(json)
        .map_err(|e| anyhow::anyhow!("Invalid configuration after set: {}", e))
}
