use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use vllm_provision::defaults::{self, Defaults, ProvisionConfig};

use super::CmdResult;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display configuration (merged defaults + file)
    Show {
        /// Show only built-in defaults (ignore config.json)
        #[arg(long)]
        builtin: bool,
    },
    /// Set a configuration value at a JSON pointer path
    Set {
        /// JSON pointer path (e.g., /defaults/server/port)
        pointer: String,
        /// Value to set (JSON; bare words are taken as strings)
        value: String,
    },
    /// Reset configuration to built-in defaults (deletes config.json)
    Reset,
    /// Show the path to config.json
    Path,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ProvisionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defaults: Option<Defaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

impl ConfigOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            config: None,
            defaults: None,
            path: None,
            exists: None,
            pointer: None,
            value: None,
            deleted: None,
        }
    }
}

pub fn run(args: ConfigArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show { builtin } => show(builtin),
        ConfigCommand::Set { pointer, value } => set(&pointer, &value),
        ConfigCommand::Reset => reset(),
        ConfigCommand::Path => path(),
    }
}

fn show(builtin: bool) -> CmdResult<ConfigOutput> {
    let mut output = ConfigOutput::new("config.show");
    if builtin {
        output.defaults = Some(defaults::builtin_defaults());
    } else {
        output.config = Some(defaults::load_config()?);
    }
    Ok((output, 0))
}

fn set(pointer: &str, value_str: &str) -> CmdResult<ConfigOutput> {
    let value: Value =
        serde_json::from_str(value_str).unwrap_or_else(|_| Value::String(value_str.to_string()));

    let config = defaults::load_config()?;
    let config = defaults::set_value(&config, pointer, value.clone())?;
    defaults::save_config(&config)?;

    let mut output = ConfigOutput::new("config.set");
    output.config = Some(config);
    output.pointer = Some(pointer.to_string());
    output.value = Some(value);
    Ok((output, 0))
}

fn reset() -> CmdResult<ConfigOutput> {
    let deleted = defaults::reset_config()?;

    let mut output = ConfigOutput::new("config.reset");
    output.defaults = Some(defaults::builtin_defaults());
    output.path = Some(defaults::config_path());
    output.deleted = Some(deleted);
    Ok((output, 0))
}

fn path() -> CmdResult<ConfigOutput> {
    let mut output = ConfigOutput::new("config.path");
    output.path = Some(defaults::config_path());
    output.exists = Some(defaults::config_exists());
    Ok((output, 0))
}
