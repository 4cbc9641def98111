//! Gathers runtime parameters into the context.
//!
//! Command-line overrides are applied first and never prompted for. The
//! remaining options are asked interactively (empty answer keeps the
//! default) or defaulted when no prompter is given. Invalid interactive
//! answers are re-asked; invalid overrides are `config.invalid_value`.

use std::path::Path;

use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::paths;
use crate::prompt::{self, Prompter};
use crate::utils::validation;

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub account: Option<String>,
    pub install_root: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub gpu_memory_utilization: Option<String>,
    pub tensor_parallel_size: Option<String>,
    pub max_model_len: Option<String>,
    pub dtype: Option<String>,
}

type Parser = fn(&str) -> std::result::Result<String, String>;

struct EngineOption {
    key: ContextKey,
    label: &'static str,
    default: String,
    parse: Parser,
    supplied: Option<String>,
}

/// `auto` or empty leaves the engine to detect the length.
fn parse_max_len(value: &str) -> std::result::Result<String, String> {
    if value.trim().is_empty() || value.trim().eq_ignore_ascii_case("auto") {
        Ok(String::new())
    } else {
        validation::parse_positive_int(value)
    }
}

fn engine_options(defaults: &Defaults, overrides: &Overrides) -> Vec<EngineOption> {
    let server = &defaults.server;
    vec![
        EngineOption {
            key: ContextKey::Host,
            label: "Bind host",
            default: server.host.clone(),
            parse: validation::parse_word,
            supplied: overrides.host.clone(),
        },
        EngineOption {
            key: ContextKey::Port,
            label: "Bind port",
            default: server.port.to_string(),
            parse: validation::parse_port,
            supplied: overrides.port.clone(),
        },
        EngineOption {
            key: ContextKey::GpuMemoryUtilization,
            label: "GPU memory utilization (0-1]",
            default: server.gpu_memory_utilization_display(),
            parse: validation::parse_fraction,
            supplied: overrides.gpu_memory_utilization.clone(),
        },
        EngineOption {
            key: ContextKey::TensorParallelSize,
            label: "Tensor parallel size",
            default: server.tensor_parallel_size.to_string(),
            parse: validation::parse_positive_int,
            supplied: overrides.tensor_parallel_size.clone(),
        },
        EngineOption {
            key: ContextKey::MaxModelLen,
            label: "Max model length",
            default: server
                .max_model_len
                .map(|n| n.to_string())
                .unwrap_or_default(),
            parse: parse_max_len,
            supplied: overrides.max_model_len.clone(),
        },
        EngineOption {
            key: ContextKey::Dtype,
            label: "Dtype",
            default: server.dtype.clone(),
            parse: validation::parse_word,
            supplied: overrides.dtype.clone(),
        },
    ]
}

fn parse_override(key: ContextKey, value: &str, parse: Parser) -> Result<String> {
    parse(value).map_err(|problem| {
        Error::config_invalid_value(key.as_str(), Some(value.to_string()), problem)
    })
}

fn ask_until_valid(prompter: &mut dyn Prompter, option: &EngineOption) -> Result<String> {
    loop {
        let answer = prompt::ask_with_default(prompter, option.label, &option.default)?;
        match (option.parse)(&answer) {
            Ok(value) => return Ok(value),
            Err(problem) => prompter.notify(&format!("{}; try again", problem)),
        }
    }
}

fn collect_layout(ctx: &mut ProvisionContext, defaults: &Defaults, overrides: &Overrides) -> Result<()> {
    let account = match &overrides.account {
        Some(value) => parse_override(ContextKey::Account, value, validation::parse_word)?,
        None => defaults.account.name.clone(),
    };

    let install_root = overrides
        .install_root
        .clone()
        .unwrap_or_else(|| defaults.account.install_root.clone());
    let install_root = install_root.trim_end_matches('/').to_string();
    if !install_root.starts_with('/') || install_root.is_empty() {
        return Err(Error::config_invalid_value(
            ContextKey::InstallRoot.as_str(),
            Some(install_root),
            "install root must be an absolute path",
        ));
    }
    let root = Path::new(&install_root);

    ctx.set(ContextKey::Account, account)?;
    ctx.set(
        ContextKey::VenvDir,
        paths::venv_dir(root).display().to_string(),
    )?;
    ctx.set(
        ContextKey::CacheDir,
        paths::cache_dir(root).display().to_string(),
    )?;
    ctx.set(ContextKey::InstallRoot, install_root)?;
    Ok(())
}

/// Populate `ctx` with the account, layout and engine options.
///
/// With `input` set to `None`, every un-overridden option takes its default.
pub fn collect_into(
    ctx: &mut ProvisionContext,
    defaults: &Defaults,
    overrides: &Overrides,
    mut input: Option<&mut dyn Prompter>,
) -> Result<()> {
    collect_layout(ctx, defaults, overrides)?;

    for option in engine_options(defaults, overrides) {
        let value = match (&option.supplied, input.as_deref_mut()) {
            (Some(supplied), _) => parse_override(option.key, supplied, option.parse)?,
            (None, Some(prompter)) => ask_until_valid(prompter, &option)?,
            (None, None) => (option.parse)(&option.default).map_err(|problem| {
                Error::config_invalid_value(option.key.as_str(), Some(option.default.clone()), problem)
            })?,
        };

        // An empty value means "unset": the engine decides.
        if !value.is_empty() {
            ctx.set(option.key, value)?;
        }
    }

    Ok(())
}

pub fn collect(
    defaults: &Defaults,
    overrides: &Overrides,
    input: Option<&mut dyn Prompter>,
) -> Result<ProvisionContext> {
    let mut ctx = ProvisionContext::new();
    collect_into(&mut ctx, defaults, overrides, input)?;
    Ok(ctx)
}
