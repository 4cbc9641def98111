//! Launcher script and help command rendering and installation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::output::{ArtifactRecord, StepOutcome};
use crate::paths::Layout;
use crate::permissions;
use crate::utils::command::Runner;
use crate::utils::io;
use crate::utils::shell;
use crate::utils::template::{self, TemplateVars};

pub const LAUNCHER_TEMPLATE: &str = include_str!("templates/launcher.sh.tmpl");
pub const HELP_TEMPLATE: &str = include_str!("templates/help.sh.tmpl");

/// A fully resolved output file, ready to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: &'static str,
    pub path: PathBuf,
    pub contents: String,
    pub mode: u32,
    /// Account to chown to; `None` keeps root ownership.
    pub owner: Option<String>,
}

impl Artifact {
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(self.contents.as_bytes()))
    }
}

/// Engine arguments derived from the context, in a fixed order.
pub fn engine_args(ctx: &ProvisionContext) -> Result<Vec<String>> {
    let mut args = vec![
        "--gpu-memory-utilization".to_string(),
        ctx.require(ContextKey::GpuMemoryUtilization)?.to_string(),
        "--tensor-parallel-size".to_string(),
        ctx.require(ContextKey::TensorParallelSize)?.to_string(),
        "--dtype".to_string(),
        ctx.require(ContextKey::Dtype)?.to_string(),
    ];
    if let Some(max_len) = ctx.get(ContextKey::MaxModelLen) {
        args.push("--max-model-len".to_string());
        args.push(max_len.to_string());
    }
    Ok(args)
}

fn path_str(path: &std::path::Path) -> String {
    path.display().to_string()
}

pub fn render_launcher(ctx: &ProvisionContext, layout: &Layout) -> Result<Artifact> {
    let engine_args = shell::quote_args(&engine_args(ctx)?);
    let launcher = path_str(&layout.launcher);
    let venv = shell::quote_arg(&path_str(&layout.venv));
    let cache = shell::quote_arg(&path_str(&layout.cache));
    let host = shell::quote_arg(ctx.require(ContextKey::Host)?);

    let contents = template::render(
        "launcher",
        LAUNCHER_TEMPLATE,
        &[
            (TemplateVars::LAUNCHER_PATH, &launcher),
            (TemplateVars::VENV_DIR, &venv),
            (TemplateVars::CACHE_DIR, &cache),
            (TemplateVars::HOST, &host),
            (TemplateVars::PORT, ctx.require(ContextKey::Port)?),
            (TemplateVars::ENGINE_ARGS, &engine_args),
        ],
    )?;

    Ok(Artifact {
        name: "launcher",
        path: layout.launcher.clone(),
        contents,
        mode: 0o755,
        owner: Some(ctx.require(ContextKey::Account)?.to_string()),
    })
}

pub fn render_help(ctx: &ProvisionContext, layout: &Layout, defaults: &Defaults) -> Result<Artifact> {
    let contents = template::render(
        "help",
        HELP_TEMPLATE,
        &[
            (TemplateVars::SERVICE_NAME, &defaults.service.name),
            (TemplateVars::PORT, ctx.require(ContextKey::Port)?),
            (TemplateVars::ACCOUNT, ctx.require(ContextKey::Account)?),
            (TemplateVars::LAUNCHER_PATH, &path_str(&layout.launcher)),
            (TemplateVars::INSTALL_ROOT, &path_str(&layout.install_root)),
            (TemplateVars::VENV_DIR, &path_str(&layout.venv)),
            (TemplateVars::CACHE_DIR, &path_str(&layout.cache)),
            (TemplateVars::UNIT_PATH, &path_str(&layout.unit_file)),
            (TemplateVars::ENV_FILE, &path_str(&layout.env_file)),
        ],
    )?;

    Ok(Artifact {
        name: "help",
        path: layout.help_command.clone(),
        contents,
        mode: 0o755,
        owner: None,
    })
}

/// Write an artifact unless identical content is already in place, then
/// reapply its mode and ownership.
pub fn install(runner: &dyn Runner, artifact: &Artifact) -> Result<ArtifactRecord> {
    let operation = format!("install {}", artifact.path.display());
    let outcome = match io::read_optional(&artifact.path, &operation)? {
        Some(existing) if existing == artifact.contents => StepOutcome::Present,
        Some(_) => StepOutcome::Updated,
        None => StepOutcome::Created,
    };

    if outcome == StepOutcome::Present {
        fs::set_permissions(&artifact.path, fs::Permissions::from_mode(artifact.mode))
            .map_err(|e| Error::internal_io(e.to_string(), Some(operation.clone())))?;
    } else {
        io::write_file_atomic(&artifact.path, &artifact.contents, artifact.mode, &operation)?;
    }

    if let Some(owner) = &artifact.owner {
        permissions::chown(runner, owner, &artifact.path)?;
    }

    log_status!("artifact", "{} {:?}: {}", artifact.name, outcome, artifact.path.display());

    Ok(ArtifactRecord {
        name: artifact.name.to_string(),
        path: path_str(&artifact.path),
        sha256: artifact.digest(),
        outcome,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactsReport {
    pub launcher: ArtifactRecord,
    pub help: ArtifactRecord,
}

/// Render and install the launcher and help command.
pub fn generate(
    ctx: &ProvisionContext,
    runner: &dyn Runner,
    defaults: &Defaults,
) -> Result<ArtifactsReport> {
    let layout = Layout::resolve(ctx, defaults)?;
    let launcher = render_launcher(ctx, &layout)?;
    let help = render_help(ctx, &layout, defaults)?;

    Ok(ArtifactsReport {
        launcher: install(runner, &launcher)?,
        help: install(runner, &help)?,
    })
}
