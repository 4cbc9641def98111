//! Boot-time service registration and model-source selection.
//!
//! The model source is chosen through a small state machine. Each transition
//! is a function of the current state, one line of input and a directory
//! probe, so the interactive loop is testable without a terminal.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifact::{self, Artifact};
use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::output::{ArtifactRecord, StepOutcome};
use crate::paths::Layout;
use crate::permissions;
use crate::prompt::{self, Prompter};
use crate::utils::command::{Invocation, Runner};
use crate::utils::io;
use crate::utils::shell;
use crate::utils::template::{self, TemplateVars};

pub const UNIT_TEMPLATE: &str = include_str!("templates/vllm.service.tmpl");

/// Flag added to the launch command when serving from a local directory.
pub const LOCAL_SOURCE_FLAG: &str = "--disable-log-stats";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reference", rename_all = "snake_case")]
pub enum ModelSource {
    HuggingFace(String),
    LocalPath(PathBuf),
}

impl ModelSource {
    pub fn model_ref(&self) -> String {
        match self {
            ModelSource::HuggingFace(id) => id.clone(),
            ModelSource::LocalPath(path) => path.display().to_string(),
        }
    }

    pub fn extra_flags(&self) -> Vec<String> {
        match self {
            ModelSource::HuggingFace(_) => Vec::new(),
            ModelSource::LocalPath(_) => vec![LOCAL_SOURCE_FLAG.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    AwaitingSourceType,
    AwaitingHfIdentifier,
    AwaitingLocalPath,
    Resolved(ModelSource),
}

impl SourceState {
    pub fn question(&self) -> Option<&'static str> {
        match self {
            SourceState::AwaitingSourceType => Some("Model source (hf/local): "),
            SourceState::AwaitingHfIdentifier => Some("Hugging Face model id (e.g. Qwen/Qwen2.5-7B-Instruct): "),
            SourceState::AwaitingLocalPath => Some("Local model directory: "),
            SourceState::Resolved(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SourceState,
    /// Shown to the operator when the input was rejected.
    pub notice: Option<String>,
}

impl Transition {
    fn to(state: SourceState) -> Self {
        Self { state, notice: None }
    }

    fn stay(state: SourceState, notice: impl Into<String>) -> Self {
        Self {
            state,
            notice: Some(notice.into()),
        }
    }
}

/// Advance the source-selection machine by one input line.
///
/// `resolve_dir` maps raw operator input to an existing directory, or `None`.
pub fn advance(
    state: SourceState,
    input: &str,
    resolve_dir: &dyn Fn(&str) -> Option<PathBuf>,
) -> Transition {
    let input = input.trim();
    match state {
        SourceState::AwaitingSourceType => match input.to_ascii_lowercase().as_str() {
            "hf" | "huggingface" | "h" => Transition::to(SourceState::AwaitingHfIdentifier),
            "local" | "path" | "l" => Transition::to(SourceState::AwaitingLocalPath),
            _ => Transition::stay(state, "Answer 'hf' or 'local'"),
        },
        SourceState::AwaitingHfIdentifier => {
            if input.is_empty() {
                Transition::stay(state, "A model id is required")
            } else {
                Transition::to(SourceState::Resolved(ModelSource::HuggingFace(
                    input.to_string(),
                )))
            }
        }
        SourceState::AwaitingLocalPath => {
            if input.is_empty() {
                return Transition::stay(state, "A directory is required");
            }
            match resolve_dir(input) {
                Some(dir) => Transition::to(SourceState::Resolved(ModelSource::LocalPath(dir))),
                None => Transition::stay(state, format!("Not an existing directory: {}", input)),
            }
        }
        SourceState::Resolved(_) => Transition::to(state),
    }
}

/// Expand `~` and environment variables, then canonicalize to an existing directory.
pub fn existing_dir(input: &str) -> Option<PathBuf> {
    let expanded = shellexpand::full(input).ok()?;
    let path = Path::new(expanded.as_ref()).canonicalize().ok()?;
    path.is_dir().then_some(path)
}

/// Ask until the operator names a usable model source.
pub fn select_model_source(prompter: &mut dyn Prompter) -> Result<ModelSource> {
    let mut state = SourceState::AwaitingSourceType;
    loop {
        let question = match &state {
            SourceState::Resolved(source) => return Ok(source.clone()),
            other => other.question().unwrap_or_default(),
        };
        let answer = prompter.ask(question)?;
        let transition = advance(state, &answer, &existing_dir);
        if let Some(notice) = &transition.notice {
            prompter.notify(notice);
        }
        state = transition.state;
    }
}

/// Drive the machine with fixed inputs. Anything short of `Resolved` fails.
pub fn resolve_model_source(
    inputs: &[&str],
    resolve_dir: &dyn Fn(&str) -> Option<PathBuf>,
) -> Result<ModelSource> {
    let mut state = SourceState::AwaitingSourceType;
    for input in inputs {
        let transition = advance(state, input, resolve_dir);
        if let Some(notice) = transition.notice {
            return Err(Error::validation_invalid_argument(
                "model",
                notice,
                Some(input.to_string()),
                None,
            ));
        }
        state = transition.state;
    }
    match state {
        SourceState::Resolved(source) => Ok(source),
        _ => Err(Error::validation_missing_argument(vec!["model".to_string()])),
    }
}

/// Model source from `--hf-model` / `--local-model`, if either was given.
pub fn source_from_flags(
    hf_model: Option<&str>,
    local_model: Option<&str>,
) -> Result<Option<ModelSource>> {
    match (hf_model, local_model) {
        (Some(_), Some(_)) => Err(Error::validation_invalid_argument(
            "model",
            "--hf-model and --local-model are mutually exclusive",
            None,
            None,
        )),
        (Some(id), None) => resolve_model_source(&["hf", id], &existing_dir).map(Some),
        (None, Some(path)) => resolve_model_source(&["local", path], &existing_dir).map(Some),
        (None, None) => Ok(None),
    }
}

/// The `ExecStart=` command line, one systemd-quoted word per argument.
pub fn exec_start(ctx: &ProvisionContext, layout: &Layout, source: &ModelSource) -> Result<String> {
    let mut words = vec![
        layout.engine_binary().display().to_string(),
        "serve".to_string(),
        source.model_ref(),
        "--host".to_string(),
        ctx.require(ContextKey::Host)?.to_string(),
        "--port".to_string(),
        ctx.require(ContextKey::Port)?.to_string(),
    ];
    words.extend(artifact::engine_args(ctx)?);
    words.extend(source.extra_flags());

    Ok(words
        .iter()
        .map(|w| shell::systemd_quote(w))
        .collect::<Vec<_>>()
        .join(" "))
}

fn unit_path(path: &Path) -> String {
    shell::systemd_escape(&path.display().to_string())
}

pub fn render_unit(
    ctx: &ProvisionContext,
    layout: &Layout,
    defaults: &Defaults,
    source: &ModelSource,
) -> Result<Artifact> {
    let exec = exec_start(ctx, layout, source)?;
    let contents = template::render(
        "service",
        UNIT_TEMPLATE,
        &[
            (TemplateVars::ACCOUNT, ctx.require(ContextKey::Account)?),
            (TemplateVars::INSTALL_ROOT, &unit_path(&layout.install_root)),
            (TemplateVars::CACHE_DIR, &unit_path(&layout.cache)),
            (TemplateVars::ENV_FILE, &unit_path(&layout.env_file)),
            (TemplateVars::EXEC_START, &exec),
            (TemplateVars::RESTART_SEC, &defaults.service.restart_sec.to_string()),
        ],
    )?;

    Ok(Artifact {
        name: "service",
        path: layout.unit_file.clone(),
        contents,
        mode: 0o644,
        owner: None,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReport {
    pub name: String,
    pub unit: ArtifactRecord,
    pub source: ModelSource,
    pub extra_flags: Vec<String>,
    /// Whether the model directory was opened to all accounts.
    pub world_readable: bool,
    /// False when the operator kept a differing unit, so `source` is not what it runs.
    pub applied: bool,
    /// `systemctl is-enabled` right after registration.
    pub enabled: String,
    /// `systemctl is-active` right after registration.
    pub active: String,
}

fn systemctl(runner: &dyn Runner, args: &[&str]) -> Result<()> {
    let inv = Invocation::new("systemctl", args);
    let output = runner.run(&inv)?;
    if output.success {
        return Ok(());
    }
    Err(Error::service_registration_failed(format!(
        "{} exited with {}: {}",
        inv.display(),
        output.exit_code,
        output.error_text()
    )))
}

fn systemctl_query(runner: &dyn Runner, verb: &str, name: &str) -> Result<String> {
    // Non-zero exits are normal here (disabled, inactive); only stdout matters.
    let output = runner.run(&Invocation::new("systemctl", &[verb, name]))?;
    let state = output.stdout.trim();
    Ok(if state.is_empty() {
        "unknown".to_string()
    } else {
        state.to_string()
    })
}

/// Install the unit file, asking before replacing a different existing one.
fn install_unit(
    runner: &dyn Runner,
    prompter: &mut dyn Prompter,
    unit: &Artifact,
    assume_yes: bool,
) -> Result<ArtifactRecord> {
    let existing = io::read_optional(&unit.path, "read existing unit")?;
    let replace = match &existing {
        Some(current) if *current != unit.contents => {
            assume_yes
                || prompt::confirm(
                    prompter,
                    &format!("{} differs from the generated unit. Replace it?", unit.path.display()),
                )?
        }
        _ => true,
    };

    if replace {
        return artifact::install(runner, unit);
    }

    log_status!("service", "Keeping existing {}", unit.path.display());
    let kept = Artifact {
        contents: existing.unwrap_or_default(),
        ..unit.clone()
    };
    Ok(ArtifactRecord {
        name: kept.name.to_string(),
        path: kept.path.display().to_string(),
        sha256: kept.digest(),
        outcome: StepOutcome::Kept,
    })
}

/// Write the unit, reload systemd and enable the service. Never starts it.
pub fn register_service(
    ctx: &mut ProvisionContext,
    runner: &dyn Runner,
    prompter: &mut dyn Prompter,
    defaults: &Defaults,
    source: &ModelSource,
    assume_yes: bool,
) -> Result<ServiceReport> {
    let layout = Layout::resolve(ctx, defaults)?;
    let name = defaults.service.name.as_str();

    let world_readable = match source {
        ModelSource::LocalPath(path) => {
            log_status!("service", "Granting read access on {} to all accounts", path.display());
            permissions::grant_world_read(runner, path)?;
            true
        }
        ModelSource::HuggingFace(_) => false,
    };

    let unit = render_unit(ctx, &layout, defaults, source)?;
    let record = install_unit(runner, prompter, &unit, assume_yes)?;

    systemctl(runner, &["daemon-reload"])?;
    systemctl(runner, &["enable", name])?;

    let enabled = systemctl_query(runner, "is-enabled", name)?;
    let active = systemctl_query(runner, "is-active", name)?;
    log_status!("service", "{}: {}, {}", name, enabled, active);

    // A kept unit serves whatever it already names.
    let applied = record.outcome != StepOutcome::Kept;
    if applied {
        ctx.set(ContextKey::ModelRef, source.model_ref())?;
        ctx.set(ContextKey::ExtraFlags, source.extra_flags().join(" "))?;
    }

    Ok(ServiceReport {
        name: name.to_string(),
        unit: record,
        source: source.clone(),
        extra_flags: source.extra_flags(),
        world_readable,
        applied,
        enabled,
        active,
    })
}
