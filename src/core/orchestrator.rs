//! Stage ordering, context contracts and fail-fast execution.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::artifact;
use crate::collect::{self, Overrides};
use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::deps::{self, Downloader};
use crate::error::{Error, Result};
use crate::paths::Layout;
use crate::prereq::{self, HostProbe};
use crate::prompt::{self, Prompter};
use crate::provision::{self, ProvisionOptions};
use crate::service::{self, ModelSource};
use crate::utils::command::Runner;

/// Host capabilities and operator input handed to every stage.
pub struct Toolkit<'a> {
    pub runner: &'a dyn Runner,
    pub probe: &'a dyn HostProbe,
    pub downloader: &'a dyn Downloader,
    pub prompter: &'a mut dyn Prompter,
    pub defaults: &'a Defaults,
}

/// One idempotent unit of the provisioning pipeline.
///
/// `reads` must all be written by stages ordered earlier; a key may be
/// written by at most one stage.
pub trait Stage {
    fn id(&self) -> &'static str;
    fn label(&self) -> &'static str;

    fn needs(&self) -> &[&'static str] {
        &[]
    }

    fn reads(&self) -> &[ContextKey] {
        &[]
    }

    fn writes(&self) -> &[ContextKey] {
        &[]
    }

    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value>;
}

fn to_data<T: Serialize>(value: &T, what: &str) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::internal_json(e.to_string(), Some(format!("{} output", what))))
}

const LAYOUT_KEYS: &[ContextKey] = &[
    ContextKey::Account,
    ContextKey::InstallRoot,
    ContextKey::VenvDir,
    ContextKey::CacheDir,
];

const ENGINE_KEYS: &[ContextKey] = &[
    ContextKey::Account,
    ContextKey::InstallRoot,
    ContextKey::VenvDir,
    ContextKey::CacheDir,
    ContextKey::Host,
    ContextKey::Port,
    ContextKey::GpuMemoryUtilization,
    ContextKey::TensorParallelSize,
    ContextKey::MaxModelLen,
    ContextKey::Dtype,
    ContextKey::EngineVersion,
];

pub struct PrereqStage;

impl Stage for PrereqStage {
    fn id(&self) -> &'static str {
        "prereq"
    }
    fn label(&self) -> &'static str {
        "Check host prerequisites"
    }
    fn writes(&self) -> &[ContextKey] {
        &[ContextKey::ComputeCapability]
    }
    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let caps = prereq::check_prerequisites(kit.probe, &kit.defaults.prereq)?;
        ctx.set(ContextKey::ComputeCapability, caps.compute_capability.clone())?;
        to_data(&caps, "prereq")
    }
}

pub struct ConfigureStage {
    pub overrides: Overrides,
    pub interactive: bool,
}

impl Stage for ConfigureStage {
    fn id(&self) -> &'static str {
        "configure"
    }
    fn label(&self) -> &'static str {
        "Collect server configuration"
    }
    fn needs(&self) -> &[&'static str] {
        &["prereq"]
    }
    fn writes(&self) -> &[ContextKey] {
        &[
            ContextKey::Account,
            ContextKey::InstallRoot,
            ContextKey::VenvDir,
            ContextKey::CacheDir,
            ContextKey::Host,
            ContextKey::Port,
            ContextKey::GpuMemoryUtilization,
            ContextKey::TensorParallelSize,
            ContextKey::MaxModelLen,
            ContextKey::Dtype,
        ]
    }
    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let input: Option<&mut dyn Prompter> = if self.interactive {
            Some(&mut *kit.prompter)
        } else {
            None
        };
        collect::collect_into(ctx, kit.defaults, &self.overrides, input)?;
        let written: BTreeMap<&str, &str> = self
            .writes()
            .iter()
            .filter_map(|key| ctx.get(*key).map(|value| (key.as_str(), value)))
            .collect();
        to_data(&written, "configure")
    }
}

pub struct DependenciesStage;

impl Stage for DependenciesStage {
    fn id(&self) -> &'static str {
        "dependencies"
    }
    fn label(&self) -> &'static str {
        "Install system packages and uv"
    }
    fn needs(&self) -> &[&'static str] {
        &["configure"]
    }
    fn run(&self, _ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let report = deps::ensure_dependencies(kit.runner, kit.downloader, kit.defaults)?;
        to_data(&report, "dependencies")
    }
}

pub struct ProvisionStage {
    pub options: ProvisionOptions,
}

impl Stage for ProvisionStage {
    fn id(&self) -> &'static str {
        "provision"
    }
    fn label(&self) -> &'static str {
        "Provision account, environment and engine"
    }
    fn needs(&self) -> &[&'static str] {
        &["configure", "dependencies"]
    }
    fn reads(&self) -> &[ContextKey] {
        LAYOUT_KEYS
    }
    fn writes(&self) -> &[ContextKey] {
        &[ContextKey::PythonVersion, ContextKey::EngineVersion]
    }
    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let report = provision::provision(ctx, kit.runner, kit.defaults, self.options)?;
        to_data(&report, "provision")
    }
}

pub struct ArtifactsStage;

impl Stage for ArtifactsStage {
    fn id(&self) -> &'static str {
        "artifacts"
    }
    fn label(&self) -> &'static str {
        "Generate launcher and help command"
    }
    fn needs(&self) -> &[&'static str] {
        &["provision"]
    }
    fn reads(&self) -> &[ContextKey] {
        ENGINE_KEYS
    }
    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let report = artifact::generate(ctx, kit.runner, kit.defaults)?;
        to_data(&report, "artifacts")
    }
}

/// Whether to register the boot-time service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceChoice {
    Register,
    Skip,
    /// Ask the operator; treated as `Skip` when prompts are disabled.
    #[default]
    Ask,
}

pub struct ServiceStage {
    pub choice: ServiceChoice,
    pub source: Option<ModelSource>,
    pub assume_yes: bool,
}

impl Stage for ServiceStage {
    fn id(&self) -> &'static str {
        "service"
    }
    fn label(&self) -> &'static str {
        "Register boot-time service"
    }
    fn needs(&self) -> &[&'static str] {
        &["artifacts"]
    }
    fn reads(&self) -> &[ContextKey] {
        ENGINE_KEYS
    }
    fn writes(&self) -> &[ContextKey] {
        &[ContextKey::ModelRef, ContextKey::ExtraFlags]
    }
    fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Value> {
        let register = match self.choice {
            ServiceChoice::Register => true,
            ServiceChoice::Skip => false,
            ServiceChoice::Ask if self.assume_yes => false,
            ServiceChoice::Ask => prompt::confirm(
                kit.prompter,
                &format!("Register {} as a boot-time service?", kit.defaults.service.name),
            )?,
        };
        if !register {
            return Ok(serde_json::json!({ "registered": false }));
        }

        let source = match &self.source {
            Some(source) => source.clone(),
            None => service::select_model_source(kit.prompter)?,
        };
        let report = service::register_service(
            ctx,
            kit.runner,
            kit.prompter,
            kit.defaults,
            &source,
            self.assume_yes,
        )?;
        to_data(&report, "service")
    }
}

/// Order stages by `needs` (Kahn's algorithm, stable for independent stages).
pub fn order_stages(stages: Vec<Box<dyn Stage>>) -> Result<Vec<Box<dyn Stage>>> {
    let mut id_index = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if id_index.insert(stage.id(), idx).is_some() {
            return Err(Error::validation_invalid_argument(
                "stages",
                format!("Duplicate stage id '{}'", stage.id()),
                None,
                None,
            ));
        }
    }

    let mut indegree = vec![0usize; stages.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
    for (idx, stage) in stages.iter().enumerate() {
        for need in stage.needs() {
            let Some(&parent) = id_index.get(need) else {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!("Stage '{}' depends on unknown stage '{}'", stage.id(), need),
                    None,
                    None,
                ));
            };
            indegree[idx] += 1;
            dependents[parent].push(idx);
        }
    }

    let mut queue: VecDeque<usize> = (0..stages.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(stages.len());
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != stages.len() {
        let pending = stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, stage)| stage.id().to_string())
            .collect();
        return Err(Error::validation_invalid_argument(
            "stages",
            "Stages contain a cycle",
            None,
            Some(pending),
        ));
    }

    let mut slots: Vec<Option<Box<dyn Stage>>> = stages.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|idx| slots[idx].take()).collect())
}

/// Check declared context contracts over an ordered stage list.
pub fn validate_contracts(stages: &[Box<dyn Stage>]) -> Result<()> {
    let mut writers: HashMap<ContextKey, &'static str> = HashMap::new();
    for stage in stages {
        for key in stage.reads() {
            if !writers.contains_key(key) {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!(
                        "Stage '{}' reads '{}' before any stage writes it",
                        stage.id(),
                        key.as_str()
                    ),
                    Some(stage.id().to_string()),
                    None,
                ));
            }
        }
        for key in stage.writes() {
            if let Some(previous) = writers.insert(*key, stage.id()) {
                return Err(Error::validation_invalid_argument(
                    "stages",
                    format!(
                        "Context key '{}' is written by both '{}' and '{}'",
                        key.as_str(),
                        previous,
                        stage.id()
                    ),
                    Some(stage.id().to_string()),
                    None,
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub id: String,
    pub label: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub stages: Vec<StageReport>,
    pub context: ProvisionContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    /// Order the stages and verify their context contracts before anything runs.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let stages = order_stages(stages)?;
        validate_contracts(&stages)?;
        Ok(Self { stages })
    }

    pub fn plan(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    /// Run every stage in order. The first failure aborts the run; nothing
    /// already applied is rolled back.
    pub fn run(&self, ctx: &mut ProvisionContext, kit: &mut Toolkit<'_>) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            log_status!("install", "{}...", stage.label());
            let before: BTreeSet<ContextKey> = ctx.keys().collect();

            let data = stage.run(ctx, kit).map_err(|err| {
                log_status!("install", "Stage '{}' failed: {}", stage.id(), err.message);
                err.with_hint(format!(
                    "Failed in stage '{}'. Re-running skips completed work.",
                    stage.id()
                ))
            })?;

            if let Some(key) = ctx
                .keys()
                .find(|key| !before.contains(key) && !stage.writes().contains(key))
            {
                return Err(Error::internal_unexpected(format!(
                    "stage '{}' wrote undeclared context key '{}'",
                    stage.id(),
                    key.as_str()
                )));
            }

            reports.push(StageReport {
                id: stage.id().to_string(),
                label: stage.label().to_string(),
                data,
            });
        }
        Ok(reports)
    }
}

/// Flags for a full `install` run.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub overrides: Overrides,
    /// Skip every prompt: defaults apply, replacements are confirmed.
    pub assume_yes: bool,
    pub upgrade: bool,
    pub service: ServiceChoice,
    pub source: Option<ModelSource>,
}

pub fn install_stages(options: &InstallOptions) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(PrereqStage),
        Box::new(ConfigureStage {
            overrides: options.overrides.clone(),
            interactive: !options.assume_yes,
        }),
        Box::new(DependenciesStage),
        Box::new(ProvisionStage {
            options: ProvisionOptions {
                upgrade: options.upgrade,
            },
        }),
        Box::new(ArtifactsStage),
        Box::new(ServiceStage {
            choice: options.service,
            source: options.source.clone(),
            assume_yes: options.assume_yes,
        }),
    ]
}

fn next_actions(ctx: &ProvisionContext, defaults: &Defaults) -> Result<Vec<String>> {
    let layout = Layout::resolve(ctx, defaults)?;
    let account = ctx.require(ContextKey::Account)?;
    let name = &defaults.service.name;

    let mut actions = Vec::new();
    if ctx.contains(ContextKey::ModelRef) {
        actions.push(format!("sudo systemctl start {}", name));
        actions.push(format!("journalctl -u {} -f", name));
    }
    actions.push(format!(
        "sudo -u {} {} <model> [extra engine args...]",
        account,
        layout.launcher.display()
    ));
    actions.push(layout.help_command.display().to_string());
    Ok(actions)
}

/// Run the full provisioning pipeline.
pub fn install(options: &InstallOptions, kit: &mut Toolkit<'_>) -> Result<RunSummary> {
    if options.assume_yes && options.service == ServiceChoice::Register && options.source.is_none() {
        return Err(Error::validation_missing_argument(vec![
            "--hf-model or --local-model".to_string(),
        ])
        .with_hint("--service with --yes needs the model source on the command line"));
    }

    let orchestrator = Orchestrator::new(install_stages(options))?;
    log_status!("install", "Stages: {}", orchestrator.plan().join(" -> "));
    let started_at = Utc::now().to_rfc3339();
    let mut ctx = ProvisionContext::new();
    let stages = orchestrator.run(&mut ctx, kit)?;
    let next_actions = next_actions(&ctx, kit.defaults)?;

    Ok(RunSummary {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        stages,
        context: ctx,
        next_actions,
    })
}
