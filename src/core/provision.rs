//! Service account, directory layout, runtime environment and engine install.

use serde::Serialize;

use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::deps;
use crate::error::{Error, Result};
use crate::output::{StepOutcome, StepRecord};
use crate::paths::Layout;
use crate::permissions;
use crate::utils::command::{run_as, run_checked, Invocation, Runner};
use crate::utils::io;

const VERSION_QUERY: &str = "import vllm; print(vllm.__version__)";
const PYTHON_VERSION_QUERY: &str =
    "import sys; print('.'.join(map(str, sys.version_info[:3])))";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub steps: Vec<StepRecord>,
    pub python_version: String,
    pub engine_version: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisionOptions {
    /// Reinstall the engine package even when a version is already present.
    pub upgrade: bool,
}

fn account_exists(runner: &dyn Runner, account: &str) -> Result<bool> {
    Ok(runner.run(&Invocation::new("id", &["-u", account]))?.success)
}

fn ensure_account(runner: &dyn Runner, layout: &Layout, account: &str) -> Result<StepRecord> {
    if account_exists(runner, account)? {
        return Ok(StepRecord::new("account", StepOutcome::Present).with_detail(account));
    }

    log_status!("provision", "Creating system account {}", account);
    run_checked(
        runner,
        &Invocation::new("useradd", &["--system", "--home-dir"])
            .arg(layout.install_root.display().to_string())
            .args(["--create-home", "--shell", "/usr/sbin/nologin"])
            .arg(account),
    )?;
    Ok(StepRecord::new("account", StepOutcome::Created).with_detail(account))
}

/// Create missing directories, then reapply ownership on every run.
fn ensure_layout(runner: &dyn Runner, layout: &Layout, account: &str) -> Result<StepRecord> {
    let mut created = Vec::new();
    for dir in [&layout.install_root, &layout.cache] {
        if io::ensure_dir(dir, "create install layout")? {
            created.push(dir.display().to_string());
        }
    }
    if let Some(parent) = layout.venv.parent() {
        if io::ensure_dir(parent, "create install layout")? {
            created.push(parent.display().to_string());
        }
    }

    permissions::chown_recursive(runner, account, &layout.install_root)?;

    let record = if created.is_empty() {
        StepRecord::new("layout", StepOutcome::Repaired)
    } else {
        StepRecord::new("layout", StepOutcome::Created).with_detail(created.join(" "))
    };
    Ok(record)
}

/// First supported interpreter found on the host, newest first.
fn find_host_python(runner: &dyn Runner, account: &str, candidates: &[String]) -> Result<Option<String>> {
    for version in candidates {
        let probe = format!("command -v python{}", version);
        let output = run_as(runner, account, "sh", &["-c", &probe])?;
        if output.success && !output.stdout.trim().is_empty() {
            return Ok(Some(version.clone()));
        }
    }
    Ok(None)
}

fn uv_invocation(defaults: &Defaults, account: &str, args: &[&str]) -> Invocation {
    Invocation::new(deps::uv_binary(defaults).display().to_string(), args).as_user(account)
}

fn ensure_venv(
    runner: &dyn Runner,
    defaults: &Defaults,
    layout: &Layout,
    account: &str,
) -> Result<StepRecord> {
    if layout.python().exists() {
        return Ok(StepRecord::new("venv", StepOutcome::Present));
    }

    let candidates = &defaults.runtime.python_candidates;
    let (selection, managed) = match find_host_python(runner, account, candidates)? {
        Some(version) => (version, false),
        None => {
            let newest = candidates.first().cloned().ok_or_else(|| {
                Error::config_invalid_value("runtime.python_candidates", None, "must not be empty")
            })?;
            (newest, true)
        }
    };

    log_status!(
        "provision",
        "Creating environment at {} with Python {}{}",
        layout.venv.display(),
        selection,
        if managed { " (uv-managed)" } else { "" }
    );

    let venv = layout.venv.display().to_string();
    let mut inv = uv_invocation(defaults, account, &["venv", "--python", &selection]);
    if managed {
        inv = inv.args(["--python-preference", "only-managed"]);
    }
    run_checked(runner, &inv.arg(venv).passthrough())?;

    Ok(StepRecord::new("venv", StepOutcome::Created).with_detail(selection))
}

fn query_python_version(runner: &dyn Runner, layout: &Layout, account: &str) -> Result<String> {
    let python = layout.python().display().to_string();
    run_checked(
        runner,
        &Invocation::new(python, &["-c", PYTHON_VERSION_QUERY]).as_user(account),
    )
}

/// Installed engine version, `None` if the interpreter cannot start, the
/// import fails or it prints nothing.
fn engine_version(runner: &dyn Runner, layout: &Layout, account: &str) -> Option<String> {
    let python = layout.python().display().to_string();
    let output = run_as(runner, account, &python, &["-c", VERSION_QUERY]).ok()?;
    let version = output.stdout.trim();
    (output.success && !version.is_empty()).then(|| version.to_string())
}

fn ensure_engine(
    runner: &dyn Runner,
    defaults: &Defaults,
    layout: &Layout,
    account: &str,
    options: ProvisionOptions,
) -> Result<StepRecord> {
    let installed = engine_version(runner, layout, account);
    if let (Some(version), false) = (&installed, options.upgrade) {
        return Ok(StepRecord::new("engine", StepOutcome::Present).with_detail(version.clone()));
    }

    log_status!("provision", "Installing {} (this can take a while)", defaults.runtime.package);
    let python = layout.python().display().to_string();
    let backend = format!("--torch-backend={}", defaults.runtime.torch_backend);
    let mut inv = uv_invocation(defaults, account, &["pip", "install", "--python", &python])
        .arg(defaults.runtime.package.clone())
        .arg(backend);
    if options.upgrade {
        inv = inv.arg("--upgrade");
    }
    run_checked(runner, &inv.passthrough())?;

    let outcome = if installed.is_some() {
        StepOutcome::Updated
    } else {
        StepOutcome::Created
    };
    Ok(StepRecord::new("engine", outcome))
}

/// Materialize the account, layout, environment and engine described by `ctx`.
///
/// Every step checks host state first, so a second run changes nothing but
/// ownership. The engine version query at the end is the only verification
/// gate and runs before anything else reads the environment: no version
/// string means `provision.install_verification_failed`.
pub fn provision(
    ctx: &mut ProvisionContext,
    runner: &dyn Runner,
    defaults: &Defaults,
    options: ProvisionOptions,
) -> Result<ProvisionReport> {
    let layout = Layout::resolve(ctx, defaults)?;
    let account = ctx.require(ContextKey::Account)?.to_string();

    let steps = vec![
        ensure_account(runner, &layout, &account)?,
        ensure_layout(runner, &layout, &account)?,
        ensure_venv(runner, defaults, &layout, &account)?,
        ensure_engine(runner, defaults, &layout, &account, options)?,
    ];

    let engine_version = engine_version(runner, &layout, &account).ok_or_else(|| {
        Error::provision_install_verification_failed(layout.venv.display().to_string())
    })?;
    let python_version = query_python_version(runner, &layout, &account)?;
    log_status!("provision", "vLLM {} on Python {}", engine_version, python_version);

    ctx.set(ContextKey::PythonVersion, python_version.clone())?;
    ctx.set(ContextKey::EngineVersion, engine_version.clone())?;

    Ok(ProvisionReport {
        steps,
        python_version,
        engine_version,
    })
}
