//! System packages and the `uv` environment manager.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::defaults::Defaults;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::output::{StepOutcome, StepRecord};
use crate::utils::command::{run_checked, Invocation, Runner};
use crate::utils::io;

/// Fetches installer scripts over HTTPS.
pub trait Downloader {
    fn fetch_text(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn fetch_text(&self, url: &str) -> Result<String> {
        let context = Some(format!("download {}", url));
        reqwest::blocking::get(url)
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| Error::internal_io(e.to_string(), context))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub steps: Vec<StepRecord>,
    pub uv: String,
}

pub fn uv_binary(defaults: &Defaults) -> PathBuf {
    Path::new(&defaults.runtime.uv_install_dir).join("uv")
}

fn package_installed(runner: &dyn Runner, package: &str) -> Result<bool> {
    let output = runner.run(&Invocation::new(
        "dpkg-query",
        &["-W", "-f=${Status}", package],
    ))?;
    Ok(output.success && output.stdout.contains("install ok installed"))
}

fn ensure_apt_packages(runner: &dyn Runner, packages: &[String]) -> Result<StepRecord> {
    let mut missing = Vec::new();
    for package in packages {
        if !package_installed(runner, package)? {
            missing.push(package.clone());
        }
    }

    if missing.is_empty() {
        return Ok(StepRecord::new("apt_packages", StepOutcome::Present));
    }

    log_status!("deps", "Installing system packages: {}", missing.join(" "));
    run_checked(
        runner,
        &Invocation::new("apt-get", &["update", "-y"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .passthrough(),
    )?;
    run_checked(
        runner,
        &Invocation::new("apt-get", &["install", "-y", "--no-install-recommends"])
            .args(missing.iter().cloned())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .passthrough(),
    )?;

    Ok(StepRecord::new("apt_packages", StepOutcome::Created).with_detail(missing.join(" ")))
}

fn uv_version(runner: &dyn Runner, uv: &Path) -> Result<Option<String>> {
    if !uv.exists() {
        return Ok(None);
    }
    let output = runner.run(&Invocation::new(uv.display().to_string(), &["--version"]))?;
    Ok(output
        .success
        .then(|| output.stdout.trim().to_string())
        .filter(|v| !v.is_empty()))
}

fn ensure_uv(
    runner: &dyn Runner,
    downloader: &dyn Downloader,
    defaults: &Defaults,
) -> Result<(StepRecord, String)> {
    let uv = uv_binary(defaults);
    if let Some(version) = uv_version(runner, &uv)? {
        return Ok((StepRecord::new("uv", StepOutcome::Present), version));
    }

    log_status!("deps", "Installing uv into {}", defaults.runtime.uv_install_dir);
    let script = downloader.fetch_text(&defaults.runtime.uv_installer_url)?;
    // Removed when `installer` drops.
    let installer = io::write_temp_file("vllm-provision-uv-", &script, "write uv installer")?;

    run_checked(
        runner,
        &Invocation::new("sh", &[])
            .arg(installer.path().display().to_string())
            .env("UV_INSTALL_DIR", defaults.runtime.uv_install_dir.clone())
            .env("UV_NO_MODIFY_PATH", "1")
            .passthrough(),
    )?;
    drop(installer);

    let version = uv_version(runner, &uv)?.ok_or_else(|| {
        Error::provision_command_failed(CommandFailedDetails {
            command: format!("{} --version", uv.display()),
            user: None,
            exit_code: -1,
            stdout: String::new(),
            stderr: "uv not found after running the installer".to_string(),
        })
    })?;

    Ok((StepRecord::new("uv", StepOutcome::Created), version))
}

/// Ensure apt packages and `uv` are present. Skips whatever is already installed.
pub fn ensure_dependencies(
    runner: &dyn Runner,
    downloader: &dyn Downloader,
    defaults: &Defaults,
) -> Result<DependencyReport> {
    let apt = ensure_apt_packages(runner, &defaults.apt_packages)?;
    let (uv_step, uv) = ensure_uv(runner, downloader, defaults)?;

    Ok(DependencyReport {
        steps: vec![apt, uv_step],
        uv,
    })
}
