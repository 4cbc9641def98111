#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use vllm_provision::defaults::{builtin_defaults, Defaults};
use vllm_provision::deps::Downloader;
use vllm_provision::orchestrator::{self, InstallOptions, RunSummary, Toolkit};
use vllm_provision::prereq::HostProbe;
use vllm_provision::prompt::{NoPrompt, Prompter};
use vllm_provision::utils::command::{CommandOutput, Invocation, Runner, SystemRunner};
use vllm_provision::{Error, Result};

pub const UBUNTU: &str = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";
pub const ENGINE_VERSION: &str = "0.6.3";
pub const UV_INSTALLER: &str = "#!/bin/sh\necho installing uv\n";

#[derive(Debug, Default)]
struct HostState {
    users: BTreeSet<String>,
    apt_installed: bool,
    engine_installed: bool,
    enabled: BTreeSet<String>,
    active: BTreeSet<String>,
    host_pythons: BTreeSet<String>,
    installer_runs: Vec<InstallerRun>,
    engine_installs_package: bool,
    python_starts: bool,
}

/// One `sh <script>` run seen by the fake host.
#[derive(Debug, Clone)]
pub struct InstallerRun {
    pub path: PathBuf,
    pub contents: String,
}

/// A simulated Ubuntu host. Account, package and systemd state live in
/// memory; the install tree is real files under a temp dir.
pub struct FakeHost {
    state: RefCell<HostState>,
    calls: RefCell<Vec<Invocation>>,
}

impl FakeHost {
    pub fn new() -> Self {
        let state = HostState {
            host_pythons: ["3.11".to_string()].into_iter().collect(),
            engine_installs_package: true,
            python_starts: true,
            ..HostState::default()
        };
        Self {
            state: RefCell::new(state),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn without_host_python(self) -> Self {
        self.state.borrow_mut().host_pythons.clear();
        self
    }

    /// `uv pip install` exits 0 but leaves the engine unimportable.
    pub fn with_broken_engine_install(self) -> Self {
        self.state.borrow_mut().engine_installs_package = false;
        self
    }

    /// The environment's interpreter exists but cannot be executed.
    pub fn with_unstartable_python(self) -> Self {
        self.state.borrow_mut().python_starts = false;
        self
    }

    pub fn installer_runs(&self) -> Vec<InstallerRun> {
        self.state.borrow().installer_runs.clone()
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Rendered command lines, in call order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::display).collect()
    }

    pub fn ran(&self, program_suffix: &str, first_arg: &str) -> bool {
        self.calls.borrow().iter().any(|inv| {
            inv.program.ends_with(program_suffix)
                && inv.args.first().map(String::as_str) == Some(first_arg)
        })
    }

    pub fn ran_program(&self, program_suffix: &str) -> bool {
        self.calls
            .borrow()
            .iter()
            .any(|inv| inv.program.ends_with(program_suffix))
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.state.borrow().enabled.contains(name)
    }

    fn handle(&self, inv: &Invocation) -> Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();
        let program = inv.program.as_str();

        let output = match (program, args.as_slice()) {
            ("id", ["-u", user]) => {
                if state.users.contains(*user) {
                    CommandOutput::ok("998\n")
                } else {
                    CommandOutput::failed(1, format!("id: '{}': no such user", user))
                }
            }
            ("useradd", [.., user]) => {
                state.users.insert(user.to_string());
                CommandOutput::ok("")
            }
            ("dpkg-query", _) => {
                if state.apt_installed {
                    CommandOutput::ok("install ok installed")
                } else {
                    CommandOutput::failed(1, "no packages found")
                }
            }
            ("apt-get", ["install", ..]) => {
                state.apt_installed = true;
                CommandOutput::ok("")
            }
            ("apt-get", _) => CommandOutput::ok(""),
            ("chown", _) => CommandOutput::ok(""),
            ("chmod", _) => {
                drop(state);
                return SystemRunner.run(inv);
            }
            ("sh", ["-c", probe]) => {
                let found = state
                    .host_pythons
                    .iter()
                    .find(|v| probe.ends_with(&format!("python{}", v)));
                match found {
                    Some(v) => CommandOutput::ok(format!("/usr/bin/python{}\n", v)),
                    None => CommandOutput::failed(1, ""),
                }
            }
            ("sh", [script]) => {
                let contents = fs::read_to_string(script).map_err(|e| {
                    Error::internal_io(e.to_string(), Some(format!("read {}", script)))
                })?;
                state.installer_runs.push(InstallerRun {
                    path: PathBuf::from(script),
                    contents,
                });
                let dir = inv
                    .env
                    .iter()
                    .find(|(k, _)| k == "UV_INSTALL_DIR")
                    .map(|(_, v)| PathBuf::from(v))
                    .ok_or_else(|| Error::internal_unexpected("installer without UV_INSTALL_DIR"))?;
                write_executable(&dir.join("uv"), "#!/bin/sh\n");
                CommandOutput::ok("")
            }
            (uv, ["--version"]) if uv.ends_with("/uv") => CommandOutput::ok("uv 0.5.4\n"),
            (uv, ["venv", .., venv]) if uv.ends_with("/uv") => {
                write_executable(&Path::new(venv).join("bin").join("python"), "");
                CommandOutput::ok("")
            }
            (uv, ["pip", "install", ..]) if uv.ends_with("/uv") => {
                state.engine_installed = state.engine_installs_package;
                CommandOutput::ok("")
            }
            (python, ["-c", code]) if python.ends_with("/bin/python") => {
                if !Path::new(python).exists() || !state.python_starts {
                    return Err(Error::internal_io("No such file or directory", None));
                }
                if code.contains("vllm") {
                    if state.engine_installed {
                        CommandOutput::ok(format!("{}\n", ENGINE_VERSION))
                    } else {
                        CommandOutput::failed(1, "ModuleNotFoundError: No module named 'vllm'")
                    }
                } else {
                    CommandOutput::ok("3.11.9\n")
                }
            }
            ("systemctl", ["daemon-reload"]) => CommandOutput::ok(""),
            ("systemctl", ["enable", name]) => {
                state.enabled.insert(name.to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["start", name]) => {
                state.active.insert(name.to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["is-enabled", name]) => {
                if state.enabled.contains(*name) {
                    CommandOutput::ok("enabled\n")
                } else {
                    CommandOutput {
                        stdout: "disabled\n".to_string(),
                        ..CommandOutput::failed(1, "")
                    }
                }
            }
            ("systemctl", ["is-active", name]) => {
                if state.active.contains(*name) {
                    CommandOutput::ok("active\n")
                } else {
                    CommandOutput {
                        stdout: "inactive\n".to_string(),
                        ..CommandOutput::failed(3, "")
                    }
                }
            }
            _ => {
                return Err(Error::internal_unexpected(format!(
                    "unexpected command on fake host: {}",
                    inv.display()
                )))
            }
        };
        Ok(output)
    }
}

impl Runner for FakeHost {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        self.handle(invocation)
    }
}

pub fn write_executable(path: &Path, content: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub struct FakeProbe {
    pub os_release: Option<String>,
    pub gpus: Option<String>,
}

impl FakeProbe {
    pub fn capable() -> Self {
        Self {
            os_release: Some(UBUNTU.to_string()),
            gpus: Some("NVIDIA A10G, 8.6, 535.104.05\n".to_string()),
        }
    }

    pub fn with_gpus(report: &str) -> Self {
        Self {
            gpus: Some(report.to_string()),
            ..Self::capable()
        }
    }
}

impl HostProbe for FakeProbe {
    fn os_release(&self) -> Result<Option<String>> {
        Ok(self.os_release.clone())
    }

    fn gpu_report(&self) -> Option<String> {
        self.gpus.clone()
    }
}

pub struct FakeDownloader;

impl Downloader for FakeDownloader {
    fn fetch_text(&self, _url: &str) -> Result<String> {
        Ok(UV_INSTALLER.to_string())
    }
}

/// Answers questions from a fixed script, recording what was asked.
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub asked: Vec<String>,
    pub notices: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            asked: Vec::new(),
            notices: Vec::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| Error::internal_unexpected(format!("no scripted answer for '{}'", question)))
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

/// Defaults with every host path moved under `dir`.
pub fn sandbox_defaults(dir: &TempDir) -> Defaults {
    let root = dir.path();
    let mut defaults = builtin_defaults();
    defaults.account.install_root = root.join("opt/vllm").display().to_string();
    defaults.runtime.uv_install_dir = root.join("usr/local/bin").display().to_string();
    defaults.help_command_path = root.join("usr/local/bin/vllm-help").display().to_string();
    defaults.service.unit_dir = root.join("etc/systemd/system").display().to_string();
    defaults
}

pub fn run_install(
    host: &FakeHost,
    probe: &FakeProbe,
    defaults: &Defaults,
    options: &InstallOptions,
    prompter: &mut dyn Prompter,
) -> Result<RunSummary> {
    let mut kit = Toolkit {
        runner: host,
        probe,
        downloader: &FakeDownloader,
        prompter,
        defaults,
    };
    orchestrator::install(options, &mut kit)
}

pub fn non_interactive() -> InstallOptions {
    InstallOptions {
        assume_yes: true,
        ..InstallOptions::default()
    }
}

pub fn silent() -> NoPrompt {
    NoPrompt
}
