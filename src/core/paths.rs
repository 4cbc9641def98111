use std::env;
use std::path::{Path, PathBuf};

use crate::context::{ContextKey, ProvisionContext};
use crate::defaults::Defaults;
use crate::error::Result;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "VLLM_PROVISION_CONFIG";

/// Global config.json path (`/etc/vllm-provision/config.json` unless overridden)
pub fn config_file() -> PathBuf {
    match env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from("/etc/vllm-provision/config.json"),
    }
}

/// Runtime environment directory under an install root
pub fn venv_dir(install_root: &Path) -> PathBuf {
    install_root.join("venv")
}

/// Model cache directory (`HF_HOME`) under an install root
pub fn cache_dir(install_root: &Path) -> PathBuf {
    install_root.join("models")
}

/// Where every generated artifact lands on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub install_root: PathBuf,
    pub venv: PathBuf,
    pub cache: PathBuf,
    pub launcher: PathBuf,
    pub env_file: PathBuf,
    pub help_command: PathBuf,
    pub unit_file: PathBuf,
}

impl Layout {
    pub fn resolve(ctx: &ProvisionContext, defaults: &Defaults) -> Result<Self> {
        let install_root = PathBuf::from(ctx.require(ContextKey::InstallRoot)?);
        Ok(Self {
            venv: PathBuf::from(ctx.require(ContextKey::VenvDir)?),
            cache: PathBuf::from(ctx.require(ContextKey::CacheDir)?),
            launcher: install_root.join("launch.sh"),
            env_file: install_root.join("service.env"),
            help_command: PathBuf::from(&defaults.help_command_path),
            unit_file: Path::new(&defaults.service.unit_dir)
                .join(format!("{}.service", defaults.service.name)),
            install_root,
        })
    }

    pub fn python(&self) -> PathBuf {
        self.venv.join("bin").join("python")
    }

    pub fn engine_binary(&self) -> PathBuf {
        self.venv.join("bin").join("vllm")
    }
}
