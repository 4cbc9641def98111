use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;

use crate::error::{Error, Result};
use crate::paths;
use crate::utils::validation;

/// Root configuration structure for config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_account")]
    pub account: AccountConfig,

    #[serde(default = "default_runtime")]
    pub runtime: RuntimeConfig,

    #[serde(default = "default_server")]
    pub server: ServerDefaults,

    #[serde(default = "default_prereq")]
    pub prereq: PrereqConfig,

    #[serde(default = "default_apt_packages")]
    pub apt_packages: Vec<String>,

    #[serde(default = "default_service")]
    pub service: ServiceConfig,

    #[serde(default = "default_help_command_path")]
    pub help_command_path: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            account: default_account(),
            runtime: default_runtime(),
            server: default_server(),
            prereq: default_prereq(),
            apt_packages: default_apt_packages(),
            service: default_service(),
            help_command_path: default_help_command_path(),
        }
    }
}

/// Dedicated service account and its home (the install root)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub install_root: String,
}

/// Isolated runtime environment and engine package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter versions searched on the host, newest first
    #[serde(default = "default_python_candidates")]
    pub python_candidates: Vec<String>,

    #[serde(default = "default_package")]
    pub package: String,

    #[serde(default = "default_torch_backend")]
    pub torch_backend: String,

    #[serde(default = "default_uv_install_dir")]
    pub uv_install_dir: String,

    #[serde(default = "default_uv_installer_url")]
    pub uv_installer_url: String,
}

/// Engine options presented by the configuration collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefaults {
    pub host: String,
    pub port: u16,
    pub gpu_memory_utilization: f64,
    pub tensor_parallel_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<u32>,
    pub dtype: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrereqConfig {
    pub min_compute_capability: f64,
    pub supported_os_ids: Vec<String>,
    pub os_release_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub unit_dir: String,
    pub restart_sec: u32,
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_account() -> AccountConfig {
    AccountConfig {
        name: "vllm".to_string(),
        install_root: "/opt/vllm".to_string(),
    }
}

fn default_runtime() -> RuntimeConfig {
    RuntimeConfig {
        python_candidates: default_python_candidates(),
        package: default_package(),
        torch_backend: default_torch_backend(),
        uv_install_dir: default_uv_install_dir(),
        uv_installer_url: default_uv_installer_url(),
    }
}

fn default_python_candidates() -> Vec<String> {
    ["3.12", "3.11", "3.10", "3.9"]
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn default_package() -> String {
    "vllm".to_string()
}

fn default_torch_backend() -> String {
    "auto".to_string()
}

fn default_uv_install_dir() -> String {
    "/usr/local/bin".to_string()
}

fn default_uv_installer_url() -> String {
    "https://astral.sh/uv/install.sh".to_string()
}

fn default_server() -> ServerDefaults {
    ServerDefaults {
        host: "0.0.0.0".to_string(),
        port: 8000,
        gpu_memory_utilization: 0.90,
        tensor_parallel_size: 1,
        max_model_len: None,
        dtype: "auto".to_string(),
    }
}

fn default_prereq() -> PrereqConfig {
    PrereqConfig {
        min_compute_capability: 7.0,
        supported_os_ids: vec!["ubuntu".to_string()],
        os_release_path: "/etc/os-release".to_string(),
    }
}

fn default_apt_packages() -> Vec<String> {
    ["curl", "ca-certificates", "build-essential"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_service() -> ServiceConfig {
    ServiceConfig {
        name: "vllm".to_string(),
        unit_dir: "/etc/systemd/system".to_string(),
        restart_sec: 10,
    }
}

fn default_help_command_path() -> String {
    "/usr/local/bin/vllm-help".to_string()
}

impl ServerDefaults {
    /// The memory fraction as presented to the operator ("0.90", "0.925").
    pub fn gpu_memory_utilization_display(&self) -> String {
        let fixed = format!("{:.2}", self.gpu_memory_utilization);
        if fixed.parse::<f64>().ok() == Some(self.gpu_memory_utilization) {
            fixed
        } else {
            self.gpu_memory_utilization.to_string()
        }
    }
}

impl Defaults {
    /// Reject values the collector would refuse from an operator.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        let checks = [
            ("server.host", validation::parse_word(&server.host)),
            ("server.port", validation::parse_port(&server.port.to_string())),
            (
                "server.gpu_memory_utilization",
                validation::parse_fraction(&server.gpu_memory_utilization.to_string()),
            ),
            (
                "server.tensor_parallel_size",
                validation::parse_positive_int(&server.tensor_parallel_size.to_string()),
            ),
            ("server.dtype", validation::parse_word(&server.dtype)),
            ("account.name", validation::parse_word(&self.account.name)),
            ("service.name", validation::parse_word(&self.service.name)),
        ];

        for (key, check) in checks {
            if let Err(problem) = check {
                return Err(Error::config_invalid_value(key, None, problem));
            }
        }

        if self.runtime.python_candidates.is_empty() {
            return Err(Error::config_invalid_value(
                "runtime.python_candidates",
                None,
                "at least one interpreter version is required",
            ));
        }

        if !self.account.install_root.starts_with('/') {
            return Err(Error::config_invalid_value(
                "account.install_root",
                Some(self.account.install_root.clone()),
                "install root must be an absolute path",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
///
/// A missing config.json yields built-in defaults. An unreadable or invalid
/// file is an error: provisioning never runs on a half-understood config.
pub fn load_defaults() -> Result<Defaults> {
    let defaults = load_config()?.defaults;
    defaults.validate()?;
    Ok(defaults)
}

pub fn load_config() -> Result<ProvisionConfig> {
    let path = paths::config_file();

    if !path.exists() {
        return Ok(ProvisionConfig::default());
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

/// Save config to config.json (creates if missing).
pub fn save_config(config: &ProvisionConfig) -> Result<()> {
    let path = paths::config_file();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize config.json".to_string()))
    })?;

    fs::write(&path, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    })?;

    Ok(())
}

pub fn config_exists() -> bool {
    paths::config_file().exists()
}

/// Delete config.json (reset to defaults)
pub fn reset_config() -> Result<bool> {
    let path = paths::config_file();

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub fn config_path() -> String {
    paths::config_file().display().to_string()
}

/// Set `value` at a JSON pointer inside `config`, returning the updated config.
///
/// Objects along the path are created as needed. The result must still
/// deserialize and validate, so a typo cannot leave a broken file behind.
pub fn set_value(config: &ProvisionConfig, pointer: &str, value: Value) -> Result<ProvisionConfig> {
    if !pointer.starts_with('/') || pointer == "/" {
        return Err(Error::validation_invalid_argument(
            "pointer",
            format!("JSON pointer must start with '/' and name a key: {}", pointer),
            None,
            None,
        ));
    }

    let mut root = serde_json::to_value(config)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize config".to_string())))?;

    let tokens: Vec<String> = pointer.split('/').skip(1).map(unescape_token).collect();
    let (last, parents) = tokens
        .split_last()
        .ok_or_else(|| Error::internal_unexpected("empty pointer"))?;

    let mut current = &mut root;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            other => {
                return Err(Error::config_invalid_value(
                    pointer,
                    Some(other.to_string()),
                    "Expected object at pointer",
                ))
            }
        };
    }
    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
        }
        other => {
            return Err(Error::config_invalid_value(
                pointer,
                Some(other.to_string()),
                "Cannot set child on non-object",
            ))
        }
    }

    let updated: ProvisionConfig = serde_json::from_value(root).map_err(|e| {
        Error::config_invalid_value(pointer, None, format!("Does not fit the config schema: {}", e))
    })?;
    updated.defaults.validate()?;
    Ok(updated)
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_are_valid() {
        builtin_defaults().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let config: ProvisionConfig =
            serde_json::from_str(r#"{"defaults":{"service":{"name":"llm","unit_dir":"/tmp","restart_sec":5}}}"#)
                .unwrap();
        assert_eq!(config.defaults.service.name, "llm");
        assert_eq!(config.defaults.server.port, 8000);
        assert_eq!(config.defaults.runtime.python_candidates[0], "3.12");
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let mut defaults = builtin_defaults();
        defaults.server.gpu_memory_utilization = 1.5;
        let err = defaults.validate().unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert_eq!(err.details["key"], "server.gpu_memory_utilization");
    }

    #[test]
    fn relative_install_root_is_rejected() {
        let mut defaults = builtin_defaults();
        defaults.account.install_root = "opt/vllm".to_string();
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn memory_fraction_display() {
        let mut server = default_server();
        assert_eq!(server.gpu_memory_utilization_display(), "0.90");
        server.gpu_memory_utilization = 0.925;
        assert_eq!(server.gpu_memory_utilization_display(), "0.925");
    }

    #[test]
    fn set_value_updates_nested_field() {
        let config = ProvisionConfig::default();
        let updated = set_value(&config, "/defaults/server/port", serde_json::json!(9000)).unwrap();
        assert_eq!(updated.defaults.server.port, 9000);
        assert_eq!(updated.defaults.server.host, "0.0.0.0");
    }

    #[test]
    fn set_value_rejects_wrong_type_and_invalid_values() {
        let config = ProvisionConfig::default();
        let err = set_value(&config, "/defaults/server/port", serde_json::json!("high")).unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");

        let err = set_value(&config, "/defaults/server/tensor_parallel_size", serde_json::json!(0))
            .unwrap_err();
        assert_eq!(err.details["key"], "server.tensor_parallel_size");
    }

    #[test]
    fn set_value_requires_pointer() {
        let err = set_value(&ProvisionConfig::default(), "defaults", Value::Null).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
    }
}
