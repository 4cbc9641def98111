//! Write-once provisioning context threaded through every stage.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    Account,
    InstallRoot,
    VenvDir,
    CacheDir,
    PythonVersion,
    Host,
    Port,
    GpuMemoryUtilization,
    TensorParallelSize,
    MaxModelLen,
    Dtype,
    ComputeCapability,
    EngineVersion,
    ModelRef,
    ExtraFlags,
}

impl ContextKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Account => "account",
            ContextKey::InstallRoot => "install_root",
            ContextKey::VenvDir => "venv_dir",
            ContextKey::CacheDir => "cache_dir",
            ContextKey::PythonVersion => "python_version",
            ContextKey::Host => "host",
            ContextKey::Port => "port",
            ContextKey::GpuMemoryUtilization => "gpu_memory_utilization",
            ContextKey::TensorParallelSize => "tensor_parallel_size",
            ContextKey::MaxModelLen => "max_model_len",
            ContextKey::Dtype => "dtype",
            ContextKey::ComputeCapability => "compute_capability",
            ContextKey::EngineVersion => "engine_version",
            ContextKey::ModelRef => "model_ref",
            ContextKey::ExtraFlags => "extra_flags",
        }
    }
}

/// Accumulated configuration. A key, once written, cannot change value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProvisionContext {
    values: BTreeMap<ContextKey, String>,
}

impl ProvisionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key`. Re-writing the same value is a no-op; a different value
    /// fails with `context.key_conflict`.
    pub fn set(&mut self, key: ContextKey, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match self.values.get(&key) {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(Error::context_key_conflict(
                key.as_str(),
                existing.clone(),
                value,
            )),
            None => {
                self.values.insert(key, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Read a key a previous stage must have written.
    pub fn require(&self, key: ContextKey) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            Error::internal_unexpected(format!(
                "context key '{}' read before it was written",
                key.as_str()
            ))
        })
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = ContextKey> + '_ {
        self.values.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_write_once() {
        let mut ctx = ProvisionContext::new();
        ctx.set(ContextKey::Port, "8000").unwrap();
        ctx.set(ContextKey::Port, "8000").unwrap();

        let err = ctx.set(ContextKey::Port, "9000").unwrap_err();
        assert_eq!(err.code.as_str(), "context.key_conflict");
        assert_eq!(err.details["existing"], "8000");
        assert_eq!(ctx.get(ContextKey::Port), Some("8000"));
    }

    #[test]
    fn require_reports_unwritten_key() {
        let ctx = ProvisionContext::new();
        let err = ctx.require(ContextKey::VenvDir).unwrap_err();
        assert!(err.details["error"].as_str().unwrap().contains("venv_dir"));
    }

    #[test]
    fn serializes_as_flat_map() {
        let mut ctx = ProvisionContext::new();
        ctx.set(ContextKey::Host, "0.0.0.0").unwrap();
        ctx.set(ContextKey::Account, "vllm").unwrap();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, serde_json::json!({"account": "vllm", "host": "0.0.0.0"}));
    }
}
