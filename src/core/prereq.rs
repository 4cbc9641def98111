//! Host suitability checks. Every failure here is fatal and happens before
//! any host mutation.

use std::path::PathBuf;

use serde::Serialize;

use crate::defaults::PrereqConfig;
use crate::error::{Error, Result};
use crate::utils::command::{Invocation, Runner};
use crate::utils::io;

const GPU_QUERY_ARGS: &[&str] = &[
    "--query-gpu=name,compute_cap,driver_version",
    "--format=csv,noheader",
];

/// Read-only view of the host used by [`check_prerequisites`].
pub trait HostProbe {
    /// Contents of os-release, `None` if absent.
    fn os_release(&self) -> Result<Option<String>>;

    /// CSV report from the GPU query tool, `None` if the tool is not callable.
    fn gpu_report(&self) -> Option<String>;
}

/// Probe backed by the real filesystem and `nvidia-smi`.
pub struct SystemProbe<'a> {
    runner: &'a dyn Runner,
    os_release_path: PathBuf,
}

impl<'a> SystemProbe<'a> {
    pub fn new(runner: &'a dyn Runner, config: &PrereqConfig) -> Self {
        Self {
            runner,
            os_release_path: PathBuf::from(&config.os_release_path),
        }
    }
}

impl HostProbe for SystemProbe<'_> {
    fn os_release(&self) -> Result<Option<String>> {
        io::read_optional(&self.os_release_path, "read os-release")
    }

    fn gpu_report(&self) -> Option<String> {
        let output = self
            .runner
            .run(&Invocation::new("nvidia-smi", GPU_QUERY_ARGS))
            .ok()?;
        output.success.then_some(output.stdout)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    pub name: String,
    pub compute_capability: String,
    pub driver_version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub os_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub gpus: Vec<GpuInfo>,
    /// Lowest compute capability across all GPUs
    pub compute_capability: String,
}

#[derive(Debug, Default, PartialEq)]
struct OsRelease {
    id: String,
    id_like: Vec<String>,
    version_id: Option<String>,
}

fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "ID" => release.id = value.to_ascii_lowercase(),
            "ID_LIKE" => {
                release.id_like = value
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            }
            "VERSION_ID" => release.version_id = Some(value.to_string()),
            _ => {}
        }
    }
    release
}

fn parse_gpu_report(report: &str) -> Option<Vec<(GpuInfo, f64)>> {
    let mut gpus = Vec::new();
    for line in report.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [name, cap, driver] = fields.as_slice() else {
            return None;
        };
        let value: f64 = cap.parse().ok()?;
        gpus.push((
            GpuInfo {
                name: name.to_string(),
                compute_capability: cap.to_string(),
                driver_version: driver.to_string(),
            },
            value,
        ));
    }
    (!gpus.is_empty()).then_some(gpus)
}

/// Validate OS family, driver presence and compute capability, in that order.
pub fn check_prerequisites(probe: &dyn HostProbe, config: &PrereqConfig) -> Result<Capabilities> {
    let release = probe.os_release()?.map(|c| parse_os_release(&c)).unwrap_or_default();
    let supported = config.supported_os_ids.iter().any(|id| {
        *id == release.id || release.id_like.iter().any(|like| like == id)
    });
    if !supported {
        let detected = if release.id.is_empty() {
            "unknown".to_string()
        } else {
            release.id.clone()
        };
        return Err(Error::prereq_unsupported_os(detected));
    }

    let report = probe
        .gpu_report()
        .ok_or_else(|| Error::prereq_driver_missing("nvidia-smi could not be run"))?;

    let gpus = parse_gpu_report(&report).ok_or_else(|| {
        Error::prereq_insufficient_capability(report.trim(), config.min_compute_capability)
    })?;

    let (lowest, lowest_value) = gpus
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(gpu, value)| (gpu.compute_capability.clone(), *value))
        .ok_or_else(|| Error::prereq_driver_missing("no GPUs reported"))?;

    if lowest_value < config.min_compute_capability {
        return Err(Error::prereq_insufficient_capability(
            lowest,
            config.min_compute_capability,
        ));
    }

    log_status!(
        "prereq",
        "{} {} with {} GPU(s), compute capability {}",
        release.id,
        release.version_id.as_deref().unwrap_or(""),
        gpus.len(),
        lowest
    );

    Ok(Capabilities {
        os_id: release.id,
        os_version: release.version_id,
        gpus: gpus.into_iter().map(|(gpu, _)| gpu).collect(),
        compute_capability: lowest,
    })
}

/// Provisioning mutates system state; it requires effective UID 0.
pub fn require_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        Ok(())
    } else {
        Err(Error::prereq_not_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::builtin_defaults;

    struct Probe {
        os: Option<&'static str>,
        gpus: Option<&'static str>,
    }

    impl HostProbe for Probe {
        fn os_release(&self) -> Result<Option<String>> {
            Ok(self.os.map(str::to_string))
        }
        fn gpu_report(&self) -> Option<String> {
            self.gpus.map(str::to_string)
        }
    }

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";
    const MINT: &str = "NAME=\"Linux Mint\"\nID=linuxmint\nID_LIKE=\"ubuntu debian\"\n";

    fn check(probe: Probe) -> Result<Capabilities> {
        check_prerequisites(&probe, &builtin_defaults().prereq)
    }

    #[test]
    fn accepts_ubuntu_with_capable_gpu() {
        let caps = check(Probe {
            os: Some(UBUNTU),
            gpus: Some("NVIDIA A10G, 8.6, 535.104.05\n"),
        })
        .unwrap();
        assert_eq!(caps.os_id, "ubuntu");
        assert_eq!(caps.os_version.as_deref(), Some("22.04"));
        assert_eq!(caps.compute_capability, "8.6");
    }

    #[test]
    fn accepts_ubuntu_derivative_via_id_like() {
        let caps = check(Probe {
            os: Some(MINT),
            gpus: Some("NVIDIA L4, 8.9, 550.54\n"),
        })
        .unwrap();
        assert_eq!(caps.os_id, "linuxmint");
    }

    #[test]
    fn rejects_other_distribution() {
        let err = check(Probe {
            os: Some("ID=fedora\n"),
            gpus: Some("NVIDIA A10G, 8.6, 535\n"),
        })
        .unwrap_err();
        assert_eq!(err.code.as_str(), "prereq.unsupported_os");
        assert_eq!(err.details["detected"], "fedora");
    }

    #[test]
    fn missing_os_release_is_unsupported() {
        let err = check(Probe { os: None, gpus: None }).unwrap_err();
        assert_eq!(err.code.as_str(), "prereq.unsupported_os");
    }

    #[test]
    fn missing_driver() {
        let err = check(Probe {
            os: Some(UBUNTU),
            gpus: None,
        })
        .unwrap_err();
        assert_eq!(err.code.as_str(), "prereq.driver_missing");
    }

    #[test]
    fn lowest_gpu_decides() {
        let err = check(Probe {
            os: Some(UBUNTU),
            gpus: Some("NVIDIA A100, 8.0, 535\nTesla P100, 6.0, 535\n"),
        })
        .unwrap_err();
        assert_eq!(err.code.as_str(), "prereq.insufficient_capability");
        assert_eq!(err.details["reported"], "6.0");
    }

    #[test]
    fn exact_threshold_passes() {
        let caps = check(Probe {
            os: Some(UBUNTU),
            gpus: Some("Tesla V100, 7.0, 535\n"),
        })
        .unwrap();
        assert_eq!(caps.compute_capability, "7.0");
    }

    #[test]
    fn unparseable_report_is_insufficient() {
        let err = check(Probe {
            os: Some(UBUNTU),
            gpus: Some("[N/A]\n"),
        })
        .unwrap_err();
        assert_eq!(err.code.as_str(), "prereq.insufficient_capability");
    }
}
