use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    PrereqNotRoot,
    PrereqUnsupportedOs,
    PrereqDriverMissing,
    PrereqInsufficientCapability,

    ProvisionCommandFailed,
    ProvisionInstallVerificationFailed,

    ContextKeyConflict,
    TemplateUnresolvedPlaceholder,

    ServiceRegistrationFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::PrereqNotRoot => "prereq.not_root",
            ErrorCode::PrereqUnsupportedOs => "prereq.unsupported_os",
            ErrorCode::PrereqDriverMissing => "prereq.driver_missing",
            ErrorCode::PrereqInsufficientCapability => "prereq.insufficient_capability",

            ErrorCode::ProvisionCommandFailed => "provision.command_failed",
            ErrorCode::ProvisionInstallVerificationFailed => {
                "provision.install_verification_failed"
            }

            ErrorCode::ContextKeyConflict => "context.key_conflict",
            ErrorCode::TemplateUnresolvedPlaceholder => "template.unresolved_placeholder",

            ErrorCode::ServiceRegistrationFailed => "service.registration_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDetails {
    pub reported: String,
    pub minimum: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConflictDetails {
    pub key: String,
    pub existing: String,
    pub attempted: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedPlaceholderDetails {
    pub template: String,
    pub placeholders: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
        .with_hint("Fix the file or run 'vllm-provision config reset' to restore built-in defaults")
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn prereq_not_root() -> Self {
        Self::new(
            ErrorCode::PrereqNotRoot,
            "This command must be run as root",
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Re-run with sudo")
    }

    pub fn prereq_unsupported_os(detected: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PrereqUnsupportedOs,
            "Unsupported operating system: an Ubuntu-family host is required",
            serde_json::json!({ "detected": detected.into() }),
        )
    }

    pub fn prereq_driver_missing(problem: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PrereqDriverMissing,
            "NVIDIA driver not found: nvidia-smi is not callable",
            serde_json::json!({ "problem": problem.into() }),
        )
        .with_hint("Install the NVIDIA driver and verify that 'nvidia-smi' works")
    }

    pub fn prereq_insufficient_capability(reported: impl Into<String>, minimum: f64) -> Self {
        let reported = reported.into();
        Self::new(
            ErrorCode::PrereqInsufficientCapability,
            format!(
                "GPU compute capability {} is below the required {:.1}",
                reported, minimum
            ),
            to_details(CapabilityDetails { reported, minimum }),
        )
    }

    pub fn provision_command_failed(details: CommandFailedDetails) -> Self {
        let message = format!("Command failed: {}", details.command);
        Self::new(
            ErrorCode::ProvisionCommandFailed,
            message,
            to_details(details),
        )
    }

    pub fn provision_install_verification_failed(venv: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProvisionInstallVerificationFailed,
            "vLLM installation could not be verified: no version reported",
            serde_json::json!({ "venv": venv.into() }),
        )
        .with_hint("Inspect the uv output above, then re-run (completed steps are skipped)")
    }

    pub fn context_key_conflict(
        key: impl Into<String>,
        existing: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ContextKeyConflict,
            format!("Context key '{}' is already set", key),
            to_details(KeyConflictDetails {
                key,
                existing: existing.into(),
                attempted: attempted.into(),
            }),
        )
    }

    pub fn template_unresolved(template: impl Into<String>, placeholders: Vec<String>) -> Self {
        let template = template.into();
        Self::new(
            ErrorCode::TemplateUnresolvedPlaceholder,
            format!(
                "Template '{}' has unresolved placeholders: {}",
                template,
                placeholders.join(", ")
            ),
            to_details(UnresolvedPlaceholderDetails {
                template,
                placeholders,
            }),
        )
    }

    pub fn service_registration_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ServiceRegistrationFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_carries_reported_value() {
        let err = Error::prereq_insufficient_capability("6.1", 7.0);
        assert_eq!(err.code.as_str(), "prereq.insufficient_capability");
        assert_eq!(err.details["reported"], "6.1");
        assert!(err.message.contains("7.0"));
    }

    #[test]
    fn command_failed_serializes_camel_case() {
        let err = Error::provision_command_failed(CommandFailedDetails {
            command: "uv venv".to_string(),
            user: Some("vllm".to_string()),
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        });
        assert_eq!(err.details["exitCode"], 2);
        assert_eq!(err.details["user"], "vllm");
    }

    #[test]
    fn hints_accumulate() {
        let err = Error::internal_unexpected("x").with_hint("a").with_hint("b");
        assert_eq!(err.hints.len(), 2);
    }
}
