//! Public output types shared by the provisioning stages.

use serde::Serialize;

/// What an idempotent step found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Did not exist; created now.
    Created,
    /// Already in the desired state; nothing done.
    Present,
    /// Existed; state reapplied (ownership, permissions).
    Repaired,
    /// Existed with different content; replaced.
    Updated,
    /// Existed with different content; operator chose to keep it.
    Kept,
}

/// One step of a stage, as reported in the run summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepRecord {
    pub fn new(step: impl Into<String>, outcome: StepOutcome) -> Self {
        Self {
            step: step.into(),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An artifact as installed on the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub outcome: StepOutcome,
}
