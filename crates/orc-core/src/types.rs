use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

/// Coarse size classification of a task. Selects the plan template.
///
/// Unrecognised weights found in persisted records are carried verbatim in
/// [`Weight::Other`] so the record still loads; template lookup for them fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Weight {
    Trivial,
    Small,
    Medium,
    Large,
    Greenfield,
    Other(String),
}

impl Weight {
    /// Every weight that ships with a built-in template.
    pub fn known() -> &'static [Weight] {
        &[
            Weight::Trivial,
            Weight::Small,
            Weight::Medium,
            Weight::Large,
            Weight::Greenfield,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            Weight::Trivial => "trivial",
            Weight::Small => "small",
            Weight::Medium => "medium",
            Weight::Large => "large",
            Weight::Greenfield => "greenfield",
            Weight::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Weight::Other(_))
    }
}

impl From<String> for Weight {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "trivial" => Weight::Trivial,
            "small" => Weight::Small,
            "medium" => Weight::Medium,
            "large" => Weight::Large,
            "greenfield" => Weight::Greenfield,
            _ => Weight::Other(raw),
        }
    }
}

impl From<&str> for Weight {
    fn from(raw: &str) -> Self {
        Weight::from(raw.to_string())
    }
}

impl From<Weight> for String {
    fn from(weight: Weight) -> Self {
        match weight {
            Weight::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for Weight {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Weight::from(s))
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Execution status of a task, and of a single phase's runtime record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Interrupted,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Paused => "paused",
            TaskStatus::Interrupted => "interrupted",
            TaskStatus::Skipped => "skipped",
        }
    }

    /// `true` for states a scheduler can pick up again without a reset.
    pub fn is_resumable(&self) -> bool {
        matches!(self, TaskStatus::Interrupted | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseStatus
// ---------------------------------------------------------------------------

/// Status of a phase as recorded on the [`Plan`](crate::plan::Plan).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    /// Completed and skipped phases are never pending work.
    pub fn is_done(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GateType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    #[default]
    Auto,
    Ai,
    Human,
}

impl GateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateType::Auto => "auto",
            GateType::Ai => "ai",
            GateType::Human => "human",
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The slice of a task record the planner and state machine consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub weight: Weight,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, weight: Weight) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            weight,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-classify the task. Returns `true` when the weight actually changed,
    /// in which case the caller must regenerate the plan.
    pub fn set_weight(&mut self, weight: Weight) -> bool {
        if self.weight == weight {
            return false;
        }
        self.weight = weight;
        self.updated_at = Utc::now();
        true
    }
}
