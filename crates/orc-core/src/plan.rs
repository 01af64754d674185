//! Task plans: the per-task, mutable-status instantiation of a [`Template`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::template::{Gate, PhaseSpec, Template, TemplateError, TemplateStore};
use crate::types::{PhaseStatus, Task, Weight};

/// Id of the single phase in [`Plan::fallback`].
pub const FALLBACK_PHASE_ID: &str = "implement";

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    /// Legacy inline instructions; a non-empty value marks the plan stale.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub gate: Gate,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_sha: String,
}

impl Phase {
    /// Copy a template phase verbatim with fresh runtime fields.
    pub fn from_spec(spec: &PhaseSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            prompt: spec.prompt.clone(),
            depends_on: spec.depends_on.clone(),
            gate: spec.gate.clone(),
            checkpoint: spec.checkpoint,
            config: spec.config.clone(),
            artifacts: spec.artifacts.clone(),
            status: PhaseStatus::Pending,
            commit_sha: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub task_id: String,
    pub weight: Weight,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Instantiate `template` for `task`, every phase pending.
    pub fn from_template(task: &Task, template: &Template) -> Self {
        Self {
            version: template.version,
            task_id: task.id.clone(),
            weight: task.weight.clone(),
            description: template.description.clone(),
            phases: template.phases.iter().map(Phase::from_spec).collect(),
        }
    }

    /// Single-phase plan a scheduler may fall back to when no template
    /// resolves for the task's weight.
    pub fn fallback(task: &Task) -> Self {
        Self {
            version: 1,
            task_id: task.id.clone(),
            weight: task.weight.clone(),
            description: "Default plan".to_string(),
            phases: vec![Phase {
                id: FALLBACK_PHASE_ID.to_string(),
                name: FALLBACK_PHASE_ID.to_string(),
                prompt: String::new(),
                depends_on: Vec::new(),
                gate: Gate::auto(),
                checkpoint: false,
                config: BTreeMap::new(),
                artifacts: Vec::new(),
                status: PhaseStatus::Pending,
                commit_sha: String::new(),
            }],
        }
    }

    pub fn get_phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn get_phase_mut(&mut self, id: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.id == id)
    }

    /// First phase that is neither completed nor skipped, in plan order.
    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.iter().find(|p| !p.status.is_done())
    }

    /// `true` once every phase is completed or skipped.
    pub fn is_complete(&self) -> bool {
        self.phases.iter().all(|p| p.status.is_done())
    }

    /// Phase ids in plan order. This is the ordering to thread into
    /// [`State::resume_phase`](crate::state::State::resume_phase) and
    /// [`State::reset_phases_from`](crate::state::State::reset_phases_from).
    pub fn phase_ids(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.id.as_str()).collect()
    }

    /// Put every phase back to pending and forget commit SHAs.
    pub fn reset(&mut self) {
        for phase in &mut self.phases {
            phase.status = PhaseStatus::Pending;
            phase.commit_sha.clear();
        }
    }

    pub fn has_inline_prompts(&self) -> bool {
        self.phases.iter().any(|p| !p.prompt.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no template found for weight '{0}'")]
    NoTemplate(Weight),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("regenerate plan for weight '{weight}': {source}")]
    MigrationFailure {
        weight: Weight,
        #[source]
        source: TemplateError,
    },
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Builds plans from templates. Borrows a caller-owned [`TemplateStore`].
pub struct Generator<'s> {
    store: &'s dyn TemplateStore,
    fallback: Option<Weight>,
}

impl<'s> Generator<'s> {
    pub fn new(store: &'s dyn TemplateStore) -> Self {
        Self {
            store,
            fallback: None,
        }
    }

    /// Let [`Generator::generate`] substitute `weight`'s template when the
    /// task's own weight has none.
    pub fn with_fallback(mut self, weight: Weight) -> Self {
        self.fallback = Some(weight);
        self
    }

    pub fn store(&self) -> &'s dyn TemplateStore {
        self.store
    }

    pub(crate) fn load_template(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        self.store.load(weight)
    }

    /// Build a plan for `task`, substituting the fallback weight's template
    /// (if one is configured) when the task's weight has no template.
    pub fn generate(&self, task: &Task) -> Result<Plan, PlanError> {
        let template = match self.store.load(&task.weight) {
            Ok(tmpl) => tmpl,
            Err(TemplateError::NotFound(_)) => {
                let fallback = self
                    .fallback
                    .as_ref()
                    .filter(|w| **w != task.weight)
                    .ok_or_else(|| PlanError::NoTemplate(task.weight.clone()))?;
                tracing::warn!(
                    task_id = %task.id,
                    weight = %task.weight,
                    fallback = %fallback,
                    "no template for weight, using fallback"
                );
                self.store.load(fallback).map_err(|e| match e {
                    TemplateError::NotFound(_) => PlanError::NoTemplate(task.weight.clone()),
                    other => PlanError::Template(other),
                })?
            }
            Err(other) => return Err(PlanError::Template(other)),
        };
        Ok(Plan::from_template(task, &template))
    }

    /// Build a plan for `task` from its own weight's template. Never falls back.
    pub fn create_from_template(&self, task: &Task) -> Result<Plan, PlanError> {
        let template = self.store.load(&task.weight)?;
        tracing::debug!(
            task_id = %task.id,
            weight = %task.weight,
            version = template.version,
            phases = template.phases.len(),
            "plan created from template"
        );
        Ok(Plan::from_template(task, &template))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
