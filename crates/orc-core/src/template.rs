//! Versioned phase templates, keyed by task weight.
//!
//! A [`Template`] is the immutable blueprint a [`Plan`](crate::plan::Plan) is
//! instantiated from. Stores hand templates out behind an [`Arc`] so no
//! caller can mutate a loaded phase list.
//!
//! Lookup order for [`LayeredTemplateStore`]:
//! 1. Each configured override directory, in order (`<dir>/<weight>.toml`)
//! 2. The built-in set compiled into the binary
//!
//! Caching is opt-in through [`CachedTemplateStore`], which the caller owns
//! and invalidates explicitly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{GateType, Weight};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Approval gate guarding the exit of a phase.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Gate {
    #[serde(rename = "type", default)]
    pub kind: GateType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reviewers: u32,
}

impl Gate {
    pub fn auto() -> Self {
        Self::default()
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One step of a template's phase sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub id: String,
    pub name: String,
    /// Legacy inline instructions. Built-in templates never set this.
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
}

/// Immutable, versioned phase blueprint for one weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub version: u32,
    pub weight: Weight,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<PhaseSpec>,
}

impl Template {
    /// Parse a template from TOML, checking it describes `weight` and that
    /// its phase ids are unique.
    pub fn from_toml(weight: &Weight, text: &str) -> Result<Self, TemplateError> {
        let tmpl: Template = toml::from_str(text).map_err(|e| TemplateError::Parse {
            weight: weight.clone(),
            message: e.to_string(),
        })?;
        tmpl.validate(weight)?;
        Ok(tmpl)
    }

    fn validate(&self, weight: &Weight) -> Result<(), TemplateError> {
        let invalid = |message: String| TemplateError::Parse {
            weight: weight.clone(),
            message,
        };
        if &self.weight != weight {
            return Err(invalid(format!(
                "template declares weight '{}'",
                self.weight
            )));
        }
        if self.phases.is_empty() {
            return Err(invalid("template has no phases".to_string()));
        }
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if phase.id.trim().is_empty() {
                return Err(invalid("phase with empty id".to_string()));
            }
            if !seen.insert(phase.id.as_str()) {
                return Err(invalid(format!("duplicate phase id '{}'", phase.id)));
            }
        }
        Ok(())
    }

    /// Phase ids in template order.
    pub fn phase_ids(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("no template for weight '{0}'")]
    NotFound(Weight),
    #[error("invalid template for weight '{weight}': {message}")]
    Parse { weight: Weight, message: String },
    #[error("read template: {0}")]
    Io(String),
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

/// Source of templates for the plan generator and staleness detector.
pub trait TemplateStore {
    /// Load the template for `weight`, or [`TemplateError::NotFound`].
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError>;
}

impl<S: TemplateStore + ?Sized> TemplateStore for &S {
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        (**self).load(weight)
    }
}

impl<S: TemplateStore + ?Sized> TemplateStore for Box<S> {
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        (**self).load(weight)
    }
}

// ---------------------------------------------------------------------------
// BuiltinTemplates
// ---------------------------------------------------------------------------

/// The templates compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    fn source(weight: &Weight) -> Option<&'static str> {
        match weight {
            Weight::Trivial => Some(include_str!("../templates/plans/trivial.toml")),
            Weight::Small => Some(include_str!("../templates/plans/small.toml")),
            Weight::Medium => Some(include_str!("../templates/plans/medium.toml")),
            Weight::Large => Some(include_str!("../templates/plans/large.toml")),
            Weight::Greenfield => Some(include_str!("../templates/plans/greenfield.toml")),
            Weight::Other(_) => None,
        }
    }
}

impl TemplateStore for BuiltinTemplates {
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        let text = Self::source(weight).ok_or_else(|| TemplateError::NotFound(weight.clone()))?;
        Template::from_toml(weight, text).map(Arc::new)
    }
}

// ---------------------------------------------------------------------------
// LayeredTemplateStore
// ---------------------------------------------------------------------------

/// Directory overrides layered on top of the built-in templates.
#[derive(Debug, Clone, Default)]
pub struct LayeredTemplateStore {
    dirs: Vec<PathBuf>,
}

impl LayeredTemplateStore {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn file_name(weight: &Weight) -> Option<String> {
        let name = weight.as_str();
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| format!("{name}.toml"))
    }

    fn load_from(dir: &Path, file: &str, weight: &Weight) -> Result<Option<Template>, TemplateError> {
        let path = dir.join(file);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| TemplateError::Io(format!("{}: {e}", path.display())))?;
        tracing::debug!(weight = %weight, path = %path.display(), "loaded template override");
        Template::from_toml(weight, &text).map(Some)
    }
}

impl TemplateStore for LayeredTemplateStore {
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        let file = Self::file_name(weight).ok_or_else(|| TemplateError::NotFound(weight.clone()))?;
        for dir in &self.dirs {
            if let Some(tmpl) = Self::load_from(dir, &file, weight)? {
                return Ok(Arc::new(tmpl));
            }
        }
        BuiltinTemplates.load(weight)
    }
}

// ---------------------------------------------------------------------------
// CachedTemplateStore
// ---------------------------------------------------------------------------

/// Caller-owned cache in front of another store.
///
/// Failed lookups are not cached.
#[derive(Debug, Default)]
pub struct CachedTemplateStore<S> {
    inner: S,
    cache: Mutex<HashMap<Weight, Arc<Template>>>,
}

impl<S: TemplateStore> CachedTemplateStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop the cached template for one weight.
    pub fn invalidate(&self, weight: &Weight) {
        self.entries().remove(weight);
    }

    /// Drop every cached template.
    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.entries().len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<Weight, Arc<Template>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: TemplateStore> TemplateStore for CachedTemplateStore<S> {
    fn load(&self, weight: &Weight) -> Result<Arc<Template>, TemplateError> {
        if let Some(hit) = self.entries().get(weight) {
            return Ok(Arc::clone(hit));
        }
        let tmpl = self.inner.load(weight)?;
        self.entries().insert(weight.clone(), Arc::clone(&tmpl));
        Ok(tmpl)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_load_for_every_known_weight() {
        for weight in Weight::known() {
            let tmpl = BuiltinTemplates.load(weight).expect("builtin template");
            assert_eq!(&tmpl.weight, weight);
            assert!(!tmpl.phases.is_empty());
            assert!(tmpl.phases.iter().all(|p| p.prompt.is_empty()));
        }
    }

    #[test]
    fn builtin_small_phase_sequence() {
        let tmpl = BuiltinTemplates.load(&Weight::Small).unwrap();
        assert_eq!(tmpl.phase_ids(), vec!["tiny_spec", "implement", "review"]);
    }

    #[test]
    fn unknown_weight_is_not_found() {
        let err = BuiltinTemplates
            .load(&Weight::from("nonexistent"))
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[test]
    fn duplicate_phase_ids_rejected() {
        let text = r#"
version = 1
weight = "small"

[[phases]]
id = "implement"
name = "Implement"

[[phases]]
id = "implement"
name = "Implement again"
"#;
        let err = Template::from_toml(&Weight::Small, text).unwrap_err();
        assert!(err.to_string().contains("duplicate phase id"));
    }

    #[test]
    fn mismatched_weight_rejected() {
        let text = r#"
version = 1
weight = "large"

[[phases]]
id = "implement"
name = "Implement"
"#;
        assert!(Template::from_toml(&Weight::Small, text).is_err());
    }

    #[test]
    fn layered_store_prefers_override_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("small.toml"),
            r#"
version = 7
weight = "small"
description = "override"

[[phases]]
id = "implement"
name = "Implement"

[phases.gate]
type = "human"
reviewers = 2
"#,
        )
        .unwrap();

        let store = LayeredTemplateStore::new(vec![dir.path().to_path_buf()]);
        let small = store.load(&Weight::Small).unwrap();
        assert_eq!(small.version, 7);
        assert_eq!(small.phases[0].gate.kind, GateType::Human);
        assert_eq!(small.phases[0].gate.reviewers, 2);

        // Weights without an override fall through to the builtins.
        let medium = store.load(&Weight::Medium).unwrap();
        assert_eq!(medium.weight, Weight::Medium);
    }

    #[test]
    fn layered_store_rejects_path_like_weights() {
        let store = LayeredTemplateStore::new(vec![PathBuf::from("/tmp")]);
        let err = store.load(&Weight::from("../etc/passwd")).unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[test]
    fn cache_serves_hits_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trivial.toml");
        let write = |version: u32| {
            std::fs::write(
                &path,
                format!(
                    "version = {version}\nweight = \"trivial\"\n\n[[phases]]\nid = \"implement\"\nname = \"Implement\"\n"
                ),
            )
            .unwrap();
        };
        write(1);

        let store = CachedTemplateStore::new(LayeredTemplateStore::new(vec![dir
            .path()
            .to_path_buf()]));
        assert_eq!(store.load(&Weight::Trivial).unwrap().version, 1);

        write(2);
        assert_eq!(store.load(&Weight::Trivial).unwrap().version, 1);
        assert_eq!(store.cached_len(), 1);

        store.invalidate(&Weight::Trivial);
        assert_eq!(store.load(&Weight::Trivial).unwrap().version, 2);

        store.clear();
        assert_eq!(store.cached_len(), 0);
    }
}
