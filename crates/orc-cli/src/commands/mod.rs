pub mod migrate;
pub mod new;
pub mod patrol;
pub mod recover;
pub mod reset;
pub mod reweight;
pub mod status;

use std::path::PathBuf;

use orc_core::config::Config;
use orc_core::orphan::{OrphanDetector, OsLivenessProbe};
use orc_core::plan::{Generator, Plan};
use orc_core::storage::{FileBackend, PersistenceBackend, StorageError};
use orc_core::template::{CachedTemplateStore, LayeredTemplateStore};

/// Everything a subcommand needs, built once from config and flags.
pub struct Context {
    pub config: Config,
    pub backend: FileBackend,
    pub templates: CachedTemplateStore<LayeredTemplateStore>,
}

impl Context {
    /// `root` overrides `[storage] root` from the config.
    pub fn new(config: Config, root: Option<PathBuf>) -> Self {
        let root = root.unwrap_or_else(|| config.storage.root_path());
        let templates = CachedTemplateStore::new(LayeredTemplateStore::new(
            config.templates.dir_paths(),
        ));
        Self {
            backend: FileBackend::new(root),
            templates,
            config,
        }
    }

    pub fn generator(&self) -> Generator<'_> {
        let generator = Generator::new(&self.templates);
        match &self.config.templates.fallback_weight {
            Some(weight) => generator.with_fallback(weight.clone()),
            None => generator,
        }
    }

    pub fn detector(&self) -> OrphanDetector<OsLivenessProbe> {
        OrphanDetector::os().with_stale_threshold(self.config.orphan.stale_heartbeat())
    }

    /// The stored plan, or `None` when the task has none yet.
    pub fn load_plan_opt(&self, task_id: &str) -> Result<Option<Plan>, StorageError> {
        match self.backend.load_plan(task_id) {
            Ok(plan) => Ok(Some(plan)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `1h02m03s`-style rendering of a duration.
pub fn format_elapsed(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}
