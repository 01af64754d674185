//! Task orchestration core: weighted plan templates, plan generation and
//! migration, per-task execution state, and orphaned-executor recovery.

pub mod config;
pub mod migrate;
pub mod orphan;
pub mod patrol;
pub mod plan;
pub mod staleness;
pub mod state;
pub mod storage;
pub mod template;
pub mod types;
