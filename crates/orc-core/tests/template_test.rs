use std::sync::Arc;

use orc_core::template::{
    BuiltinTemplates, CachedTemplateStore, LayeredTemplateStore, TemplateError, TemplateStore,
};
use orc_core::types::{GateType, Weight};
use tempfile::TempDir;

#[test]
fn builtin_phase_sequences() {
    let cases: [(Weight, &[&str]); 5] = [
        (Weight::Trivial, &["tiny_spec", "implement"]),
        (Weight::Small, &["tiny_spec", "implement", "review"]),
        (
            Weight::Medium,
            &["spec", "tdd_write", "implement", "review", "docs"],
        ),
        (
            Weight::Large,
            &["spec", "tdd_write", "breakdown", "implement", "review", "docs", "validate"],
        ),
        (
            Weight::Greenfield,
            &[
                "research", "spec", "tdd_write", "breakdown", "implement", "review", "docs",
                "validate",
            ],
        ),
    ];
    for (weight, expected) in cases {
        let tmpl = BuiltinTemplates.load(&weight).unwrap();
        assert_eq!(tmpl.version, 1, "{weight}");
        assert_eq!(tmpl.phase_ids(), expected, "{weight}");
    }
}

#[test]
fn override_directory_wins_over_builtin() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("small.toml"),
        r#"
version = 2
weight = "small"
description = "house style"

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
    assert_eq!(small.version, 2);
    assert_eq!(small.phase_ids(), vec!["implement"]);
    assert_eq!(small.phases[0].gate.kind, GateType::Human);
    assert_eq!(small.phases[0].gate.reviewers, 2);

    // Weights without an override still resolve to the built-ins.
    assert_eq!(store.load(&Weight::Medium).unwrap().phases.len(), 5);
}

#[test]
fn override_with_wrong_weight_is_parse_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("large.toml"),
        "version = 1\nweight = \"small\"\n[[phases]]\nid = \"x\"\nname = \"X\"\n",
    )
    .unwrap();
    let store = LayeredTemplateStore::new(vec![dir.path().to_path_buf()]);
    let err = store.load(&Weight::Large).unwrap_err();
    assert!(matches!(err, TemplateError::Parse { .. }));
}

#[test]
fn custom_weight_from_override_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("hotfix.toml"),
        "version = 1\nweight = \"hotfix\"\n[[phases]]\nid = \"implement\"\nname = \"Implement\"\n",
    )
    .unwrap();
    let store = LayeredTemplateStore::new(vec![dir.path().to_path_buf()]);
    let tmpl = store.load(&Weight::from("hotfix")).unwrap();
    assert_eq!(tmpl.phase_ids(), vec!["implement"]);

    let err = store.load(&Weight::from("../hotfix")).unwrap_err();
    assert!(matches!(err, TemplateError::NotFound(_)));
}

#[test]
fn cache_shares_and_invalidates() {
    let store = CachedTemplateStore::new(BuiltinTemplates);
    let a = store.load(&Weight::Medium).unwrap();
    let b = store.load(&Weight::Medium).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(store.cached_len(), 1);

    store.invalidate(&Weight::Medium);
    assert_eq!(store.cached_len(), 0);
    let c = store.load(&Weight::Medium).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(*a, *c);

    assert!(store.load(&Weight::from("nope")).is_err());
    assert_eq!(store.cached_len(), 1);
    store.clear();
    assert_eq!(store.cached_len(), 0);
}
