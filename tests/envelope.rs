// tests/envelope.rs

//! Data envelope semantics: fork/merge, alias selection, history.

use std::collections::BTreeMap;

use serde_json::json;

use lightflow::data::{DataEnvelope, DataSlice};
use lightflow::errors::LightflowError;

fn envelope_with(slots: &[(&str, serde_json::Value)]) -> DataEnvelope {
    let mut env = DataEnvelope::new();
    for (slot, value) in slots {
        env.set_value(slot.to_string(), value.clone());
    }
    env
}

#[test]
fn merge_of_forked_envelope_is_identity() {
    let mut env = envelope_with(&[("x", json!(1)), ("y", json!("two"))]);
    env.append_history("producer");

    let merged = DataEnvelope::merge(vec![("producer".to_string(), env.fork())]);

    assert_eq!(merged, env);
}

#[test]
fn merge_preserves_parent_order() {
    let left = envelope_with(&[("x", json!(1))]);
    let right = envelope_with(&[("y", json!(2))]);

    let merged = DataEnvelope::merge(vec![
        ("b".to_string(), left),
        ("c".to_string(), right),
    ]);

    let slots: Vec<&str> = merged.slices().map(|s| s.slot.as_str()).collect();
    assert_eq!(slots, vec!["x", "y"]);
}

#[test]
fn merge_disambiguates_clashing_slots_with_parent_prefix() {
    let first = envelope_with(&[("value", json!(5))]);
    let second = envelope_with(&[("value", json!(25))]);

    let merged = DataEnvelope::merge(vec![
        ("put".to_string(), first),
        ("square".to_string(), second),
    ]);

    assert_eq!(merged.len(), 2);
    assert_eq!(merged.value("value"), Some(&json!(5)));
    assert_eq!(merged.value("square.value"), Some(&json!(25)));
}

#[test]
fn select_for_task_applies_alias_map() {
    let env = envelope_with(&[("x", json!(1)), ("y", json!(2))]);

    let mut aliases = BTreeMap::new();
    aliases.insert("first".to_string(), "x".to_string());

    let view = env.select_for_task("consumer", &aliases, false).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view.value("first"), Some(&json!(1)));
    assert_eq!(view.value("x"), Some(&json!(1)));
}

#[test]
fn select_for_task_rejects_unknown_alias() {
    let env = envelope_with(&[("x", json!(1))]);

    let mut aliases = BTreeMap::new();
    aliases.insert("missing".to_string(), "nope".to_string());

    let err = env.select_for_task("consumer", &aliases, false).unwrap_err();
    assert!(matches!(err, LightflowError::UnknownAlias { .. }));
}

#[test]
fn select_for_task_enforces_required_input() {
    let env = DataEnvelope::new();
    let err = env
        .select_for_task("consumer", &BTreeMap::new(), true)
        .unwrap_err();
    assert!(matches!(err, LightflowError::EmptyInput(_)));
}

#[test]
fn empty_alias_map_passes_everything_through() {
    let env = envelope_with(&[("x", json!(1)), ("y", json!(2))]);
    let view = env.select_for_task("consumer", &BTreeMap::new(), false).unwrap();
    assert_eq!(view, env);
}

#[test]
fn history_is_appended_to_every_slice() {
    let mut env = envelope_with(&[("x", json!(1)), ("y", json!(2))]);
    env.append_history("a");
    env.append_history("b");

    for slice in env.slices() {
        assert_eq!(slice.history, vec!["a".to_string(), "b".to_string()]);
    }
}

#[test]
fn duplicate_slots_are_rejected() {
    let mut env = envelope_with(&[("x", json!(1))]);
    let err = env.push(DataSlice::new("x", json!(2))).unwrap_err();
    assert!(matches!(err, LightflowError::DataRouting(_)));
}

#[test]
fn restricted_to_extracts_a_single_slot() {
    let env = envelope_with(&[("x", json!(1)), ("y", json!(2))]);

    let only_x = env.restricted_to("x").unwrap();
    assert_eq!(only_x.len(), 1);
    assert_eq!(only_x.value("x"), Some(&json!(1)));

    assert!(env.restricted_to("z").is_none());
}
