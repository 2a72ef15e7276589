use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use synclite_types::{HybridTimestamp, Mutation, MutationKind, Patch, RecordId, VersionToken};

// ── MutationKind ─────────────────────────────────────────────────

#[test]
fn kind_string_form_round_trips() {
    for kind in [
        MutationKind::Create,
        MutationKind::Update,
        MutationKind::Delete,
    ] {
        assert_eq!(MutationKind::parse(kind.as_str()), Some(kind));
    }
}

#[test]
fn kind_parse_rejects_unknown() {
    assert_eq!(MutationKind::parse("upsert"), None);
    assert_eq!(MutationKind::parse(""), None);
}

// ── Patch ────────────────────────────────────────────────────────

#[test]
fn empty_patch() {
    let patch = Patch::new();
    assert!(patch.is_empty());
    assert_eq!(patch.fields().count(), 0);
}

#[test]
fn set_and_get() {
    let mut patch = Patch::new();
    patch.set("title", json!("hello")).set("count", json!(3));
    assert_eq!(patch.get("title"), Some(&json!("hello")));
    assert_eq!(patch.get("count"), Some(&json!(3)));
    assert_eq!(patch.get("missing"), None);
}

#[test]
fn merge_later_values_win() {
    let mut earlier = Patch::from_fields([("a", json!(1)), ("b", json!(2))]);
    let later = Patch::from_fields([("b", json!(20)), ("c", json!(30))]);
    earlier.merge(&later);

    assert_eq!(earlier.get("a"), Some(&json!(1)));
    assert_eq!(earlier.get("b"), Some(&json!(20)));
    assert_eq!(earlier.get("c"), Some(&json!(30)));
}

#[test]
fn apply_to_sets_fields() {
    let patch = Patch::from_fields([("title", json!("note")), ("pinned", json!(true))]);
    let mut fields = BTreeMap::new();
    patch.apply_to(&mut fields);

    assert_eq!(fields.get("title"), Some(&json!("note")));
    assert_eq!(fields.get("pinned"), Some(&json!(true)));
}

#[test]
fn apply_to_null_removes_field() {
    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    fields.insert("stale".to_string(), json!("x"));
    fields.insert("kept".to_string(), json!("y"));

    let patch = Patch::from_fields([("stale", Value::Null)]);
    patch.apply_to(&mut fields);

    assert!(!fields.contains_key("stale"));
    assert_eq!(fields.get("kept"), Some(&json!("y")));
}

#[test]
fn replacement_nulls_out_dropped_fields() {
    let mut previous: BTreeMap<String, Value> = BTreeMap::new();
    previous.insert("title".to_string(), json!("old"));
    previous.insert("obsolete".to_string(), json!("x"));

    let mut wanted: BTreeMap<String, Value> = BTreeMap::new();
    wanted.insert("title".to_string(), json!("new"));
    wanted.insert("extra".to_string(), json!(1));

    let patch = Patch::replacement(&wanted, &previous);
    assert_eq!(patch.get("title"), Some(&json!("new")));
    assert_eq!(patch.get("extra"), Some(&json!(1)));
    // The dropped field is an explicit null so apply_to removes it.
    assert_eq!(patch.get("obsolete"), Some(&Value::Null));

    let mut fields = previous;
    patch.apply_to(&mut fields);
    assert_eq!(fields, wanted);
}

#[test]
fn patch_serde_is_transparent() {
    let patch = Patch::from_fields([("a", json!(1))]);
    let encoded = serde_json::to_string(&patch).unwrap();
    assert_eq!(encoded, r#"{"a":1}"#);
    let decoded: Patch = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, patch);
}

// ── Mutation constructors ────────────────────────────────────────

#[test]
fn create_has_no_base_version_and_no_seq() {
    let m = Mutation::create(
        "notes",
        RecordId::new(),
        Patch::from_fields([("title", json!("t"))]),
        HybridTimestamp::new(10, 0),
    );
    assert_eq!(m.seq, 0);
    assert_eq!(m.kind, MutationKind::Create);
    assert_eq!(m.base_version, None);
}

#[test]
fn update_carries_base_version() {
    let m = Mutation::update(
        "notes",
        RecordId::from("n-1"),
        Patch::new(),
        HybridTimestamp::new(10, 0),
        Some(VersionToken::new("v7")),
    );
    assert_eq!(m.kind, MutationKind::Update);
    assert_eq!(m.base_version, Some(VersionToken::new("v7")));
}

#[test]
fn delete_has_empty_patch() {
    let m = Mutation::delete(
        "notes",
        RecordId::from("n-1"),
        HybridTimestamp::new(10, 0),
        Some(VersionToken::new("v1")),
    );
    assert_eq!(m.kind, MutationKind::Delete);
    assert!(m.patch.is_empty());
}

#[test]
fn mutation_serde_round_trip() {
    let m = Mutation::update(
        "notes",
        RecordId::from("n-1"),
        Patch::from_fields([("body", json!("text"))]),
        HybridTimestamp::new(99, 4),
        Some(VersionToken::new("v2")),
    );
    let encoded = serde_json::to_string(&m).unwrap();
    let decoded: Mutation = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, m);
}
