/// Registry, overlay and configuration tests
///
/// Run with: cargo test --test registry_tests

use docmeta::{
    CustomField, DialectKind, DocType, EngineConfig, Field, FieldType, IssueKind, MemoryDatabase,
    MetaEngine, MetaError, MetaOverlay,
};
use std::sync::Arc;
use tempfile::TempDir;

fn user() -> DocType {
    DocType::new("User", "Core")
        .with_field(Field::new("name", "Name", FieldType::Data).required())
        .with_field(Field::new("email", "Email", FieldType::Data).required().unique())
}

fn engine() -> MetaEngine {
    MetaEngine::new(EngineConfig::new(), Arc::new(MemoryDatabase::new())).unwrap()
}

#[tokio::test]
async fn test_register_get_unregister() {
    let engine = engine();
    let registry = engine.registry();

    registry.register(user()).await.unwrap();
    registry
        .register(DocType::new("Note", "Desk").with_field(Field::new("title", "Title", FieldType::Data)))
        .await
        .unwrap();

    assert!(registry.is_registered("User"));
    assert_eq!(registry.get("User").unwrap().fields.len(), 2);
    assert_eq!(registry.count(), 2);
    assert_eq!(registry.get_by_module("Core").unwrap().len(), 1);
    assert_eq!(registry.modules().unwrap(), vec!["Core", "Desk"]);

    let removed = registry.unregister("User").await.unwrap();
    assert_eq!(removed.name, "User");
    assert!(matches!(registry.get("User"), Err(MetaError::NotFound { .. })));
    assert!(matches!(
        registry.unregister("User").await,
        Err(MetaError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_invalid_records() {
    let engine = engine();
    engine.register(user()).await.unwrap();

    assert!(matches!(
        engine.register(user()).await,
        Err(MetaError::AlreadyExists { .. })
    ));

    let doubled = DocType::new("Contact", "Core")
        .with_field(Field::new("phone", "Phone", FieldType::Data))
        .with_field(Field::new("phone", "Phone again", FieldType::Data));
    let err = engine.register(doubled).await.unwrap_err();
    assert!(err.issues().iter().any(|i| i.kind == IssueKind::Duplicate));
    assert!(!engine.registry().is_registered("Contact"));
}

#[tokio::test]
async fn test_replace_invalidates_cached_meta() {
    let engine = engine();
    engine.register(user()).await.unwrap();
    let before = engine.get_effective_meta("User").await.unwrap();
    assert!(engine.factory().is_cached("User"));

    engine
        .registry()
        .replace(user().with_field(Field::new("phone", "Phone", FieldType::Data)))
        .await
        .unwrap();
    let after = engine.get_effective_meta("User").await.unwrap();
    assert!(!before.has_field("phone"));
    assert!(after.has_field("phone"));
}

#[tokio::test]
async fn test_property_setters_apply_once() {
    let engine = engine();
    engine.register(user()).await.unwrap();
    let overlay = engine.overlay();

    overlay
        .set_property("User", Some("email"), "label", "E-mail")
        .unwrap();
    overlay
        .set_property("User", Some("email"), "required", false)
        .unwrap();

    let base = engine.registry().get("User").unwrap();
    let once = overlay.apply_properties(&base).unwrap();
    let twice = overlay.apply_properties(&once).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once.field("email").unwrap().label, "E-mail");
    assert!(!once.field("email").unwrap().required);

    // "required" and "reqd" share one slot
    assert_eq!(overlay.get_properties("User").unwrap().len(), 2);

    let meta = engine.get_effective_meta("User").await.unwrap();
    assert_eq!(meta.get_label("email"), Some("E-mail"));
}

#[tokio::test]
async fn test_unsupported_property_refused() {
    let engine = engine();
    engine.register(user()).await.unwrap();
    let err = engine
        .overlay()
        .set_property("User", Some("email"), "fieldtype", "Int")
        .unwrap_err();
    assert!(matches!(err, MetaError::PropertyNotSupported { .. }));
}

#[tokio::test]
async fn test_setter_cannot_break_base_field() {
    let engine = engine();
    engine
        .register(
            user().with_field(Field::new("manager", "Manager", FieldType::Link).options("User")),
        )
        .await
        .unwrap();

    let err = engine
        .set_property("User", Some("manager"), "options", "")
        .unwrap_err();
    assert!(err.issues().iter().any(|i| i.kind == IssueKind::MissingOptions));
    let err = engine.set_property("User", Some("email"), "label", "").unwrap_err();
    assert!(matches!(err, MetaError::ValidationFailed(_)));
    assert!(engine.overlay().get_properties("User").unwrap().is_empty());

    engine
        .set_property("User", Some("manager"), "options", "Employee")
        .unwrap();
    let meta = engine.get_effective_meta("User").await.unwrap();
    assert_eq!(meta.doctype().field("manager").unwrap().options.as_deref(), Some("Employee"));

    assert!(matches!(
        engine.set_property("Ghost", Some("x"), "hidden", true),
        Err(MetaError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_custom_field_clash_with_base_field() {
    let engine = engine();
    engine.register(user()).await.unwrap();

    let err = engine
        .add_custom_field(CustomField::new("User", Field::new("email", "Email", FieldType::Data)))
        .unwrap_err();
    assert!(matches!(err, MetaError::AlreadyExists { .. }));

    let missing = engine
        .add_custom_field(CustomField::new("Ghost", Field::new("cf_x", "X", FieldType::Data)))
        .unwrap_err();
    assert!(matches!(missing, MetaError::NotFound { .. }));
}

#[tokio::test]
async fn test_overlay_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overlay.msgpack");

    let engine = engine();
    engine.register(user()).await.unwrap();
    engine
        .add_custom_field(CustomField::new("User", Field::new("cf_phone", "Phone", FieldType::Data)))
        .unwrap();
    engine
        .overlay()
        .set_property("User", Some("email"), "label", "E-mail")
        .unwrap();
    engine.overlay().save_snapshot(&path).unwrap();

    let restored = MetaOverlay::new();
    assert!(restored.load_snapshot(&path).unwrap());
    let base = engine.registry().get("User").unwrap();
    let effective = restored.effective(&base).unwrap();
    assert!(effective.has_field("cf_phone"));
    assert_eq!(effective.field("email").unwrap().label, "E-mail");

    let empty = MetaOverlay::new();
    assert!(!empty.load_snapshot(dir.path().join("missing.msgpack")).unwrap());
}

#[tokio::test]
async fn test_engine_loads_directory() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(
        dir.path().join("note.json"),
        r#"{"name": "Note", "module": "Desk", "permissions": [], "fields": [{"fieldname": "title", "label": "Title", "fieldtype": "Data"}]}"#,
    )
    .await
    .unwrap();
    tokio::fs::write(dir.path().join("bad.json"), r#"{"name": "Bad"}"#)
        .await
        .unwrap();
    tokio::fs::write(
        dir.path().join("no_perms.json"),
        r#"{"name": "Memo", "module": "Desk", "fields": []}"#,
    )
    .await
    .unwrap();

    let engine = engine();
    let report = engine.load_dir(dir.path()).await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.loaded, vec!["Note"]);
    assert_eq!(report.failures.len(), 2);
    for failure in &report.failures {
        assert!(matches!(failure.error, MetaError::ValidationFailed(_)));
    }
    let memo = report
        .failures
        .iter()
        .find(|f| f.path.ends_with("no_perms.json"))
        .unwrap();
    assert!(memo.error.issues().iter().any(|i| i.field == "permissions"));
    assert!(!engine.registry().is_registered("Memo"));

    let meta = engine.get_effective_meta("Note").await.unwrap();
    assert_eq!(meta.get_valid_column_names(), vec!["title"]);
}

#[tokio::test]
async fn test_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("docmeta.json");
    tokio::fs::write(&path, r#"{"dialect": "postgres", "allow_destructive": false}"#)
        .await
        .unwrap();

    let config = EngineConfig::from_file(&path).await.unwrap();
    assert_eq!(config.dialect, DialectKind::Postgres);
    assert!(!config.allow_destructive);
    assert_eq!(config.table_prefix, "tab");
    assert_eq!(config.table_name("User"), "tabUser");

    tokio::fs::write(&path, r#"{"meta_cache_capacity": 0}"#).await.unwrap();
    assert!(matches!(
        EngineConfig::from_file(&path).await,
        Err(MetaError::Config(_))
    ));
}
