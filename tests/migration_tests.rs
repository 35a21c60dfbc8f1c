/// Migration workflow tests
///
/// Failure rollback, dialect specific DDL, table rebuilds and renames,
/// executed against the in-memory database.
/// Run with: cargo test --test migration_tests

use docmeta::{
    Database, DialectKind, DocType, EngineConfig, Field, FieldType, MemoryDatabase, MetaEngine,
    MigrationOptions, Stage,
};
use std::sync::Arc;

fn user() -> DocType {
    DocType::new("User", "Core")
        .with_field(Field::new("name", "Name", FieldType::Data).required())
        .with_field(Field::new("email", "Email", FieldType::Data).required().unique())
}

fn note() -> DocType {
    DocType::new("Note", "Desk")
        .with_field(Field::new("title", "Title", FieldType::Data).required())
        .with_field(Field::new("body", "Body", FieldType::LongText))
}

fn engine(config: EngineConfig, db: &Arc<MemoryDatabase>) -> MetaEngine {
    MetaEngine::new(config, Arc::clone(db) as Arc<dyn Database>).unwrap()
}

async fn exec(db: &MemoryDatabase, sql: &str) {
    db.execute(sql, &[]).await.unwrap();
}

#[tokio::test]
async fn test_failed_statement_rolls_back_whole_migration() {
    let db = Arc::new(MemoryDatabase::new());
    exec(&db, r#"CREATE TABLE "tabUser" ()"#).await;
    let engine = engine(EngineConfig::new(), &db);
    engine.register(user()).await.unwrap();

    db.fail_on("unique_tabuser_email");
    let result = engine.execute_migration("User", MigrationOptions::new()).await;
    assert!(!result.success);
    assert_eq!(result.stage, Stage::Failed);
    assert!(result.errors[0].contains("statement 3 of 3"), "{:?}", result.errors);
    assert!(result.errors.iter().any(|e| e.starts_with("caused by")));
    assert!(result.migration.is_none());

    // the two ADD COLUMN statements that did run are gone as well
    assert!(db.introspect_columns("tabUser").await.unwrap().is_empty());
    assert!(engine.workflow().history().list("User").await.unwrap().is_empty());

    db.clear_failures();
    let retry = engine.execute_migration("User", MigrationOptions::new()).await;
    assert!(retry.is_applied(), "{:?}", retry.errors);
    assert_eq!(retry.migration.unwrap().version, 1);
}

#[tokio::test]
async fn test_postgres_changes_type_in_place() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabProduct" ("name" VARCHAR(140) NOT NULL DEFAULT '', "qty" VARCHAR(140))"#,
    )
    .await;
    exec(&db, r#"INSERT INTO "tabProduct" VALUES ('bolt', '3'), ('nut', NULL)"#).await;

    let engine = engine(EngineConfig::new().dialect(DialectKind::Postgres), &db);
    engine
        .register(
            DocType::new("Product", "Stock")
                .with_field(Field::new("name", "Name", FieldType::Data).required())
                .with_field(Field::new("qty", "Quantity", FieldType::Int)),
        )
        .await
        .unwrap();

    let result = engine.execute_migration("Product", MigrationOptions::new()).await;
    assert!(result.is_applied(), "{:?}", result.errors);
    assert!(result.destructive);
    assert_eq!(
        result.sql,
        vec![r#"ALTER TABLE "tabProduct" ALTER COLUMN "qty" TYPE BIGINT USING CAST("qty" AS BIGINT)"#.to_string()]
    );

    let rows = db
        .query(r#"SELECT "qty" FROM "tabProduct" WHERE "name" = 'bolt'"#, &[])
        .await
        .unwrap();
    assert_eq!(rows[0][0].as_i64(), Some(3));

    let again = engine.workflow().plan("Product").await;
    assert!(again.sql.is_empty(), "{:?}", again.sql);
}

#[tokio::test]
async fn test_postgres_bad_value_keeps_old_type() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabProduct" ("name" VARCHAR(140) NOT NULL DEFAULT '', "qty" VARCHAR(140))"#,
    )
    .await;
    exec(&db, r#"INSERT INTO "tabProduct" VALUES ('bolt', 'many')"#).await;

    let engine = engine(EngineConfig::new().dialect(DialectKind::Postgres), &db);
    engine
        .register(
            DocType::new("Product", "Stock")
                .with_field(Field::new("name", "Name", FieldType::Data).required())
                .with_field(Field::new("qty", "Quantity", FieldType::Int)),
        )
        .await
        .unwrap();

    let result = engine.execute_migration("Product", MigrationOptions::new()).await;
    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.contains("many")), "{:?}", result.errors);

    let columns = db.introspect_columns("tabProduct").await.unwrap();
    let qty = columns.iter().find(|c| c.name == "qty").unwrap();
    assert_eq!(qty.data_type, "VARCHAR(140)");
}

#[tokio::test]
async fn test_sqlite_without_drop_column_rebuilds_table() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '', "body" TEXT, "fax" TEXT)"#,
    )
    .await;
    exec(&db, r#"INSERT INTO "tabNote" VALUES ('a', 'first', '555'), ('b', NULL, NULL)"#).await;

    let engine = engine(EngineConfig::new().sqlite_drop_column(false), &db);
    engine.register(note()).await.unwrap();

    let result = engine.execute_migration("Note", MigrationOptions::new()).await;
    assert!(result.is_applied(), "{:?}", result.errors);
    assert!(result.sql[0].starts_with(r#"CREATE TABLE "__tmp_tabNote""#));
    assert_eq!(
        result.sql[1],
        r#"INSERT INTO "__tmp_tabNote" ("title", "body") SELECT "title", "body" FROM "tabNote""#
    );
    assert_eq!(result.sql[2], r#"DROP TABLE "tabNote""#);
    assert_eq!(result.sql[3], r#"ALTER TABLE "__tmp_tabNote" RENAME TO "tabNote""#);

    assert_eq!(db.table_names().unwrap(), vec!["tabNote"]);
    let names: Vec<String> = db
        .introspect_columns("tabNote")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["title", "body"]);
    let rows = db
        .query(r#"SELECT "body" FROM "tabNote" WHERE "title" = 'a'"#, &[])
        .await
        .unwrap();
    assert_eq!(rows[0][0].as_str(), Some("first"));
}

#[tokio::test]
async fn test_annotated_rename_keeps_data() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabUser" ("name" VARCHAR(140) NOT NULL DEFAULT '', "email" VARCHAR(140) NOT NULL DEFAULT '', "mobile" VARCHAR(140))"#,
    )
    .await;
    exec(&db, r#"CREATE UNIQUE INDEX "unique_tabuser_email" ON "tabUser" ("email")"#).await;
    exec(&db, r#"INSERT INTO "tabUser" VALUES ('ann', 'ann@example.com', '0123')"#).await;

    let engine = engine(EngineConfig::new(), &db);
    engine
        .register(user().with_field(Field::new("phone", "Phone", FieldType::Data).renamed_from("mobile")))
        .await
        .unwrap();

    let result = engine.execute_migration("User", MigrationOptions::new()).await;
    assert!(result.is_applied(), "{:?}", result.errors);
    assert!(!result.destructive);
    assert_eq!(
        result.sql,
        vec![r#"ALTER TABLE "tabUser" RENAME COLUMN "mobile" TO "phone""#.to_string()]
    );
    assert_eq!(
        result.rollback_sql,
        vec![r#"ALTER TABLE "tabUser" RENAME COLUMN "phone" TO "mobile""#.to_string()]
    );

    let rows = db.query(r#"SELECT "phone" FROM "tabUser""#, &[]).await.unwrap();
    assert_eq!(rows[0][0].as_str(), Some("0123"));
}

#[tokio::test]
async fn test_validate_data_reports_nulls_and_long_values() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabNote" ("title" VARCHAR(140), "body" TEXT)"#,
    )
    .await;
    exec(
        &db,
        r#"INSERT INTO "tabNote" VALUES (NULL, 'x'), ('a title that is far too long', NULL)"#,
    )
    .await;

    let engine = engine(EngineConfig::new(), &db);
    engine
        .register(
            DocType::new("Note", "Desk")
                .with_field(Field::new("title", "Title", FieldType::Data).required().length(10))
                .with_field(Field::new("body", "Body", FieldType::LongText)),
        )
        .await
        .unwrap();

    let plan = engine
        .execute_migration("Note", MigrationOptions::new().dry_run(true).validate_data(true))
        .await;
    assert!(plan.success);
    assert!(plan.destructive);
    assert_eq!(plan.warnings.len(), 2, "{:?}", plan.warnings);
    assert!(plan.warnings[0].starts_with("title: 1 row(s) hold NULL"));
    assert_eq!(plan.warnings[1], "title: 1 row(s) are longer than 10 characters");
    assert_eq!(db.executed_statements().len(), 2);
}

#[tokio::test]
async fn test_per_run_override_of_destructive_setting() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '', "body" TEXT, "fax" TEXT)"#,
    )
    .await;
    let engine = engine(EngineConfig::new(), &db);
    engine.register(note()).await.unwrap();

    let blocked = engine
        .execute_migration("Note", MigrationOptions::new().allow_destructive(false))
        .await;
    assert!(!blocked.success);
    assert_eq!(blocked.stage, Stage::Failed);
    assert_eq!(db.introspect_columns("tabNote").await.unwrap().len(), 3);

    let applied = engine
        .execute_migration("Note", MigrationOptions::new().description("drop fax"))
        .await;
    assert!(applied.is_applied(), "{:?}", applied.errors);
    assert_eq!(applied.migration.unwrap().description, "drop fax");
}

#[tokio::test]
async fn test_required_date_added_to_populated_table() {
    let db = Arc::new(MemoryDatabase::new());
    exec(
        &db,
        r#"CREATE TABLE "tabNote" ("title" VARCHAR(140) NOT NULL DEFAULT '', "body" TEXT)"#,
    )
    .await;
    exec(&db, r#"INSERT INTO "tabNote" VALUES ('a', NULL), ('b', 'x')"#).await;

    let engine = engine(EngineConfig::new(), &db);
    engine
        .register(note().with_field(Field::new("due", "Due", FieldType::Date).required()))
        .await
        .unwrap();

    let result = engine
        .execute_migration("Note", MigrationOptions::new().validate_data(true))
        .await;
    assert!(result.is_applied(), "{:?}", result.errors);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert!(result.sql[0].contains("NOT NULL DEFAULT '0001-01-01'"), "{}", result.sql[0]);

    let rows = db
        .query(r#"SELECT "due" FROM "tabNote" WHERE "due" IS NOT NULL"#, &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}
