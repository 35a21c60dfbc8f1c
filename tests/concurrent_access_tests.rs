/// Concurrent access tests
///
/// Registry writes are queued, meta lookups are single-flight and the
/// in-memory database serializes transactions.
/// Run with: cargo test --test concurrent_access_tests

use docmeta::{
    Database, DocType, EngineConfig, Field, FieldType, MemoryDatabase, MetaEngine, MetaError,
};
use std::sync::Arc;
use tokio::sync::Barrier;

fn user() -> DocType {
    DocType::new("User", "Core")
        .with_field(Field::new("name", "Name", FieldType::Data).required())
        .with_field(Field::new("email", "Email", FieldType::Data).required().unique())
}

fn engine() -> Arc<MetaEngine> {
    Arc::new(MetaEngine::new(EngineConfig::new(), Arc::new(MemoryDatabase::new())).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_meta_shares_one_build() {
    let engine = engine();
    engine.register(user()).await.unwrap();

    let num_tasks = 16;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for _ in 0..num_tasks {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.get_effective_meta("User").await.unwrap()
        }));
    }

    let mut metas = vec![];
    for handle in handles {
        metas.push(handle.await.unwrap());
    }
    for meta in &metas {
        assert!(Arc::ptr_eq(meta, &metas[0]), "lookups built more than one meta");
    }

    engine.factory().invalidate_meta("User");
    let rebuilt = engine.get_effective_meta("User").await.unwrap();
    assert!(!Arc::ptr_eq(&rebuilt, &metas[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_same_name_once() {
    let engine = engine();
    let num_tasks = 8;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for _ in 0..num_tasks {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.register(user()).await
        }));
    }

    let mut ok = 0;
    let mut clashes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(MetaError::AlreadyExists { .. }) => clashes += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(clashes, num_tasks - 1);
    assert_eq!(engine.registry().count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_distinct_names() {
    let engine = engine();
    let mut handles = vec![];

    for task_id in 0..20 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let doctype = DocType::new(format!("Doc{}", task_id), if task_id % 2 == 0 { "Even" } else { "Odd" })
                .with_field(Field::new("title", "Title", FieldType::Data));
            engine.register(doctype).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(engine.registry().count(), 20);
    assert_eq!(engine.registry().count_by_module("Even"), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_registration() {
    let engine = engine();
    engine.register(user()).await.unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for i in 0..50 {
                engine
                    .register(DocType::new(format!("Extra{}", i), "Desk"))
                    .await
                    .unwrap();
            }
        })
    };
    let reader = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for _ in 0..200 {
                assert!(engine.registry().get("User").is_ok());
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(engine.registry().count(), 51);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transactions_are_serialized() {
    let db = Arc::new(MemoryDatabase::new());
    db.execute(r#"CREATE TABLE "tabCounter" ("n" INTEGER NOT NULL)"#, &[])
        .await
        .unwrap();
    db.execute(r#"INSERT INTO "tabCounter" VALUES (0)"#, &[])
        .await
        .unwrap();

    let mut handles = vec![];
    for _ in 0..10 {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move {
            let mut tx = db.begin().await.unwrap();
            tx.execute(r#"UPDATE "tabCounter" SET "n" = "n" + 1"#, &[])
                .await
                .unwrap();
            tokio::task::yield_now().await;
            tx.commit().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let rows = db.query(r#"SELECT "n" FROM "tabCounter""#, &[]).await.unwrap();
    assert_eq!(rows[0][0].as_i64(), Some(10));
}
