use anyhow::Result;
use rust_sqlite_tables::{
    Client, Error, FindOptions, LogicalType, Order, Schema, Store, StoreOptions, TableOptions,
    Upsert,
};
use serde_json::{json, Value};

fn people() -> Schema {
    Schema::new()
        .column("id", LogicalType::Increments)
        .column("name", LogicalType::String)
        .column("tags", LogicalType::Array)
        .column("score", LogicalType::Number)
}

async fn open(client: Client) -> Result<Store> {
    Ok(Store::open(":memory:", StoreOptions::new().client(client))?)
}

// Walks the basic lifecycle of a table on one backend.
async fn run_scenario(client: Client) -> Result<()> {
    let store = open(client).await?;
    let t = store.define_table("t", people(), TableOptions::new()).await?;

    let created = t
        .create(json!({"name": "a", "tags": ["x", "y"], "score": 5}))
        .await?
        .expect("created row");
    assert_eq!(created["id"], json!(1));
    assert_eq!(created["tags"], json!(["x", "y"]));
    assert_eq!(created["name"], json!("a"));

    let found = t.find(json!({"name": "a"})).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], created);

    let by_id = t.find_one(json!({"id": created["id"].clone()})).await?;
    assert_eq!(by_id, Some(created.clone()));

    assert_eq!(t.incr("score", json!({"id": 1}), Some(3.0)).await?, 1);
    assert_eq!(t.get("score", json!({"id": 1}), Value::Null).await?, json!(8));
    assert_eq!(t.decr("score", json!({"id": 1}), Some(3.0), false).await?, 1);
    assert_eq!(t.get("score", json!({"id": 1}), Value::Null).await?, json!(5));

    t.create(json!({"name": "b", "tags": [], "score": 1})).await?;
    assert_eq!(t.remove(json!({})).await?, 0);
    assert_eq!(t.count(json!({})).await?, Some(2));
    assert_eq!(t.clear().await?, 2);
    assert_eq!(t.count(json!({})).await?, Some(0));
    assert!(store.has_table("t").await?);

    store.close().await?;
    Ok(())
}

#[tokio::test]
async fn scenario_on_native_backend() -> Result<()> {
    run_scenario(Client::Native).await
}

#[tokio::test]
async fn scenario_on_embedded_backend() -> Result<()> {
    run_scenario(Client::Embedded).await
}

#[tokio::test]
async fn location_passthroughs() -> Result<()> {
    let store = open(Client::Native).await?;
    store.define_table("t", people(), TableOptions::new()).await?;

    store.create("t", json!({"name": "a", "score": 2})).await?;
    store.create("t", json!({"name": "b", "score": 9})).await?;

    let names = store
        .find("t.name", json!({}), &FindOptions::new().order(Order::desc("score")))
        .await?;
    assert_eq!(names, vec![json!("b"), json!("a")]);

    let row = store.find_one("t", json!(["score", ">", 3]), &FindOptions::new()).await?;
    assert_eq!(row.map(|row| row["name"].clone()), Some(json!("b")));

    assert_eq!(store.set("t.score", json!({"name": "a"}), json!(4)).await?, 1);
    assert_eq!(store.get("t.score", json!({"name": "a"}), json!(0)).await?, json!(4));
    assert_eq!(store.get("t.score", json!({"name": "zz"}), json!(-1)).await?, json!(-1));

    assert_eq!(store.incr("t.score", json!({}), None).await?, 2);
    assert_eq!(
        store.max("t.score", json!({}), &Default::default()).await?,
        Some(json!(10))
    );
    assert_eq!(
        store.min("t.score", json!({}), &Default::default()).await?,
        Some(json!(5))
    );
    assert_eq!(store.count("t.name", json!({}), &Default::default()).await?, Some(2));

    assert_eq!(store.remove("t", json!({"name": "a"})).await?, 1);
    assert_eq!(store.clear("t").await?, 1);
    Ok(())
}

#[tokio::test]
async fn unknown_table_fails_before_any_statement() -> Result<()> {
    let statements = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = statements.clone();
    let store = Store::open(
        ":memory:",
        StoreOptions::new().verbose(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }),
    )?;

    let err = store.create("ghost", json!({"a": 1})).await.unwrap_err();
    assert!(matches!(err, Error::UnknownTable(ref name) if name == "ghost"));
    assert!(store.find("ghost.a", json!({}), &FindOptions::new()).await.is_err());
    assert_eq!(statements.load(std::sync::atomic::Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn upsert_and_find_or_create() -> Result<()> {
    let store = open(Client::Embedded).await?;
    let t = store.define_table("t", people(), TableOptions::new()).await?;

    let row = t
        .find_or_create(json!({"name": "a"}), json!({"score": 1}))
        .await?
        .expect("created");
    assert_eq!(row["score"], json!(1));
    assert_eq!(row["name"], json!("a"));

    let again = t
        .find_or_create(json!({"name": "a"}), json!({"score": 99}))
        .await?;
    assert_eq!(again, Some(row));

    match t.update_or_create(json!({"name": "a"}), json!({"score": 7})).await? {
        Upsert::Updated(count) => assert_eq!(count, 1),
        other => panic!("expected an update, got {other:?}"),
    }
    match t.update_or_create(json!({"name": "c"}), json!({"score": 3})).await? {
        Upsert::Created(Some(created)) => {
            assert_eq!(created["name"], json!("c"));
            assert_eq!(created["score"], json!(3));
        }
        other => panic!("expected a create, got {other:?}"),
    }
    assert_eq!(t.count(json!({})).await?, Some(2));
    Ok(())
}
