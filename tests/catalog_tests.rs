//! Catalog integration tests: grants, refresh and persistence

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use tablegate::backend::{ConnectionParams, DriverRegistry, EngineType};
use tablegate::catalog::{
    Catalog, CatalogError, DatabaseDef, FileStore, GrantStore, StoreRecord, TokenRecord,
};

use test_utils::drivers::MockDriver;

const SCHEMA_TIMEOUT: Duration = Duration::from_secs(5);

fn def(name: &str) -> DatabaseDef {
    DatabaseDef::new(name, EngineType::MySql, ConnectionParams::database(name))
}

async fn setup(driver: MockDriver, databases: &[&str]) -> (Arc<Catalog>, DriverRegistry, Arc<MockDriver>) {
    let catalog = Arc::new(Catalog::in_memory());
    for name in databases {
        catalog.register_database(def(name)).unwrap();
    }
    let driver = Arc::new(driver);
    let registry = DriverRegistry::new().with_driver(EngineType::MySql, driver.clone());
    catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    (catalog, registry, driver)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_grant_atomicity() {
    let tables: Vec<String> = (0..20).map(|i| format!("t{}", i)).collect();
    let table_refs: Vec<&str> = tables.iter().map(String::as_str).collect();
    let (catalog, _, _) = setup(MockDriver::new().with_tables("shop", &table_refs), &["shop"]).await;
    catalog
        .add_token(TokenRecord::new("u1", "reader", false, None))
        .await
        .unwrap();

    for table in &tables {
        let mut handles = Vec::new();
        for _ in 0..2 {
            let catalog = catalog.clone();
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                catalog.grant_table_access("u1", "shop", &table).await
            }));
        }

        let mut successes = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(CatalogError::AccessAlreadyGranted { .. }) => conflicts += 1,
                Err(e) => panic!("Unexpected error: {}", e),
            }
        }
        assert_eq!((successes, conflicts), (1, 1), "table {}", table);
    }
    assert_eq!(catalog.granted_tables("u1", "shop").len(), tables.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_grants_all_succeed() {
    let (catalog, _, _) = setup(MockDriver::new().with_tables("shop", &["a", "b"]), &["shop"]).await;
    for token in ["u1", "u2", "u3"] {
        catalog
            .add_token(TokenRecord::new(token, token, false, None))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for token in ["u1", "u2", "u3"] {
        for table in ["a", "b"] {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                catalog.grant_table_access(token, "shop", table).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert!(catalog.has_access("u3", "shop", "b"));
}

#[tokio::test]
async fn test_refresh_isolation() {
    let driver = MockDriver::new()
        .with_tables("x", &["old_x"])
        .with_tables("y", &["old_y"]);
    let (catalog, registry, driver) = setup(driver, &["x", "y"]).await;
    assert_eq!(catalog.list_tables("y").unwrap(), vec!["old_y"]);

    driver.set_unreachable("x", true);
    driver.set_tables("x", &["new_x"]);
    driver.set_tables("y", &["new_y", "extra"]);

    let report = catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    assert_eq!(report.refreshed, vec!["y"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "x");

    assert_eq!(catalog.list_tables("x").unwrap(), vec!["old_x"]);
    assert_eq!(catalog.list_tables("y").unwrap(), vec!["extra", "new_y"]);
}

#[tokio::test]
async fn test_round_trip_reflects_live_schema() {
    let driver = MockDriver::new().with_tables("db1", &["a", "b"]);
    let (catalog, registry, driver) = setup(driver, &[]).await;

    catalog.register_database(def("db1")).unwrap();
    catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    assert_eq!(catalog.list_tables("db1").unwrap(), vec!["a", "b"]);

    // Dropped and added tables both show up on the next refresh
    driver.set_tables("db1", &["b", "c"]);
    catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    assert_eq!(catalog.list_tables("db1").unwrap(), vec!["b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_whole_sets_during_refresh() {
    let old: Vec<String> = (0..50).map(|i| format!("old{}", i)).collect();
    let new: Vec<String> = (0..50).map(|i| format!("new{}", i)).collect();
    let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
    let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

    let (catalog, registry, driver) =
        setup(MockDriver::new().with_tables("shop", &old_refs), &["shop"]).await;

    let reader = {
        let catalog = catalog.clone();
        let (mut old, mut new) = (old.clone(), new.clone());
        old.sort();
        new.sort();
        tokio::spawn(async move {
            for _ in 0..500 {
                let seen = catalog.list_tables("shop").unwrap();
                assert!(seen == old || seen == new, "mixed table set observed");
                tokio::task::yield_now().await;
            }
        })
    };

    for round in 0..20 {
        driver.set_tables("shop", if round % 2 == 0 { new_refs.as_slice() } else { old_refs.as_slice() });
        catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    }
    reader.await.unwrap();
}

#[tokio::test]
async fn test_grants_survive_database_removal() {
    let (catalog, registry, _) = setup(MockDriver::new().with_tables("shop", &["orders"]), &["shop"]).await;
    catalog
        .add_token(TokenRecord::new("u1", "reader", false, None))
        .await
        .unwrap();
    catalog.grant_table_access("u1", "shop", "orders").await.unwrap();

    catalog.remove_database("shop").unwrap();
    assert!(matches!(
        catalog.list_tables("shop"),
        Err(CatalogError::DatabaseNotFound(_))
    ));

    catalog.register_database(def("shop")).unwrap();
    catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    assert!(catalog.has_access("u1", "shop", "orders"));
}

#[tokio::test]
async fn test_file_store_restores_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grants.log");
    let driver = Arc::new(MockDriver::new().with_tables("shop", &["orders", "items"]));
    let registry = DriverRegistry::new().with_driver(EngineType::MySql, driver);

    {
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let catalog = Catalog::open(store).await.unwrap();
        catalog.register_database(def("shop")).unwrap();
        catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;

        catalog
            .add_token(TokenRecord::new("a1", "root", true, None))
            .await
            .unwrap();
        catalog
            .add_token(TokenRecord::new("u1", "reader", false, Some("bi".into())))
            .await
            .unwrap();
        catalog.grant_table_access("u1", "shop", "orders").await.unwrap();
    }

    let store = Arc::new(FileStore::open(&path).await.unwrap());
    let records = store.load().await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(matches!(records[2], StoreRecord::Grant(_)));

    let catalog = Catalog::open(store).await.unwrap();
    assert!(catalog.token("a1").unwrap().admin);
    assert_eq!(
        catalog.token("u1").unwrap().description.as_deref(),
        Some("bi")
    );

    // Databases are not durable; grants apply again once it is re-registered
    catalog.register_database(def("shop")).unwrap();
    catalog.refresh_tables(&registry, SCHEMA_TIMEOUT).await;
    assert!(catalog.has_access("u1", "shop", "orders"));
    assert!(!catalog.has_access("u1", "shop", "items"));
    assert!(matches!(
        catalog.grant_table_access("u1", "shop", "orders").await,
        Err(CatalogError::AccessAlreadyGranted { .. })
    ));
}
