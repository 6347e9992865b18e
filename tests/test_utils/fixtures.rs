//! Gateway fixtures

use std::sync::Arc;

use tablegate::backend::{ConnectionParams, DriverRegistry, EngineType};
use tablegate::catalog::{Catalog, DatabaseDef};
use tablegate::gateway::{GetDataRequest, GrantRequest};
use tablegate::{Gateway, GatewayConfig};

use super::drivers::MockDriver;

pub const ADMIN: &str = "admin-token";
pub const USER: &str = "user-token";

/// Gateway over an in-memory catalog with one admin and one user token
pub struct TestGateway {
    pub gateway: Gateway,
    pub catalog: Arc<Catalog>,
    pub driver: Arc<MockDriver>,
}

impl TestGateway {
    /// `driver` serves `engine`; no databases registered yet
    pub async fn new(engine: EngineType, driver: MockDriver, config: GatewayConfig) -> Self {
        let catalog = Arc::new(Catalog::in_memory());
        let driver = Arc::new(driver);
        let registry = DriverRegistry::new().with_driver(engine, driver.clone());
        let gateway = Gateway::new(catalog.clone(), registry, config);

        gateway
            .tokens()
            .install_token(ADMIN, "admin", true, None)
            .await
            .unwrap();
        gateway
            .tokens()
            .install_token(USER, "reader", false, None)
            .await
            .unwrap();

        Self {
            gateway,
            catalog,
            driver,
        }
    }

    /// Register `name` and scan it
    pub async fn register(&self, name: &str, engine: EngineType) {
        self.catalog
            .register_database(DatabaseDef::new(
                name,
                engine,
                ConnectionParams::database(name),
            ))
            .unwrap();
        self.gateway.refresh_tables().await;
    }

    pub async fn grant(&self, database: &str, table: &str) {
        self.catalog
            .grant_table_access(USER, database, table)
            .await
            .unwrap();
    }
}

pub fn get_data(token: &str, database: &str, query: &str) -> GetDataRequest {
    GetDataRequest {
        token: token.to_string(),
        database: database.to_string(),
        query: query.to_string(),
    }
}

pub fn grant_request(admin: &str, user: &str, database: &str, table: &str) -> GrantRequest {
    GrantRequest {
        admin_token: admin.to_string(),
        user_token: user.to_string(),
        database: database.to_string(),
        table: table.to_string(),
    }
}
