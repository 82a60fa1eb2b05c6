// Copyright 2026 Tidings Team.
//
// Shared helpers for tidings-store integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sea_orm::DatabaseConnection;
use tempfile::NamedTempFile;
use tidings_store::migration::{Migrator, MigratorTrait};
use tidings_store::{ChangeSink, RowChange};

pub async fn create_test_db(path: &NamedTempFile) -> DatabaseConnection {
    create_test_db_at_version(path, None).await
}

pub async fn create_test_db_at_version(
    path: &NamedTempFile,
    steps: Option<u32>,
) -> DatabaseConnection {
    let db = sea_orm::Database::connect(&format!(
        "sqlite:{}?mode=rwc",
        path.path().to_str().unwrap().replace("\\", "/")
    ))
    .await
    .expect("Failed to connect to database");

    Migrator::up(&db, steps)
        .await
        .expect("Failed to run migrations");

    db
}

/// Change sink that remembers everything published to it
#[derive(Default)]
pub struct RecordingSink {
    pub changes: Mutex<Vec<RowChange>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn taken(&self) -> Vec<RowChange> {
        std::mem::take(&mut *self.changes.lock().unwrap())
    }
}

impl ChangeSink for RecordingSink {
    fn publish(&self, change: RowChange) {
        self.changes.lock().unwrap().push(change);
    }
}

pub async fn tick() {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}
