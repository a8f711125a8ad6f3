//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `mod.rs` - Origin locations and per-item candidate locations
//! - `orders.rs` - Orders, location groups and the tax ledger

mod orders;

use crate::collaborators::{LocationCatalog, StoreError};
use crate::domain::{Address, ItemId, LocationId, OriginLocation};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    // =========================================================================
    // Origin locations
    // =========================================================================

    /// Replace the merchant's origin locations, preserving list order.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn replace_locations(&self, locations: &[OriginLocation]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM origin_locations")
            .execute(&mut *tx)
            .await?;

        for (seq, location) in locations.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO origin_locations
                    (location_id, address1, address2, city, state, zip5, zip4, is_default, seq)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(location.id.as_str())
            .bind(&location.address.address1)
            .bind(&location.address.address2)
            .bind(&location.address.city)
            .bind(&location.address.state)
            .bind(&location.address.zip5)
            .bind(&location.address.zip4)
            .bind(location.is_default)
            .bind(seq as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert or update one origin location. New locations go last.
    pub async fn upsert_location(&self, location: &OriginLocation) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO origin_locations
                (location_id, address1, address2, city, state, zip5, zip4, is_default, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(seq), -1) + 1 FROM origin_locations))
            ON CONFLICT(location_id) DO UPDATE SET
                address1 = excluded.address1,
                address2 = excluded.address2,
                city = excluded.city,
                state = excluded.state,
                zip5 = excluded.zip5,
                zip4 = excluded.zip4,
                is_default = excluded.is_default
            "#,
        )
        .bind(location.id.as_str())
        .bind(&location.address.address1)
        .bind(&location.address.address2)
        .bind(&location.address.city)
        .bind(&location.address.state)
        .bind(&location.address.zip5)
        .bind(&location.address.zip4)
        .bind(location.is_default)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set the locations able to fulfil an item, in preference order.
    pub async fn set_item_candidates(
        &self,
        item_id: &ItemId,
        candidates: &[LocationId],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM item_locations WHERE item_id = ?")
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;

        for (seq, location_id) in candidates.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO item_locations (item_id, location_id, seq)
                VALUES (?, ?, ?)
                ON CONFLICT(item_id, location_id) DO NOTHING
                "#,
            )
            .bind(item_id.as_str())
            .bind(location_id.as_str())
            .bind(seq as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LocationCatalog for Repository {
    async fn list_origin_locations(&self) -> Result<Vec<OriginLocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT location_id, address1, address2, city, state, zip5, zip4, is_default
            FROM origin_locations
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let locations = rows
            .iter()
            .map(|row| OriginLocation {
                id: LocationId::new(row.get::<String, _>("location_id")),
                address: Address {
                    address1: row.get("address1"),
                    address2: row.get("address2"),
                    city: row.get("city"),
                    state: row.get("state"),
                    zip5: row.get("zip5"),
                    zip4: row.get("zip4"),
                },
                is_default: row.get("is_default"),
            })
            .collect();

        Ok(locations)
    }

    async fn candidate_locations_for(
        &self,
        item_id: &ItemId,
    ) -> Result<Vec<LocationId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT location_id FROM item_locations WHERE item_id = ? ORDER BY seq ASC",
        )
        .bind(item_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| LocationId::new(id)).collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::db::init_db;
    use tempfile::TempDir;

    pub async fn temp_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("repo.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        (Repository::new(pool), temp_dir)
    }
}
