//! Order persistence: the order row, its location groups and its ledger.
//!
//! Saves replace the order's child rows wholesale inside one transaction.

use super::Repository;
use crate::collaborators::{OrderStore, StoreError};
use crate::domain::{
    Address, CustomerId, Decimal, ExemptionCertificate, GroupLine, ItemId, ItemKind,
    LocationGroup, LocationId, Order, OrderId, OrderStatus,
};
use crate::engine::{LedgerEntry, TaxLedger};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, StoreError> {
    let raw: String = row.get(column);
    Decimal::from_str_canonical(&raw)
        .map_err(|e| StoreError::Corrupt(format!("{} = {:?}: {}", column, raw, e)))
}

fn kind_column(row: &SqliteRow) -> Result<ItemKind, StoreError> {
    let raw: String = row.get("kind");
    ItemKind::parse(&raw).ok_or_else(|| StoreError::Corrupt(format!("item kind {:?}", raw)))
}

fn position_column(row: &SqliteRow) -> Result<u32, StoreError> {
    let raw: i64 = row.get("position");
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("position {}", raw)))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<T>, StoreError> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
    })
    .transpose()
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| StoreError::Corrupt(e.to_string())))
        .transpose()
}

/// Replace every group and line of an order.
async fn write_groups(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    groups: &[LocationGroup],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM group_lines WHERE order_id = ?")
        .bind(order_id.as_str())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM location_groups WHERE order_id = ?")
        .bind(order_id.as_str())
        .execute(&mut *conn)
        .await?;

    for (seq, group) in groups.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO location_groups
                (order_id, location_id, seq, cart_id, external_order_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id.as_str())
        .bind(group.location_id.as_str())
        .bind(seq as i64)
        .bind(group.cart_id.as_deref())
        .bind(&group.external_order_id)
        .execute(&mut *conn)
        .await?;

        for line in &group.lines {
            sqlx::query(
                r#"
                INSERT INTO group_lines
                    (order_id, location_id, position, item_id, kind, quantity, unit_price, tic)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order_id.as_str())
            .bind(group.location_id.as_str())
            .bind(line.position as i64)
            .bind(line.item_id.as_str())
            .bind(line.kind.as_str())
            .bind(line.quantity.to_canonical_string())
            .bind(line.unit_price.to_canonical_string())
            .bind(line.tic.as_deref())
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

async fn write_ledger(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    ledger: &TaxLedger,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM ledger_entries WHERE order_id = ?")
        .bind(order_id.as_str())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM item_aliases WHERE order_id = ?")
        .bind(order_id.as_str())
        .execute(&mut *conn)
        .await?;

    for (item_id, entry) in ledger.entries() {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
                (order_id, item_id, kind, location_id, position, quantity, tax, refunded_quantity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id.as_str())
        .bind(item_id.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.location_id.as_str())
        .bind(entry.position as i64)
        .bind(entry.quantity.to_canonical_string())
        .bind(entry.tax.to_canonical_string())
        .bind(entry.refunded.to_canonical_string())
        .execute(&mut *conn)
        .await?;
    }

    for (external, internal) in ledger.aliases() {
        sqlx::query(
            "INSERT INTO item_aliases (order_id, external_id, internal_id) VALUES (?, ?, ?)",
        )
        .bind(order_id.as_str())
        .bind(external.as_str())
        .bind(internal.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

impl Repository {
    async fn load_ledger(&self, order_id: &OrderId) -> Result<TaxLedger, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, kind, location_id, position, quantity, tax, refunded_quantity
            FROM ledger_entries
            WHERE order_id = ?
            "#,
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push((
                ItemId::new(row.get::<String, _>("item_id")),
                LedgerEntry {
                    kind: kind_column(row)?,
                    location_id: LocationId::new(row.get::<String, _>("location_id")),
                    position: position_column(row)?,
                    quantity: decimal_column(row, "quantity")?,
                    tax: decimal_column(row, "tax")?,
                    refunded: decimal_column(row, "refunded_quantity")?,
                },
            ));
        }

        let aliases: Vec<(String, String)> = sqlx::query_as(
            "SELECT external_id, internal_id FROM item_aliases WHERE order_id = ?",
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(TaxLedger::from_parts(
            entries,
            aliases
                .into_iter()
                .map(|(external, internal)| (ItemId::new(external), ItemId::new(internal))),
        ))
    }
}

#[async_trait]
impl OrderStore for Repository {
    async fn load_order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT customer_id, status, exemption_json, destination_json
            FROM orders
            WHERE order_id = ?
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let raw_status: String = row.get("status");
        let status = OrderStatus::parse(&raw_status)
            .ok_or_else(|| StoreError::Corrupt(format!("order status {:?}", raw_status)))?;
        let exemption: Option<ExemptionCertificate> = json_column(&row, "exemption_json")?;
        let destination: Option<Address> = json_column(&row, "destination_json")?;

        Ok(Some(Order {
            id: order_id.clone(),
            customer_id: CustomerId::new(row.get::<String, _>("customer_id")),
            status,
            exemption,
            destination,
            groups: self.load_groups(order_id).await?,
            ledger: self.load_ledger(order_id).await?,
        }))
    }

    async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let exemption_json = to_json(&order.exemption)?;
        let destination_json = to_json(&order.destination)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, customer_id, status, exemption_json, destination_json,
                 cart_tax, shipping_tax, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                status = excluded.status,
                exemption_json = excluded.exemption_json,
                destination_json = excluded.destination_json,
                cart_tax = excluded.cart_tax,
                shipping_tax = excluded.shipping_tax,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.customer_id.as_str())
        .bind(order.status.as_str())
        .bind(exemption_json)
        .bind(destination_json)
        .bind(order.ledger.cart_tax().to_canonical_string())
        .bind(order.ledger.shipping_tax().to_canonical_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        write_groups(&mut *tx, &order.id, &order.groups).await?;
        write_ledger(&mut *tx, &order.id, &order.ledger).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_groups(&self, order_id: &OrderId) -> Result<Vec<LocationGroup>, StoreError> {
        let group_rows = sqlx::query(
            r#"
            SELECT location_id, cart_id, external_order_id
            FROM location_groups
            WHERE order_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let line_rows = sqlx::query(
            r#"
            SELECT location_id, position, item_id, kind, quantity, unit_price, tic
            FROM group_lines
            WHERE order_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut groups: Vec<LocationGroup> = group_rows
            .iter()
            .map(|row| LocationGroup {
                location_id: LocationId::new(row.get::<String, _>("location_id")),
                cart_id: row.get("cart_id"),
                external_order_id: row.get("external_order_id"),
                lines: Vec::new(),
            })
            .collect();

        for row in &line_rows {
            let location_id: String = row.get("location_id");
            let group = groups
                .iter_mut()
                .find(|g| g.location_id.as_str() == location_id)
                .ok_or_else(|| {
                    StoreError::Corrupt(format!("line for missing group {}", location_id))
                })?;
            group.lines.push(GroupLine {
                item_id: ItemId::new(row.get::<String, _>("item_id")),
                kind: kind_column(row)?,
                position: position_column(row)?,
                quantity: decimal_column(row, "quantity")?,
                unit_price: decimal_column(row, "unit_price")?,
                tic: row.get("tic"),
            });
        }

        Ok(groups)
    }

    async fn save_groups(
        &self,
        order_id: &OrderId,
        groups: &[LocationGroup],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM orders WHERE order_id = ?")
            .bind(order_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::UnknownOrder(order_id.to_string()));
        }

        write_groups(&mut *tx, order_id, groups).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_status(&self, order_id: &OrderId) -> Result<Option<OrderStatus>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE order_id = ?")
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(raw,)| {
            OrderStatus::parse(&raw)
                .ok_or_else(|| StoreError::Corrupt(format!("order status {:?}", raw)))
        })
        .transpose()
    }

    async fn save_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE order_id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(order_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownOrder(order_id.to_string()));
        }
        Ok(())
    }
}
