use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDate;
use libsql::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::barcode;
use crate::db::Database;
use crate::error::{WorkflowError, WorkflowResult};
use crate::ledger::Ledger;

const ITEM_COLUMNS: &str = "id, barcode, name, description, category, brand, model, specification, \
     current_stock, total_stock, min_stock_level, location, condition, vendor, purchase_date, \
     purchase_price, date_added";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub barcode: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub specification: Option<String>,
    pub current_stock: i64,
    pub total_stock: i64,
    pub min_stock_level: i64,
    pub location: String,
    pub condition: String,
    pub vendor: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub purchase_price: Decimal,
    pub date_added: String,
}

impl Item {
    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.min_stock_level
    }
}

fn default_min_stock_level() -> i64 {
    5
}

fn default_condition() -> String {
    "Good".to_string()
}

/// Intake of a new item. Current stock starts equal to total stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItem {
    /// Generated from the category when absent.
    #[serde(default)]
    pub barcode: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub specification: Option<String>,
    pub total_stock: i64,
    #[serde(default = "default_min_stock_level")]
    pub min_stock_level: i64,
    pub location: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_price: Decimal,
}

/// Full-record replacement of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItem {
    pub barcode: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub specification: Option<String>,
    pub current_stock: i64,
    pub total_stock: i64,
    pub min_stock_level: i64,
    pub location: String,
    pub condition: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_price: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSort {
    #[default]
    Name,
    Stock,
    Category,
    Date,
}

impl ItemSort {
    fn order_by(&self) -> &'static str {
        match self {
            ItemSort::Name => "name ASC",
            ItemSort::Stock => "current_stock ASC, name ASC",
            ItemSort::Category => "category ASC, name ASC",
            ItemSort::Date => "date_added DESC, id DESC",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub sort: ItemSort,
}

pub fn normalize_barcode(barcode: &str) -> String {
    barcode.trim().to_uppercase()
}

fn require_text(field: &'static str, value: &str) -> WorkflowResult<()> {
    if value.trim().is_empty() {
        return Err(WorkflowError::validation(field, "is required"));
    }
    Ok(())
}

fn validate_common(
    name: &str,
    category: &str,
    location: &str,
    total_stock: i64,
    min_stock_level: i64,
    purchase_price: Decimal,
) -> WorkflowResult<()> {
    require_text("name", name)?;
    require_text("category", category)?;
    require_text("location", location)?;
    if total_stock < 0 {
        return Err(WorkflowError::validation("total_stock", "must not be negative"));
    }
    if min_stock_level < 1 {
        return Err(WorkflowError::validation("min_stock_level", "must be at least 1"));
    }
    if purchase_price < Decimal::ZERO {
        return Err(WorkflowError::validation("purchase_price", "must not be negative"));
    }
    Ok(())
}

impl CreateItem {
    pub fn validate(&self) -> WorkflowResult<()> {
        validate_common(
            &self.name,
            &self.category,
            &self.location,
            self.total_stock,
            self.min_stock_level,
            self.purchase_price,
        )
    }
}

impl UpdateItem {
    pub fn validate(&self) -> WorkflowResult<()> {
        require_text("barcode", &self.barcode)?;
        validate_common(
            &self.name,
            &self.category,
            &self.location,
            self.total_stock,
            self.min_stock_level,
            self.purchase_price,
        )?;
        if self.current_stock < 0 {
            return Err(WorkflowError::validation("current_stock", "must not be negative"));
        }
        if self.current_stock > self.total_stock {
            return Err(WorkflowError::validation(
                "current_stock",
                format!("must not exceed total stock ({})", self.total_stock),
            ));
        }
        Ok(())
    }
}

pub struct Catalog<'a> {
    conn: &'a Connection,
}

impl<'a> Catalog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let mut rows = self.conn.query(&query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_item(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_item_by_barcode(&self, barcode: &str) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE barcode = ?");
        let mut rows = self
            .conn
            .query(&query, libsql::params![normalize_barcode(barcode)])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_item(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list_items(&self, filter: &ItemQuery) -> Result<Vec<Item>> {
        let mut conditions = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            conditions.push("(name LIKE ? OR barcode LIKE ? OR brand LIKE ? OR model LIKE ?)");
            let pattern = format!("%{}%", search.trim());
            for _ in 0..4 {
                params.push(pattern.clone().into());
            }
        }
        if let Some(category) = filter.category.as_deref().filter(|s| !s.is_empty()) {
            conditions.push("category = ?");
            params.push(category.to_string().into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items {where_clause} ORDER BY {}",
            filter.sort.order_by()
        );

        let mut rows = self.conn.query(&query, params).await?;
        let mut items = Vec::new();

        while let Some(row) = rows.next().await? {
            items.push(self.row_to_item(&row)?);
        }

        Ok(items)
    }

    /// Items at or below their minimum stock level, lowest stock first.
    pub async fn low_stock_items(&self) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE current_stock <= min_stock_level ORDER BY current_stock ASC, name ASC"
        );
        let mut rows = self.conn.query(&query, ()).await?;
        let mut items = Vec::new();

        while let Some(row) = rows.next().await? {
            items.push(self.row_to_item(&row)?);
        }

        Ok(items)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM items", ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn count_low_stock(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM items WHERE current_stock <= min_stock_level", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn insert_item(&self, barcode: &str, input: &CreateItem) -> Result<Item> {
        let query = format!(
            r#"
            INSERT INTO items (barcode, name, description, category, brand, model, specification,
                current_stock, total_stock, min_stock_level, location, condition, vendor,
                purchase_date, purchase_price)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {ITEM_COLUMNS}
        "#
        );

        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![
                    barcode,
                    input.name.trim(),
                    input.description.as_str(),
                    input.category.trim(),
                    input.brand.clone(),
                    input.model.clone(),
                    input.specification.clone(),
                    input.total_stock,
                    input.total_stock,
                    input.min_stock_level,
                    input.location.trim(),
                    input.condition.as_str(),
                    input.vendor.clone(),
                    input.purchase_date.map(|d| d.to_string()),
                    input.purchase_price.to_string()
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(self.row_to_item(&row)?)
        } else {
            anyhow::bail!("Failed to create item")
        }
    }

    pub async fn replace_item(&self, id: i64, input: &UpdateItem) -> Result<Option<Item>> {
        let query = r#"
            UPDATE items SET
                barcode = ?, name = ?, description = ?, category = ?, brand = ?, model = ?,
                specification = ?, current_stock = ?, total_stock = ?, min_stock_level = ?,
                location = ?, condition = ?, vendor = ?, purchase_date = ?, purchase_price = ?
            WHERE id = ?
        "#;

        let changed = self
            .conn
            .execute(
                query,
                libsql::params![
                    normalize_barcode(&input.barcode),
                    input.name.trim(),
                    input.description.as_str(),
                    input.category.trim(),
                    input.brand.clone(),
                    input.model.clone(),
                    input.specification.clone(),
                    input.current_stock,
                    input.total_stock,
                    input.min_stock_level,
                    input.location.trim(),
                    input.condition.as_str(),
                    input.vendor.clone(),
                    input.purchase_date.map(|d| d.to_string()),
                    input.purchase_price.to_string(),
                    id
                ],
            )
            .await?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_item(id).await
    }

    /// Takes `quantity` units out of stock. Returns `false` without touching
    /// the row when fewer than `quantity` units are on the shelf.
    pub async fn take_stock(&self, id: i64, quantity: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET current_stock = current_stock - ? WHERE id = ? AND current_stock >= ?",
                libsql::params![quantity, id, quantity],
            )
            .await?;
        Ok(changed == 1)
    }

    pub async fn restore_stock(&self, id: i64, quantity: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE items SET current_stock = current_stock + ? WHERE id = ?",
                libsql::params![quantity, id],
            )
            .await?;
        Ok(changed == 1)
    }

    pub async fn has_open_transactions(&self, id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM transactions WHERE item_id = ? AND return_date IS NULL LIMIT 1",
                libsql::params![id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn has_any_transactions(&self, id: i64) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM transactions WHERE item_id = ? LIMIT 1", libsql::params![id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn delete_row(&self, id: i64) -> Result<bool> {
        let result = self
            .conn
            .execute("DELETE FROM items WHERE id = ?", libsql::params![id])
            .await?;
        Ok(result > 0)
    }

    fn row_to_item(&self, row: &libsql::Row) -> Result<Item> {
        let purchase_date = row
            .get::<Option<String>>(14)?
            .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
            .transpose()?;
        let price_str: String = row.get(15)?;
        let purchase_price =
            Decimal::from_str(&price_str).map_err(|e| anyhow::anyhow!("Invalid purchase price {price_str}: {e}"))?;

        Ok(Item {
            id: row.get(0)?,
            barcode: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            brand: row.get(5)?,
            model: row.get(6)?,
            specification: row.get(7)?,
            current_stock: row.get(8)?,
            total_stock: row.get(9)?,
            min_stock_level: row.get(10)?,
            location: row.get(11)?,
            condition: row.get(12)?,
            vendor: row.get(13)?,
            purchase_date,
            purchase_price,
            date_added: row.get(16)?,
        })
    }
}

pub async fn create_item(db: &Database, site: &str, input: CreateItem) -> WorkflowResult<Item> {
    input.validate()?;

    let uow = db.begin().await?;
    let result: WorkflowResult<Item> = async {
        let catalog = Catalog::new(uow.connection());
        let barcode = match input.barcode.as_deref().map(normalize_barcode) {
            Some(b) if !b.is_empty() => {
                if catalog.get_item_by_barcode(&b).await?.is_some() {
                    return Err(WorkflowError::DuplicateBarcode(b));
                }
                b
            }
            _ => barcode::next_barcode(uow.connection(), site, &input.category).await?,
        };
        Ok(catalog.insert_item(&barcode, &input).await?)
    }
    .await;
    let item = uow.finish(result).await?;

    tracing::info!(item_id = item.id, barcode = %item.barcode, stock = item.total_stock, "item added");
    Ok(item)
}

pub async fn update_item(db: &Database, id: i64, input: UpdateItem) -> WorkflowResult<Item> {
    input.validate()?;

    let uow = db.begin().await?;
    let result: WorkflowResult<Item> = async {
        let catalog = Catalog::new(uow.connection());
        let barcode = normalize_barcode(&input.barcode);
        if let Some(other) = catalog.get_item_by_barcode(&barcode).await? {
            if other.id != id {
                return Err(WorkflowError::DuplicateBarcode(barcode));
            }
        }
        // Open check-outs must still fit back on the shelf.
        let out = Ledger::new(uow.connection()).open_quantity_for_item(id).await?;
        if input.current_stock + out > input.total_stock {
            return Err(WorkflowError::validation(
                "total_stock",
                format!("must cover current stock plus {out} checked out"),
            ));
        }
        catalog
            .replace_item(id, &input)
            .await?
            .ok_or(WorkflowError::ItemNotFound(id))
    }
    .await;
    let item = uow.finish(result).await?;

    tracing::info!(item_id = item.id, current = item.current_stock, total = item.total_stock, "item updated");
    Ok(item)
}

/// Deletes an item that has never been part of a transaction.
///
/// Items with open check-outs are refused with `OpenTransactions`; items whose
/// check-outs are all returned stay as part of the audit trail and are refused
/// with `ReferencedByHistory`.
pub async fn delete_item(db: &Database, id: i64) -> WorkflowResult<Item> {
    let uow = db.begin().await?;
    let result: WorkflowResult<Item> = async {
        let catalog = Catalog::new(uow.connection());
        let item = catalog.get_item(id).await?.ok_or(WorkflowError::ItemNotFound(id))?;
        if catalog.has_open_transactions(id).await? {
            return Err(WorkflowError::OpenTransactions(id));
        }
        if catalog.has_any_transactions(id).await? {
            return Err(WorkflowError::ReferencedByHistory(id));
        }
        catalog.delete_row(id).await?;
        Ok(item)
    }
    .await;
    let item = uow.finish(result).await?;

    tracing::info!(item_id = item.id, barcode = %item.barcode, "item deleted");
    Ok(item)
}

/// Reserves the next barcode for `category` without creating an item.
pub async fn reserve_barcode(db: &Database, site: &str, category: &str) -> WorkflowResult<String> {
    let uow = db.begin().await?;
    let result = barcode::next_barcode(uow.connection(), site, category).await;
    uow.finish(result).await
}
