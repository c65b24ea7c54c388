use anyhow::Result;
use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::model::{from_db_timestamp, to_db_timestamp};

pub const VIEW_COLUMNS: &str = "t.id, t.item_id, t.borrower_id, t.user_id, t.transaction_date, \
     t.due_date, t.return_date, t.status, t.transaction_type, t.quantity, t.notes, \
     i.name, i.barcode, b.full_name, p.full_name";

pub const VIEW_JOINS: &str = "FROM transactions t \
     JOIN items i ON i.id = t.item_id \
     JOIN users b ON b.id = t.borrower_id \
     JOIN users p ON p.id = t.user_id";

/// Only `CheckedOut` and `Returned` are ever stored; overdue is derived from
/// the due date at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    CheckedOut,
    Returned,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::CheckedOut => "checked_out",
            TransactionStatus::Returned => "returned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "checked_out" => Some(TransactionStatus::CheckedOut),
            "returned" => Some(TransactionStatus::Returned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CheckOut,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::CheckOut => "check_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "check_out" => Some(TransactionKind::CheckOut),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub item_id: i64,
    pub borrower_id: String,
    /// The staff member who processed the latest state change.
    pub user_id: String,
    pub transaction_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub transaction_type: TransactionKind,
    pub quantity: i64,
    pub notes: String,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.return_date.is_none()
    }

    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::CheckedOut && self.due_date < now
    }
}

/// A transaction joined with the names a listing needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub item_name: String,
    pub barcode: String,
    pub borrower_name: String,
    pub processed_by: String,
    pub is_overdue: bool,
}

pub struct NewCheckout<'s> {
    pub item_id: i64,
    pub borrower_id: &'s str,
    pub processor_id: &'s str,
    pub transaction_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub quantity: i64,
    pub notes: &'s str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Ledger<'a> {
    conn: &'a Connection,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn insert_checkout(&self, input: NewCheckout<'_>) -> Result<Transaction> {
        let query = r#"
            INSERT INTO transactions (item_id, borrower_id, user_id, transaction_date, due_date,
                status, transaction_type, quantity, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, item_id, borrower_id, user_id, transaction_date, due_date, return_date,
                status, transaction_type, quantity, notes
        "#;

        let mut rows = self
            .conn
            .query(
                query,
                libsql::params![
                    input.item_id,
                    input.borrower_id,
                    input.processor_id,
                    to_db_timestamp(input.transaction_date),
                    to_db_timestamp(input.due_date),
                    TransactionStatus::CheckedOut.as_str(),
                    TransactionKind::CheckOut.as_str(),
                    input.quantity,
                    input.notes
                ],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(self.row_to_transaction(&row)?)
        } else {
            anyhow::bail!("Failed to create transaction")
        }
    }

    pub async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let query = r#"
            SELECT id, item_id, borrower_id, user_id, transaction_date, due_date, return_date,
                status, transaction_type, quantity, notes
            FROM transactions WHERE id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(self.row_to_transaction(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Closes an open transaction. Returns `false` if it is missing or
    /// already returned.
    pub async fn mark_returned(&self, id: i64, processor_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let query = r#"
            UPDATE transactions
            SET return_date = ?, status = ?, user_id = ?
            WHERE id = ? AND return_date IS NULL
        "#;

        let changed = self
            .conn
            .execute(
                query,
                libsql::params![
                    to_db_timestamp(now),
                    TransactionStatus::Returned.as_str(),
                    processor_id,
                    id
                ],
            )
            .await?;
        Ok(changed == 1)
    }

    /// Open transactions for the item carrying `barcode`, earliest due first.
    pub async fn open_for_barcode(&self, barcode: &str, now: DateTime<Utc>) -> Result<Vec<TransactionView>> {
        let query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} WHERE i.barcode = ? AND t.return_date IS NULL ORDER BY t.due_date ASC, t.id ASC"
        );
        self.views(&query, vec![barcode.to_string().into()], now).await
    }

    pub async fn open_quantity_for_item(&self, item_id: i64) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(SUM(quantity), 0) FROM transactions WHERE item_id = ? AND return_date IS NULL",
                libsql::params![item_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub(crate) async fn views(
        &self,
        query: &str,
        params: Vec<libsql::Value>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionView>> {
        let mut rows = self.conn.query(query, params).await?;
        let mut views = Vec::new();

        while let Some(row) = rows.next().await? {
            views.push(self.row_to_view(&row, now)?);
        }

        Ok(views)
    }

    pub async fn log_activity(
        &self,
        user_id: &str,
        action: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO activity_logs (user_id, action, description, timestamp) VALUES (?, ?, ?, ?)",
                libsql::params![user_id, action, description, to_db_timestamp(now)],
            )
            .await?;
        Ok(())
    }

    pub async fn list_activity(&self, limit: i64, offset: i64) -> Result<Vec<ActivityLog>> {
        let query = r#"
            SELECT id, user_id, action, description, timestamp
            FROM activity_logs
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![limit, offset]).await?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next().await? {
            let timestamp: String = row.get(4)?;
            entries.push(ActivityLog {
                id: row.get(0)?,
                user_id: row.get(1)?,
                action: row.get(2)?,
                description: row.get(3)?,
                timestamp: from_db_timestamp(&timestamp)?,
            });
        }

        Ok(entries)
    }

    fn row_to_transaction(&self, row: &libsql::Row) -> Result<Transaction> {
        let transaction_date: String = row.get(4)?;
        let due_date: String = row.get(5)?;
        let return_date: Option<String> = row.get(6)?;
        let status_str: String = row.get(7)?;
        let kind_str: String = row.get(8)?;

        let status = TransactionStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?;
        let transaction_type = TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", kind_str))?;

        Ok(Transaction {
            id: row.get(0)?,
            item_id: row.get(1)?,
            borrower_id: row.get(2)?,
            user_id: row.get(3)?,
            transaction_date: from_db_timestamp(&transaction_date)?,
            due_date: from_db_timestamp(&due_date)?,
            return_date: return_date.as_deref().map(from_db_timestamp).transpose()?,
            status,
            transaction_type,
            quantity: row.get(9)?,
            notes: row.get(10)?,
        })
    }

    fn row_to_view(&self, row: &libsql::Row, now: DateTime<Utc>) -> Result<TransactionView> {
        let transaction = self.row_to_transaction(row)?;
        let is_overdue = transaction.is_overdue_at(now);

        Ok(TransactionView {
            transaction,
            item_name: row.get(11)?,
            barcode: row.get(12)?,
            borrower_name: row.get(13)?,
            processed_by: row.get(14)?,
            is_overdue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(status: TransactionStatus, due_in_days: i64) -> Transaction {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        Transaction {
            id: 1,
            item_id: 1,
            borrower_id: "b".to_string(),
            user_id: "p".to_string(),
            transaction_date: now - Duration::days(30),
            due_date: now + Duration::days(due_in_days),
            return_date: None,
            status,
            transaction_type: TransactionKind::CheckOut,
            quantity: 1,
            notes: String::new(),
        }
    }

    #[test]
    fn overdue_is_derived_from_due_date() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        assert!(sample(TransactionStatus::CheckedOut, -1).is_overdue_at(now));
        assert!(!sample(TransactionStatus::CheckedOut, 1).is_overdue_at(now));
        assert!(!sample(TransactionStatus::Returned, -1).is_overdue_at(now));
    }

    #[test]
    fn status_round_trips_through_storage_names() {
        for status in [TransactionStatus::CheckedOut, TransactionStatus::Returned] {
            assert_eq!(TransactionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::from_str("overdue"), None);
    }
}
