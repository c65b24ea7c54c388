//! Read-only projections over the catalog and the ledger.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Value};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::directory::Directory;
use crate::ledger::{Ledger, TransactionKind, TransactionView, VIEW_COLUMNS, VIEW_JOINS};
use crate::model::{User, start_of_day, to_db_timestamp};

const RECENT_ON_DASHBOARD: i64 = 5;
const RECENT_RETURNS_PER_BORROWER: i64 = 10;

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub total_items: i64,
    pub low_stock_items: i64,
    /// Units currently out, summed over open transactions.
    pub checked_out: i64,
    pub overdue: i64,
    pub recent_transactions: Vec<TransactionView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    /// Open and not yet due.
    Active,
    Returned,
    Overdue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionKind>,
    pub status: Option<StatusFilter>,
    pub borrower_id: Option<String>,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub active: i64,
    pub overdue: i64,
    pub returned: i64,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub transactions: Vec<TransactionView>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub total_pages: i64,
    pub stats: HistoryStats,
}

#[derive(Debug, Serialize)]
pub struct BorrowerView {
    pub borrower: User,
    pub open: Vec<TransactionView>,
    pub recent_returns: Vec<TransactionView>,
    pub overdue_count: i64,
}

fn total_pages(total: i64, page_size: u32) -> i64 {
    let size = i64::from(page_size.max(1));
    (total + size - 1) / size
}

impl HistoryFilter {
    fn where_clause(&self, now: DateTime<Utc>) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(kind) = self.transaction_type {
            conditions.push("t.transaction_type = ?");
            params.push(kind.as_str().to_string().into());
        }
        match self.status {
            Some(StatusFilter::Active) => {
                conditions.push("t.return_date IS NULL AND t.due_date >= ?");
                params.push(to_db_timestamp(now).into());
            }
            Some(StatusFilter::Overdue) => {
                conditions.push("t.return_date IS NULL AND t.due_date < ?");
                params.push(to_db_timestamp(now).into());
            }
            Some(StatusFilter::Returned) => conditions.push("t.return_date IS NOT NULL"),
            None => {}
        }
        if let Some(borrower) = self.borrower_id.as_deref().filter(|b| !b.is_empty()) {
            conditions.push("t.borrower_id = ?");
            params.push(borrower.to_string().into());
        }
        if let Some(date) = self.start_date {
            conditions.push("t.transaction_date >= ?");
            params.push(to_db_timestamp(start_of_day(date)).into());
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

pub struct Reports<'a> {
    conn: &'a Connection,
}

impl<'a> Reports<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn scalar(&self, query: &str, params: Vec<Value>) -> Result<i64> {
        let mut rows = self.conn.query(query, params).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<DashboardSummary> {
        let catalog = Catalog::new(self.conn);

        let checked_out = self
            .scalar(
                "SELECT COALESCE(SUM(quantity), 0) FROM transactions WHERE return_date IS NULL",
                vec![],
            )
            .await?;
        let overdue = self
            .scalar(
                "SELECT COUNT(*) FROM transactions WHERE return_date IS NULL AND due_date < ?",
                vec![to_db_timestamp(now).into()],
            )
            .await?;

        let query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} ORDER BY t.transaction_date DESC, t.id DESC LIMIT ?"
        );
        let recent_transactions = Ledger::new(self.conn)
            .views(&query, vec![RECENT_ON_DASHBOARD.into()], now)
            .await?;

        Ok(DashboardSummary {
            total_items: catalog.count_items().await?,
            low_stock_items: catalog.count_low_stock().await?,
            checked_out,
            overdue,
            recent_transactions,
        })
    }

    /// Open transactions past their due date, earliest due first.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<TransactionView>> {
        let query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} WHERE t.return_date IS NULL AND t.due_date < ? ORDER BY t.due_date ASC, t.id ASC"
        );
        Ledger::new(self.conn)
            .views(&query, vec![to_db_timestamp(now).into()], now)
            .await
    }

    pub async fn history(
        &self,
        filter: &HistoryFilter,
        page: u32,
        page_size: u32,
        now: DateTime<Utc>,
    ) -> Result<HistoryPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let (where_clause, params) = filter.where_clause(now);

        let total = self
            .scalar(
                &format!("SELECT COUNT(*) FROM transactions t {where_clause}"),
                params.clone(),
            )
            .await?;

        let query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} {where_clause} ORDER BY t.transaction_date DESC, t.id DESC LIMIT ? OFFSET ?"
        );
        let mut page_params = params;
        page_params.push(i64::from(page_size).into());
        page_params.push((i64::from(page - 1) * i64::from(page_size)).into());
        let transactions = Ledger::new(self.conn).views(&query, page_params, now).await?;

        Ok(HistoryPage {
            transactions,
            page,
            page_size,
            total,
            total_pages: total_pages(total, page_size),
            stats: self.stats(now).await?,
        })
    }

    /// Counts across all transactions, ignoring any history filter.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<HistoryStats> {
        let now = to_db_timestamp(now);
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN return_date IS NULL AND due_date >= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN return_date IS NULL AND due_date < ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN return_date IS NOT NULL THEN 1 ELSE 0 END), 0)
                FROM transactions
                "#,
                libsql::params![now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(HistoryStats {
                active: row.get(0)?,
                overdue: row.get(1)?,
                returned: row.get(2)?,
            }),
            None => Ok(HistoryStats::default()),
        }
    }

    pub async fn borrower_view(&self, borrower_id: &str, now: DateTime<Utc>) -> Result<Option<BorrowerView>> {
        let Some(borrower) = Directory::new(self.conn).get_user(borrower_id).await? else {
            return Ok(None);
        };
        let ledger = Ledger::new(self.conn);

        let open_query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} WHERE t.borrower_id = ? AND t.return_date IS NULL ORDER BY t.due_date ASC, t.id ASC"
        );
        let open = ledger
            .views(&open_query, vec![borrower.id.clone().into()], now)
            .await?;

        let returned_query = format!(
            "SELECT {VIEW_COLUMNS} {VIEW_JOINS} WHERE t.borrower_id = ? AND t.return_date IS NOT NULL ORDER BY t.return_date DESC, t.id DESC LIMIT ?"
        );
        let recent_returns = ledger
            .views(
                &returned_query,
                vec![borrower.id.clone().into(), RECENT_RETURNS_PER_BORROWER.into()],
                now,
            )
            .await?;

        let overdue_count = open.iter().filter(|v| v.is_overdue).count() as i64;

        Ok(Some(BorrowerView {
            borrower,
            open,
            recent_returns,
            overdue_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CreateItem, create_item};
    use crate::config::DirectoryUser;
    use crate::db::Database;
    use crate::model::Role;
    use crate::workflow::{CheckOutRequest, check_in, check_out};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    async fn setup(stock: i64) -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let dir = Directory::new(db.connection());
        for (id, role) in [("staff", Role::Staff), ("ann", Role::Student), ("bob", Role::Borrower)] {
            dir.provision(&DirectoryUser {
                id: id.to_string(),
                full_name: id.to_uppercase(),
                email: None,
                role,
                department: None,
            })
            .await
            .unwrap();
        }
        let item = create_item(
            &db,
            "CDM",
            CreateItem {
                barcode: None,
                name: "HDMI cable".to_string(),
                description: String::new(),
                category: "Cable".to_string(),
                brand: None,
                model: None,
                specification: None,
                total_stock: stock,
                min_stock_level: 1,
                location: "Drawer 3".to_string(),
                condition: "Good".to_string(),
                vendor: None,
                purchase_date: None,
                purchase_price: Decimal::new(1299, 2),
            },
        )
        .await
        .unwrap();
        (db, item.id)
    }

    async fn lend(db: &Database, item_id: i64, borrower: &str, at: DateTime<Utc>, due_in: Duration) -> i64 {
        let request = CheckOutRequest {
            item_id,
            borrower_id: borrower.to_string(),
            quantity: 1,
            due_date: at + due_in,
            notes: String::new(),
        };
        check_out(db, &request, "staff", at).await.unwrap().id
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(45, 20), 3);
    }

    #[tokio::test]
    async fn history_paginates_newest_first() {
        let (db, item_id) = setup(45).await;
        for i in 0..45 {
            lend(&db, item_id, "ann", now() + Duration::minutes(i), Duration::days(7)).await;
        }
        let reports = Reports::new(db.connection());
        let filter = HistoryFilter::default();

        let first = reports.history(&filter, 1, 20, now()).await.unwrap();
        assert_eq!(first.total, 45);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.transactions.len(), 20);
        assert!(
            first
                .transactions
                .windows(2)
                .all(|w| w[0].transaction.transaction_date >= w[1].transaction.transaction_date)
        );

        let last = reports.history(&filter, 3, 20, now()).await.unwrap();
        assert_eq!(last.transactions.len(), 5);
        assert_eq!(last.transactions[4].transaction.transaction_date, now());
    }

    #[tokio::test]
    async fn status_filters_partition_transactions() {
        let (db, item_id) = setup(10).await;
        let earlier = now() - Duration::days(10);

        lend(&db, item_id, "ann", earlier, Duration::days(30)).await;
        lend(&db, item_id, "ann", earlier, Duration::days(2)).await;
        let returned = lend(&db, item_id, "bob", earlier, Duration::days(2)).await;
        check_in(&db, returned, "staff", earlier + Duration::days(1)).await.unwrap();

        let reports = Reports::new(db.connection());
        for status in [StatusFilter::Active, StatusFilter::Overdue, StatusFilter::Returned] {
            let filter = HistoryFilter {
                status: Some(status),
                ..Default::default()
            };
            let page = reports.history(&filter, 1, 20, now()).await.unwrap();
            assert_eq!(page.total, 1, "{status:?}");
        }

        let stats = reports.stats(now()).await.unwrap();
        assert_eq!(
            stats,
            HistoryStats {
                active: 1,
                overdue: 1,
                returned: 1
            }
        );

        let overdue = reports.overdue(now()).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert!(overdue[0].is_overdue);
        assert_eq!(overdue[0].borrower_name, "ANN");
        assert_eq!(overdue[0].processed_by, "STAFF");
    }

    #[tokio::test]
    async fn history_filters_by_borrower_and_start_date() {
        let (db, item_id) = setup(10).await;
        lend(&db, item_id, "ann", now() - Duration::days(3), Duration::days(30)).await;
        lend(&db, item_id, "bob", now() - Duration::days(1), Duration::days(30)).await;
        lend(&db, item_id, "ann", now(), Duration::days(30)).await;

        let reports = Reports::new(db.connection());

        let by_ann = HistoryFilter {
            borrower_id: Some("ann".to_string()),
            ..Default::default()
        };
        assert_eq!(reports.history(&by_ann, 1, 20, now()).await.unwrap().total, 2);

        let since = HistoryFilter {
            start_date: Some((now() - Duration::days(1)).date_naive()),
            ..Default::default()
        };
        assert_eq!(reports.history(&since, 1, 20, now()).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn dashboard_summarises_stock_and_loans() {
        let (db, item_id) = setup(3).await;
        let earlier = now() - Duration::days(5);
        lend(&db, item_id, "ann", earlier, Duration::days(1)).await;
        lend(&db, item_id, "bob", earlier, Duration::days(10)).await;

        let summary = Reports::new(db.connection()).dashboard(now()).await.unwrap();
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.low_stock_items, 1);
        assert_eq!(summary.checked_out, 2);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.recent_transactions.len(), 2);
    }

    #[tokio::test]
    async fn borrower_view_splits_open_and_returned() {
        let (db, item_id) = setup(5).await;
        let earlier = now() - Duration::days(20);
        lend(&db, item_id, "ann", earlier, Duration::days(30)).await;
        lend(&db, item_id, "ann", earlier, Duration::days(5)).await;
        let back = lend(&db, item_id, "ann", earlier, Duration::days(5)).await;
        check_in(&db, back, "staff", earlier + Duration::days(2)).await.unwrap();

        let reports = Reports::new(db.connection());
        let view = reports.borrower_view("ann", now()).await.unwrap().unwrap();
        assert_eq!(view.open.len(), 2);
        assert!(view.open[0].transaction.due_date <= view.open[1].transaction.due_date);
        assert_eq!(view.recent_returns.len(), 1);
        assert_eq!(view.overdue_count, 1);

        assert!(reports.borrower_view("nobody", now()).await.unwrap().is_none());
    }
}
