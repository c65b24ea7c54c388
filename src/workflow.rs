//! Checkout / check-in workflow.
//!
//! Each operation runs in one [`UnitOfWork`](crate::db::UnitOfWork): the stock
//! change on the item and the ledger write commit together or not at all.
//! After any sequence of successful operations an item's `current_stock`
//! equals its `total_stock` minus the quantities of its open transactions
//! (unless an administrator edits stock directly).

use std::future::Future;

use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, normalize_barcode};
use crate::db::Database;
use crate::directory::Directory;
use crate::error::{WorkflowError, WorkflowResult};
use crate::ledger::{Ledger, NewCheckout, Transaction, TransactionView};
use crate::model::{Capability, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutRequest {
    pub item_id: i64,
    pub borrower_id: String,
    pub quantity: i64,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BarcodeCheckIn {
    CheckedIn { transaction: Transaction },
    /// Several open checkouts share the barcode; the caller must pick one
    /// and check it in by id.
    Ambiguous { candidates: Vec<TransactionView> },
    NoActiveCheckout,
}

/// Drives `work` on its own task, so a caller that goes away (a client
/// disconnecting mid-request) cannot leave a unit of work half done.
pub async fn run_to_completion<T, F>(work: F) -> WorkflowResult<T>
where
    F: Future<Output = WorkflowResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow::anyhow!("workflow task was cancelled: {e}").into()),
    }
}

async fn require_processor(conn: &Connection, processor_id: &str) -> WorkflowResult<User> {
    let processor = Directory::new(conn)
        .get_user(processor_id)
        .await?
        .ok_or_else(|| WorkflowError::validation("processor_id", "unknown user"))?;
    if !processor.can(Capability::ProcessTransactions) {
        return Err(WorkflowError::validation(
            "processor_id",
            format!("{} may not process transactions", processor.role.as_str()),
        ));
    }
    Ok(processor)
}

fn validate_check_out(request: &CheckOutRequest, now: DateTime<Utc>) -> WorkflowResult<()> {
    if request.quantity <= 0 {
        return Err(WorkflowError::validation("quantity", "must be greater than 0"));
    }
    if request.borrower_id.trim().is_empty() {
        return Err(WorkflowError::validation("borrower_id", "please select a borrower"));
    }
    if request.due_date <= now {
        return Err(WorkflowError::validation("due_date", "must be in the future"));
    }
    Ok(())
}

/// Lends `quantity` units of an item to a borrower.
pub async fn check_out(
    db: &Database,
    request: &CheckOutRequest,
    processor_id: &str,
    now: DateTime<Utc>,
) -> WorkflowResult<Transaction> {
    validate_check_out(request, now)?;

    let uow = db.begin().await?;
    let conn = uow.connection();
    let result: WorkflowResult<Transaction> = async {
        let processor = require_processor(conn, processor_id).await?;
        let borrower = Directory::new(conn)
            .get_user(&request.borrower_id)
            .await?
            .ok_or_else(|| WorkflowError::validation("borrower_id", "selected borrower not found"))?;

        let catalog = Catalog::new(conn);
        let item = catalog
            .get_item(request.item_id)
            .await?
            .ok_or(WorkflowError::ItemNotFound(request.item_id))?;

        let insufficient = WorkflowError::InsufficientStock {
            item_id: item.id,
            available: item.current_stock,
            requested: request.quantity,
        };
        if item.current_stock < request.quantity {
            return Err(insufficient);
        }
        if !catalog.take_stock(item.id, request.quantity).await? {
            return Err(insufficient);
        }

        let ledger = Ledger::new(conn);
        let transaction = ledger
            .insert_checkout(NewCheckout {
                item_id: item.id,
                borrower_id: &borrower.id,
                processor_id: &processor.id,
                transaction_date: now,
                due_date: request.due_date,
                quantity: request.quantity,
                notes: request.notes.trim(),
            })
            .await?;

        ledger
            .log_activity(
                &processor.id,
                "check_out",
                &format!(
                    "Checked out {} x {} ({}) to {}",
                    request.quantity,
                    item.name,
                    item.barcode,
                    borrower.display_name()
                ),
                now,
            )
            .await?;

        Ok(transaction)
    }
    .await;

    let transaction = uow.finish(result).await?;
    tracing::info!(
        transaction_id = transaction.id,
        item_id = transaction.item_id,
        borrower_id = %transaction.borrower_id,
        quantity = transaction.quantity,
        "item checked out"
    );
    Ok(transaction)
}

/// Closes an open transaction inside an existing unit of work.
///
/// Returns `false` when there is nothing to close.
async fn check_in_within(
    conn: &Connection,
    transaction_id: i64,
    processor: &User,
    now: DateTime<Utc>,
) -> WorkflowResult<bool> {
    let ledger = Ledger::new(conn);
    let catalog = Catalog::new(conn);

    let Some(transaction) = ledger.get_transaction(transaction_id).await? else {
        return Ok(false);
    };
    if !transaction.is_open() {
        return Ok(false);
    }
    let Some(item) = catalog.get_item(transaction.item_id).await? else {
        return Ok(false);
    };

    if !ledger.mark_returned(transaction.id, &processor.id, now).await? {
        return Ok(false);
    }
    if !catalog.restore_stock(item.id, transaction.quantity).await? {
        return Err(anyhow::anyhow!("item {} vanished during check-in", item.id).into());
    }

    ledger
        .log_activity(
            &processor.id,
            "check_in",
            &format!(
                "Checked in {} x {} ({}) from transaction {}",
                transaction.quantity, item.name, item.barcode, transaction.id
            ),
            now,
        )
        .await?;

    Ok(true)
}

/// Returns a checked-out transaction to stock.
///
/// `Ok(false)` means the transaction does not exist or was already returned;
/// nothing is changed in that case.
pub async fn check_in(
    db: &Database,
    transaction_id: i64,
    processor_id: &str,
    now: DateTime<Utc>,
) -> WorkflowResult<bool> {
    let uow = db.begin().await?;
    let conn = uow.connection();
    let result: WorkflowResult<bool> = async {
        let processor = require_processor(conn, processor_id).await?;
        check_in_within(conn, transaction_id, &processor, now).await
    }
    .await;

    let checked_in = uow.finish(result).await?;
    if checked_in {
        tracing::info!(transaction_id, processor_id, "item checked in");
    } else {
        tracing::info!(transaction_id, "check-in skipped: no open transaction");
    }
    Ok(checked_in)
}

/// Checks in by scanning an item barcode.
pub async fn check_in_by_barcode(
    db: &Database,
    barcode: &str,
    processor_id: &str,
    now: DateTime<Utc>,
) -> WorkflowResult<BarcodeCheckIn> {
    let barcode = normalize_barcode(barcode);
    if barcode.is_empty() {
        return Err(WorkflowError::validation("barcode", "is required"));
    }

    let uow = db.begin().await?;
    let conn = uow.connection();
    let result: WorkflowResult<BarcodeCheckIn> = async {
        let processor = require_processor(conn, processor_id).await?;
        let ledger = Ledger::new(conn);
        let mut open = ledger.open_for_barcode(&barcode, now).await?;

        match open.len() {
            0 => Ok(BarcodeCheckIn::NoActiveCheckout),
            1 => {
                let id = open.remove(0).transaction.id;
                if !check_in_within(conn, id, &processor, now).await? {
                    return Ok(BarcodeCheckIn::NoActiveCheckout);
                }
                let transaction = ledger
                    .get_transaction(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("transaction {id} vanished during check-in"))?;
                Ok(BarcodeCheckIn::CheckedIn { transaction })
            }
            _ => Ok(BarcodeCheckIn::Ambiguous { candidates: open }),
        }
    }
    .await;

    let outcome = uow.finish(result).await?;
    match &outcome {
        BarcodeCheckIn::CheckedIn { transaction } => {
            tracing::info!(transaction_id = transaction.id, barcode = %barcode, "item checked in by barcode")
        }
        BarcodeCheckIn::Ambiguous { candidates } => {
            tracing::info!(barcode = %barcode, candidates = candidates.len(), "barcode check-in needs a selection")
        }
        BarcodeCheckIn::NoActiveCheckout => {
            tracing::info!(barcode = %barcode, "no active checkout for barcode")
        }
    }
    Ok(outcome)
}
