use libsql::Connection;

use crate::error::{WorkflowError, WorkflowResult};

/// Largest sequence number the generator hands out. Hand-entered barcodes
/// with longer suffixes are not counted.
pub const MAX_SEQUENCE: i64 = 999_999_999;

/// Two-letter barcode prefix for a category.
pub fn prefix_for_category(category: &str) -> &'static str {
    match category.trim() {
        "Keyboard" => "KB",
        "Mouse" => "MS",
        "Monitor" => "MN",
        "Laptop" => "LP",
        "Computer" => "CP",
        "Printer" => "PR",
        "Projector" => "PJ",
        "Tablet" => "TB",
        "Phone" => "PH",
        "Network" => "NW",
        "Accessory" => "AC",
        "Cable" => "CB",
        _ => "IT",
    }
}

pub fn format_barcode(stem: &str, sequence: i64) -> String {
    format!("{stem}-{sequence:03}")
}

fn sequence_of(barcode: &str, stem: &str) -> Option<i64> {
    let digits = barcode.strip_prefix(stem)?.strip_prefix('-')?;
    if digits.is_empty() || digits.len() > 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()
}

/// Allocates the next barcode for `category`.
///
/// Must run inside a unit of work: the counter row and the scan of existing
/// barcodes are read and written under the same write lock, so two callers
/// never receive the same value. The counter never goes backwards, even if
/// the item holding the highest number is later deleted.
pub async fn next_barcode(conn: &Connection, site: &str, category: &str) -> WorkflowResult<String> {
    let stem = format!("{}-{}", site.trim().to_uppercase(), prefix_for_category(category));

    let mut highest = 0;

    let mut rows = conn
        .query(
            "SELECT last_value FROM barcode_sequences WHERE prefix = ?",
            libsql::params![stem.as_str()],
        )
        .await?;
    if let Some(row) = rows.next().await? {
        highest = row.get::<i64>(0)?;
    }

    // Barcodes entered by hand bypass the counter.
    let mut rows = conn
        .query(
            "SELECT barcode FROM items WHERE substr(barcode, 1, ?) = ?",
            libsql::params![stem.len() as i64 + 1, format!("{stem}-")],
        )
        .await?;
    while let Some(row) = rows.next().await? {
        let barcode: String = row.get(0)?;
        if let Some(n) = sequence_of(&barcode, &stem) {
            highest = highest.max(n);
        }
    }

    let next = highest
        .checked_add(1)
        .filter(|n| *n <= MAX_SEQUENCE)
        .ok_or_else(|| WorkflowError::validation("category", format!("barcode sequence for {stem} is exhausted")))?;
    conn.execute(
        r#"
        INSERT INTO barcode_sequences (prefix, last_value) VALUES (?, ?)
        ON CONFLICT(prefix) DO UPDATE SET last_value = excluded.last_value
        "#,
        libsql::params![stem.as_str(), next],
    )
    .await?;

    let barcode = format_barcode(&stem, next);
    tracing::debug!(barcode = %barcode, "allocated barcode");
    Ok(barcode)
}
