//! Item Catalog
//!
//! Item records, their stock invariants and barcode assignment.
//!
//! # Invariants
//!
//! - `0 <= current_stock <= total_stock` on every row, checked on input and
//!   enforced by table constraints.
//! - Stock only moves through [`Catalog::take_stock`] / [`Catalog::restore_stock`]
//!   (used by the checkout workflow) or a full-record [`update_item`].
//! - Items referenced by any transaction cannot be deleted.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stockroom::catalog;
//!
//! let item = catalog::create_item(&db, "CDM", input).await?;
//! let low = catalog::Catalog::new(db.connection()).low_stock_items().await?;
//!
//! let app = Router::new()
//!     .nest("/api", catalog::routes())
//!     .with_state(app_state);
//! ```

pub mod barcode;
mod handler;
mod lib;
mod routes;

pub use lib::*;

pub use routes::routes;

/// Returns the migrations for the catalog tables.
pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("catalog_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}
