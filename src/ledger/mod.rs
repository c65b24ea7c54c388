//! Transaction Ledger
//!
//! Checkout records and the activity log. Rows are created by a checkout,
//! closed once by a check-in, and never deleted.

mod handler;
mod lib;
mod routes;

pub use lib::*;

pub use routes::routes;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("ledger_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}
