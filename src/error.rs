use thiserror::Error;

/// Errors raised by the catalog and checkout/check-in workflow.
///
/// Everything except `Store` is an expected outcome that leaves the
/// database untouched.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("item {0} not found")]
    ItemNotFound(i64),

    #[error("insufficient stock for item {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: i64,
        available: i64,
        requested: i64,
    },

    #[error("item {0} has active check-outs")]
    OpenTransactions(i64),

    #[error("item {0} is referenced by transaction history")]
    ReferencedByHistory(i64),

    #[error("barcode {0} is already assigned")]
    DuplicateBarcode(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_business_rule(&self) -> bool {
        !matches!(self, WorkflowError::Validation { .. } | WorkflowError::Store(_))
    }
}

impl From<libsql::Error> for WorkflowError {
    fn from(error: libsql::Error) -> Self {
        WorkflowError::Store(error.into())
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_flatten_their_chain() {
        let inner = anyhow::anyhow!("disk I/O error").context("failed to commit");
        let err = WorkflowError::from(inner);
        assert_eq!(err.to_string(), "store error: failed to commit: disk I/O error");
        assert!(!err.is_business_rule());
    }

    #[test]
    fn insufficient_stock_is_a_business_rule() {
        let err = WorkflowError::InsufficientStock {
            item_id: 7,
            available: 1,
            requested: 2,
        };
        assert!(err.is_business_rule());
        assert_eq!(
            err.to_string(),
            "insufficient stock for item 7: available 1, requested 2"
        );
    }
}
