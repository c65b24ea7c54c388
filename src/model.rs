use anyhow::Result;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Student,
    Borrower,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Student => "student",
            Role::Borrower => "borrower",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "student" => Some(Role::Student),
            "borrower" => Some(Role::Borrower),
            _ => None,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Admin => true,
            Role::Staff => matches!(capability, ManageItems | ProcessTransactions | ViewReports | Borrow),
            Role::Student | Role::Borrower => matches!(capability, Borrow),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageItems,
    DeleteItems,
    ProcessTransactions,
    ViewReports,
    Borrow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub department: Option<String>,
    pub date_registered: String,
}

impl User {
    pub fn can(&self, capability: Capability) -> bool {
        self.role.can(capability)
    }

    pub fn display_name(&self) -> &str {
        if !self.full_name.is_empty() {
            return &self.full_name;
        }
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// Timestamps are stored as fixed-width UTC text so that SQL string
/// comparison follows chronological order.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("invalid timestamp {s:?}: {e}"))?
        .with_timezone(&Utc))
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
