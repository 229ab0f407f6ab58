//! Account domain type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated platform account the daemon runs jobs under.
///
/// Session issuance lives outside this system; the daemon only requires that
/// an account row exists and is active when a job references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: String,

    /// Phone number the account is registered with
    pub phone_number: String,

    /// Session file name used by the protocol backend
    pub session_name: String,

    /// Whether this is the account jobs run under
    pub is_active: bool,

    /// When the account was registered
    pub created_at: DateTime<Utc>,

    /// When the account last ran a job
    pub last_used: Option<DateTime<Utc>>,
}

impl Account {
    /// Register a new, inactive account
    pub fn new(phone_number: impl Into<String>) -> Self {
        let phone_number = phone_number.into();
        let session_name = format!("session_{}", phone_number.replace('+', ""));
        Self {
            id: Uuid::now_v7().to_string(),
            phone_number,
            session_name,
            is_active: false,
            created_at: Utc::now(),
            last_used: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_inactive() {
        let account = Account::new("+15551234567");
        assert!(!account.is_active);
        assert_eq!(account.session_name, "session_15551234567");
        assert!(account.last_used.is_none());
    }
}
