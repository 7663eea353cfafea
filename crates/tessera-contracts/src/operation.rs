//! The closed set of audited financial operations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Every kind of state-changing operation the ledger records.
///
/// The kebab-case string form is what gets canonicalized and stored, so a
/// variant's string must never change once entries using it exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    LoginSuccess,
    LoginFailed,
    Logout,
    AccountCreate,
    PasswordChange,
    PasswordReset,
    GoalCreate,
    GoalUpdate,
    GoalDelete,
    ReceiptUpload,
    ReceiptUpdate,
    ReceiptDelete,
    GstCalculation,
    PaygCalculation,
    AbnValidation,
    TaxEstimate,
}

impl OperationType {
    /// All variants, in declaration order.
    pub const ALL: [OperationType; 16] = [
        Self::LoginSuccess,
        Self::LoginFailed,
        Self::Logout,
        Self::AccountCreate,
        Self::PasswordChange,
        Self::PasswordReset,
        Self::GoalCreate,
        Self::GoalUpdate,
        Self::GoalDelete,
        Self::ReceiptUpload,
        Self::ReceiptUpdate,
        Self::ReceiptDelete,
        Self::GstCalculation,
        Self::PaygCalculation,
        Self::AbnValidation,
        Self::TaxEstimate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "login-success",
            Self::LoginFailed => "login-failed",
            Self::Logout => "logout",
            Self::AccountCreate => "account-create",
            Self::PasswordChange => "password-change",
            Self::PasswordReset => "password-reset",
            Self::GoalCreate => "goal-create",
            Self::GoalUpdate => "goal-update",
            Self::GoalDelete => "goal-delete",
            Self::ReceiptUpload => "receipt-upload",
            Self::ReceiptUpdate => "receipt-update",
            Self::ReceiptDelete => "receipt-delete",
            Self::GstCalculation => "gst-calculation",
            Self::PaygCalculation => "payg-calculation",
            Self::AbnValidation => "abn-validation",
            Self::TaxEstimate => "tax-estimate",
        }
    }

    /// Authentication and credential operations.
    ///
    /// Snapshots of these entries are withheld from query callers without an
    /// elevated role.
    pub fn is_security_sensitive(&self) -> bool {
        matches!(
            self,
            Self::LoginSuccess
                | Self::LoginFailed
                | Self::Logout
                | Self::AccountCreate
                | Self::PasswordChange
                | Self::PasswordReset
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| LedgerError::Malformed {
                reason: format!("unknown operation type '{s}'"),
            })
    }
}
