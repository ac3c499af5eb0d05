//! Status machines for transactions, statements and webhook logs.
//! Stored as VARCHAR; the enums own the legal transition edges.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Deposit,
    Withdraw,
    Bonus,
    GetCreditBack,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Deposit => "deposit",
            TransferType::Withdraw => "withdraw",
            TransferType::Bonus => "bonus",
            TransferType::GetCreditBack => "getcreditback",
        }
    }
}

impl FromStr for TransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransferType::Deposit),
            "withdraw" => Ok(TransferType::Withdraw),
            "bonus" => Ok(TransferType::Bonus),
            "getcreditback" => Ok(TransferType::GetCreditBack),
            other => Err(format!("unknown transfer type: {other}")),
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    PendingCredit,
    PendingTransfer,
    Finished,
    Canceled,
    Removed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::PendingCredit => "pending_credit",
            TxStatus::PendingTransfer => "pending_transfer",
            TxStatus::Finished => "finished",
            TxStatus::Canceled => "canceled",
            TxStatus::Removed => "removed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Canceled | TxStatus::Removed | TxStatus::Failed)
    }

    /// Legal edges of the transaction status machine.
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Finished)
                | (Pending, Canceled)
                | (PendingCredit, Pending)
                | (PendingCredit, Finished)
                | (PendingCredit, PendingTransfer)
                | (PendingCredit, Canceled)
                | (PendingTransfer, Finished)
                | (PendingTransfer, Canceled)
                | (PendingTransfer, Failed)
                | (Finished, Removed)
        )
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "pending_credit" => Ok(TxStatus::PendingCredit),
            "pending_transfer" => Ok(TxStatus::PendingTransfer),
            "finished" => Ok(TxStatus::Finished),
            "canceled" => Ok(TxStatus::Canceled),
            "removed" => Ok(TxStatus::Removed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Deposit,
    Withdraw,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::Deposit => "deposit",
            StatementType::Withdraw => "withdraw",
        }
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(StatementType::Deposit),
            "withdraw" => Ok(StatementType::Withdraw),
            other => Err(format!("unknown statement type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementStatus {
    Pending,
    Confirmed,
    Ignored,
}

impl StatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementStatus::Pending => "pending",
            StatementStatus::Confirmed => "confirmed",
            StatementStatus::Ignored => "ignored",
        }
    }
}

impl FromStr for StatementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StatementStatus::Pending),
            "confirmed" => Ok(StatementStatus::Confirmed),
            "ignored" => Ok(StatementStatus::Ignored),
            other => Err(format!("unknown statement status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

/// Whether the automation service has ever reached the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Never,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Never => "never",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(ConnectionStatus::Connected),
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "never" => Ok(ConnectionStatus::Never),
            other => Err(format!("unknown connection status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookLogStatus {
    Received,
    Processed,
    Duplicate,
    Orphan,
    Failed,
}

impl WebhookLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookLogStatus::Received => "received",
            WebhookLogStatus::Processed => "processed",
            WebhookLogStatus::Duplicate => "duplicate",
            WebhookLogStatus::Orphan => "orphan",
            WebhookLogStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_lifecycle_edges() {
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Finished));
        assert!(TxStatus::PendingCredit.can_transition_to(TxStatus::Pending));
        assert!(TxStatus::Finished.can_transition_to(TxStatus::Removed));
        assert!(TxStatus::Pending.can_transition_to(TxStatus::Canceled));
    }

    #[test]
    fn test_withdraw_lifecycle_edges() {
        assert!(TxStatus::PendingCredit.can_transition_to(TxStatus::PendingTransfer));
        assert!(TxStatus::PendingTransfer.can_transition_to(TxStatus::Finished));
        assert!(TxStatus::PendingTransfer.can_transition_to(TxStatus::Failed));
        assert!(TxStatus::PendingCredit.can_transition_to(TxStatus::Canceled));
    }

    #[test]
    fn test_illegal_edges_rejected() {
        assert!(!TxStatus::Finished.can_transition_to(TxStatus::Pending));
        assert!(!TxStatus::Canceled.can_transition_to(TxStatus::Finished));
        assert!(!TxStatus::Removed.can_transition_to(TxStatus::Finished));
        assert!(!TxStatus::Pending.can_transition_to(TxStatus::PendingTransfer));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Finished));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            TxStatus::Pending,
            TxStatus::PendingCredit,
            TxStatus::PendingTransfer,
            TxStatus::Finished,
            TxStatus::Canceled,
            TxStatus::Removed,
            TxStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<TxStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TxStatus::Canceled.is_terminal());
        assert!(TxStatus::Removed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(!TxStatus::PendingTransfer.is_terminal());
    }
}
