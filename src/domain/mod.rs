pub mod actor;
pub mod money;
pub mod status;

pub use actor::AuditActor;
pub use status::{
    AccountStatus, ConnectionStatus, StatementStatus, StatementType, TransferType, TxStatus,
    WebhookLogStatus,
};
