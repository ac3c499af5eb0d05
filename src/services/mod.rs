pub mod auto_withdraw;
pub mod engine;
pub mod ingestor;
pub mod ledger;
pub mod matcher;
pub mod notifier;
