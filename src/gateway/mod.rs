pub mod client;

pub use client::{
    AccountBalance, BankGatewayClient, ExternalStatement, GatewayError, TransferAck,
};
