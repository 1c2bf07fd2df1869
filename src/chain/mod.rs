//! Chain module - the RPC façade used by every other component
//!
//! Each call on a [`ChainClient`] is a single round trip. There is no retry or
//! failover at this layer; callers that know the retry policy own it.

pub mod provider;

pub use provider::ChainProvider;

use crate::error::GatewayResult;
use crate::tx::PricedTransaction;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;

/// Outcome recorded in a mined transaction's receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
    /// The node returned a receipt without an interpretable `status` field
    Missing,
}

impl ReceiptStatus {
    pub fn from_code(code: Option<u64>) -> Self {
        match code {
            Some(1) => ReceiptStatus::Success,
            Some(0) => ReceiptStatus::Reverted,
            _ => ReceiptStatus::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

/// Fee market snapshot from `eth_feeHistory`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeHistory {
    /// Base fee of the pending block
    pub base_fee: U256,
    /// Priority fee rewards of the latest block, one per requested percentile
    pub rewards: Vec<U256>,
}

/// Thin, stateless access to the blockchain RPC endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID, cached after the first successful lookup
    async fn chain_id(&self) -> GatewayResult<u64>;

    async fn block_number(&self) -> GatewayResult<u64>;

    /// Gas limit of the latest block
    async fn block_gas_limit(&self) -> GatewayResult<U256>;

    async fn gas_price(&self) -> GatewayResult<U256>;

    async fn fee_history(&self, percentiles: &[f64]) -> GatewayResult<FeeHistory>;

    async fn balance(&self, address: Address) -> GatewayResult<U256>;

    /// Transaction count at the latest block, the authoritative next nonce
    async fn transaction_count(&self, address: Address) -> GatewayResult<u64>;

    /// Fails with `Estimation` when the node reports the call would revert
    async fn estimate_gas(&self, tx: &PricedTransaction) -> GatewayResult<U256>;

    /// Fails with `Submission` carrying a classified reason when the node refuses
    async fn send_raw(&self, raw: Bytes) -> GatewayResult<H256>;

    /// `None` while the transaction is not mined
    async fn receipt(&self, hash: H256) -> GatewayResult<Option<Receipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status_codes() {
        assert_eq!(ReceiptStatus::from_code(Some(1)), ReceiptStatus::Success);
        assert_eq!(ReceiptStatus::from_code(Some(0)), ReceiptStatus::Reverted);
        assert_eq!(ReceiptStatus::from_code(None), ReceiptStatus::Missing);
        assert_eq!(ReceiptStatus::from_code(Some(7)), ReceiptStatus::Missing);
    }
}
