//! JSON-RPC chain provider backed by ethers

use super::{ChainClient, FeeHistory, Receipt, ReceiptStatus};
use crate::config::ChainConfig;
use crate::error::{GatewayError, GatewayResult, SubmissionFailure};
use crate::tx::PricedTransaction;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Single-endpoint provider implementing [`ChainClient`]
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP provider
    http: Provider<Http>,
    /// Chain ID resolved on first use
    chain_id: OnceCell<u64>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> GatewayResult<Self> {
        let http = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| {
                GatewayError::Config(format!("Invalid RPC URL {}: {}", config.rpc_url, e))
            })?
            .interval(Duration::from_millis(100));

        debug!("Added HTTP provider: {}", config.rpc_url);

        Ok(Self {
            config,
            http,
            chain_id: OnceCell::new(),
        })
    }

    /// Get the configured RPC endpoint
    pub fn rpc_url(&self) -> &str {
        &self.config.rpc_url
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    async fn chain_id(&self) -> GatewayResult<u64> {
        let chain_id = self
            .chain_id
            .get_or_try_init(|| async {
                let id = self
                    .http
                    .get_chainid()
                    .await
                    .map_err(|e| GatewayError::provider("eth_chainId", e))?;
                info!("Connected to chain {} via {}", id, self.config.rpc_url);
                Ok::<u64, GatewayError>(id.as_u64())
            })
            .await?;

        Ok(*chain_id)
    }

    async fn block_number(&self) -> GatewayResult<u64> {
        self.http
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| GatewayError::provider("eth_blockNumber", e))
    }

    async fn block_gas_limit(&self) -> GatewayResult<U256> {
        let block = self
            .http
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| GatewayError::provider("eth_getBlockByNumber", e))?
            .ok_or_else(|| GatewayError::provider("eth_getBlockByNumber", "No latest block"))?;

        Ok(block.gas_limit)
    }

    async fn gas_price(&self) -> GatewayResult<U256> {
        self.http
            .get_gas_price()
            .await
            .map_err(|e| GatewayError::provider("eth_gasPrice", e))
    }

    async fn fee_history(&self, percentiles: &[f64]) -> GatewayResult<FeeHistory> {
        let history = self
            .http
            .fee_history(1u64, BlockNumber::Latest, percentiles)
            .await
            .map_err(|e| GatewayError::provider("eth_feeHistory", e))?;

        // The last entry is the base fee of the block after `latest`
        let base_fee = history.base_fee_per_gas.last().copied().ok_or_else(|| {
            GatewayError::provider("eth_feeHistory", "No base fee, chain has no fee market")
        })?;

        let rewards = history.reward.into_iter().next().unwrap_or_default();
        if rewards.len() < percentiles.len() {
            return Err(GatewayError::provider(
                "eth_feeHistory",
                format!(
                    "no reward percentiles: got {} of {} requested",
                    rewards.len(),
                    percentiles.len()
                ),
            ));
        }

        Ok(FeeHistory { base_fee, rewards })
    }

    async fn balance(&self, address: Address) -> GatewayResult<U256> {
        self.http
            .get_balance(address, None)
            .await
            .map_err(|e| GatewayError::provider("eth_getBalance", e))
    }

    async fn transaction_count(&self, address: Address) -> GatewayResult<u64> {
        let nonce = self
            .http
            .get_transaction_count(address, None)
            .await
            .map_err(|e| GatewayError::provider("eth_getTransactionCount", e))?;

        Ok(nonce.as_u64())
    }

    async fn estimate_gas(&self, tx: &PricedTransaction) -> GatewayResult<U256> {
        self.http
            .estimate_gas(&tx.to_typed(), None)
            .await
            .map_err(|e| match RpcError::as_error_response(&e) {
                Some(resp) => GatewayError::Estimation(resp.message.clone()),
                None => GatewayError::provider("eth_estimateGas", e),
            })
    }

    async fn send_raw(&self, raw: Bytes) -> GatewayResult<H256> {
        match self.http.send_raw_transaction(raw).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => match RpcError::as_error_response(&e) {
                Some(resp) => {
                    let reason = SubmissionFailure::classify(&resp.message);
                    warn!(
                        code = resp.code,
                        %reason,
                        "Node refused raw transaction: {}", resp.message
                    );
                    Err(GatewayError::Submission {
                        reason,
                        message: resp.message.clone(),
                    })
                }
                None => Err(GatewayError::provider("eth_sendRawTransaction", e)),
            },
        }
    }

    async fn receipt(&self, hash: H256) -> GatewayResult<Option<Receipt>> {
        let receipt = self
            .http
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| GatewayError::provider("eth_getTransactionReceipt", e))?;

        Ok(receipt.map(|r| {
            debug!("Receipt for {:?}: {:?}", hash, r);
            Receipt {
                status: ReceiptStatus::from_code(r.status.map(|s| s.as_u64())),
                block_number: r.block_number.map(|b| b.as_u64()),
            }
        }))
    }
}
