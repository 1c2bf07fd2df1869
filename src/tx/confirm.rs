//! Bounded-time confirmation tracking
//!
//! Both waits poll at a fixed interval and never sleep past their deadline, so a
//! timeout fires within one RPC round trip of `max_wait`. Polling is read-only
//! and needs no account lock.

use crate::chain::{ChainClient, ReceiptStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

use ethers::types::H256;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Final classification of a transaction handed back to a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Mined(ReceiptStatus),
    TimedOut,
    /// The nonce was already used by a different transaction
    Dropped,
    /// A replacement was refused for being too cheap
    Underpriced,
}

impl ConfirmationOutcome {
    /// Outcome implied by an error, if the error classifies one
    pub fn from_error(err: &GatewayError) -> Option<Self> {
        match err {
            GatewayError::StaleNonce { .. } => Some(ConfirmationOutcome::Dropped),
            GatewayError::Underpriced { .. } => Some(ConfirmationOutcome::Underpriced),
            GatewayError::ReceiptTimeout { .. } | GatewayError::BlockTimeout { .. } => {
                Some(ConfirmationOutcome::TimedOut)
            }
            _ => None,
        }
    }
}

/// Polls the chain for block depth and receipts
pub struct ConfirmationTracker {
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl ConfirmationTracker {
    /// Create a new confirmation tracker
    pub fn new(chain: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
        }
    }

    /// Wait until `count` blocks are mined on top of the current head.
    /// Returns the block number that satisfied the wait.
    pub async fn wait_for_blocks(&self, count: u64, max_wait: Duration) -> GatewayResult<u64> {
        let started = Instant::now();
        let start_block = self.chain.block_number().await?;
        let mut current_block = start_block;

        while current_block.saturating_sub(start_block) < count {
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                warn!(
                    "{} blocks have not been mined within {:?} (start {}, head {})",
                    count, max_wait, start_block, current_block
                );
                return Err(GatewayError::BlockTimeout {
                    requested: count,
                    elapsed,
                });
            }

            sleep(self.poll_interval.min(max_wait - elapsed)).await;
            current_block = self.chain.block_number().await?;
        }

        debug!(
            "Waited {} blocks ({} -> {}) in {:?}",
            count,
            start_block,
            current_block,
            started.elapsed()
        );
        Ok(current_block)
    }

    /// Wait until the transaction has a receipt and return its status
    pub async fn wait_for_receipt(
        &self,
        hash: H256,
        max_wait: Duration,
    ) -> GatewayResult<ReceiptStatus> {
        let started = Instant::now();

        loop {
            if let Some(receipt) = self.chain.receipt(hash).await? {
                let elapsed = started.elapsed();
                metrics::record_receipt_wait(elapsed.as_secs_f64());

                if receipt.status == ReceiptStatus::Missing {
                    error!("Receipt for {:?} has no \"status\" field", hash);
                }
                info!(
                    "Transaction {:?} mined in block {:?} with status {:?}",
                    hash, receipt.block_number, receipt.status
                );
                return Ok(receipt.status);
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                warn!("No receipt for {:?} after {:?}", hash, elapsed);
                return Err(GatewayError::ReceiptTimeout { hash, elapsed });
            }

            sleep(self.poll_interval.min(max_wait - elapsed)).await;
        }
    }

    /// Receipt status right now, without waiting
    pub async fn status(&self, hash: H256) -> GatewayResult<Option<ReceiptStatus>> {
        Ok(self.chain.receipt(hash).await?.map(|r| r.status))
    }

    /// Like `wait_for_receipt`, with a timeout folded into the outcome
    pub async fn outcome(
        &self,
        hash: H256,
        max_wait: Duration,
    ) -> GatewayResult<ConfirmationOutcome> {
        match self.wait_for_receipt(hash, max_wait).await {
            Ok(status) => Ok(ConfirmationOutcome::Mined(status)),
            Err(GatewayError::ReceiptTimeout { .. }) => Ok(ConfirmationOutcome::TimedOut),
            Err(e) => Err(e),
        }
    }
}
